use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

// Identifies an entry's place in the replicated log. The total order compares
// by term first, then index, matching the order in which a correct
// replication engine commits entries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct LogPosition {
    pub term: u64,
    pub index: u64,
}

impl LogPosition {
    // The lowest possible position. A freshly constructed guard with no
    // snapshot sits here; no real entry ever occupies it.
    pub const ZERO: LogPosition = LogPosition { term: 0, index: 0 };

    pub fn new(term: u64, index: u64) -> Self {
        LogPosition { term, index }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(term={},index={})", self.term, self.index)
    }
}

// The verdict the ordering guard hands back for an incoming entry position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    // Strictly ahead of everything applied so far, safe to apply.
    Admit,

    // The entry is already reflected in the ledger (duplicate delivery, or
    // replay of entries covered by the restored snapshot). Harmless.
    AlreadyApplied,

    // The entry lies behind the applied position without being explainable
    // as snapshot replay. The linear-commit-stream guarantee is broken.
    OutOfOrder { applied: LogPosition },

    // The entry skips ahead within a term-run, leaving a hole. Also a
    // protocol violation.
    Gap { applied: LogPosition },
}

// Tracks the position of the most recently applied entry and decides, for
// each incoming entry, whether applying it preserves exactly-once in-order
// application. The guard is only ever consulted and advanced by the single
// apply worker while it holds the state lock, which is what makes the
// "advance + ledger mutation" pair atomic to concurrent readers.
pub struct OrderingGuard {
    // Position of the last entry reflected in the ledger.
    applied: LogPosition,

    // Position loaded from the snapshot at startup, ZERO if none. Entries at
    // or below this position are replays of already-snapshotted work and are
    // discarded silently rather than treated as ordering violations.
    restored: LogPosition,
}

impl OrderingGuard {
    pub fn new() -> Self {
        Self::restore(LogPosition::ZERO)
    }

    pub fn restore(position: LogPosition) -> Self {
        OrderingGuard {
            applied: position,
            restored: position,
        }
    }

    pub fn applied(&self) -> LogPosition {
        self.applied
    }

    // Decides whether an entry at the supplied position may be applied.
    pub fn admit(&self, position: LogPosition) -> Admission {
        if position <= self.restored {
            debug!(
                entry = %position,
                snapshot = %self.restored,
                "position covered by restored snapshot"
            );
            return Admission::AlreadyApplied;
        }
        if position == self.applied {
            return Admission::AlreadyApplied;
        }
        if position < self.applied {
            return Admission::OutOfOrder {
                applied: self.applied,
            };
        }
        // Within a term the index must advance one step at a time. A new term
        // may begin wherever the replication engine says it does.
        if position.term == self.applied.term && position.index > self.applied.index + 1 {
            return Admission::Gap {
                applied: self.applied,
            };
        }
        Admission::Admit
    }

    // Records that the entry at the supplied position has been applied. Must
    // only be called for positions the guard just admitted.
    pub fn advance(&mut self, position: LogPosition) {
        debug_assert!(position > self.applied);
        self.applied = position;
    }
}
