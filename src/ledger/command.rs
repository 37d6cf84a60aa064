use bytes::Bytes;
use thiserror::Error;

// The wire format for commands is colon-separated ascii, either "OP" or
// "OP:AMOUNT". Decoding must be a total, side-effect-free function of the
// bytes: every replica decodes a committed entry to the identical command
// (or the identical error), no matter where or when it runs.

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    // Adds the amount to the account balance.
    Credit(f64),

    // Deducts the amount from the account balance.
    Debit(f64),

    // Reads the current balance without mutating it.
    GetBalance,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    #[error("malformed amount for {op}: {reason}")]
    MalformedAmount { op: &'static str, reason: String },
}

impl Command {
    // Parses the supplied payload bytes into a command. Inputs which are not
    // valid utf-8 are treated the same as an unrecognized operation token.
    pub fn decode(raw: &Bytes) -> Result<Command, DecodeError> {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => {
                return Err(DecodeError::UnknownOperation(format!(
                    "<{} bytes of non-utf8 data>",
                    raw.len()
                )));
            }
        };

        let (op, amount) = match text.split_once(':') {
            Some((op, amount)) => (op, Some(amount)),
            None => (text, None),
        };

        match op {
            "CREDIT" => Ok(Command::Credit(parse_amount("CREDIT", amount)?)),
            "DEBIT" => Ok(Command::Debit(parse_amount("DEBIT", amount)?)),
            "GET_BALANCE" => match amount {
                // A balance read carries no payload. Anything trailing the
                // operation token means the client built a bad request.
                None => Ok(Command::GetBalance),
                Some(extra) => Err(DecodeError::MalformedAmount {
                    op: "GET_BALANCE",
                    reason: format!("unexpected amount {:?}", extra),
                }),
            },
            other => Err(DecodeError::UnknownOperation(other.to_string())),
        }
    }

    // Serializes this command back into its wire representation. Encoding and
    // decoding round-trip for every valid command.
    pub fn encode(&self) -> Bytes {
        match self {
            Command::Credit(amount) => Bytes::from(format!("CREDIT:{}", amount)),
            Command::Debit(amount) => Bytes::from(format!("DEBIT:{}", amount)),
            Command::GetBalance => Bytes::from_static(b"GET_BALANCE"),
        }
    }

    // The operation token this command serializes to.
    pub fn op_name(&self) -> &'static str {
        match self {
            Command::Credit(_) => "CREDIT",
            Command::Debit(_) => "DEBIT",
            Command::GetBalance => "GET_BALANCE",
        }
    }

    // Returns true if applying this command never mutates the ledger.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Command::GetBalance)
    }
}

fn parse_amount(op: &'static str, amount: Option<&str>) -> Result<f64, DecodeError> {
    let text = amount.ok_or(DecodeError::MalformedAmount {
        op,
        reason: "missing amount".to_string(),
    })?;

    let value: f64 = text.parse().map_err(|_| DecodeError::MalformedAmount {
        op,
        reason: format!("not a number: {:?}", text),
    })?;

    // "NaN" and "inf" parse successfully but have no deterministic ledger
    // semantics, so they fail decoding along with negative amounts.
    if !value.is_finite() {
        return Err(DecodeError::MalformedAmount {
            op,
            reason: format!("not finite: {:?}", text),
        });
    }
    if value < 0.0 {
        return Err(DecodeError::MalformedAmount {
            op,
            reason: format!("negative: {:?}", text),
        });
    }

    Ok(value)
}
