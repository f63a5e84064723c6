// Final, intermediate and unsolicited AT response codes
use crate::Error;
use std::str::FromStr;

/// Closed enumeration of the AT response codes understood by the
/// tokenizer, with a two-way mapping to their canonical text.
///
/// `Display` yields the on-wire text; for [`ConnectDataRate`]
/// (`CONNECT<rate>`) this is the bare `CONNECT` stem, the rate digits are
/// not retained.
///
/// [`ConnectDataRate`]: ResponseCode::ConnectDataRate
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ResponseCode {
    #[display("OK")]
    Ok,
    #[display("CONNECT")]
    Connect,
    #[display("RING")]
    Ring,
    #[display("NO CARRIER")]
    NoCarrier,
    #[display("ERROR")]
    Error,
    #[display("NO DIALTONE")]
    NoDialtone,
    #[display("BUSY")]
    Busy,
    #[display("NO ANSWER")]
    NoAnswer,
    /// `CONNECT` followed by a data rate, e.g. `CONNECT 9600`.
    #[display("CONNECT")]
    ConnectDataRate,
    #[display("NOT SUPPORTED")]
    NotSupported,
    #[display("INVALID COMMAND LINE")]
    InvalidCommandLine,
    #[display("CR")]
    Cr,
    #[display("SIM DROP")]
    SimDrop,
    #[display("SEND OK")]
    SendOk,
    #[display("SEND FAIL")]
    SendFail,
    #[display("ABORTED")]
    Aborted,
}

impl ResponseCode {
    /// The numeric form of this code where ITU-T V.250 defines one.
    pub fn numeric(&self) -> Option<u8> {
        match self {
            Self::Ok => Some(0),
            Self::Connect => Some(1),
            Self::Ring => Some(2),
            Self::NoCarrier => Some(3),
            Self::Error => Some(4),
            Self::NoDialtone => Some(6),
            Self::Busy => Some(7),
            Self::NoAnswer => Some(8),
            Self::ConnectDataRate => Some(9),
            _ => None,
        }
    }
}

impl FromStr for ResponseCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Self::Ok),
            "CONNECT" => Ok(Self::Connect),
            "RING" => Ok(Self::Ring),
            "NO CARRIER" => Ok(Self::NoCarrier),
            "ERROR" => Ok(Self::Error),
            "NO DIALTONE" => Ok(Self::NoDialtone),
            "BUSY" => Ok(Self::Busy),
            "NO ANSWER" => Ok(Self::NoAnswer),
            "NOT SUPPORTED" => Ok(Self::NotSupported),
            "INVALID COMMAND LINE" => Ok(Self::InvalidCommandLine),
            "CR" => Ok(Self::Cr),
            "SIM DROP" => Ok(Self::SimDrop),
            "SEND OK" => Ok(Self::SendOk),
            "SEND FAIL" => Ok(Self::SendFail),
            "ABORTED" => Ok(Self::Aborted),
            _ => {
                // CONNECT with a trailing data rate, e.g. "CONNECT 9600".
                let rate = s
                    .strip_prefix("CONNECT")
                    .map(|rest| rest.strip_prefix(' ').unwrap_or(rest));
                match rate {
                    Some(digits)
                        if !digits.is_empty()
                            && digits.bytes().all(|b| b.is_ascii_digit()) =>
                    {
                        Ok(Self::ConnectDataRate)
                    }
                    _ => Err(Error::UnexpectedContent(format!(
                        "unknown response code: {}",
                        s
                    ))),
                }
            }
        }
    }
}
