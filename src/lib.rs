//! Bidirectional tokenizer and command builder for AT-capable modems.
//!
//! AT (short for "ATtention") is the textual protocol spoken by cellular,
//! Wi-Fi and DSL modems. The modem side ("Terminal Adaptor", TA) answers
//! commands issued by application code ("Terminal Equipment", TE) and pushes
//! out unsolicited response codes (URCs) for events like incoming calls or
//! network loss. This crate implements the lower, protocol-agnostic half of
//! the TE:
//! * a receive path that stores raw modem bytes in a lock-free ring buffer
//!   and tokenizes them on demand into command mnemonics, arguments, quoted
//!   and hex-encoded strings, integers of configurable radix, and response
//!   codes,
//! * a transmit path that builds syntactically correct AT command lines
//!   through a small state machine and hands them to a user-provided write
//!   callback, optionally consuming the modem's echo afterwards,
//! * a lock that serializes solicited command/response exchanges against a
//!   URC listener.
//!
//! Interpreting the tokens (knowing that `+CREG` carries two integers, say)
//! is left to higher layers.
//!
//! # Example
//! This example builds `AT+COPS=1,0,"T-Mobile"` and reads back the final
//! response code. Bytes coming from the modem are handed to the transceiver
//! through the [`Feeder`], typically from a UART interrupt or reader thread.
//!
//! ```no_run
//! # fn example() -> at_transceiver::Result<()> {
//! use std::time::Duration;
//! use at_transceiver::{ResponseCode, Transceiver, WriteOptions};
//!
//! let (transceiver, _feeder) = Transceiver::new(
//!     1024,
//!     Box::new(|data: &[u8]| {
//!         // hand bytes to the UART driver
//!         Ok(data.len())
//!     }),
//! )?;
//!
//! let mut guard = transceiver.lock();
//! guard.prepare_write(WriteOptions::NO_ECHO, 128)?;
//! guard.write_set("+COPS")?;
//! guard.write_i32(1, 10)?;
//! guard.write_i32(0, 10)?;
//! guard.write_string("T-Mobile")?;
//! guard.flush(Duration::from_secs(1))?;
//!
//! let code = guard.read_code(Duration::from_secs(5))?;
//! assert_eq!(code, ResponseCode::Ok);
//! # Ok(())
//! # }
//! ```
//!
//! # Example
//! This example lets the [`engine::Engine`] own the transceiver. The engine
//! pumps bytes from a serial port into the receive ring and dispatches
//! unsolicited traffic to a handler whenever no command exchange is running.
//!
//! ```no_run
//! # #[cfg(feature = "serial")]
//! # fn example() -> at_transceiver::Result<()> {
//! use std::time::Duration;
//! use at_transceiver::{TransceiverGuard, engine::Engine};
//!
//! fn on_urc(t: &mut TransceiverGuard<'_>) {
//!     // e.g. read_command_any() and dispatch on the mnemonic
//!     let _ = t.skip_line(Duration::from_millis(100));
//! }
//!
//! let engine = Engine::open_serial("/dev/ttyUSB2", 115_200, 1024, on_urc)?;
//!
//! let mut guard = engine.open()?;
//! guard.write_action("+CGMM")?;
//! guard.flush(Duration::from_secs(1))?;
//! let _model = guard.read_argument(64, Duration::from_secs(1))?;
//! drop(guard);
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod code;
pub mod config;
pub mod engine;
pub(crate) mod ring;
pub(crate) mod sync;
pub mod transceiver;

pub use code::ResponseCode;
pub use config::{WriteOptions, WriteState};
pub use engine::{Engine, UrcHandler};
pub use transceiver::{Feeder, Transceiver, TransceiverGuard, WriteFunction};

/// Errors for the transceiver api
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    InvalidParam(String),
    /// A write-sequence operation was attempted in a state that does not
    /// permit it. The offending call leaves buffers and state untouched.
    #[error("not permitted in write state {0:?}")]
    InconsistentState(WriteState),
    /// A blocking operation exceeded its timeout. `actual` reflects the
    /// progress made before expiry (bytes read, skipped or consumed), so
    /// partial data stays recoverable.
    #[error("timed out after {actual} bytes")]
    Timeout { actual: usize },
    /// A bounded resource ran out: the receive ring during a feed, the Tx
    /// buffer during command construction, or the target integer width
    /// during parsing. `actual` is the number of bytes accepted before the
    /// limit was hit.
    #[error("out of resources, {actual} bytes accepted")]
    OutOfResources { actual: usize },
    #[error("{0}")]
    UnexpectedContent(String),
    /// The destination limit was smaller than the token. The ring is still
    /// consumed through the token terminator, so the read sequence may
    /// continue; `partial` holds the bytes captured before the limit.
    #[error("token truncated, {} bytes kept", partial.len())]
    Truncated { partial: Vec<u8> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
