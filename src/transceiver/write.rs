/* Write api: state-machine guarded construction of AT command lines. */

use super::TransceiverGuard;
use crate::config::{WriteOptions, WriteState};
use crate::{Error, Result};
use std::time::Duration;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Format an integer for the wire. Base 0 is treated as decimal. Octal and
/// hex render the two's-complement bit pattern of the operand width, so
/// negative values never carry a sign outside decimal.
fn format_integer(value: i64, bits: u32, base: u32) -> Result<String> {
    match base {
        0 | 10 => Ok(value.to_string()),
        8 | 16 => {
            let unsigned = (value as u64) & ((1u64 << bits) - 1);
            Ok(if base == 8 {
                format!("{:o}", unsigned)
            } else {
                format!("{:X}", unsigned)
            })
        }
        _ => Err(Error::InvalidParam(format!("unsupported radix {}", base))),
    }
}

impl TransceiverGuard<'_> {
    /// Start a fresh write-sequence, discarding any previous partial one.
    ///
    /// `options` stay in force for every subsequent write call including
    /// flush. `tx_capacity` bounds the assembled command including the
    /// final `<S3><S4>`; it is ignored under [`WriteOptions::NO_BUFFER`],
    /// where fragments travel straight to the write callback.
    pub fn prepare_write(&mut self, options: WriteOptions, tx_capacity: usize) -> Result<()> {
        if !options.contains(WriteOptions::NO_BUFFER) && tx_capacity == 0 {
            return Err(Error::InvalidParam(
                "tx capacity must be non-zero without NO_BUFFER".to_string(),
            ));
        }
        let session = &mut *self.session;
        session.options = options;
        session.state = WriteState::Start;
        session.tx.clear();
        session.tx_used = 0;
        session.tx_capacity = if options.contains(WriteOptions::NO_BUFFER) {
            0
        } else {
            session.tx.reserve(tx_capacity);
            tx_capacity
        };
        Ok(())
    }

    fn check_state(&self, allowed: &[WriteState]) -> Result<()> {
        if self.session.options.contains(WriteOptions::NO_STATE) {
            return Ok(());
        }
        if allowed.contains(&self.session.state) {
            Ok(())
        } else {
            Err(Error::InconsistentState(self.session.state))
        }
    }

    fn set_state(&mut self, state: WriteState) {
        if !self.session.options.contains(WriteOptions::NO_STATE) {
            self.session.state = state;
        }
    }

    /// Hand one fragment to the Tx buffer, or directly to the write
    /// callback under [`WriteOptions::NO_BUFFER`]. A rejected fragment
    /// leaves the buffer untouched.
    fn emit(&mut self, data: &[u8]) -> Result<()> {
        let session = &mut *self.session;
        if session.options.contains(WriteOptions::NO_BUFFER) {
            let n = (session.write)(data)?;
            if n != data.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "write callback accepted a partial fragment",
                )));
            }
        } else {
            if session.tx_used + data.len() > session.tx_capacity {
                return Err(Error::OutOfResources {
                    actual: session.tx_used,
                });
            }
            session.tx.extend_from_slice(data);
        }
        session.tx_used += data.len();
        Ok(())
    }

    /// Emit a parameter, inserting the `,` separator when one or more
    /// parameters were written before.
    fn write_parameter(&mut self, payload: &[u8]) -> Result<()> {
        self.check_state(&[WriteState::Command, WriteState::Argument])?;
        let needs_separator = !self.session.options.contains(WriteOptions::NO_STATE)
            && self.session.state == WriteState::Argument;
        if needs_separator {
            let mut fragment = Vec::with_capacity(payload.len() + 1);
            fragment.push(b',');
            fragment.extend_from_slice(payload);
            self.emit(&fragment)?;
        } else {
            self.emit(payload)?;
        }
        self.set_state(WriteState::Argument);
        Ok(())
    }

    /// Write an AT action command, `AT<action>`.
    ///
    /// The `AT` characters are inserted here and must not be part of
    /// `action`; a command prefix like `+` must be. An empty action
    /// produces the bare `AT` attention check. Action commands take no
    /// parameters, so the sequence jumps straight to its end state.
    pub fn write_action(&mut self, action: &str) -> Result<()> {
        self.check_state(&[WriteState::Start])?;
        self.emit(format!("AT{}", action).as_bytes())?;
        self.set_state(WriteState::End);
        Ok(())
    }

    /// Write an AT set command, `AT<set>=`, to be followed by parameters.
    pub fn write_set(&mut self, set: &str) -> Result<()> {
        self.check_state(&[WriteState::Start])?;
        self.emit(format!("AT{}=", set).as_bytes())?;
        self.set_state(WriteState::Command);
        Ok(())
    }

    /// Write an AT get command, `AT<get>?`.
    pub fn write_get(&mut self, get: &str) -> Result<()> {
        self.check_state(&[WriteState::Start])?;
        self.emit(format!("AT{}?", get).as_bytes())?;
        self.set_state(WriteState::End);
        Ok(())
    }

    /// Append a signed 8 bit parameter in the given radix (0, 8, 10, 16;
    /// 0 means decimal).
    pub fn write_i8(&mut self, x: i8, base: u32) -> Result<()> {
        let digits = format_integer(i64::from(x), 8, base)?;
        self.write_parameter(digits.as_bytes())
    }

    /// Append an unsigned 8 bit parameter in the given radix.
    pub fn write_u8(&mut self, x: u8, base: u32) -> Result<()> {
        let digits = format_integer(i64::from(x), 8, base)?;
        self.write_parameter(digits.as_bytes())
    }

    /// Append a signed 16 bit parameter in the given radix.
    pub fn write_i16(&mut self, x: i16, base: u32) -> Result<()> {
        let digits = format_integer(i64::from(x), 16, base)?;
        self.write_parameter(digits.as_bytes())
    }

    /// Append an unsigned 16 bit parameter in the given radix.
    pub fn write_u16(&mut self, x: u16, base: u32) -> Result<()> {
        let digits = format_integer(i64::from(x), 16, base)?;
        self.write_parameter(digits.as_bytes())
    }

    /// Append a signed 32 bit parameter in the given radix.
    pub fn write_i32(&mut self, x: i32, base: u32) -> Result<()> {
        let digits = format_integer(i64::from(x), 32, base)?;
        self.write_parameter(digits.as_bytes())
    }

    /// Append an unsigned 32 bit parameter in the given radix.
    pub fn write_u32(&mut self, x: u32, base: u32) -> Result<()> {
        let digits = format_integer(i64::from(x), 32, base)?;
        self.write_parameter(digits.as_bytes())
    }

    /// Append a string parameter enclosed in quotes. The content is copied
    /// verbatim, no escaping is applied.
    pub fn write_string(&mut self, string: &str) -> Result<()> {
        self.write_parameter(format!("\"{}\"", string).as_bytes())
    }

    /// Append a byte buffer as quoted uppercase hex parameter.
    pub fn write_hex_string(&mut self, data: &[u8]) -> Result<()> {
        let mut payload = Vec::with_capacity(data.len() * 2 + 2);
        payload.push(b'"');
        for &b in data {
            payload.push(HEX_DIGITS[usize::from(b >> 4)]);
            payload.push(HEX_DIGITS[usize::from(b & 0x0F)]);
        }
        payload.push(b'"');
        self.write_parameter(&payload)
    }

    /// Write free-form bytes outside the AT structure, then assume
    /// `new_state` for the rest of the sequence. The transceiver cannot
    /// derive the state from arbitrary bytes, so the caller provides it;
    /// ignored under [`WriteOptions::NO_STATE`].
    pub fn write(&mut self, data: &[u8], new_state: WriteState) -> Result<()> {
        self.emit(data)?;
        self.set_state(new_state);
        Ok(())
    }

    /// Finish the command: append `<S3><S4>` (unless
    /// [`WriteOptions::NO_FINAL_S3S4`]), hand any buffered bytes to the
    /// write callback, and consume the echo (unless
    /// [`WriteOptions::NO_ECHO`]) by skipping exactly the emitted byte
    /// count from the receive ring within `timeout`.
    ///
    /// The sequence then restarts at [`WriteState::Start`] with the same
    /// options, ready for the next command.
    pub fn flush(&mut self, timeout: Duration) -> Result<()> {
        self.check_state(&[WriteState::End, WriteState::Argument])?;
        if !self.session.options.contains(WriteOptions::NO_FINAL_S3S4) {
            self.emit(b"\r\n")?;
        }
        {
            let session = &mut *self.session;
            if !session.options.contains(WriteOptions::NO_BUFFER) && !session.tx.is_empty() {
                let n = (session.write)(&session.tx)?;
                if n != session.tx.len() {
                    return Err(Error::Io(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "write callback accepted a partial command",
                    )));
                }
            }
        }
        let echoed = self.session.tx_used;
        self.session.tx.clear();
        self.session.tx_used = 0;
        self.session.state = WriteState::Start;
        if !self.session.options.contains(WriteOptions::NO_ECHO) {
            self.skip_bytes(echoed, timeout)?;
        }
        Ok(())
    }
}
