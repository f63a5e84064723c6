/* Read api: tokenizes the receive ring into AT response elements. */

use super::TransceiverGuard;
use crate::code::ResponseCode;
use crate::{Error, Result};
use std::time::{Duration, Instant};

/// V.250 line termination characters.
const S3: u8 = b'\r';
const S4: u8 = b'\n';

/// Upper bound while scanning for a response code line; covers the longest
/// defined code text plus a `CONNECT` data rate.
const MAX_CODE_LEN: usize = 32;

/// Whitespace trimmed around unquoted arguments: space, `<S3>`, tab.
fn is_argument_whitespace(b: u8) -> bool {
    b == b' ' || b == S3 || b == b'\t'
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// `strtol`-shaped integer parse over a whole token: optional sign,
/// optional `0x`/`0X` prefix (base 16 or auto), leading `0` selects octal
/// when the base is auto-detected. `min`/`max` bound the target width.
fn parse_integer(token: &[u8], base: u32, min: i64, max: i64) -> Result<i64> {
    let mut rest = token;
    let mut negative = false;
    match rest.first() {
        Some(b'+') => rest = &rest[1..],
        Some(b'-') => {
            negative = true;
            rest = &rest[1..];
        }
        _ => {}
    }
    if negative && min >= 0 {
        return Err(Error::UnexpectedContent(
            "sign on unsigned integer argument".to_string(),
        ));
    }

    let mut radix = base;
    if (base == 16 || base == 0)
        && rest.len() >= 2
        && rest[0] == b'0'
        && (rest[1] == b'x' || rest[1] == b'X')
    {
        rest = &rest[2..];
        radix = 16;
    }
    if radix == 0 {
        radix = if rest.len() > 1 && rest[0] == b'0' { 8 } else { 10 };
    }
    if rest.is_empty() {
        return Err(Error::UnexpectedContent(
            "empty integer argument".to_string(),
        ));
    }

    // Accumulate the magnitude; `limit` is the largest magnitude the
    // target width can hold for the parsed sign.
    let limit = if negative { -min } else { max };
    let mut acc: i64 = 0;
    for &b in rest {
        let digit = match hex_nibble(b) {
            Some(v) if u32::from(v) < radix => i64::from(v),
            _ => {
                return Err(Error::UnexpectedContent(format!(
                    "invalid digit {:?} for radix {}",
                    b as char, radix
                )));
            }
        };
        acc = match acc
            .checked_mul(i64::from(radix))
            .and_then(|a| a.checked_add(digit))
        {
            Some(a) if a <= limit => a,
            _ => return Err(Error::OutOfResources { actual: 0 }),
        };
    }
    Ok(if negative { -acc } else { acc })
}

impl TransceiverGuard<'_> {
    /// Consume one byte, updating the start-of-line flag. `None` once the
    /// deadline passes without a byte arriving.
    fn take_syntax_byte(&mut self, deadline: Instant) -> Option<u8> {
        let mut byte = [0u8; 1];
        loop {
            if self.shared.ring.read(&mut byte) == 1 {
                self.session.start_of_line = byte[0] == S4;
                return Some(byte[0]);
            }
            if !self.shared.rx_ready.wait_deadline(deadline) {
                // Final re-check for bytes that raced the deadline.
                if self.shared.ring.read(&mut byte) == 1 {
                    self.session.start_of_line = byte[0] == S4;
                    return Some(byte[0]);
                }
                return None;
            }
        }
    }

    /// Advance past leading whitespace to the opening `"` of a string
    /// argument.
    fn expect_opening_quote(&mut self, deadline: Instant, consumed: &mut usize) -> Result<()> {
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: *consumed });
            };
            *consumed += 1;
            if b == b'"' {
                return Ok(());
            }
            if !is_argument_whitespace(b) {
                return Err(Error::UnexpectedContent(format!(
                    "expected opening quote, found {:?}",
                    b as char
                )));
            }
        }
    }

    /// Consume up to and including the `,` or `<S4>` closing the current
    /// argument.
    fn consume_argument_terminator(
        &mut self,
        deadline: Instant,
        consumed: &mut usize,
    ) -> Result<()> {
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: *consumed });
            };
            *consumed += 1;
            if b == b',' || b == S4 {
                return Ok(());
            }
        }
    }

    /// Collect an unquoted argument up to its `,`/`<S4>` terminator with
    /// surrounding whitespace trimmed. Interior whitespace is preserved;
    /// the terminator is consumed. The returned flag reports whether the
    /// argument exceeded `limit`.
    fn collect_argument(
        &mut self,
        limit: Option<usize>,
        deadline: Instant,
    ) -> Result<(Vec<u8>, bool)> {
        let mut out = Vec::new();
        // Whitespace run that turns out to be interior once more content
        // follows; dropped as trailing whitespace at the terminator.
        let mut pending_ws: Vec<u8> = Vec::new();
        let mut truncated = false;
        let mut consumed = 0usize;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b',' || b == S4 {
                return Ok((out, truncated));
            }
            if is_argument_whitespace(b) {
                if !out.is_empty() {
                    pending_ws.push(b);
                }
                continue;
            }
            for w in pending_ws.drain(..) {
                match limit {
                    Some(l) if out.len() >= l => truncated = true,
                    _ => out.push(w),
                }
            }
            match limit {
                Some(l) if out.len() >= l => truncated = true,
                _ => out.push(b),
            }
        }
    }

    /// Read raw bytes, bypassing the tokenizer. Blocks until `dst` is full
    /// or `timeout` expires; on timeout the bytes obtained so far are in
    /// the prefix of `dst` and counted in the error. Does not update the
    /// start-of-line flag.
    pub fn read(&mut self, dst: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut total = 0;
        while total < dst.len() {
            total += self.shared.ring.read(&mut dst[total..]);
            if total == dst.len() {
                break;
            }
            if !self.shared.rx_ready.wait_deadline(deadline) {
                total += self.shared.ring.read(&mut dst[total..]);
                if total < dst.len() {
                    return Err(Error::Timeout { actual: total });
                }
            }
        }
        Ok(total)
    }

    /// Like [`read`](Self::read), but discards the bytes.
    pub fn skip_bytes(&mut self, length: usize, timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        let mut total = 0;
        while total < length {
            total += self.shared.ring.pop(length - total);
            if total == length {
                break;
            }
            if !self.shared.rx_ready.wait_deadline(deadline) {
                total += self.shared.ring.pop(length - total);
                if total < length {
                    return Err(Error::Timeout { actual: total });
                }
            }
        }
        Ok(total)
    }

    /// Skip ahead until and including the next `,` or `<S4>`.
    pub fn skip_argument(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b',' || b == S4 {
                return Ok(());
            }
        }
    }

    /// Skip ahead until and including the next `<S4>`.
    pub fn skip_line(&mut self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == S4 {
                return Ok(());
            }
        }
    }

    /// Read the next command mnemonic, whatever it is.
    ///
    /// Scans to the next `+` prefix (discarding anything before it) and
    /// returns the characters up to the `:` separator, both exclusive. At
    /// most `limit` characters are kept; a longer mnemonic still consumes
    /// the ring through the `:` and comes back as [`Error::Truncated`], so
    /// the subsequent argument reads stay aligned.
    pub fn read_command_any(&mut self, limit: usize, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b'+' {
                break;
            }
        }
        let mut out = Vec::new();
        let mut truncated = false;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b':' {
                break;
            }
            if out.len() < limit {
                out.push(b);
            } else {
                truncated = true;
            }
        }
        if truncated {
            return Err(Error::Truncated { partial: out });
        }
        String::from_utf8(out)
            .map_err(|_| Error::UnexpectedContent("command mnemonic is not valid UTF-8".to_string()))
    }

    /// Read the next command mnemonic and require it to equal `expected`
    /// (without `+` and `:`). On a mismatch the ring is still consumed
    /// through the `:` before [`Error::UnexpectedContent`] is returned.
    pub fn read_command(&mut self, expected: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b'+' {
                break;
            }
        }
        let want = expected.as_bytes();
        let mut idx = 0;
        let mut matched = true;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b':' {
                break;
            }
            if idx < want.len() && b == want[idx] {
                idx += 1;
            } else {
                matched = false;
            }
        }
        if matched && idx == want.len() {
            Ok(())
        } else {
            Err(Error::UnexpectedContent(format!(
                "response command does not match {}",
                expected
            )))
        }
    }

    /// Read an unquoted argument, trimmed of surrounding whitespace.
    ///
    /// Intended for non-standard string arguments that arrive without
    /// quotes, such as `+QCCID: 0123456789`. Interior whitespace is kept
    /// verbatim.
    pub fn read_argument(&mut self, limit: usize, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let (out, truncated) = self.collect_argument(Some(limit), deadline)?;
        if truncated {
            return Err(Error::Truncated { partial: out });
        }
        String::from_utf8(out)
            .map_err(|_| Error::UnexpectedContent("argument is not valid UTF-8".to_string()))
    }

    /// Read a quoted string argument, excluding the quotes. Escape
    /// sequences are not interpreted. The `,`/`<S4>` delimiter following
    /// the closing quote is consumed, also on truncation.
    pub fn read_string(&mut self, limit: usize, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        self.expect_opening_quote(deadline, &mut consumed)?;
        let mut out = Vec::new();
        let mut truncated = false;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b'"' {
                break;
            }
            if out.len() < limit {
                out.push(b);
            } else {
                truncated = true;
            }
        }
        self.consume_argument_terminator(deadline, &mut consumed)?;
        if truncated {
            return Err(Error::Truncated { partial: out });
        }
        String::from_utf8(out)
            .map_err(|_| Error::UnexpectedContent("string argument is not valid UTF-8".to_string()))
    }

    /// Read a quoted hex string argument, decoding each digit pair into
    /// one byte. An odd digit count is [`Error::InvalidParam`], a non-hex
    /// character inside the quotes is [`Error::UnexpectedContent`].
    pub fn read_hex_string(&mut self, limit: usize, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        self.expect_opening_quote(deadline, &mut consumed)?;
        let mut out = Vec::new();
        let mut truncated = false;
        let mut high: Option<u8> = None;
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == b'"' {
                break;
            }
            let Some(v) = hex_nibble(b) else {
                return Err(Error::UnexpectedContent(format!(
                    "invalid hex digit {:?}",
                    b as char
                )));
            };
            match high.take() {
                None => high = Some(v),
                Some(h) => {
                    if out.len() < limit {
                        out.push(h << 4 | v);
                    } else {
                        truncated = true;
                    }
                }
            }
        }
        self.consume_argument_terminator(deadline, &mut consumed)?;
        if high.is_some() {
            return Err(Error::InvalidParam(
                "odd number of hex digits".to_string(),
            ));
        }
        if truncated {
            return Err(Error::Truncated { partial: out });
        }
        Ok(out)
    }

    /// Shared body of the integer readers. The argument terminator is
    /// consumed before parsing, so the cursor lands on the next argument
    /// even when the token does not parse.
    fn read_integer(&mut self, base: u32, min: i64, max: i64, timeout: Duration) -> Result<i64> {
        if !matches!(base, 0 | 8 | 10 | 16) {
            return Err(Error::InvalidParam(format!("unsupported radix {}", base)));
        }
        let deadline = Instant::now() + timeout;
        let (token, _) = self.collect_argument(None, deadline)?;
        parse_integer(&token, base, min, max)
    }

    /// Read an argument as signed 8 bit integer of the given radix
    /// (0 auto-detects from the `0x`/`0` prefix).
    pub fn read_i8(&mut self, base: u32, timeout: Duration) -> Result<i8> {
        Ok(self.read_integer(base, i64::from(i8::MIN), i64::from(i8::MAX), timeout)? as i8)
    }

    /// Read an argument as unsigned 8 bit integer of the given radix.
    pub fn read_u8(&mut self, base: u32, timeout: Duration) -> Result<u8> {
        Ok(self.read_integer(base, 0, i64::from(u8::MAX), timeout)? as u8)
    }

    /// Read an argument as signed 16 bit integer of the given radix.
    pub fn read_i16(&mut self, base: u32, timeout: Duration) -> Result<i16> {
        Ok(self.read_integer(base, i64::from(i16::MIN), i64::from(i16::MAX), timeout)? as i16)
    }

    /// Read an argument as unsigned 16 bit integer of the given radix.
    pub fn read_u16(&mut self, base: u32, timeout: Duration) -> Result<u16> {
        Ok(self.read_integer(base, 0, i64::from(u16::MAX), timeout)? as u16)
    }

    /// Read an argument as signed 32 bit integer of the given radix.
    pub fn read_i32(&mut self, base: u32, timeout: Duration) -> Result<i32> {
        Ok(self.read_integer(base, i64::from(i32::MIN), i64::from(i32::MAX), timeout)? as i32)
    }

    /// Read an argument as unsigned 32 bit integer of the given radix.
    pub fn read_u32(&mut self, base: u32, timeout: Duration) -> Result<u32> {
        Ok(self.read_integer(base, 0, i64::from(u32::MAX), timeout)? as u32)
    }

    /// Read a response code framed as `<S3><S4>text<S3><S4>`, consuming
    /// the whole frame. `CONNECT` followed by a digit sequence maps to
    /// [`ResponseCode::ConnectDataRate`]. Afterwards the read cursor sits
    /// at the start of a line.
    pub fn read_code(&mut self, timeout: Duration) -> Result<ResponseCode> {
        let deadline = Instant::now() + timeout;
        let mut consumed = 0usize;
        for expected in [S3, S4] {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b != expected {
                return Err(Error::UnexpectedContent(
                    "response code does not start a line".to_string(),
                ));
            }
        }
        let mut text = Vec::new();
        loop {
            let Some(b) = self.take_syntax_byte(deadline) else {
                return Err(Error::Timeout { actual: consumed });
            };
            consumed += 1;
            if b == S3 {
                break;
            }
            if text.len() >= MAX_CODE_LEN {
                return Err(Error::UnexpectedContent(
                    "response code text too long".to_string(),
                ));
            }
            text.push(b);
        }
        let Some(b) = self.take_syntax_byte(deadline) else {
            return Err(Error::Timeout { actual: consumed });
        };
        if b != S4 {
            return Err(Error::UnexpectedContent(
                "unterminated response code line".to_string(),
            ));
        }
        let text = std::str::from_utf8(&text)
            .map_err(|_| Error::UnexpectedContent("response code is not valid UTF-8".to_string()))?;
        text.parse()
    }

    /// Peek whether the next two bytes are the `<S3><S4>` end-of-line
    /// pair. Nothing is consumed.
    pub fn check_end_of_line(&mut self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        while self.shared.ring.available() < 2 {
            if !self.shared.rx_ready.wait_deadline(deadline) {
                if self.shared.ring.available() >= 2 {
                    break;
                }
                return Err(Error::Timeout { actual: 0 });
            }
        }
        let mut pair = [0u8; 2];
        self.shared.ring.peek(0, &mut pair);
        Ok(pair == [S3, S4])
    }
}
