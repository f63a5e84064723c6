// Contains types restricting the behavior of a write-sequence
use bitflags::bitflags;

bitflags! {
    /// Options applied to a whole write-sequence via
    /// [`prepare_write`](crate::TransceiverGuard::prepare_write). Options
    /// can be OR'ed to combine effects and stay in force until the next
    /// `prepare_write`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WriteOptions: u8 {
        /// Do not consume the echo of the sent command during flush.
        const NO_ECHO = 1 << 0;
        /// Do not append the final `<S3><S4>` terminator during flush.
        const NO_FINAL_S3S4 = 1 << 1;
        /// Neither check nor advance the write state machine. Useful for
        /// passthrough operation.
        const NO_STATE = 1 << 2;
        /// Skip the Tx buffer and hand every fragment to the write
        /// callback immediately.
        const NO_BUFFER = 1 << 3;
    }
}

/// States of the write state machine validating AT command construction.
///
/// Set commands progress `Start -> Command -> Argument.. -> End`; action
/// and get commands jump straight from `Start` to `End`. A flush returns
/// the sequence to `Start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// No write-sequence prepared, or not applicable under
    /// [`WriteOptions::NO_STATE`].
    Invalid,
    /// Fresh command, nothing written.
    Start,
    /// Command mnemonic and `=` written, no parameter yet.
    Command,
    /// One or more parameters written.
    Argument,
    /// Command semantically complete, awaiting flush.
    End,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_combine() {
        let options = WriteOptions::NO_BUFFER | WriteOptions::NO_ECHO;
        assert!(options.contains(WriteOptions::NO_BUFFER));
        assert!(options.contains(WriteOptions::NO_ECHO));
        assert!(!options.contains(WriteOptions::NO_STATE));
        assert!(WriteOptions::empty().is_empty());
    }
}
