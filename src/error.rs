// Error taxonomy for the HUM remapping controllers.
// Fatal variants indicate a contract violation by the caller or a broken
// invariant in the remap state; recoverable variants are meant to be matched
// on by the host's retry logic.

use std::fmt;

/// Errors raised by the UMC/SILC policy engines and the port fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumError {
    /// UMC N3: read targeted NM logical content that was displaced and
    /// never written back.
    ReadUndefined { index: usize },
    /// Packet requires a read/write command where neither was given.
    UnknownCmd,
    /// A packet reached the policy engine spanning more than one page; the
    /// splitter should have prevented this.
    SpanTooLarge { addr: u64, size: usize },
    /// A timing request arrived while the controller already has one
    /// outstanding.
    PortBlocked,
    /// A downstream `send` call was rejected; caller must retry on the
    /// corresponding retry callback.
    SendFailed,
    /// SILC entry's `remap` field is neither 0 nor a block-aligned FM
    /// address.
    UnknownRemap { remap: u64 },
}

impl HumError {
    /// True for errors that represent a broken invariant or a contract
    /// violation the caller cannot recover from.
    pub const fn is_fatal(self) -> bool {
        !matches!(self, HumError::PortBlocked | HumError::SendFailed)
    }
}

impl fmt::Display for HumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HumError::ReadUndefined { index } => write!(
                f,
                "read of undefined NM content at frame index {index}: logical page was displaced and never written back"
            ),
            HumError::UnknownCmd => write!(f, "packet command is neither read nor write"),
            HumError::SpanTooLarge { addr, size } => write!(
                f,
                "packet at 0x{addr:x} of size {size} spans more than one page"
            ),
            HumError::PortBlocked => write!(f, "controller has an outstanding request"),
            HumError::SendFailed => write!(f, "downstream send was rejected, awaiting retry"),
            HumError::UnknownRemap { remap } => {
                write!(f, "remap value 0x{remap:x} is neither zero nor within FM range")
            }
        }
    }
}

impl std::error::Error for HumError {}

pub type HumResult<T> = Result<T, HumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        assert!(HumError::ReadUndefined { index: 3 }.is_fatal());
        assert!(HumError::UnknownCmd.is_fatal());
        assert!(HumError::SpanTooLarge { addr: 0, size: 1 }.is_fatal());
        assert!(HumError::UnknownRemap { remap: 7 }.is_fatal());
        assert!(!HumError::PortBlocked.is_fatal());
        assert!(!HumError::SendFailed.is_fatal());
    }

    #[test]
    fn display_includes_diagnostic_fields() {
        let e = HumError::SpanTooLarge { addr: 0x1000, size: 4096 };
        let s = e.to_string();
        assert!(s.contains("1000"));
        assert!(s.contains("4096"));
    }
}
