//! Raw NT status codes.
//!
//! Every native entry point reports success or failure through a signed
//! 32-bit status word. Severity lives in the top bits: zero and positive
//! values are success or informational, negative values are errors.

use core::fmt;

/// Status word returned by the native kernel interfaces.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NtStatus(pub i32);

impl NtStatus {
    /// The canonical success value.
    pub const SUCCESS: NtStatus = NtStatus(0);
    /// Generic failure, used in tests as a representative error code.
    pub const UNSUCCESSFUL: NtStatus = NtStatus(0xC000_0001_u32 as i32);

    /// True for success and informational severities.
    pub fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// The raw signed value.
    pub fn raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0 as u32)
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus({:#010x})", self.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_severity() {
        assert!(NtStatus::SUCCESS.is_success());
        assert!(NtStatus(0x4000_0000).is_success()); // informational
        assert!(!NtStatus::UNSUCCESSFUL.is_success());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(NtStatus::UNSUCCESSFUL.to_string(), "0xc0000001");
        assert_eq!(NtStatus::SUCCESS.to_string(), "0x00000000");
    }
}
