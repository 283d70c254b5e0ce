//! Error types for process duplication and the spawn utilities.

use crate::status::NtStatus;

/// Errors from the fork path.
///
/// Variants fall into two categories:
/// - **Capability errors**: the native entry points could not be bound; no
///   kernel object was created.
/// - **Creation errors**: one step of the duplication sequence failed; every
///   handle acquired by earlier steps has already been released.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    // ── Capability errors ────────────────────────────────────────────

    #[error("ntdll is not loaded in this process")]
    NtdllNotLoaded,

    #[error("native entry point not exported: {symbol}")]
    MissingEntryPoint { symbol: &'static str },

    // ── Creation errors ──────────────────────────────────────────────

    #[error("thread context capture failed: {0}")]
    CaptureContext(NtStatus),

    #[error("stack region query failed: {0}")]
    InspectStack(NtStatus),

    #[error("process object creation failed: {0}")]
    CreateProcess(NtStatus),

    #[error("thread creation failed: {0}")]
    CreateThread(NtStatus),

    #[error("thread information query failed: {0}")]
    QueryThreadInfo(NtStatus),

    #[error("exception chain copy failed: {0}")]
    WireExceptionChain(NtStatus),

    #[error("thread resume failed: {0}")]
    ResumeThread(NtStatus),
}

impl ForkError {
    /// True when the failure means the platform lacks the native interfaces,
    /// as opposed to one creation step going wrong.
    pub fn is_capability(&self) -> bool {
        matches!(
            self,
            Self::NtdllNotLoaded | Self::MissingEntryPoint { .. }
        )
    }
}

/// Errors from the pipe-spawn utilities.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    #[error("command line contains an interior NUL")]
    CommandLine,

    #[error("pipe creation failed (os error {code})")]
    CreatePipe { code: u32 },

    #[error("pipe inheritance setup failed (os error {code})")]
    ConfigurePipe { code: u32 },

    #[error("process creation failed (os error {code})")]
    CreateProcess { code: u32 },

    #[error("stream close failed (os error {code})")]
    CloseStream { code: u32 },
}
