//! Execution-context capture and transplant.
//!
//! The duplicate's first thread starts from a register snapshot of the
//! calling thread with exactly one field changed: the instruction pointer,
//! redirected to the continuation trampoline. The snapshot is opaque;
//! callers see only the instruction and stack pointers.

use core::mem;

use winapi::um::winnt::{
    CONTEXT, CONTEXT_DEBUG_REGISTERS, CONTEXT_FLOATING_POINT, CONTEXT_FULL,
};

use crate::error::ForkError;
use crate::ntdll;
use crate::status::NtStatus;

/// Full register snapshot of the calling thread.
///
/// Covers the general-purpose, control, floating-point and debug register
/// sets. The kernel requires the blob 16-byte aligned.
#[repr(C, align(16))]
pub struct ThreadContext {
    inner: CONTEXT,
}

impl ThreadContext {
    /// Captures the calling thread's current register state.
    ///
    /// Querying the running thread reports the register values inside the
    /// query call itself. The caller's frame and every frame above it are
    /// stable, which is all the duplicate ever touches.
    pub fn capture() -> Result<Self, ForkError> {
        let nt = ntdll::bindings()?;
        let mut snapshot = Self {
            inner: unsafe { mem::zeroed() },
        };
        snapshot.inner.ContextFlags =
            CONTEXT_FULL | CONTEXT_FLOATING_POINT | CONTEXT_DEBUG_REGISTERS;

        let status = NtStatus(unsafe {
            (nt.get_context_thread)(ntdll::current_thread(), &mut snapshot.inner)
        });
        if !status.is_success() {
            return Err(ForkError::CaptureContext(status));
        }
        Ok(snapshot)
    }

    /// The captured instruction pointer.
    pub fn instruction_pointer(&self) -> u64 {
        self.inner.Rip
    }

    /// The captured stack pointer.
    pub fn stack_pointer(&self) -> u64 {
        self.inner.Rsp
    }

    /// Redirects the snapshot to begin execution at `entry`. Every other
    /// register, the stack pointer included, keeps its captured value.
    pub fn retarget(&mut self, entry: u64) {
        self.inner.Rip = entry;
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut CONTEXT {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_alignment() {
        assert_eq!(mem::align_of::<ThreadContext>(), 16);
    }

    #[test]
    fn test_capture_reports_live_pointers() {
        let snapshot = ThreadContext::capture().expect("capture own thread");

        // Both pointers must land in mapped user address space.
        assert_ne!(snapshot.instruction_pointer(), 0);
        assert_ne!(snapshot.stack_pointer(), 0);
    }

    #[test]
    fn test_retarget_rewrites_only_the_instruction_pointer() {
        let mut snapshot = ThreadContext::capture().expect("capture own thread");
        let stack_pointer = snapshot.stack_pointer();

        snapshot.retarget(0x7FF6_0000_1000);

        assert_eq!(snapshot.instruction_pointer(), 0x7FF6_0000_1000);
        assert_eq!(snapshot.stack_pointer(), stack_pointer);
    }
}
