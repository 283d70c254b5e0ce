//! Stack-region discovery.
//!
//! The duplicate thread reuses the caller's stack, so thread creation needs
//! the bounds of the committed mapping containing the captured stack
//! pointer. A virtual-memory query against that address yields them.

use core::mem;
use core::ptr;

use winapi::um::winnt::{MEMORY_BASIC_INFORMATION, PVOID};

use crate::error::ForkError;
use crate::ntdll::{self, UserStack, MEMORY_BASIC_INFORMATION_CLASS};
use crate::status::NtStatus;

/// Bounds of the committed stack mapping containing a given address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Base of the committed region.
    pub base: u64,
    /// Committed region size in bytes.
    pub size: u64,
    /// Base of the containing allocation (the stack's reserve bottom).
    pub allocation_base: u64,
}

impl StackRegion {
    /// Queries the region containing `stack_pointer` in this process.
    pub fn inspect(stack_pointer: u64) -> Result<Self, ForkError> {
        let nt = ntdll::bindings()?;
        let mut info: MEMORY_BASIC_INFORMATION = unsafe { mem::zeroed() };
        let mut written = 0usize;

        let status = NtStatus(unsafe {
            (nt.query_virtual_memory)(
                ntdll::current_process(),
                stack_pointer as usize as PVOID,
                MEMORY_BASIC_INFORMATION_CLASS,
                &mut info as *mut _ as PVOID,
                mem::size_of::<MEMORY_BASIC_INFORMATION>(),
                &mut written,
            )
        });
        if !status.is_success() {
            return Err(ForkError::InspectStack(status));
        }

        Ok(Self {
            base: info.BaseAddress as u64,
            size: info.RegionSize as u64,
            allocation_base: info.AllocationBase as u64,
        })
    }

    /// The expandable-stack parameter block for thread creation.
    ///
    /// Top of the committed region as the stack base, region base as the
    /// growth limit, allocation base as the absolute bottom. The fixed
    /// fields stay empty: the stack already exists.
    pub(crate) fn to_user_stack(&self) -> UserStack {
        UserStack {
            fixed_stack_base: ptr::null_mut(),
            fixed_stack_limit: ptr::null_mut(),
            expandable_stack_base: (self.base + self.size) as usize as PVOID,
            expandable_stack_limit: self.base as usize as PVOID,
            expandable_stack_bottom: self.allocation_base as usize as PVOID,
        }
    }
}
