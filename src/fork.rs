//! fork() in terms of the native process interfaces.
//!
//! The kernel will duplicate an address space and handle table as part of
//! creating a process object from an existing one; what it will not do is
//! give the duplicate a running thread. This module supplies the rest:
//! a thread created suspended from a register snapshot of the caller, a
//! stack description matching the caller's, the exception-chain head wired
//! into the new thread's environment block, and a trampoline that makes
//! the original call return a second time inside the duplicate.

use core::cell::UnsafeCell;
use core::mem;
use core::ptr;

use winapi::um::winnt::{HANDLE, NT_TIB, PROCESS_ALL_ACCESS, PVOID, THREAD_ALL_ACCESS};

use crate::context::ThreadContext;
use crate::error::ForkError;
use crate::jump::{self, JumpEnv};
use crate::ntdll::{
    self, ClientId, NtBindings, ObjectAttributes, ThreadBasicInformation,
    THREAD_BASIC_INFORMATION_CLASS,
};
use crate::stack::StackRegion;
use crate::status::NtStatus;

/// Outcome of a successful [`fork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkResult {
    /// Still the original process; `child` is the duplicate's pid.
    Parent { child: u32 },
    /// Running inside the duplicate.
    Child,
}

impl ForkResult {
    /// True on the duplicate's side of the call.
    pub fn is_child(&self) -> bool {
        matches!(self, Self::Child)
    }
}

/// Whether the running system exposes the native entry points fork needs.
pub fn fork_supported() -> bool {
    ntdll::supported()
}

#[repr(transparent)]
struct EnvCell(UnsafeCell<JumpEnv>);

// One in-flight fork owns the cell at a time; FORK_LOCK enforces that.
unsafe impl Sync for EnvCell {}

static FORK_ENV: EnvCell = EnvCell(UnsafeCell::new(JumpEnv::zeroed()));
static FORK_LOCK: spin::Mutex<()> = spin::Mutex::new(());

/// Duplicates the calling process.
///
/// Returns once in each process: `Parent { child }` in the original,
/// `Child` in the duplicate, which resumes at this call as if it had
/// returned normally. On error nothing was created (capability errors) or
/// everything acquired so far has been released (creation errors).
///
/// # Safety
///
/// The duplicate is a constrained environment and the caller is
/// responsible for staying inside it:
///
/// - Only the calling thread is recreated. Locks held by other threads at
///   duplication time stay locked forever in the child; the child must not
///   block on state owned by threads that do not exist there.
/// - The duplicate is unknown to the Win32 subsystem process. Plain
///   computation, file and pipe access, and process exit work through the
///   native layer; console I/O and anything else that needs a subsystem
///   round-trip may fail.
/// - The child branch should do its work and exit without unwinding into
///   code that assumes a fully initialized Win32 session.
pub unsafe fn fork() -> Result<ForkResult, ForkError> {
    // Serializes use of the continuation cell. The child's copy of the
    // lock is released when its guard drops at return.
    let _guard = FORK_LOCK.lock();

    if unsafe { jump::capture(FORK_ENV.0.get()) } != 0 {
        // Second return: the trampoline in the duplicate landed here.
        return Ok(ForkResult::Child);
    }

    let nt = ntdll::bindings()?;

    let mut snapshot = ThreadContext::capture()?;
    snapshot.retarget(child_entry as usize as u64);
    let region = StackRegion::inspect(snapshot.stack_pointer())?;

    let child = unsafe { duplicate(nt, &mut snapshot, &region)? };
    log::debug!("[ntfork] duplicated into child pid {}", child);
    Ok(ForkResult::Parent { child })
}

/// First instructions of the duplicate's thread.
///
/// Entered by jump with the transplanted stack pointer, so the stack is
/// realigned before calling into the continuation restore. The frames
/// below the captured pointer are scratch in the duplicate.
#[unsafe(naked)]
unsafe extern "C" fn child_entry() -> ! {
    core::arch::naked_asm!(
        "and rsp, -16",
        "sub rsp, 32",
        "lea rcx, [rip + {env}]",
        "mov edx, 1",
        "call {resume}",
        "ud2",
        env = sym FORK_ENV,
        resume = sym jump::resume,
    );
}

/// Runs the creation sequence against the native interface table.
///
/// Handles acquired along the way close on drop, so a failing step rolls
/// back everything before it.
unsafe fn duplicate(
    nt: &'static NtBindings,
    snapshot: &mut ThreadContext,
    region: &StackRegion,
) -> Result<u32, ForkError> {
    let mut attributes = ObjectAttributes::anonymous();

    let mut raw_process: HANDLE = ptr::null_mut();
    let status = NtStatus(unsafe {
        (nt.create_process)(
            &mut raw_process,
            PROCESS_ALL_ACCESS,
            &mut attributes,
            ntdll::current_process(),
            1, // inherit the handle table
            ptr::null_mut(),
            ptr::null_mut(),
            ptr::null_mut(),
        )
    });
    if !status.is_success() {
        return Err(ForkError::CreateProcess(status));
    }
    let process = OwnedNtHandle::new(raw_process, nt);

    let mut stack = region.to_user_stack();
    let mut client = ClientId::zeroed();
    let mut raw_thread: HANDLE = ptr::null_mut();
    let status = NtStatus(unsafe {
        (nt.create_thread)(
            &mut raw_thread,
            THREAD_ALL_ACCESS,
            &mut attributes,
            process.raw,
            &mut client,
            snapshot.as_mut_ptr(),
            &mut stack,
            1, // created suspended
        )
    });
    if !status.is_success() {
        return Err(ForkError::CreateThread(status));
    }
    let thread = OwnedNtHandle::new(raw_thread, nt);

    unsafe { wire_exception_chain(nt, process.raw, thread.raw)? };

    let status = NtStatus(unsafe { (nt.resume_thread)(thread.raw, ptr::null_mut()) });
    if !status.is_success() {
        return Err(ForkError::ResumeThread(status));
    }

    // Handed off; the pid, not the handles, is the durable result.
    drop(thread);
    drop(process);
    Ok(client.pid())
}

/// Copies the caller's exception-handler chain head into the duplicate
/// thread's environment block.
///
/// The head sits at offset zero of the TIB. Without the copy, unwind
/// dispatch in the duplicate would chase whatever the snapshot left there.
unsafe fn wire_exception_chain(
    nt: &NtBindings,
    process: HANDLE,
    thread: HANDLE,
) -> Result<(), ForkError> {
    let caller = unsafe { thread_basic_information(nt, ntdll::current_thread())? };
    let duplicate = unsafe { thread_basic_information(nt, thread)? };

    let tib = caller.teb_base_address as *const NT_TIB;
    let head = unsafe { (*tib).ExceptionList };

    let mut written = 0usize;
    let status = NtStatus(unsafe {
        (nt.write_virtual_memory)(
            process,
            duplicate.teb_base_address,
            &head as *const _ as PVOID,
            mem::size_of_val(&head),
            &mut written,
        )
    });
    if !status.is_success() {
        return Err(ForkError::WireExceptionChain(status));
    }
    Ok(())
}

unsafe fn thread_basic_information(
    nt: &NtBindings,
    thread: HANDLE,
) -> Result<ThreadBasicInformation, ForkError> {
    let mut info = ThreadBasicInformation::zeroed();
    let mut written = 0u32;

    let status = NtStatus(unsafe {
        (nt.query_information_thread)(
            thread,
            THREAD_BASIC_INFORMATION_CLASS,
            &mut info as *mut _ as PVOID,
            mem::size_of::<ThreadBasicInformation>() as u32,
            &mut written,
        )
    });
    if !status.is_success() {
        return Err(ForkError::QueryThreadInfo(status));
    }
    Ok(info)
}

/// Kernel handle owned for the duration of the creation sequence.
struct OwnedNtHandle {
    raw: HANDLE,
    nt: &'static NtBindings,
}

impl OwnedNtHandle {
    fn new(raw: HANDLE, nt: &'static NtBindings) -> Self {
        Self { raw, nt }
    }
}

impl Drop for OwnedNtHandle {
    fn drop(&mut self) {
        let _ = unsafe { (self.nt.close)(self.raw) };
    }
}
