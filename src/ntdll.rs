//! Native kernel-interface bindings.
//!
//! Process duplication needs entry points that `ntdll` exports but no import
//! library or header documents. They are resolved by name from the loaded
//! module at first use and cached process-wide; the cache is only ever
//! valid as a whole. A failed resolution caches nothing, so a later call
//! retries.

use core::fmt;
use core::mem;

use winapi::shared::minwindef::{FARPROC, HMODULE};
use winapi::um::libloaderapi::{GetModuleHandleA, GetProcAddress};
use winapi::um::winnt::{CONTEXT, HANDLE, PVOID};

use crate::error::ForkError;

// ── Native parameter blocks ──────────────────────────────────────────

/// `OBJECT_ATTRIBUTES`, passed to the create calls. Only `length` is ever
/// non-zero here; the duplicate is anonymous and unnamed.
#[repr(C)]
pub struct ObjectAttributes {
    length: u32,
    root_directory: HANDLE,
    object_name: PVOID,
    attributes: u32,
    security_descriptor: PVOID,
    security_qos: PVOID,
}

impl ObjectAttributes {
    pub fn anonymous() -> Self {
        Self {
            length: mem::size_of::<Self>() as u32,
            root_directory: core::ptr::null_mut(),
            object_name: core::ptr::null_mut(),
            attributes: 0,
            security_descriptor: core::ptr::null_mut(),
            security_qos: core::ptr::null_mut(),
        }
    }
}

/// `CLIENT_ID`: process and thread identifiers as handle-sized values.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ClientId {
    pub unique_process: HANDLE,
    pub unique_thread: HANDLE,
}

impl ClientId {
    pub fn zeroed() -> Self {
        Self {
            unique_process: core::ptr::null_mut(),
            unique_thread: core::ptr::null_mut(),
        }
    }

    /// The process identifier as the documented Win32 pid type.
    pub fn pid(&self) -> u32 {
        self.unique_process as usize as u32
    }
}

/// Initial stack description for `ZwCreateThread`. The duplicate thread
/// reuses the caller's committed stack, so only the expandable fields are
/// populated.
#[repr(C)]
pub struct UserStack {
    pub fixed_stack_base: PVOID,
    pub fixed_stack_limit: PVOID,
    pub expandable_stack_base: PVOID,
    pub expandable_stack_limit: PVOID,
    pub expandable_stack_bottom: PVOID,
}

/// `THREAD_BASIC_INFORMATION`, class 0 of the thread-information query.
/// `teb_base_address` locates the thread's environment block inside the
/// owning process's address space.
#[repr(C)]
pub struct ThreadBasicInformation {
    pub exit_status: i32,
    pub teb_base_address: PVOID,
    pub client_id: ClientId,
    pub affinity_mask: usize,
    pub priority: i32,
    pub base_priority: i32,
}

impl ThreadBasicInformation {
    pub fn zeroed() -> Self {
        // All-zero is a valid representation for every field.
        unsafe { mem::zeroed() }
    }
}

/// Information class selecting `ThreadBasicInformation`.
pub const THREAD_BASIC_INFORMATION_CLASS: u32 = 0;

/// Information class selecting `MEMORY_BASIC_INFORMATION`.
pub const MEMORY_BASIC_INFORMATION_CLASS: u32 = 0;

/// Pseudo-handle for the calling process.
pub fn current_process() -> HANDLE {
    -1isize as usize as HANDLE
}

/// Pseudo-handle for the calling thread.
pub fn current_thread() -> HANDLE {
    -2isize as usize as HANDLE
}

// ── Entry-point signatures ───────────────────────────────────────────
//
// Raw NTSTATUS returns; call sites wrap them in `NtStatus`.

type ZwCreateProcessFn = unsafe extern "system" fn(
    process_handle: *mut HANDLE,
    desired_access: u32,
    object_attributes: *mut ObjectAttributes,
    parent_process: HANDLE,
    inherit_object_table: u8,
    section_handle: HANDLE,
    debug_port: HANDLE,
    exception_port: HANDLE,
) -> i32;

type ZwQuerySystemInformationFn = unsafe extern "system" fn(
    system_information_class: u32,
    system_information: PVOID,
    system_information_length: u32,
    return_length: *mut u32,
) -> i32;

type ZwQueryVirtualMemoryFn = unsafe extern "system" fn(
    process_handle: HANDLE,
    base_address: PVOID,
    memory_information_class: u32,
    memory_information: PVOID,
    memory_information_length: usize,
    return_length: *mut usize,
) -> i32;

type ZwCreateThreadFn = unsafe extern "system" fn(
    thread_handle: *mut HANDLE,
    desired_access: u32,
    object_attributes: *mut ObjectAttributes,
    process_handle: HANDLE,
    client_id: *mut ClientId,
    thread_context: *mut CONTEXT,
    initial_stack: *mut UserStack,
    create_suspended: u8,
) -> i32;

type ZwGetContextThreadFn =
    unsafe extern "system" fn(thread_handle: HANDLE, context: *mut CONTEXT) -> i32;

type ZwResumeThreadFn =
    unsafe extern "system" fn(thread_handle: HANDLE, suspend_count: *mut u32) -> i32;

type ZwQueryInformationThreadFn = unsafe extern "system" fn(
    thread_handle: HANDLE,
    thread_information_class: u32,
    thread_information: PVOID,
    thread_information_length: u32,
    return_length: *mut u32,
) -> i32;

type ZwWriteVirtualMemoryFn = unsafe extern "system" fn(
    process_handle: HANDLE,
    base_address: PVOID,
    buffer: PVOID,
    buffer_length: usize,
    return_length: *mut usize,
) -> i32;

type ZwCloseFn = unsafe extern "system" fn(handle: HANDLE) -> i32;

// ── Binding table ────────────────────────────────────────────────────

/// The resolved entry points. Exists only as a whole: construction fails
/// unless every symbol resolves.
pub struct NtBindings {
    pub create_process: ZwCreateProcessFn,
    pub query_system_information: ZwQuerySystemInformationFn,
    pub query_virtual_memory: ZwQueryVirtualMemoryFn,
    pub create_thread: ZwCreateThreadFn,
    pub get_context_thread: ZwGetContextThreadFn,
    pub resume_thread: ZwResumeThreadFn,
    pub query_information_thread: ZwQueryInformationThreadFn,
    pub write_virtual_memory: ZwWriteVirtualMemoryFn,
    pub close: ZwCloseFn,
}

static BINDINGS: spin::Once<NtBindings> = spin::Once::new();

/// The process-wide binding table, resolving it on first use.
///
/// Thread-safe: one caller wins the resolution, the rest wait for its
/// result. On failure nothing is cached and the next call retries, since
/// resolution may legitimately succeed later.
pub fn bindings() -> Result<&'static NtBindings, ForkError> {
    BINDINGS.try_call_once(|| {
        let module = unsafe { GetModuleHandleA(b"ntdll.dll\0".as_ptr().cast()) };
        if module.is_null() {
            return Err(ForkError::NtdllNotLoaded);
        }
        let table = unsafe { NtBindings::resolve_from(module) }?;
        log::debug!("[ntfork] bound ntdll entry points: {:?}", table);
        Ok(table)
    })
}

/// Whether the native interfaces needed for duplication are available.
pub fn supported() -> bool {
    bindings().is_ok()
}

impl NtBindings {
    /// Resolves every required entry point from `module`, failing on the
    /// first export that is missing.
    ///
    /// # Safety
    ///
    /// `module` must be a handle to a module loaded in this process whose
    /// matching exports have the signatures declared above.
    pub unsafe fn resolve_from(module: HMODULE) -> Result<Self, ForkError> {
        let create_process = unsafe { entry(module, b"ZwCreateProcess\0")? };
        let query_system_information = unsafe { entry(module, b"ZwQuerySystemInformation\0")? };
        let query_virtual_memory = unsafe { entry(module, b"ZwQueryVirtualMemory\0")? };
        let create_thread = unsafe { entry(module, b"ZwCreateThread\0")? };
        let get_context_thread = unsafe { entry(module, b"ZwGetContextThread\0")? };
        let resume_thread = unsafe { entry(module, b"ZwResumeThread\0")? };
        let query_information_thread = unsafe { entry(module, b"ZwQueryInformationThread\0")? };
        let write_virtual_memory = unsafe { entry(module, b"ZwWriteVirtualMemory\0")? };
        let close = unsafe { entry(module, b"ZwClose\0")? };

        unsafe {
            Ok(Self {
                create_process: mem::transmute::<FARPROC, ZwCreateProcessFn>(create_process),
                query_system_information: mem::transmute::<FARPROC, ZwQuerySystemInformationFn>(
                    query_system_information,
                ),
                query_virtual_memory: mem::transmute::<FARPROC, ZwQueryVirtualMemoryFn>(
                    query_virtual_memory,
                ),
                create_thread: mem::transmute::<FARPROC, ZwCreateThreadFn>(create_thread),
                get_context_thread: mem::transmute::<FARPROC, ZwGetContextThreadFn>(
                    get_context_thread,
                ),
                resume_thread: mem::transmute::<FARPROC, ZwResumeThreadFn>(resume_thread),
                query_information_thread: mem::transmute::<FARPROC, ZwQueryInformationThreadFn>(
                    query_information_thread,
                ),
                write_virtual_memory: mem::transmute::<FARPROC, ZwWriteVirtualMemoryFn>(
                    write_virtual_memory,
                ),
                close: mem::transmute::<FARPROC, ZwCloseFn>(close),
            })
        }
    }
}

/// One export lookup. `name` is NUL-terminated ASCII.
unsafe fn entry(module: HMODULE, name: &'static [u8]) -> Result<FARPROC, ForkError> {
    let address = unsafe { GetProcAddress(module, name.as_ptr().cast()) };
    if address.is_null() {
        let symbol = core::str::from_utf8(&name[..name.len() - 1]).unwrap_or("<non-ascii>");
        return Err(ForkError::MissingEntryPoint { symbol });
    }
    Ok(address)
}

impl fmt::Debug for NtBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NtBindings")
            .field("ZwCreateProcess", &(self.create_process as *const ()))
            .field(
                "ZwQuerySystemInformation",
                &(self.query_system_information as *const ()),
            )
            .field(
                "ZwQueryVirtualMemory",
                &(self.query_virtual_memory as *const ()),
            )
            .field("ZwCreateThread", &(self.create_thread as *const ()))
            .field("ZwGetContextThread", &(self.get_context_thread as *const ()))
            .field("ZwResumeThread", &(self.resume_thread as *const ()))
            .field(
                "ZwQueryInformationThread",
                &(self.query_information_thread as *const ()),
            )
            .field(
                "ZwWriteVirtualMemory",
                &(self.write_virtual_memory as *const ()),
            )
            .field("ZwClose", &(self.close as *const ()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_block_layouts() {
        // Fixed x86_64 ABI layouts the kernel expects.
        assert_eq!(mem::size_of::<ObjectAttributes>(), 48);
        assert_eq!(mem::size_of::<ClientId>(), 16);
        assert_eq!(mem::size_of::<UserStack>(), 40);
        assert_eq!(mem::size_of::<ThreadBasicInformation>(), 48);
    }

    #[test]
    fn test_resolution_is_all_or_nothing() {
        // kernel32 exports none of the Zw entry points, so resolution must
        // fail on the very first symbol and produce no table.
        let module = unsafe { GetModuleHandleA(b"kernel32.dll\0".as_ptr().cast()) };
        assert!(!module.is_null());

        let err = unsafe { NtBindings::resolve_from(module) }.err().unwrap();
        assert_eq!(
            err,
            ForkError::MissingEntryPoint { symbol: "ZwCreateProcess" }
        );
    }

    #[test]
    fn test_bindings_resolve_and_cache() {
        let first = bindings().expect("ntdll exports the native set");
        let second = bindings().expect("second lookup hits the cache");
        assert!(core::ptr::eq(first, second));

        let rendered = format!("{:?}", first);
        assert!(rendered.contains("ZwCreateProcess"));
        assert!(rendered.contains("ZwClose"));
    }

    #[test]
    fn test_pseudo_handles() {
        assert_eq!(current_process() as isize, -1);
        assert_eq!(current_thread() as isize, -2);
    }
}
