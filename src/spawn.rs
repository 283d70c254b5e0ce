//! Child-program plumbing over the documented process interfaces.
//!
//! Everything here goes through the public Win32 surface: an anonymous pipe
//! wired to a spawned program's standard output, newline-bounded reads over
//! it, and termination by process identifier. None of it depends on the
//! native duplication machinery.

use core::mem;
use core::ptr;
use std::io;
use std::os::windows::io::{FromRawHandle, RawHandle};

use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::um::errhandlingapi::GetLastError;
use winapi::um::fileapi::ReadFile;
use winapi::um::handleapi::{CloseHandle, SetHandleInformation};
use winapi::um::minwinbase::SECURITY_ATTRIBUTES;
use winapi::um::namedpipeapi::CreatePipe;
use winapi::um::processthreadsapi::{
    CreateProcessW, OpenProcess, TerminateProcess, PROCESS_INFORMATION, STARTUPINFOW,
};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::{
    CREATE_NO_WINDOW, HANDLE_FLAG_INHERIT, INFINITE, STARTF_USESHOWWINDOW, STARTF_USESTDHANDLES,
};
use winapi::um::winnt::{HANDLE, PROCESS_TERMINATE};
use winapi::um::winuser::SW_HIDE;

use crate::error::SpawnError;
use crate::line::LineReader;

/// Owned readable kernel handle, closed on drop.
struct PipeStream {
    raw: HANDLE,
}

// The wrapped handle is a process-wide kernel object reference with no
// thread affinity.
unsafe impl Send for PipeStream {}

impl PipeStream {
    /// Closes the handle, reporting the OS error if the release fails.
    fn close(self) -> Result<(), SpawnError> {
        let raw = self.raw;
        mem::forget(self);
        if unsafe { CloseHandle(raw) } == FALSE {
            return Err(SpawnError::CloseStream {
                code: unsafe { GetLastError() },
            });
        }
        Ok(())
    }
}

impl io::Read for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut transferred: DWORD = 0;
        let ok = unsafe {
            ReadFile(
                self.raw,
                buf.as_mut_ptr().cast(),
                buf.len() as DWORD,
                &mut transferred,
                ptr::null_mut(),
            )
        };
        if ok == FALSE {
            // A pipe whose writers are all gone reports broken-pipe here;
            // the line layer folds that into end-of-stream.
            return Err(io::Error::last_os_error());
        }
        Ok(transferred as usize)
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        let _ = unsafe { CloseHandle(self.raw) };
    }
}

/// Readable stream attached to a spawned program's standard output.
///
/// Reads are chunked and newline-bounded; see [`LineReader`] for the span
/// semantics. Dropping the reader closes the handle; [`close`](Self::close)
/// does the same but reports a failed release.
pub struct PipeReader {
    lines: LineReader<PipeStream>,
}

impl PipeReader {
    /// Next newline-bounded span into `buf`, zero-filling the remainder.
    ///
    /// `None` once the stream is exhausted or a read fails; the handle is
    /// closed at that point.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        self.lines.read_line(buf)
    }

    /// Whether the underlying handle is still held.
    pub fn is_open(&self) -> bool {
        self.lines.is_open()
    }

    /// Releases the stream handle, reporting the last OS error code if the
    /// release failed. An exhausted stream has already been closed and
    /// releasing it again is a no-op.
    pub fn close(self) -> Result<(), SpawnError> {
        match self.lines.into_inner() {
            Some(stream) => stream.close(),
            None => Ok(()),
        }
    }
}

impl FromRawHandle for PipeReader {
    /// Wraps an arbitrary readable handle in the line-reading layer.
    ///
    /// # Safety
    ///
    /// `handle` must be a readable kernel handle owned by the caller.
    /// Ownership transfers to the reader, which closes it.
    unsafe fn from_raw_handle(handle: RawHandle) -> Self {
        Self {
            lines: LineReader::new(PipeStream { raw: handle.cast() }),
        }
    }
}

/// Runs `command_line` as a new program image with its standard output
/// connected to the returned reader, waiting for the program to exit.
///
/// Returns the reader and the spawned process identifier. Because the call
/// waits, the program's full output is sitting in the pipe when it returns;
/// the pipe's buffer capacity bounds how much a child can write before
/// exiting, which suits the short-output commands this exists for.
///
/// `mode` is accepted for interface parity with `popen` and not
/// interpreted; the stream is always read-only.
pub fn spawn_with_stdout_pipe(
    command_line: &str,
    mode: &str,
) -> Result<(PipeReader, u32), SpawnError> {
    let mut command = wide(command_line)?;

    let mut read_end: HANDLE = ptr::null_mut();
    let mut write_end: HANDLE = ptr::null_mut();
    let mut security = SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as DWORD,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: TRUE,
    };
    if unsafe { CreatePipe(&mut read_end, &mut write_end, &mut security, 0) } == FALSE {
        return Err(SpawnError::CreatePipe {
            code: unsafe { GetLastError() },
        });
    }
    // Closes the read end on every exit path below.
    let stream = PipeStream { raw: read_end };

    // Only the write end may leak into the child.
    if unsafe { SetHandleInformation(stream.raw, HANDLE_FLAG_INHERIT, 0) } == FALSE {
        let code = unsafe { GetLastError() };
        let _ = unsafe { CloseHandle(write_end) };
        return Err(SpawnError::ConfigurePipe { code });
    }

    let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
    startup.cb = mem::size_of::<STARTUPINFOW>() as DWORD;
    startup.dwFlags = STARTF_USESTDHANDLES | STARTF_USESHOWWINDOW;
    startup.wShowWindow = SW_HIDE as u16;
    startup.hStdOutput = write_end;
    let mut process: PROCESS_INFORMATION = unsafe { mem::zeroed() };

    let created = unsafe {
        CreateProcessW(
            ptr::null(),
            command.as_mut_ptr(),
            ptr::null_mut(),
            ptr::null_mut(),
            TRUE,
            CREATE_NO_WINDOW,
            ptr::null_mut(),
            ptr::null(),
            &mut startup,
            &mut process,
        )
    };
    if created == FALSE {
        let code = unsafe { GetLastError() };
        let _ = unsafe { CloseHandle(write_end) };
        return Err(SpawnError::CreateProcess { code });
    }

    // The child now holds the only other write reference; dropping ours is
    // what lets reads observe end-of-stream after it exits.
    let _ = unsafe { CloseHandle(write_end) };
    let _ = unsafe { CloseHandle(process.hThread) };

    let pid = process.dwProcessId;
    log::debug!("[ntfork] spawned pid {} for {:?} (mode {:?})", pid, command_line, mode);

    let _ = unsafe { WaitForSingleObject(process.hProcess, INFINITE) };
    let _ = unsafe { CloseHandle(process.hProcess) };
    log::debug!("[ntfork] pid {} exited, output pipe ready", pid);

    Ok((
        PipeReader {
            lines: LineReader::new(stream),
        },
        pid,
    ))
}

/// Forcibly terminates the process identified by `pid`.
///
/// `signal` is accepted for interface parity with `kill` and not
/// interpreted; the only delivery implemented is forced termination.
/// Returns normally whether or not the target was still running.
pub fn terminate(pid: u32, signal: u32) {
    let process = unsafe { OpenProcess(PROCESS_TERMINATE, FALSE, pid) };
    if process.is_null() {
        log::debug!("[ntfork] terminate pid {}: nothing to open", pid);
        return;
    }
    let _ = unsafe { TerminateProcess(process, 1) };
    let _ = unsafe { CloseHandle(process) };
    log::debug!("[ntfork] terminated pid {} (signal {} not interpreted)", pid, signal);
}

/// UTF-16, NUL-terminated. An interior NUL would truncate the command at
/// the boundary, so it is rejected instead.
fn wide(text: &str) -> Result<Vec<u16>, SpawnError> {
    if text.bytes().any(|b| b == 0) {
        return Err(SpawnError::CommandLine);
    }
    Ok(text.encode_utf16().chain(core::iter::once(0)).collect())
}
