//! POSIX-style fork emulation for Windows, plus pipe-spawn utilities.
//!
//! The public process API on Windows can only launch a new program image;
//! there is no duplicate-this-process primitive. This crate builds one from
//! the layer underneath: it binds the undocumented `Zw*` entry points in
//! `ntdll`, creates a process object that inherits the caller's address
//! space and handle table, and starts a single thread in it from a register
//! snapshot of the calling thread, retargeted at a trampoline that resumes
//! inside the original `fork` call. One invocation, two returns:
//! `Parent { child }` in the original process, `Child` in the duplicate.
//!
//! # Modules
//!
//! - `fork`: the one-call-two-returns entry point and creation sequence
//! - `context`: opaque register snapshot of the calling thread
//! - `stack`: stack-region discovery for the duplicate's thread
//! - `spawn`: pipe-connected child programs and termination by pid
//! - `line`: chunked, newline-bounded stream reading
//! - `error`, `status`: typed failures and NTSTATUS rendering
//!
//! The fork core is specific to `x86_64-pc-windows-*`; the spawn utilities
//! need only Windows; the scanning and error layers are platform-neutral.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod line;
pub mod status;

#[cfg(all(windows, target_arch = "x86_64"))]
mod jump;
#[cfg(all(windows, target_arch = "x86_64"))]
mod ntdll;

#[cfg(all(windows, target_arch = "x86_64"))]
pub mod context;
#[cfg(all(windows, target_arch = "x86_64"))]
pub mod fork;
#[cfg(all(windows, target_arch = "x86_64"))]
pub mod stack;

#[cfg(windows)]
pub mod spawn;

// Re-exports for convenience
pub use error::{ForkError, SpawnError};
pub use status::NtStatus;

#[cfg(all(windows, target_arch = "x86_64"))]
pub use fork::{fork, fork_supported, ForkResult};

#[cfg(windows)]
pub use spawn::{spawn_with_stdout_pipe, terminate, PipeReader};
