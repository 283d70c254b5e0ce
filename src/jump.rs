//! Non-local continuation support.
//!
//! The duplicate's first thread must make the original fork call appear to
//! return a second time, in another process. That jump cannot be expressed
//! in normal control flow, so it is confined to this module: a saved
//! register environment plus two naked routines that fill and consume it.
//! Nothing else in the crate manipulates registers directly.
//!
//! The environment holds exactly what survives a function call on this
//! ABI: the return address, the post-return stack pointer, the non-volatile
//! general-purpose registers, and the non-volatile SSE state with both
//! floating-point control words.

/// Saved register environment for one continuation.
///
/// Layout is fixed by the assembly in [`capture`] and [`resume`]; the
/// offsets are locked by tests below.
#[repr(C, align(16))]
pub struct JumpEnv {
    rip: u64,
    rsp: u64,
    rbp: u64,
    rbx: u64,
    rsi: u64,
    rdi: u64,
    r12: u64,
    r13: u64,
    r14: u64,
    r15: u64,
    mxcsr: u32,
    fpcw: u16,
    _pad: [u16; 5],
    xmm: [[u8; 16]; 10],
}

impl JumpEnv {
    pub const fn zeroed() -> Self {
        Self {
            rip: 0,
            rsp: 0,
            rbp: 0,
            rbx: 0,
            rsi: 0,
            rdi: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            mxcsr: 0,
            fpcw: 0,
            _pad: [0; 5],
            xmm: [[0; 16]; 10],
        }
    }
}

/// Saves the current register environment into `env`.
///
/// Returns 0 on the direct call. When a later [`resume`] consumes `env`,
/// control returns here a second time with `resume`'s value (never 0)
/// as the return value.
///
/// # Safety
///
/// - `env` must be valid for writes and correctly aligned.
/// - A caller observing the second return must not rely on locals that
///   changed between the two returns; only the return value is defined.
#[unsafe(naked)]
pub unsafe extern "C" fn capture(env: *mut JumpEnv) -> usize {
    core::arch::naked_asm!(
        // Return address and the stack pointer after the return.
        "mov rax, [rsp]",
        "mov [rcx + 0x00], rax",
        "lea rax, [rsp + 8]",
        "mov [rcx + 0x08], rax",
        // Non-volatile general-purpose registers.
        "mov [rcx + 0x10], rbp",
        "mov [rcx + 0x18], rbx",
        "mov [rcx + 0x20], rsi",
        "mov [rcx + 0x28], rdi",
        "mov [rcx + 0x30], r12",
        "mov [rcx + 0x38], r13",
        "mov [rcx + 0x40], r14",
        "mov [rcx + 0x48], r15",
        // Floating-point control state.
        "stmxcsr [rcx + 0x50]",
        "fnstcw [rcx + 0x54]",
        // Non-volatile SSE registers.
        "movaps [rcx + 0x60], xmm6",
        "movaps [rcx + 0x70], xmm7",
        "movaps [rcx + 0x80], xmm8",
        "movaps [rcx + 0x90], xmm9",
        "movaps [rcx + 0xA0], xmm10",
        "movaps [rcx + 0xB0], xmm11",
        "movaps [rcx + 0xC0], xmm12",
        "movaps [rcx + 0xD0], xmm13",
        "movaps [rcx + 0xE0], xmm14",
        "movaps [rcx + 0xF0], xmm15",
        "xor eax, eax",
        "ret",
    );
}

/// Restores the environment saved in `env` and returns `value` from the
/// matching [`capture`] call. A `value` of 0 is reported as 1 so the
/// second return stays distinguishable from the first.
///
/// # Safety
///
/// - `env` must have been filled by [`capture`].
/// - The stack frame that called `capture` must still be live (in this
///   process, or in a duplicate whose address space contains it).
/// - Consuming an environment whose frame has returned is undefined
///   behavior, as with any non-local jump.
#[unsafe(naked)]
pub unsafe extern "C" fn resume(env: *const JumpEnv, value: usize) -> ! {
    core::arch::naked_asm!(
        "mov rbp, [rcx + 0x10]",
        "mov rbx, [rcx + 0x18]",
        "mov rsi, [rcx + 0x20]",
        "mov rdi, [rcx + 0x28]",
        "mov r12, [rcx + 0x30]",
        "mov r13, [rcx + 0x38]",
        "mov r14, [rcx + 0x40]",
        "mov r15, [rcx + 0x48]",
        "ldmxcsr [rcx + 0x50]",
        "fldcw [rcx + 0x54]",
        "movaps xmm6, [rcx + 0x60]",
        "movaps xmm7, [rcx + 0x70]",
        "movaps xmm8, [rcx + 0x80]",
        "movaps xmm9, [rcx + 0x90]",
        "movaps xmm10, [rcx + 0xA0]",
        "movaps xmm11, [rcx + 0xB0]",
        "movaps xmm12, [rcx + 0xC0]",
        "movaps xmm13, [rcx + 0xD0]",
        "movaps xmm14, [rcx + 0xE0]",
        "movaps xmm15, [rcx + 0xF0]",
        // Cut back to the captured frame and return the value there.
        "mov rsp, [rcx + 0x08]",
        "mov rax, rdx",
        "test rax, rax",
        "jnz 2f",
        "mov eax, 1",
        "2:",
        "jmp qword ptr [rcx + 0x00]",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem;

    fn offset_of<T>(env: &JumpEnv, field: &T) -> usize {
        field as *const T as usize - env as *const JumpEnv as usize
    }

    #[test]
    fn test_layout_matches_assembly_offsets() {
        let env = JumpEnv::zeroed();

        assert_eq!(offset_of(&env, &env.rip), 0x00);
        assert_eq!(offset_of(&env, &env.rsp), 0x08);
        assert_eq!(offset_of(&env, &env.r15), 0x48);
        assert_eq!(offset_of(&env, &env.mxcsr), 0x50);
        assert_eq!(offset_of(&env, &env.fpcw), 0x54);
        assert_eq!(offset_of(&env, &env.xmm), 0x60);
        assert_eq!(mem::size_of::<JumpEnv>(), 0x100);
        assert_eq!(mem::align_of::<JumpEnv>(), 16);
    }

    #[test]
    fn test_capture_returns_zero_and_fills_env() {
        let mut env = JumpEnv::zeroed();
        let code = unsafe { capture(&mut env) };

        assert_eq!(code, 0);
        assert_ne!(env.rip, 0);
        assert_ne!(env.rsp, 0);
    }

    #[test]
    fn test_resume_returns_value_at_capture_site() {
        let mut env = JumpEnv::zeroed();

        let code = unsafe { capture(&mut env) };
        if code == 0 {
            unsafe { resume(&env, 7) };
        }
        assert_eq!(code, 7);
    }

    #[test]
    fn test_resume_never_reports_zero() {
        let mut env = JumpEnv::zeroed();

        let code = unsafe { capture(&mut env) };
        if code == 0 {
            unsafe { resume(&env, 0) };
        }
        assert_eq!(code, 1);
    }
}
