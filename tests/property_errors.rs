//! Property 2: Status classification and error rendering
//!
//! NTSTATUS values classify by sign bit alone and render as fixed-width
//! lowercase hex; every error variant's message carries its
//! distinguishing detail (symbol name, status word, or OS error code).

use ntfork::error::{ForkError, SpawnError};
use ntfork::status::NtStatus;
use proptest::prelude::*;

/// Strategy producing an arbitrary `ForkError` variant.
fn arb_fork_error() -> impl Strategy<Value = ForkError> {
    let arb_symbol = prop_oneof![
        Just("ZwCreateProcess"),
        Just("ZwCreateThread"),
        Just("ZwQueryVirtualMemory"),
    ];

    (0..=8u8, arb_symbol, any::<i32>()).prop_map(|(tag, symbol, raw)| {
        let status = NtStatus(raw);
        match tag {
            0 => ForkError::NtdllNotLoaded,
            1 => ForkError::MissingEntryPoint { symbol },
            2 => ForkError::CaptureContext(status),
            3 => ForkError::InspectStack(status),
            4 => ForkError::CreateProcess(status),
            5 => ForkError::CreateThread(status),
            6 => ForkError::QueryThreadInfo(status),
            7 => ForkError::WireExceptionChain(status),
            _ => ForkError::ResumeThread(status),
        }
    })
}

/// Strategy producing an arbitrary `SpawnError` variant.
fn arb_spawn_error() -> impl Strategy<Value = SpawnError> {
    (0..=4u8, any::<u32>()).prop_map(|(tag, code)| match tag {
        0 => SpawnError::CommandLine,
        1 => SpawnError::CreatePipe { code },
        2 => SpawnError::ConfigurePipe { code },
        3 => SpawnError::CreateProcess { code },
        _ => SpawnError::CloseStream { code },
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    /// Success is the sign bit and nothing else.
    #[test]
    fn status_success_is_sign_bit(raw in any::<i32>()) {
        let status = NtStatus(raw);
        prop_assert_eq!(status.is_success(), raw >= 0);
        prop_assert_eq!(status.raw(), raw);
    }

    /// Statuses render as 0x-prefixed, zero-padded, lowercase hex.
    #[test]
    fn status_renders_fixed_width_hex(raw in any::<i32>()) {
        let rendered = NtStatus(raw).to_string();
        prop_assert_eq!(rendered.len(), 10);
        prop_assert!(rendered.starts_with("0x"));
        prop_assert_eq!(rendered, format!("{:#010x}", raw as u32));
    }

    /// Capability failures are exactly the two binder variants.
    #[test]
    fn capability_split_is_exact(err in arb_fork_error()) {
        let capability = matches!(
            err,
            ForkError::NtdllNotLoaded | ForkError::MissingEntryPoint { .. }
        );
        prop_assert_eq!(err.is_capability(), capability);
    }

    /// Every fork error's message names its distinguishing detail.
    #[test]
    fn fork_messages_quote_their_detail(err in arb_fork_error()) {
        let message = err.to_string();
        match err {
            ForkError::NtdllNotLoaded => prop_assert!(message.contains("ntdll")),
            ForkError::MissingEntryPoint { symbol } => {
                prop_assert!(message.contains(symbol))
            }
            ForkError::CaptureContext(s)
            | ForkError::InspectStack(s)
            | ForkError::CreateProcess(s)
            | ForkError::CreateThread(s)
            | ForkError::QueryThreadInfo(s)
            | ForkError::WireExceptionChain(s)
            | ForkError::ResumeThread(s) => {
                prop_assert!(message.contains(&s.to_string()))
            }
        }
    }

    /// Spawn errors carrying an OS code quote it in their message.
    #[test]
    fn spawn_messages_quote_their_code(err in arb_spawn_error()) {
        let message = err.to_string();
        match err {
            SpawnError::CommandLine => prop_assert!(message.contains("NUL")),
            SpawnError::CreatePipe { code }
            | SpawnError::ConfigurePipe { code }
            | SpawnError::CreateProcess { code }
            | SpawnError::CloseStream { code } => {
                let expected = format!("os error {}", code);
                prop_assert!(message.contains(&expected))
            }
        }
    }
}
