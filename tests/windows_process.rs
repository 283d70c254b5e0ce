//! Process-level checks for the spawn and fork surfaces.
//!
//! Windows only: these create real pipes, real child programs, and (on
//! x86_64) real duplicates of the test process.

#![cfg(windows)]

use ntfork::spawn::{spawn_with_stdout_pipe, terminate};
use ntfork::SpawnError;

/// `echo` output arrives through the pipe, newline-terminated, and the
/// stream reports end-of-stream right after it.
#[test]
fn spawned_echo_output_is_readable() {
    let (mut reader, pid) =
        spawn_with_stdout_pipe("cmd.exe /C echo OK", "r").expect("cmd.exe spawns");
    assert!(pid > 0);

    let mut buf = [0xAAu8; 32];
    let n = reader.read_line(&mut buf).expect("echo wrote one line");
    assert_eq!(&buf[..n], b"OK\r\n");
    assert!(buf[n..].iter().all(|&b| b == 0));

    assert_eq!(reader.read_line(&mut buf), None);
    assert!(!reader.is_open());
    reader.close().expect("releasing an exhausted stream is a no-op");
}

/// The spawn call waits for the program: a file the child writes as its
/// last act is already present when the call returns.
#[test]
fn spawn_waits_for_child_exit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("done.txt");
    let command = format!("cmd.exe /C echo finished> \"{}\"", marker.display());

    let (reader, _pid) = spawn_with_stdout_pipe(&command, "r").expect("cmd.exe spawns");
    assert!(marker.exists(), "child had not exited when spawn returned");
    reader.close().expect("close unread stream");
}

/// A command line that resolves to no program image fails with the
/// documented not-found code.
#[test]
fn spawn_missing_program_reports_not_found() {
    let err = spawn_with_stdout_pipe("no-such-image-a8f1.exe", "r").unwrap_err();
    assert_eq!(err, SpawnError::CreateProcess { code: 2 });
}

/// Terminating a live process stops it; repeating the call after the
/// process is gone still returns normally.
#[test]
fn terminate_stops_a_live_process() {
    let mut child = std::process::Command::new("ping.exe")
        .args(["-n", "30", "127.0.0.1"])
        .stdout(std::process::Stdio::null())
        .spawn()
        .expect("ping.exe starts");

    terminate(child.id(), 15);
    let status = child.wait().expect("terminated child reaps");
    assert!(!status.success());

    terminate(child.id(), 15);
}

#[cfg(target_arch = "x86_64")]
mod duplication {
    use ntfork::fork::{fork, fork_supported, ForkResult};
    use winapi::shared::minwindef::FALSE;
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::OpenProcess;
    use winapi::um::winnt::PROCESS_QUERY_LIMITED_INFORMATION;

    /// Parent path: the call returns a positive pid that resolves to a
    /// live process. The child path lands in a separate process; it keeps
    /// itself alive briefly so the parent can observe it, and must not
    /// touch the test harness.
    #[test]
    fn fork_parent_sees_live_child() {
        assert!(fork_supported());

        match unsafe { fork() }.expect("duplication succeeds") {
            ForkResult::Parent { child } => {
                assert!(child > 0);

                let handle =
                    unsafe { OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, FALSE, child) };
                assert!(!handle.is_null(), "child pid resolves to a process");
                let _ = unsafe { CloseHandle(handle) };

                ntfork::spawn::terminate(child, 9);
            }
            ForkResult::Child => {
                // Stay observable until the parent reaps us, then leave
                // without running any harness machinery.
                std::thread::sleep(std::time::Duration::from_secs(5));
                std::process::exit(0);
            }
        }
    }
}
