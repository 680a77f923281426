// Process signalling (SIGTERM to a command or to the whole shell process group)

use outpost_core::port::ExecutionError;

/// Send SIGTERM to a single process
pub fn terminate(pid: i32) -> Result<(), ExecutionError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid), Signal::SIGTERM)
            .map_err(|e| ExecutionError::Killed(format!("SIGTERM to {} failed: {}", pid, e)))
    }

    #[cfg(not(unix))]
    {
        Err(ExecutionError::Killed(format!(
            "cannot signal {}: unsupported platform",
            pid
        )))
    }
}

/// Send SIGTERM to every process in a group (shell plus the commands it started)
pub fn terminate_group(pgid: i32) -> Result<(), ExecutionError> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        killpg(Pid::from_raw(pgid), Signal::SIGTERM).map_err(|e| {
            ExecutionError::Killed(format!("SIGTERM to group {} failed: {}", pgid, e))
        })
    }

    #[cfg(not(unix))]
    {
        Err(ExecutionError::Killed(format!(
            "cannot signal group {}: unsupported platform",
            pgid
        )))
    }
}

/// Whether a process exists (signal 0)
pub fn is_alive(pid: i32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        kill(Pid::from_raw(pid), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_terminate_kills_child() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;
        assert!(is_alive(pid));

        terminate(pid).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_terminate_missing_process_errors() {
        // pid far above default pid_max
        assert!(terminate(i32::MAX - 1).is_err());
    }
}
