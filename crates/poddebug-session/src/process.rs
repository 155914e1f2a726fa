//! Process existence and teardown signaling

/// Check whether a pid refers to a live process
///
/// EPERM means the process exists but is not ours; that counts as alive so
/// stale-record reconciliation stays conservative.
#[cfg(unix)]
pub(crate) fn process_exists(pid: u32) -> bool {
    // SAFETY: kill with signal 0 performs only the existence check.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub(crate) fn process_exists(_pid: u32) -> bool {
    true
}

/// Ask the process owning a tunnel to run its own teardown path
#[cfg(unix)]
pub(crate) fn request_teardown(pid: u32) -> bool {
    // SAFETY: SIGTERM to a pid we just verified; the owner's signal handler
    // closes its listener and exits.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
pub(crate) fn request_teardown(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_exists() {
        assert!(process_exists(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_pid_does_not_exist() {
        // Spawn and reap a child; its pid is then free
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(!process_exists(pid));
    }
}
