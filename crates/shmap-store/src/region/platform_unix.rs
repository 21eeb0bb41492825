//! Unix file locking and process liveness.
//!
//! Uses `flock` to serialize creation and validation of a map file between
//! processes, and `kill(pid, 0)` to detect segment locks whose holder has
//! exited.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::thread;
use std::time::{Duration, Instant};

use libc::{EINTR, ESRCH, EWOULDBLOCK, LOCK_EX, LOCK_NB, LOCK_UN, flock, kill, pid_t};

use crate::{MapError, Result};

/// Initialization lock timeout in seconds.
const INIT_LOCK_TIMEOUT_SECS: u64 = 30;

/// Initialization lock retry interval in milliseconds.
const INIT_LOCK_RETRY_MS: u64 = 10;

/// Exclusive advisory lock on an open file, released on drop.
pub struct FileLock<'a> {
    file: &'a File,
}

impl<'a> FileLock<'a> {
    /// Take an exclusive `flock` on `file`, retrying until the timeout.
    #[allow(unsafe_code)]
    pub fn acquire(file: &'a File) -> Result<Self> {
        let fd = file.as_raw_fd();
        let deadline = Instant::now() + Duration::from_secs(INIT_LOCK_TIMEOUT_SECS);

        loop {
            // SAFETY: `fd` is a valid descriptor borrowed from `file`.
            if unsafe { flock(fd, LOCK_EX | LOCK_NB) } == 0 {
                return Ok(Self { file });
            }

            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(EINTR) => {}
                Some(EWOULDBLOCK) => {
                    if Instant::now() >= deadline {
                        return Err(MapError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            format!(
                                "map file still locked by another process after {INIT_LOCK_TIMEOUT_SECS}s"
                            ),
                        )));
                    }
                    thread::sleep(Duration::from_millis(INIT_LOCK_RETRY_MS));
                }
                _ => return Err(MapError::Io(err)),
            }
        }
    }
}

impl Drop for FileLock<'_> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: The descriptor outlives the lock guard.
        unsafe {
            flock(self.file.as_raw_fd(), LOCK_UN);
        }
    }
}

/// Whether a process with this pid exists.
///
/// Permission errors count as alive: the process exists but belongs to
/// another user.
#[allow(unsafe_code)]
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: Signal 0 performs only the existence and permission check.
    if unsafe { kill(pid, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() != Some(ESRCH)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_is_alive() {
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn test_invalid_pids_are_dead() {
        assert!(!process_alive(0));
        assert!(!process_alive(u32::MAX));
    }

    #[test]
    fn test_lock_is_reentrant_after_drop() {
        let file = tempfile::tempfile().expect("tempfile");
        {
            let _lock = FileLock::acquire(&file).expect("first lock");
        }
        let _lock = FileLock::acquire(&file).expect("second lock");
    }
}
