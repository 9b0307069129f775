//! Exclusive directory lock, so only one process opens a database at a time.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::Result;

const LOCK_FILE: &str = "LOCK";

/// Holds `<dir>/LOCK` with an exclusive `flock(2)` for the life of the DB.
/// The file records the owning PID; the OS drops the lock when the handle
/// closes, so a crashed process never wedges the directory.
pub(crate) struct DirLock {
    _file: File,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<DirLock> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(dir.join(LOCK_FILE))?;
        try_lock(&file)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(DirLock { _file: file })
    }
}

#[cfg(unix)]
fn try_lock(file: &File) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn try_lock(_file: &File) -> std::io::Result<()> {
    Ok(())
}
