use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Exclusive advisory lock over a store directory.
///
/// One `FileLock` per directory at a time: a second open of the same
/// directory fails with [`Error::Locked`] instead of corrupting the
/// images. The holder's process id is recorded in the lock file so a
/// contended open can say who owns the directory.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Opens (or creates) the lock file and acquires an exclusive,
    /// non-blocking lock on it. On contention the current holder's pid
    /// is read back for the warning.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::IO(e.to_string()))?;

        if let Err(e) = platform::try_exclusive(&file) {
            let holder = read_holder(&mut file);
            tracing::warn!(
                path = %path.display(),
                holder = %holder,
                error = %e,
                "store directory is already locked"
            );
            return Err(Error::Locked(format!(
                "{} is held by process {holder}",
                path.display()
            )));
        }

        // The lock is ours; replace the previous holder's pid with ours.
        if let Err(e) = stamp_pid(&mut file) {
            tracing::warn!(path = %path.display(), error = %e, "failed to record pid in lock file");
        }

        Ok(Self { _file: file, path })
    }

    /// The lock file's path. The file itself is left in place on release
    /// to avoid unlink races with a concurrent opener.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the OS lock; the file stays.
    }
}

fn read_holder(file: &mut File) -> String {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_err() || contents.trim().is_empty() {
        return "unknown".to_string();
    }
    contents.trim().to_string()
}

fn stamp_pid(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{}", std::process::id())?;
    file.flush()
}

#[cfg(unix)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn try_exclusive(file: &File) -> io::Result<()> {
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

    pub fn try_exclusive(file: &File) -> io::Result<()> {
        let rc = unsafe {
            LockFileEx(
                file.as_raw_handle() as *mut _,
                LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                0,
                !0,
                !0,
                std::ptr::null_mut(),
            )
        };
        if rc == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use std::fs::File;
    use std::io;

    // No advisory locking on this platform; allow the open.
    pub fn try_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }
}
