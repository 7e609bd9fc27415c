//! Single-instance lock.
//!
//! The lock is an open-file-description record lock (`F_OFD_SETLK`) over the
//! whole lock file. [`is_held`] queries it with `F_OFD_GETLK` without taking it.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Seek, SeekFrom, Write},
    mem,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    process,
};

use anyhow::{Context, Result};
use log::debug;

/// Exclusive lock on a lock file, held until dropped.
///
/// The holder's PID is written into the file so that `hwfand emergency`
/// can find and stop it.
#[derive(Debug)]
pub struct InstanceLock {
    file: File,
    path: PathBuf,
}

fn whole_file(kind: libc::c_int) -> libc::flock {
    // SAFETY: `flock` is plain old data and all-zero is a valid value.
    let mut lock: libc::flock = unsafe { mem::zeroed() };
    lock.l_type = kind as libc::c_short;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock
}

fn ofd_fcntl(file: &File, cmd: libc::c_int, lock: &mut libc::flock) -> io::Result<()> {
    // SAFETY: the descriptor is owned by `file` and `lock` outlives the call.
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), cmd, lock as *mut libc::flock) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn try_lock(file: &File) -> io::Result<bool> {
    let mut lock = whole_file(libc::F_WRLCK);
    match ofd_fcntl(file, libc::F_OFD_SETLK, &mut lock) {
        Ok(()) => Ok(true),
        Err(e) if matches!(e.raw_os_error(), Some(libc::EAGAIN | libc::EACCES)) => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create lock directory {}", dir.display()))?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("Failed to open lock file {}", path.display()))
}

impl InstanceLock {
    /// Takes the lock without blocking. `Ok(None)` means another process
    /// already holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = open_lock_file(path)?;

        if !try_lock(&file).with_context(|| format!("lock {}", path.display()))? {
            debug!("{} is held by another process", path.display());
            return Ok(None);
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)).map(drop))
            .and_then(|()| writeln!(file, "{}", process::id()))
            .with_context(|| format!("Failed to record PID in {}", path.display()))?;

        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let mut unlock = whole_file(libc::F_UNLCK);
        if let Err(e) = ofd_fcntl(&self.file, libc::F_OFD_SETLK, &mut unlock) {
            debug!("Unlocking {}: {e}", self.path.display());
        }
    }
}

/// Whether some process currently holds the lock at `path`. Only queries
/// the lock; never takes it.
pub fn is_held(path: &Path) -> Result<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open lock file {}", path.display()));
        }
    };

    let mut query = whole_file(libc::F_WRLCK);
    ofd_fcntl(&file, libc::F_OFD_GETLK, &mut query)
        .with_context(|| format!("Failed to query lock {}", path.display()))?;
    Ok(query.l_type != libc::F_UNLCK as libc::c_short)
}

/// PID recorded by the last holder, if the file holds one.
pub fn holder_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
