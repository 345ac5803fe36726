//! Per-card run locking
//!
//! Only one automation run may drive a card at a time. The lock is an
//! exclusive `flock` on `<log_path>/<card_id>.lock`, released when the
//! `CardLock` is dropped or the process exits.

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Held lock on one card
#[derive(Debug)]
pub struct CardLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl CardLock {
    /// Try to take the lock for `card_id`, failing fast if another run holds it
    pub fn acquire(dir: &Path, card_id: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.lock", sanitize(card_id)));

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => return Err(Error::CardBusy(card_id.to_string())),
            Err((_, errno)) => return Err(Error::Io(errno.into())),
        };

        // Record the holder for anyone inspecting the lock file
        lock.set_len(0)?;
        writeln!(lock, "{}", std::process::id())?;

        tracing::debug!(card = card_id, "acquired lock {}", path.display());
        Ok(Self { _lock: lock, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Keep card ids usable as file names
fn sanitize(card_id: &str) -> String {
    card_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || "-_.".contains(c) { c } else { '_' })
        .collect()
}
