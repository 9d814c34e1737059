//! Shared file handle store
//!
//! Patch chains touch the same container files over and over; the store keeps
//! one read-write handle per relative path for the lifetime of an apply or
//! repair session instead of reopening per chunk. Handles are wrapped in a
//! mutex so concurrent workers can interleave writes to different offsets of
//! one file safely.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::{Error, Result};

const WIPE_CHUNK: usize = 1 << 16;

/// Default open retry budget. The running game or a scanner may hold a
/// container open for a moment; failing the whole install over that is worse
/// than waiting it out.
const OPEN_ATTEMPTS: u32 = 5;
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Open file handles under one install root, keyed by relative path.
pub struct FileStore {
    root: PathBuf,
    files: Mutex<HashMap<String, Arc<Mutex<File>>>>,
    open_attempts: u32,
    open_retry_delay: Duration,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            files: Mutex::new(HashMap::new()),
            open_attempts: OPEN_ATTEMPTS,
            open_retry_delay: OPEN_RETRY_DELAY,
        }
    }

    pub fn with_open_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.open_attempts = attempts.max(1);
        self.open_retry_delay = delay;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn target_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Open (or create) a file for read-write access, reusing a prior handle
    /// for the same path. Parent directories are created as needed.
    pub fn open(&self, relative: &str) -> Result<Arc<Mutex<File>>> {
        let mut files = self.files.lock();
        if let Some(handle) = files.get(relative) {
            return Ok(Arc::clone(handle));
        }

        let path = self.target_path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Target {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = self.open_with_retry(&path)?;

        let handle = Arc::new(Mutex::new(file));
        files.insert(relative.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    fn open_with_retry(&self, path: &Path) -> Result<File> {
        let mut attempt = 1;
        loop {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
            {
                Ok(file) => return Ok(file),
                Err(source) if attempt >= self.open_attempts => {
                    return Err(Error::Target {
                        path: path.to_path_buf(),
                        source,
                    });
                }
                Err(source) => {
                    warn!(
                        path = %path.display(),
                        attempt,
                        error = %source,
                        "open failed, retrying"
                    );
                    std::thread::sleep(self.open_retry_delay);
                    attempt += 1;
                }
            }
        }
    }

    /// Close any cached handle for `relative`, then delete the file.
    pub fn remove(&self, relative: &str) -> Result<()> {
        self.files.lock().remove(relative);
        let path = self.target_path(relative);
        fs::remove_file(&path).map_err(|source| Error::Target { path, source })
    }

    /// Drop every cached handle, flushing pending writes.
    pub fn close_all(&self) {
        self.files.lock().clear();
    }
}

/// Write `data` at `offset`, leaving the cursor at its end.
pub fn write_at(file: &mut File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(data)
}

/// Zero-fill `len` bytes starting at the current cursor.
pub fn wipe(file: &mut File, len: u64) -> std::io::Result<()> {
    let zeros = [0u8; WIPE_CHUNK];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(WIPE_CHUNK as u64) as usize;
        file.write_all(&zeros[..n])?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Zero-fill `len` bytes starting at `offset`.
pub fn wipe_at(file: &mut File, offset: u64, len: u64) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    wipe(file, len)
}

/// Wipe a `block_count * 128` byte span at `offset`, then stamp the
/// placeholder entry header over its start.
pub fn write_empty_block(file: &mut File, offset: u64, block_count: u32) -> std::io::Result<()> {
    wipe_at(file, offset, u64::from(block_count) << 7)?;
    file.seek(SeekFrom::Start(offset))?;

    let header = zipatch_formats::partial::empty_block_header(block_count.saturating_sub(1));
    file.write_all(&header)
}
