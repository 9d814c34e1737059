//! Patch application
//!
//! Applies a decoded chunk stream to an install directory. Application is
//! strictly sequential: chunks carry cross-chunk state (apply options and the
//! active platform), and data commands assume everything before them already
//! landed.

use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, info, warn};
use zipatch_formats::chunk::sqpk::{FileOperation, SqpkFile, HEADER_SIZE};
use zipatch_formats::chunk::{ApplyOptionKind, ChunkKind};
use zipatch_formats::sqpack::expansion_folder;
use zipatch_formats::{PatchFile, Platform, SqpkCommand};

use crate::store::{self, FileStore};
use crate::{Error, Result};

/// File name suffixes RemoveAll leaves alone: user settings and the four
/// stock cutscene files shipped with the installer.
const REMOVE_ALL_KEEP_SUFFIXES: [&str; 5] = [
    ".var",
    "00000.bk2",
    "00001.bk2",
    "00002.bk2",
    "00003.bk2",
];

/// Counts of what one patch file did to the install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub chunks: usize,
    pub bytes_written: u64,
    pub files_deleted: usize,
}

/// Sequential patch applier over one install root.
pub struct PatchApplier {
    store: FileStore,
    platform: Platform,
    ignore_missing: bool,
    ignore_old_mismatch: bool,
}

impl PatchApplier {
    pub fn new(game_path: impl AsRef<Path>) -> Self {
        Self {
            store: FileStore::new(game_path.as_ref()),
            platform: Platform::default(),
            ignore_missing: false,
            ignore_old_mismatch: false,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn ignore_missing(&self) -> bool {
        self.ignore_missing
    }

    pub fn ignore_old_mismatch(&self) -> bool {
        self.ignore_old_mismatch
    }

    /// Apply every chunk of `patch` in order.
    pub fn apply<R: Read>(&mut self, patch: &mut PatchFile<R>) -> Result<ApplySummary> {
        let mut summary = ApplySummary::default();

        while let Some(chunk) = patch.next_chunk()? {
            summary.chunks += 1;

            match chunk.kind {
                ChunkKind::FileHeader(header) => {
                    debug!(
                        version = header.version,
                        patch_type = %header.patch_type,
                        "patch header"
                    );
                }

                ChunkKind::ApplyOption(option) => match option.kind {
                    ApplyOptionKind::IgnoreMissing => self.ignore_missing = option.value,
                    ApplyOptionKind::IgnoreOldMismatch => self.ignore_old_mismatch = option.value,
                    ApplyOptionKind::Unknown(raw) => {
                        warn!(raw, "unknown apply option, ignoring");
                    }
                },

                ChunkKind::AddDirectory(name) => {
                    let path = self.store.target_path(name.trim_start_matches('/'));
                    fs::create_dir_all(&path).map_err(|source| Error::Target { path, source })?;
                }

                ChunkKind::DeleteDirectory(name) => {
                    let path = self.store.target_path(name.trim_start_matches('/'));
                    if let Err(source) = fs::remove_dir(&path) {
                        debug!(path = %path.display(), error = %source, "directory not deleted");
                        return Err(Error::Target { path, source });
                    }
                }

                ChunkKind::Sqpk(command) => self.apply_sqpk(command, &mut summary)?,

                // APFS is a legacy hint; XXXX is padding.
                ChunkKind::ApplyFreeSpace(_) | ChunkKind::Padding => {}

                ChunkKind::EndOfFile => break,
            }
        }

        info!(
            chunks = summary.chunks,
            bytes = summary.bytes_written,
            "patch applied"
        );
        Ok(summary)
    }

    fn apply_sqpk(&mut self, command: SqpkCommand, summary: &mut ApplySummary) -> Result<()> {
        match command {
            SqpkCommand::AddData(add) => {
                let handle = self.store.open(&add.target.resolve(self.platform))?;
                let mut file = handle.lock();
                store::write_at(&mut file, add.block_offset, &add.data)?;
                store::wipe(&mut file, add.delete_size)?;
                summary.bytes_written += add.data.len() as u64 + add.delete_size;
            }

            SqpkCommand::DeleteData(span) | SqpkCommand::ExpandData(span) => {
                let handle = self.store.open(&span.target.resolve(self.platform))?;
                let mut file = handle.lock();
                store::write_empty_block(&mut file, span.block_offset, span.block_count)?;
                summary.bytes_written += span.byte_size();
            }

            SqpkCommand::Header(header) => {
                let handle = self.store.open(&header.target.resolve(self.platform))?;
                let mut file = handle.lock();
                store::write_at(&mut file, header.header_kind.target_offset(), &header.data)?;
                summary.bytes_written += HEADER_SIZE as u64;
            }

            SqpkCommand::File(file) => self.apply_file(&file, summary)?,

            SqpkCommand::TargetInfo(info) => {
                self.platform = info.platform;
                debug!(platform = info.platform.name(), "target platform set");
            }

            // Index edits are realized through header/data commands.
            SqpkCommand::Index(_) | SqpkCommand::PatchInfo(_) => {}
        }
        Ok(())
    }

    fn apply_file(&mut self, file: &SqpkFile, summary: &mut ApplySummary) -> Result<()> {
        match file.operation {
            FileOperation::AddFile => {
                let handle = self.store.open(&file.path)?;
                let mut target = handle.lock();
                if file.file_offset == 0 {
                    target.set_len(0)?;
                }
                target.seek(SeekFrom::Start(file.file_offset))?;
                for block in &file.blocks {
                    summary.bytes_written += block.decompress_into(&mut *target)?;
                }
            }

            FileOperation::DeleteFile => {
                if let Err(e) = self.store.remove(&file.path) {
                    if self.ignore_missing && e.is_not_found() {
                        debug!(path = %file.path, "missing file ignored on delete");
                    } else {
                        return Err(e);
                    }
                }
                summary.files_deleted += 1;
            }

            FileOperation::RemoveAll => {
                let folder = expansion_folder(file.expansion_id as u8);
                for dir in [format!("sqpack/{folder}"), format!("movie/{folder}")] {
                    summary.files_deleted += self.remove_expansion_files(&dir)?;
                }
            }

            FileOperation::MakeDirTree => {
                let path = self.store.target_path(&file.path);
                fs::create_dir_all(&path).map_err(|source| Error::Target { path, source })?;
            }
        }
        Ok(())
    }

    /// Delete the files directly inside `dir`, keeping user settings and the
    /// stock cutscene placeholders.
    fn remove_expansion_files(&self, dir: &str) -> Result<usize> {
        let path = self.store.target_path(dir);
        if !path.is_dir() {
            return Ok(0);
        }

        let mut deleted = 0;
        for entry in fs::read_dir(&path)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if REMOVE_ALL_KEEP_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                continue;
            }
            fs::remove_file(entry.path()).map_err(|source| Error::Target {
                path: entry.path(),
                source,
            })?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
