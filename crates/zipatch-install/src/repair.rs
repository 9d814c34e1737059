//! Minimal repair from patch sources
//!
//! Rewrites exactly the parts a verification run flagged, pulling bytes back
//! out of the original patch files (or synthesizing them for zero and
//! placeholder spans), then fixes file lengths and version files.
//!
//! Patch files can be fed in all at once ([`Repairer::repair`]) or one at a
//! time ([`Repairer::repair_from_source`]) when they arrive incrementally.

use std::io::{Read, Seek, SeekFrom};

use tracing::{debug, info};
use zipatch_formats::partial::PartialIndex;

use crate::store::{self, FileStore};
use crate::verify::VerifyReport;
use crate::{Error, Result};

/// Counts of what a repair run rewrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairSummary {
    pub parts_rebuilt: usize,
    pub bytes_rebuilt: u64,
    pub files_resized: usize,
}

impl RepairSummary {
    pub fn absorb(&mut self, other: Self) {
        self.parts_rebuilt += other.parts_rebuilt;
        self.bytes_rebuilt += other.bytes_rebuilt;
        self.files_resized += other.files_resized;
    }
}

/// Repairer over one install root.
pub struct Repairer<'a> {
    index: &'a PartialIndex,
    store: FileStore,
}

impl<'a> Repairer<'a> {
    pub fn new(index: &'a PartialIndex, root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            index,
            store: FileStore::new(root.into()),
        }
    }

    /// Rebuild everything `report` flagged. `sources` must parallel the
    /// index's source file list; each is a reader over that patch file.
    pub fn repair<S: Read + Seek>(
        &self,
        sources: &mut [S],
        report: &VerifyReport,
    ) -> Result<RepairSummary> {
        let mut summary = self.repair_patternless(report)?;
        for (i, source) in sources.iter_mut().enumerate() {
            summary.absorb(self.repair_from_source(i as u16, source, report)?);
        }
        summary.absorb(self.fix_lengths(report)?);

        info!(
            parts = summary.parts_rebuilt,
            bytes = summary.bytes_rebuilt,
            resized = summary.files_resized,
            "repair finished"
        );
        Ok(summary)
    }

    /// Rebuild the flagged parts that need no patch data: zero spans and
    /// empty-block placeholders.
    pub fn repair_patternless(&self, report: &VerifyReport) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();

        for (target_index, target) in self.index.targets().iter().enumerate() {
            let missing = &report.missing_parts[target_index];
            if missing.is_empty() {
                continue;
            }

            let handle = self.store.open(&target.relative_path)?;
            let mut file = handle.lock();

            for &part_index in missing {
                let part = &target.plan.parts()[part_index];
                if part.is_from_patch() {
                    continue;
                }
                let mut out = vec![0u8; part.target_size as usize];
                part.reconstruct_headerless(&mut out)?;
                store::write_at(&mut file, part.target_offset, &out)?;
                summary.parts_rebuilt += 1;
                summary.bytes_rebuilt += u64::from(part.target_size);
            }
        }
        Ok(summary)
    }

    /// Rebuild the flagged parts whose bytes live in one patch file.
    pub fn repair_from_source<S: Read + Seek>(
        &self,
        source_index: u16,
        source: &mut S,
        report: &VerifyReport,
    ) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();

        for (target_index, target) in self.index.targets().iter().enumerate() {
            let missing = &report.missing_parts[target_index];
            if missing.is_empty() {
                continue;
            }

            let handle = self.store.open(&target.relative_path)?;
            let mut file = handle.lock();

            for &part_index in missing {
                let part = &target.plan.parts()[part_index];
                if part.patch_index() != Some(source_index) {
                    continue;
                }
                source.seek(SeekFrom::Start(part.source_offset()))?;

                let mut src = Vec::with_capacity(part.max_source_size() as usize);
                source
                    .take(u64::from(part.max_source_size()))
                    .read_to_end(&mut src)?;

                let mut out = vec![0u8; part.target_size as usize];
                part.reconstruct(&src, &mut out, true)?;
                store::write_at(&mut file, part.target_offset, &out)?;
                summary.parts_rebuilt += 1;
                summary.bytes_rebuilt += u64::from(part.target_size);
            }

            debug!(
                path = %target.relative_path,
                source = source_index,
                "target parts repaired"
            );
        }
        Ok(summary)
    }

    /// Truncate or extend every touched target back to its declared size.
    /// Call after all parts are rewritten so a tail rebuild is not re-cut.
    pub fn fix_lengths(&self, report: &VerifyReport) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();

        for (target_index, target) in self.index.targets().iter().enumerate() {
            let touched = !report.missing_parts[target_index].is_empty()
                || report.size_mismatches.contains(&target_index);
            if !touched {
                continue;
            }

            let handle = self.store.open(&target.relative_path)?;
            let file = handle.lock();
            if file.metadata()?.len() != target.file_size() {
                file.set_len(target.file_size())?;
                summary.files_resized += 1;
            }
        }
        Ok(summary)
    }

    /// Stamp the version the repaired install now corresponds to, derived
    /// from the index's last patch file.
    pub fn write_version_files(&self) -> Result<()> {
        let Some(version) = self.index.version_name() else {
            return Ok(());
        };

        for relative in [
            self.index.version_file_ver(),
            self.index.version_file_bck(),
        ] {
            let path = self.store.target_path(&relative);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| Error::Target {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&path, version).map_err(|source| Error::Target { path, source })?;
        }
        Ok(())
    }
}
