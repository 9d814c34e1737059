//! Piecewise install verification
//!
//! Checks an install directory against a sealed partial index, part by part.
//! Targets are verified in parallel, one worker per core by default, with a
//! shared cancellation flag polled between files.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use zipatch_formats::partial::{PartialIndex, TargetFile, VerifyOutcome};

use crate::{Error, Result};

/// What verification found, keyed by target/part position in the index.
#[derive(Debug, Clone, Default)]
pub struct VerifyReport {
    /// Per target: indices of parts whose bytes are missing or wrong.
    pub missing_parts: Vec<BTreeSet<usize>>,
    /// Targets whose on-disk length disagrees with the index.
    pub size_mismatches: BTreeSet<usize>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.size_mismatches.is_empty() && self.missing_parts.iter().all(BTreeSet::is_empty)
    }

    pub fn total_missing_parts(&self) -> usize {
        self.missing_parts.iter().map(BTreeSet::len).sum()
    }

    /// Group the missing patch-backed parts by the patch file that carries
    /// their bytes; entries are `(target, part)` positions.
    pub fn missing_per_source(&self, index: &PartialIndex) -> Vec<BTreeSet<(usize, usize)>> {
        let mut per_source = vec![BTreeSet::new(); index.sources().len()];
        for (target, parts) in self.missing_parts.iter().enumerate() {
            for &part in parts {
                if let Some(patch) = index.targets()[target].plan.parts()[part].patch_index() {
                    per_source[patch as usize].insert((target, part));
                }
            }
        }
        per_source
    }
}

/// Parallel verifier over one install root.
pub struct Verifier<'a> {
    index: &'a PartialIndex,
    root: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl<'a> Verifier<'a> {
    pub fn new(index: &'a PartialIndex, root: impl Into<PathBuf>) -> Self {
        Self {
            index,
            root: root.into(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that aborts the run when set; polled between files.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Verify every target. `workers` of zero means one per core.
    pub fn verify(&self, workers: usize) -> Result<VerifyReport> {
        let targets = self.index.targets();
        let workers = if workers == 0 {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            workers
        }
        .min(targets.len())
        .max(1);

        let next = AtomicUsize::new(0);
        let results: Vec<Mutex<Option<TargetOutcome>>> =
            targets.iter().map(|_| Mutex::new(None)).collect();
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    loop {
                        if self.cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        let i = next.fetch_add(1, Ordering::Relaxed);
                        if i >= targets.len() {
                            return;
                        }
                        match self.verify_target(&targets[i]) {
                            Ok(outcome) => *results[i].lock() = Some(outcome),
                            Err(e) => {
                                let mut slot = first_error.lock();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                self.cancel.store(true, Ordering::Relaxed);
                                return;
                            }
                        }
                    }
                });
            }
        });

        if let Some(e) = first_error.into_inner() {
            return Err(e);
        }
        if self.cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }

        let mut report = VerifyReport::default();
        for slot in results {
            let outcome = slot.into_inner().ok_or(Error::Cancelled)?;
            report.size_mismatches.extend(
                outcome
                    .size_mismatch
                    .then_some(report.missing_parts.len()),
            );
            report.missing_parts.push(outcome.missing);
        }
        Ok(report)
    }

    fn verify_target(&self, target: &TargetFile) -> Result<TargetOutcome> {
        let path = self.root.join(&target.relative_path);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "target missing entirely");
                return Ok(TargetOutcome {
                    missing: (0..target.plan.len()).collect(),
                    size_mismatch: false,
                });
            }
            Err(source) => return Err(Error::Target { path, source }),
        };

        let mut outcome = TargetOutcome {
            missing: BTreeSet::new(),
            size_mismatch: file.metadata()?.len() != target.file_size(),
        };

        for (i, part) in target.plan.parts().iter().enumerate() {
            file.seek(SeekFrom::Start(part.target_offset))?;
            // Streamed in fixed-size chunks; a multi-gigabyte wipe span must
            // not cost a part-sized allocation per worker.
            match part.verify_stream(&mut file)? {
                VerifyOutcome::Pass => {}
                VerifyOutcome::ShortRead | VerifyOutcome::Mismatch => {
                    outcome.missing.insert(i);
                }
                VerifyOutcome::Unverifiable => {
                    return Err(Error::UnverifiablePart {
                        path: target.relative_path.clone(),
                        offset: part.target_offset,
                    });
                }
            }
        }

        if !outcome.missing.is_empty() {
            warn!(
                path = %target.relative_path,
                bad_parts = outcome.missing.len(),
                "target failed verification"
            );
        }
        Ok(outcome)
    }
}

struct TargetOutcome {
    missing: BTreeSet<usize>,
    size_mismatch: bool,
}

/// Convenience wrapper: verify `root` against `index` with default workers.
pub fn verify_install(index: &PartialIndex, root: &Path) -> Result<VerifyReport> {
    Verifier::new(index, root).verify(0)
}
