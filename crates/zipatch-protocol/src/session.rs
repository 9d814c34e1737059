//! Repair session loops
//!
//! The verifier side ([`RepairServer`]) holds the install directory: it
//! collects partial indexes from the peer, verifies the install, asks for the
//! patch spans it cannot rebuild locally, and repairs as they arrive. The
//! patch-holder side ([`RepairClient`]) answers those requests through a
//! [`PartialFileProvider`].

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zipatch_formats::partial::PartialIndex;
use zipatch_install::{RepairSummary, Repairer, Verifier, VerifyReport};

use crate::channel::MessageChannel;
use crate::message::{RepairMessage, RequestedPart};
use crate::{Error, Result};

struct PatchSet {
    root: PathBuf,
    index: PartialIndex,
    report: VerifyReport,
    /// Source files requested from the peer and not yet finished.
    pending: BTreeSet<u32>,
}

/// Drives verification and repair of one install over a channel.
pub struct RepairServer {
    root: PathBuf,
    workers: usize,
}

impl RepairServer {
    /// `workers` of zero verifies with one worker per core.
    pub fn new(root: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            root: root.into(),
            workers,
        }
    }

    /// Run the session to completion. Returns once every flagged part has
    /// been rebuilt and the peer has been told `Finished`.
    pub fn run<C: MessageChannel>(&self, channel: &mut C) -> Result<RepairSummary> {
        let mut sets = self.collect_indexes(channel)?;

        let mut summary = RepairSummary::default();
        let mut bytes_total = 0u64;
        for set in &mut sets {
            set.report = Verifier::new(&set.index, &set.root).verify(self.workers)?;
            bytes_total += flagged_bytes(set);
        }
        let mut bytes_done = 0u64;
        channel.send_message(&status(bytes_done, bytes_total))?;

        // Zero and placeholder spans need nothing from the peer.
        for set in &sets {
            let rebuilt = Repairer::new(&set.index, &set.root).repair_patternless(&set.report)?;
            bytes_done += rebuilt.bytes_rebuilt;
            summary.absorb(rebuilt);
        }

        for (set_id, set) in sets.iter_mut().enumerate() {
            for (source_id, entries) in
                set.report.missing_per_source(&set.index).iter().enumerate()
            {
                if entries.is_empty() {
                    continue;
                }
                let parts = entries
                    .iter()
                    .map(|&(target, part_index)| {
                        let part = &set.index.targets()[target].plan.parts()[part_index];
                        RequestedPart {
                            target_file_id: target as u32,
                            part_id: part_index as u32,
                            source_offset: part.source_offset(),
                            source_size: part.max_source_size(),
                        }
                    })
                    .collect();
                set.pending.insert(source_id as u32);
                channel.send_message(&RepairMessage::RequestPartialFile {
                    patch_set_id: set_id as u32,
                    source_file_id: source_id as u32,
                    source_file_name: set.index.sources()[source_id].name.clone(),
                    parts,
                })?;
            }
        }

        while sets.iter().any(|set| !set.pending.is_empty()) {
            match channel.recv_message()? {
                RepairMessage::ProvidePartialFile {
                    patch_set_id,
                    source_file_id,
                    local_path,
                } => {
                    let set = sets
                        .get_mut(patch_set_id as usize)
                        .ok_or(Error::UnknownPatchSet(patch_set_id))?;
                    if source_file_id as usize >= set.index.sources().len() {
                        return Err(Error::UnknownSourceFile(source_file_id));
                    }

                    let mut file = File::open(Path::new(&local_path))?;
                    let rebuilt = Repairer::new(&set.index, &set.root).repair_from_source(
                        source_file_id as u16,
                        &mut file,
                        &set.report,
                    )?;
                    bytes_done += rebuilt.bytes_rebuilt;
                    summary.absorb(rebuilt);
                    channel.send_message(&status(bytes_done, bytes_total))?;
                }
                RepairMessage::FinishPartialFile {
                    patch_set_id,
                    source_file_id,
                    ..
                } => {
                    let set = sets
                        .get_mut(patch_set_id as usize)
                        .ok_or(Error::UnknownPatchSet(patch_set_id))?;
                    set.pending.remove(&source_file_id);
                }
                other => {
                    return Err(Error::UnexpectedMessage {
                        got: other.name(),
                        expected: "a provided partial file",
                    });
                }
            }
        }

        for set in &sets {
            let repairer = Repairer::new(&set.index, &set.root);
            summary.absorb(repairer.fix_lengths(&set.report)?);
            if !set.report.is_clean() {
                repairer.write_version_files()?;
            }
        }

        channel.send_message(&status(bytes_done, bytes_total))?;
        channel.send_message(&RepairMessage::Finished)?;
        info!(
            parts = summary.parts_rebuilt,
            bytes = summary.bytes_rebuilt,
            "repair session finished"
        );
        Ok(summary)
    }

    fn collect_indexes<C: MessageChannel>(&self, channel: &mut C) -> Result<Vec<PatchSet>> {
        let mut sets = Vec::new();
        loop {
            match channel.recv_message()? {
                RepairMessage::ProvideIndexFile {
                    root_path,
                    version_name,
                    compressed_index,
                } => {
                    let index = PartialIndex::read_from(compressed_index.as_slice())?;
                    debug!(
                        root = %root_path,
                        version = %version_name,
                        targets = index.targets().len(),
                        "received index"
                    );
                    sets.push(PatchSet {
                        root: self.root.join(root_path),
                        index,
                        report: VerifyReport::default(),
                        pending: BTreeSet::new(),
                    });
                }
                RepairMessage::ProvideIndexFileFinish => return Ok(sets),
                other => {
                    return Err(Error::UnexpectedMessage {
                        got: other.name(),
                        expected: "an index file",
                    });
                }
            }
        }
    }
}

fn flagged_bytes(set: &PatchSet) -> u64 {
    set.report
        .missing_parts
        .iter()
        .enumerate()
        .flat_map(|(target, parts)| {
            parts
                .iter()
                .map(move |&part| u64::from(set.index.targets()[target].plan.parts()[part].target_size))
        })
        .sum()
}

fn status(bytes_done: u64, bytes_total: u64) -> RepairMessage {
    RepairMessage::StatusUpdate {
        fraction_done: if bytes_total == 0 {
            1.0
        } else {
            fraction(bytes_done, bytes_total)
        },
        bytes_done,
        bytes_total,
    }
}

#[allow(clippy::cast_precision_loss)]
fn fraction(done: u64, total: u64) -> f32 {
    (done as f64 / total as f64) as f32
}

/// Hooks the patch-holder side implements to satisfy span requests.
pub trait PartialFileProvider {
    /// Materialize the requested spans of `source_file_name` somewhere the
    /// verifier can read them, at their original offsets, and return that
    /// path. Bytes outside the requested spans are never read.
    fn provide(
        &mut self,
        patch_set_id: u32,
        source_file_name: &str,
        parts: &[RequestedPart],
    ) -> Result<PathBuf>;

    /// Progress callback; default ignores it.
    fn on_status(&mut self, _fraction_done: f32, _bytes_done: u64, _bytes_total: u64) {}
}

/// Patch-holder side of a repair session.
pub struct RepairClient<C, P> {
    channel: C,
    provider: P,
}

impl<C: MessageChannel, P: PartialFileProvider> RepairClient<C, P> {
    pub fn new(channel: C, provider: P) -> Self {
        Self { channel, provider }
    }

    /// Hand the verifier one index, naming the directory (relative to the
    /// verifier's root) its targets live under.
    pub fn offer_index(&mut self, root_path: &str, index: &PartialIndex) -> Result<()> {
        let mut compressed = Vec::new();
        index.write_to(&mut compressed)?;
        self.channel.send_message(&RepairMessage::ProvideIndexFile {
            root_path: root_path.to_owned(),
            version_name: index.version_name().unwrap_or_default().to_owned(),
            compressed_index: compressed,
        })
    }

    /// Close the index offer and answer requests until the verifier reports
    /// `Finished`. Returns the provider.
    pub fn run(mut self) -> Result<P> {
        self.channel
            .send_message(&RepairMessage::ProvideIndexFileFinish)?;

        loop {
            match self.channel.recv_message()? {
                RepairMessage::RequestPartialFile {
                    patch_set_id,
                    source_file_id,
                    source_file_name,
                    parts,
                } => {
                    let path =
                        self.provider
                            .provide(patch_set_id, &source_file_name, &parts)?;
                    self.channel
                        .send_message(&RepairMessage::ProvidePartialFile {
                            patch_set_id,
                            source_file_id,
                            local_path: path.to_string_lossy().into_owned(),
                        })?;
                    self.channel
                        .send_message(&RepairMessage::FinishPartialFile {
                            patch_set_id,
                            source_file_id,
                            source_file_name,
                        })?;
                }
                RepairMessage::StatusUpdate {
                    fraction_done,
                    bytes_done,
                    bytes_total,
                } => self.provider.on_status(fraction_done, bytes_done, bytes_total),
                RepairMessage::Finished => return Ok(self.provider),
                other => {
                    return Err(Error::UnexpectedMessage {
                        got: other.name(),
                        expected: "a partial file request",
                    });
                }
            }
        }
    }
}
