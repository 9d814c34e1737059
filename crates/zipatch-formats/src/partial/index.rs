//! Serialized partial-file index
//!
//! A `PartialIndex` condenses a chain of patch files into, per target file,
//! the minimal recipe for every byte span: which patch file (and offset) it
//! came from, or which synthetic pattern fills it. Index files are written
//! deflate-compressed with all integers big-endian.

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use super::part::{FilePart, PartSource};
use super::plan::PartPlan;
use crate::chunk::sqpk::{FileOperation, SqpkCommand};
use crate::chunk::ChunkKind;
use crate::patch::PatchFile;
use crate::sqpack::{expansion_folder, Platform};
use crate::{Error, Result};

pub const INDEX_MAGIC: u32 = 0x89AA_3CD1;
pub const INDEX_VERSION: u32 = 2;

/// Expansion number for the boot component, which lives outside the sqpack
/// expansion scheme.
pub const EXPANSION_BOOT: i32 = -1;
/// Expansion number of the base game.
pub const EXPANSION_BASE_GAME: i32 = 0;

/// One ingested patch file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    /// End of the last patch span any part references; bounds repair reads.
    pub last_offset: u64,
}

/// One file the patch chain produces.
#[derive(Debug, Clone, Default)]
pub struct TargetFile {
    pub relative_path: String,
    pub plan: PartPlan,
}

impl TargetFile {
    pub fn file_size(&self) -> u64 {
        self.plan.file_size()
    }
}

/// Per-target part plans over a chain of patch files.
#[derive(Debug, Clone)]
pub struct PartialIndex {
    expansion: i32,
    sources: Vec<SourceFile>,
    targets: Vec<TargetFile>,
}

impl PartialIndex {
    pub fn new(expansion: i32) -> Self {
        Self {
            expansion,
            sources: Vec::new(),
            targets: Vec::new(),
        }
    }

    pub fn expansion(&self) -> i32 {
        self.expansion
    }

    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    pub fn targets(&self) -> &[TargetFile] {
        &self.targets
    }

    pub fn target_index_of(&self, path: &str) -> Option<usize> {
        let normalized = normalize_path(path);
        self.targets
            .iter()
            .position(|t| t.relative_path.eq_ignore_ascii_case(&normalized))
    }

    /// Version string the fully patched install should report, derived from
    /// the last ingested patch file name.
    pub fn version_name(&self) -> Option<&str> {
        let name = &self.sources.last()?.name;
        name.get(1..)?.strip_suffix(".patch")
    }

    fn version_file_base(&self) -> String {
        match self.expansion {
            EXPANSION_BOOT => "ffxivboot".to_owned(),
            EXPANSION_BASE_GAME => "ffxivgame".to_owned(),
            n => format!("sqpack/ex{n}/ex{n}"),
        }
    }

    pub fn version_file_ver(&self) -> String {
        self.version_file_base() + ".ver"
    }

    pub fn version_file_bck(&self) -> String {
        self.version_file_base() + ".bck"
    }

    fn alloc_target(&mut self, path: &str) -> usize {
        match self.target_index_of(path) {
            Some(i) => i,
            None => {
                self.targets.push(TargetFile {
                    relative_path: normalize_path(path),
                    plan: PartPlan::new(),
                });
                self.targets.len() - 1
            }
        }
    }

    fn remove_targets_with_prefix(&mut self, prefix: &str) {
        let prefix = normalize_path(prefix);
        self.targets.retain(|t| {
            t.relative_path.len() < prefix.len()
                || !t.relative_path[..prefix.len()].eq_ignore_ascii_case(&prefix)
        });
    }

    fn bump_last_offset(&mut self, end: u64) {
        if let Some(source) = self.sources.last_mut() {
            source.last_offset = source.last_offset.max(end);
        }
    }

    /// Fold one patch file into the index. Chunks are processed in order; the
    /// active platform from the latest TargetInfo governs container path
    /// resolution for everything after it.
    pub fn ingest_patch<R: Read>(
        &mut self,
        patch_name: &str,
        patch: &mut PatchFile<R>,
    ) -> Result<()> {
        let patch_index = self.sources.len() as u16;
        self.sources.push(SourceFile {
            name: patch_name.to_owned(),
            last_offset: 0,
        });

        let mut platform = Platform::default();

        while let Some(chunk) = patch.next_chunk()? {
            let command = match chunk.kind {
                ChunkKind::DeleteDirectory(name) => {
                    self.remove_targets_with_prefix(&name.to_ascii_lowercase());
                    continue;
                }
                ChunkKind::Sqpk(command) => command,
                _ => continue,
            };

            match command {
                SqpkCommand::TargetInfo(info) => platform = info.platform,

                SqpkCommand::File(file) => match file.operation {
                    FileOperation::AddFile => {
                        let target = self.alloc_target(&file.path);
                        if file.file_offset == 0 {
                            self.targets[target].plan.clear();
                        }

                        let mut offset = file.file_offset;
                        for block in &file.blocks {
                            let size = block.decompressed_size as u32;
                            self.targets[target].plan.update(FilePart {
                                target_offset: offset,
                                target_size: size,
                                source: PartSource::Patch {
                                    patch: patch_index,
                                    offset: block.data_offset,
                                    deflated: block.is_compressed(),
                                },
                                split_from: 0,
                                crc32: None,
                            });
                            let consumed = if block.is_compressed() {
                                block.compressed_size as u64
                            } else {
                                u64::from(size)
                            };
                            self.bump_last_offset(block.data_offset + consumed);
                            offset += u64::from(size);
                        }
                    }
                    FileOperation::RemoveAll => {
                        let folder = expansion_folder(file.expansion_id as u8);
                        self.remove_targets_with_prefix(&format!("sqpack/{folder}"));
                        self.remove_targets_with_prefix(&format!("movie/{folder}"));
                    }
                    FileOperation::DeleteFile => {
                        let path = normalize_path(&file.path);
                        self.targets
                            .retain(|t| !t.relative_path.eq_ignore_ascii_case(&path));
                    }
                    FileOperation::MakeDirTree => {}
                },

                SqpkCommand::AddData(add) => {
                    let target = self.alloc_target(&add.target.resolve(platform));
                    let plan = &mut self.targets[target].plan;
                    plan.update(FilePart {
                        target_offset: add.block_offset,
                        target_size: add.data.len() as u32,
                        source: PartSource::Patch {
                            patch: patch_index,
                            offset: add.data_offset,
                            deflated: false,
                        },
                        split_from: 0,
                        crc32: None,
                    });
                    let wipe_offset = add.block_offset + add.data.len() as u64;
                    let wipe_size =
                        u32::try_from(add.delete_size).map_err(|_| Error::OversizedPart {
                            size: add.delete_size,
                            offset: wipe_offset,
                        })?;
                    plan.update(FilePart {
                        target_offset: wipe_offset,
                        target_size: wipe_size,
                        source: PartSource::Zeros,
                        split_from: 0,
                        crc32: None,
                    });
                    self.bump_last_offset(add.data_offset + add.data.len() as u64);
                }

                SqpkCommand::DeleteData(span) | SqpkCommand::ExpandData(span) => {
                    if span.block_count == 0 {
                        continue;
                    }
                    let tail_bytes = u64::from(span.block_count - 1) << 7;
                    let tail_size =
                        u32::try_from(tail_bytes).map_err(|_| Error::OversizedPart {
                            size: span.byte_size(),
                            offset: span.block_offset,
                        })?;
                    let target = self.alloc_target(&span.target.resolve(platform));
                    let plan = &mut self.targets[target].plan;
                    plan.update(FilePart {
                        target_offset: span.block_offset,
                        target_size: 1 << 7,
                        source: PartSource::EmptyBlock {
                            follow_units: span.block_count - 1,
                        },
                        split_from: 0,
                        crc32: None,
                    });
                    if tail_size > 0 {
                        plan.update(FilePart {
                            target_offset: span.block_offset + (1 << 7),
                            target_size: tail_size,
                            source: PartSource::Zeros,
                            split_from: 0,
                            crc32: None,
                        });
                    }
                }

                SqpkCommand::Header(header) => {
                    let target = self.alloc_target(&header.target.resolve(platform));
                    self.targets[target].plan.update(FilePart {
                        target_offset: header.header_kind.target_offset(),
                        target_size: header.data.len() as u32,
                        source: PartSource::Patch {
                            patch: patch_index,
                            offset: header.data_offset,
                            deflated: false,
                        },
                        split_from: 0,
                        crc32: None,
                    });
                    self.bump_last_offset(header.data_offset + header.data.len() as u64);
                }

                SqpkCommand::Index(_) | SqpkCommand::PatchInfo(_) => {}
            }
        }

        debug!(
            patch = patch_name,
            targets = self.targets.len(),
            "ingested patch into index"
        );
        Ok(())
    }

    /// Seal a CRC32 over every patch-backed part that lacks one, reading the
    /// referenced spans back out of the ingested patch files.
    ///
    /// `sources` must parallel [`Self::sources`].
    pub fn seal_crc32<S: Read + Seek>(&mut self, sources: &mut [S]) -> Result<()> {
        for target in &mut self.targets {
            for part in target.plan.parts_mut() {
                let Some(patch) = part.patch_index() else {
                    continue;
                };
                if part.crc32.is_some() {
                    continue;
                }
                let source =
                    sources
                        .get_mut(patch as usize)
                        .ok_or_else(|| Error::MalformedIndex(format!(
                            "part references missing source file {patch}"
                        )))?;

                source.seek(SeekFrom::Start(part.source_offset()))?;
                let mut src = Vec::with_capacity(part.max_source_size() as usize);
                source
                    .take(u64::from(part.max_source_size()))
                    .read_to_end(&mut src)?;

                let mut out = vec![0u8; part.target_size as usize];
                part.reconstruct(&src, &mut out, false)?;
                part.crc32 = Some(crc32fast::hash(&out));
            }
        }
        Ok(())
    }

    /// Serialize deflate-compressed into `writer`.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut w = DeflateEncoder::new(writer, Compression::default());

        w.write_u32::<BigEndian>(INDEX_MAGIC)?;
        w.write_u32::<BigEndian>(INDEX_VERSION)?;
        w.write_i32::<BigEndian>(self.expansion)?;

        w.write_u32::<BigEndian>(self.sources.len() as u32)?;
        for source in &self.sources {
            write_string(&mut w, &source.name)?;
        }
        for source in &self.sources {
            w.write_u64::<BigEndian>(source.last_offset)?;
        }

        w.write_u32::<BigEndian>(self.targets.len() as u32)?;
        for target in &self.targets {
            write_string(&mut w, &target.relative_path)?;
            w.write_u32::<BigEndian>(target.plan.len() as u32)?;
            for part in target.plan.parts() {
                write_part(&mut w, part)?;
            }
        }

        w.finish()?;
        Ok(())
    }

    /// Deserialize, validating framing and per-target plan contiguity.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let mut r = DeflateDecoder::new(reader);

        let magic = r.read_u32::<BigEndian>()?;
        if magic != INDEX_MAGIC {
            return Err(Error::MalformedIndex(format!(
                "bad signature {magic:#010x}"
            )));
        }
        let version = r.read_u32::<BigEndian>()?;
        if version != INDEX_VERSION {
            return Err(Error::MalformedIndex(format!(
                "unsupported version {version}"
            )));
        }

        let expansion = r.read_i32::<BigEndian>()?;

        let source_count = r.read_u32::<BigEndian>()? as usize;
        let mut sources = Vec::with_capacity(source_count.min(1024));
        for _ in 0..source_count {
            sources.push(SourceFile {
                name: read_string(&mut r)?,
                last_offset: 0,
            });
        }
        for source in &mut sources {
            source.last_offset = r.read_u64::<BigEndian>()?;
        }

        let target_count = r.read_u32::<BigEndian>()? as usize;
        let mut targets = Vec::with_capacity(target_count.min(65536));
        for _ in 0..target_count {
            let relative_path = read_string(&mut r)?;
            let part_count = r.read_u32::<BigEndian>()? as usize;
            let mut plan = PartPlan::new();
            for _ in 0..part_count {
                plan.push_unchecked(read_part(&mut r, sources.len())?);
            }
            if !plan.is_contiguous() {
                return Err(Error::MalformedIndex(format!(
                    "parts of {relative_path} are not contiguous"
                )));
            }
            targets.push(TargetFile {
                relative_path,
                plan,
            });
        }

        Ok(Self {
            expansion,
            sources,
            targets,
        })
    }
}

const PART_KIND_ZEROS: u8 = 0;
const PART_KIND_EMPTY_BLOCK: u8 = 1;
const PART_KIND_PATCH: u8 = 2;
const PART_KIND_UNAVAILABLE: u8 = 3;

const PART_FLAG_DEFLATED: u8 = 1 << 0;
const PART_FLAG_HAS_CRC: u8 = 1 << 1;

fn write_part<W: Write>(w: &mut W, part: &FilePart) -> Result<()> {
    let (kind, flags, patch, source_offset, aux) = match part.source {
        PartSource::Zeros => (PART_KIND_ZEROS, 0, 0, 0, 0),
        PartSource::EmptyBlock { follow_units } => {
            (PART_KIND_EMPTY_BLOCK, 0, 0, 0, follow_units)
        }
        PartSource::Patch {
            patch,
            offset,
            deflated,
        } => (
            PART_KIND_PATCH,
            if deflated { PART_FLAG_DEFLATED } else { 0 },
            patch,
            offset,
            part.crc32.unwrap_or(0),
        ),
        PartSource::Unavailable => (PART_KIND_UNAVAILABLE, 0, 0, 0, 0),
    };
    let flags = flags | if part.crc32.is_some() { PART_FLAG_HAS_CRC } else { 0 };

    w.write_u8(kind)?;
    w.write_u8(flags)?;
    w.write_u16::<BigEndian>(patch)?;
    w.write_u64::<BigEndian>(part.target_offset)?;
    w.write_u32::<BigEndian>(part.target_size)?;
    w.write_u64::<BigEndian>(source_offset)?;
    w.write_u32::<BigEndian>(part.split_from)?;
    w.write_u32::<BigEndian>(aux)?;
    Ok(())
}

fn read_part<R: Read>(r: &mut R, source_count: usize) -> Result<FilePart> {
    let kind = r.read_u8()?;
    let flags = r.read_u8()?;
    let patch = r.read_u16::<BigEndian>()?;
    let target_offset = r.read_u64::<BigEndian>()?;
    let target_size = r.read_u32::<BigEndian>()?;
    let source_offset = r.read_u64::<BigEndian>()?;
    let split_from = r.read_u32::<BigEndian>()?;
    let aux = r.read_u32::<BigEndian>()?;

    let source = match kind {
        PART_KIND_ZEROS => PartSource::Zeros,
        PART_KIND_EMPTY_BLOCK => PartSource::EmptyBlock { follow_units: aux },
        PART_KIND_PATCH => {
            if patch as usize >= source_count {
                return Err(Error::MalformedIndex(format!(
                    "part references source {patch} of {source_count}"
                )));
            }
            PartSource::Patch {
                patch,
                offset: source_offset,
                deflated: flags & PART_FLAG_DEFLATED != 0,
            }
        }
        PART_KIND_UNAVAILABLE => PartSource::Unavailable,
        other => {
            return Err(Error::MalformedIndex(format!("unknown part kind {other}")));
        }
    };

    let crc32 = if flags & PART_FLAG_HAS_CRC != 0 {
        Some(aux)
    } else {
        None
    };

    Ok(FilePart {
        target_offset,
        target_size,
        source,
        split_from,
        crc32,
    })
}

fn write_string<W: Write>(w: &mut W, s: &str) -> Result<()> {
    w.write_u16::<BigEndian>(s.len() as u16)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u16::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::InvalidString(e.to_string()))
}

/// Forward slashes, no leading slash; comparisons are case-insensitive on top.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> PartialIndex {
        let mut index = PartialIndex::new(EXPANSION_BASE_GAME);
        index.sources.push(SourceFile {
            name: "D2023.09.15.0000.0000.patch".into(),
            last_offset: 9000,
        });
        index.targets.push(TargetFile {
            relative_path: "sqpack/ffxiv/0a0000.win32.dat0".into(),
            plan: {
                let mut plan = PartPlan::new();
                plan.update(FilePart {
                    target_offset: 0,
                    target_size: 1024,
                    source: PartSource::Patch {
                        patch: 0,
                        offset: 300,
                        deflated: false,
                    },
                    split_from: 0,
                    crc32: Some(0x1234_5678),
                });
                plan.update(FilePart {
                    target_offset: 1024,
                    target_size: 128,
                    source: PartSource::EmptyBlock { follow_units: 3 },
                    split_from: 0,
                    crc32: None,
                });
                plan.update(FilePart {
                    target_offset: 1152,
                    target_size: 384,
                    source: PartSource::Zeros,
                    split_from: 0,
                    crc32: None,
                });
                plan
            },
        });
        index
    }

    #[test]
    fn test_serialization_roundtrip() {
        let index = sample_index();
        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();

        let back = PartialIndex::read_from(bytes.as_slice()).unwrap();
        assert_eq!(back.expansion(), EXPANSION_BASE_GAME);
        assert_eq!(back.sources(), index.sources());
        assert_eq!(back.targets().len(), 1);

        let original = &index.targets()[0];
        let decoded = &back.targets()[0];
        assert_eq!(decoded.relative_path, original.relative_path);
        assert_eq!(decoded.plan.parts(), original.plan.parts());
    }

    #[test]
    fn test_bad_signature_is_rejected() {
        let mut bytes = Vec::new();
        {
            let mut w = DeflateEncoder::new(&mut bytes, Compression::default());
            w.write_u32::<BigEndian>(0xDEAD_BEEF).unwrap();
            w.write_u32::<BigEndian>(INDEX_VERSION).unwrap();
            w.finish().unwrap();
        }
        let err = PartialIndex::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::MalformedIndex(_)));
    }

    #[test]
    fn test_non_contiguous_plan_is_rejected() {
        let mut index = sample_index();
        // Fabricate a gap by pushing a far-off part directly.
        index.targets[0].plan.push_unchecked(FilePart {
            target_offset: 1_000_000,
            target_size: 1,
            source: PartSource::Zeros,
            split_from: 0,
            crc32: None,
        });

        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();
        let err = PartialIndex::read_from(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::MalformedIndex(_)));
    }

    #[test]
    fn test_oversized_wipe_span_is_rejected() {
        use crate::chunk::sqpk::SqpkAddData;
        use crate::patch::ZIPATCH_MAGIC;
        use crate::sqpack::{SqpackKind, SqpackRef};

        // A wipe span past 4 GiB cannot be tracked as one part; ingest must
        // surface that instead of truncating the size.
        let mut bytes = ZIPATCH_MAGIC.to_vec();
        bytes.extend_from_slice(
            &ChunkKind::Sqpk(SqpkCommand::AddData(SqpkAddData {
                target: SqpackRef {
                    main_id: 0x0a,
                    sub_id: 0,
                    file_id: 0,
                    kind: SqpackKind::Dat,
                },
                block_offset: 0,
                data: vec![0u8; 128],
                delete_size: 1 << 32,
                data_offset: 0,
            }))
            .to_bytes(),
        );
        bytes.extend_from_slice(&ChunkKind::EndOfFile.to_bytes());

        let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
        let mut index = PartialIndex::new(EXPANSION_BASE_GAME);
        let err = index.ingest_patch("D1.patch", &mut patch).unwrap_err();
        assert!(matches!(
            err,
            Error::OversizedPart { size, offset: 128 } if size == 1 << 32
        ));
    }

    #[test]
    fn test_version_names() {
        let index = sample_index();
        assert_eq!(index.version_name(), Some("2023.09.15.0000.0000"));
        assert_eq!(index.version_file_ver(), "ffxivgame.ver");
        assert_eq!(index.version_file_bck(), "ffxivgame.bck");

        let boot = PartialIndex::new(EXPANSION_BOOT);
        assert_eq!(boot.version_file_ver(), "ffxivboot.ver");
        let ex2 = PartialIndex::new(2);
        assert_eq!(ex2.version_file_ver(), "sqpack/ex2/ex2.ver");
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/sqpack\\ffxiv/file"), "sqpack/ffxiv/file");
        assert_eq!(normalize_path("a/b"), "a/b");
    }
}
