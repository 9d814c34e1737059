//! SQPK sub-commands
//!
//! A `SQPK` chunk nests a second envelope: an i32 size (which must equal the
//! outer chunk size) followed by a one-byte command selector. Block offsets
//! and counts in data commands are expressed in 128-byte units and shifted
//! into byte offsets on decode.

use crate::block::CompressedBlock;
use crate::reader::ChunkReader;
use crate::sqpack::{Platform, SqpackKind, SqpackRef};
use crate::{Error, Result};

pub const CMD_ADD_DATA: u8 = b'A';
pub const CMD_DELETE_DATA: u8 = b'D';
pub const CMD_EXPAND_DATA: u8 = b'E';
pub const CMD_FILE: u8 = b'F';
pub const CMD_HEADER: u8 = b'H';
pub const CMD_INDEX: u8 = b'I';
pub const CMD_TARGET_INFO: u8 = b'T';
pub const CMD_PATCH_INFO: u8 = b'X';

/// Decoded SQPK sub-command.
#[derive(Debug, Clone)]
pub enum SqpkCommand {
    AddData(SqpkAddData),
    DeleteData(SqpkDataSpan),
    ExpandData(SqpkDataSpan),
    File(SqpkFile),
    Header(SqpkHeader),
    /// Index edits are applied by dedicated header/data commands instead;
    /// decoded for completeness, a no-op on apply.
    Index(SqpkIndex),
    TargetInfo(SqpkTargetInfo),
    /// Informational only, a no-op on apply.
    PatchInfo(SqpkPatchInfo),
}

impl SqpkCommand {
    /// Decode the inner envelope and dispatch on the command byte. `offset` is
    /// the absolute position of the enclosing chunk's tag; the reader sits just
    /// past that tag.
    pub(crate) fn read(reader: &mut ChunkReader<'_>, offset: u64) -> Result<Self> {
        // The inner size duplicates the outer chunk size (tag excluded); a
        // disagreement means the stream is corrupt in a way the CRC alone
        // cannot localize.
        let inner = reader.read_i32()?;
        let outer = (reader.remaining() + reader.position() - 4) as u32;
        if inner < 0 || inner as u32 != outer {
            return Err(Error::SqpkSizeMismatch {
                inner,
                outer,
                offset,
            });
        }

        let command = reader.read_u8()?;
        match command {
            CMD_ADD_DATA => Ok(Self::AddData(SqpkAddData::read(reader, offset)?)),
            CMD_DELETE_DATA => Ok(Self::DeleteData(SqpkDataSpan::read(reader)?)),
            CMD_EXPAND_DATA => Ok(Self::ExpandData(SqpkDataSpan::read(reader)?)),
            CMD_FILE => Ok(Self::File(SqpkFile::read(reader, offset)?)),
            CMD_HEADER => Ok(Self::Header(SqpkHeader::read(reader, offset)?)),
            CMD_INDEX => Ok(Self::Index(SqpkIndex::read(reader)?)),
            CMD_TARGET_INFO => Ok(Self::TargetInfo(SqpkTargetInfo::read(reader)?)),
            CMD_PATCH_INFO => Ok(Self::PatchInfo(SqpkPatchInfo::read(reader)?)),
            command => Err(Error::UnknownSqpkCommand { command, offset }),
        }
    }

    fn command_byte(&self) -> u8 {
        match self {
            Self::AddData(_) => CMD_ADD_DATA,
            Self::DeleteData(_) => CMD_DELETE_DATA,
            Self::ExpandData(_) => CMD_EXPAND_DATA,
            Self::File(_) => CMD_FILE,
            Self::Header(_) => CMD_HEADER,
            Self::Index(_) => CMD_INDEX,
            Self::TargetInfo(_) => CMD_TARGET_INFO,
            Self::PatchInfo(_) => CMD_PATCH_INFO,
        }
    }

    /// Append the full SQPK payload (inner size + command byte + body).
    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        match self {
            Self::AddData(c) => c.write(&mut body),
            Self::DeleteData(c) | Self::ExpandData(c) => c.write(&mut body),
            Self::File(c) => c.write(&mut body),
            Self::Header(c) => c.write(&mut body),
            Self::Index(c) => c.write(&mut body),
            Self::TargetInfo(c) => c.write(&mut body),
            Self::PatchInfo(c) => c.write(&mut body),
        }
        let inner = (body.len() + 5) as i32;
        out.extend_from_slice(&inner.to_be_bytes());
        out.push(self.command_byte());
        out.extend_from_slice(&body);
    }
}

/// `SQPK A`: write a run of blocks into a dat file, then wipe a following span.
///
/// Offsets are stored in 128-byte block units on the wire; this struct holds
/// byte values throughout.
#[derive(Debug, Clone)]
pub struct SqpkAddData {
    pub target: SqpackRef,
    pub block_offset: u64,
    pub data: Vec<u8>,
    /// Bytes to zero-fill immediately after the written data.
    pub delete_size: u64,
    /// Absolute offset of `data` within the patch file (decode metadata).
    pub data_offset: u64,
}

impl SqpkAddData {
    fn read(reader: &mut ChunkReader<'_>, chunk_offset: u64) -> Result<Self> {
        reader.skip(3)?;
        let target = SqpackRef::read(reader, SqpackKind::Dat)?;
        let block_offset = u64::from(reader.read_u32()?) << 7;
        let data_len = (reader.read_u32()? as usize) << 7;
        let delete_size = u64::from(reader.read_u32()?) << 7;
        let data_offset = chunk_offset + reader.position() as u64;
        let data = reader.read_bytes(data_len)?;
        Ok(Self {
            target,
            block_offset,
            data,
            delete_size,
            data_offset,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.resize(out.len() + 3, 0);
        self.target.write(out);
        out.extend_from_slice(&((self.block_offset >> 7) as u32).to_be_bytes());
        out.extend_from_slice(&((self.data.len() >> 7) as u32).to_be_bytes());
        out.extend_from_slice(&((self.delete_size >> 7) as u32).to_be_bytes());
        out.extend_from_slice(&self.data);
    }
}

/// Shared layout of `SQPK D` (delete) and `SQPK E` (expand).
///
/// Unlike AddData, `block_count` is carried unshifted on the wire; it stays in
/// 128-byte units here too.
#[derive(Debug, Clone)]
pub struct SqpkDataSpan {
    pub target: SqpackRef,
    pub block_offset: u64,
    /// Span length in 128-byte blocks.
    pub block_count: u32,
}

impl SqpkDataSpan {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        reader.skip(3)?;
        let target = SqpackRef::read(reader, SqpackKind::Dat)?;
        let block_offset = u64::from(reader.read_u32()?) << 7;
        let block_count = reader.read_u32()?;
        reader.skip(4)?; // reserved
        Ok(Self {
            target,
            block_offset,
            block_count,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.resize(out.len() + 3, 0);
        self.target.write(out);
        out.extend_from_slice(&((self.block_offset >> 7) as u32).to_be_bytes());
        out.extend_from_slice(&self.block_count.to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes());
    }

    /// Bytes covered by the span.
    pub fn byte_size(&self) -> u64 {
        u64::from(self.block_count) << 7
    }
}

/// `SQPK F` operation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    /// Write block payloads into a plain file; offset 0 truncates first.
    AddFile,
    /// Delete a single file.
    DeleteFile,
    /// Delete every numbered expansion file of one expansion.
    RemoveAll,
    /// Create the file's parent directory chain.
    MakeDirTree,
}

impl FileOperation {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            b'A' => Some(Self::AddFile),
            b'D' => Some(Self::DeleteFile),
            b'R' => Some(Self::RemoveAll),
            b'M' => Some(Self::MakeDirTree),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::AddFile => b'A',
            Self::DeleteFile => b'D',
            Self::RemoveAll => b'R',
            Self::MakeDirTree => b'M',
        }
    }
}

/// `SQPK F`: plain-file operation outside the sqpack containers.
#[derive(Debug, Clone)]
pub struct SqpkFile {
    pub operation: FileOperation,
    pub file_offset: u64,
    pub file_size: u64,
    pub expansion_id: u16,
    pub path: String,
    /// Present for `AddFile` only.
    pub blocks: Vec<CompressedBlock>,
}

impl SqpkFile {
    fn read(reader: &mut ChunkReader<'_>, chunk_offset: u64) -> Result<Self> {
        let raw_op = reader.read_u8()?;
        let operation = FileOperation::from_u8(raw_op).ok_or(Error::UnknownSqpkCommand {
            command: raw_op,
            offset: chunk_offset,
        })?;
        reader.skip(2)?;
        let file_offset = reader.read_i64()? as u64;
        let file_size = reader.read_u64()?;
        let path_len = reader.read_u32()? as usize;
        let expansion_id = reader.read_u16()?;
        reader.skip(2)?;
        let path = reader.read_string(path_len)?;

        let mut blocks = Vec::new();
        if operation == FileOperation::AddFile {
            while reader.remaining() > 0 {
                blocks.push(CompressedBlock::read(reader, chunk_offset)?);
            }
        }

        Ok(Self {
            operation,
            file_offset,
            file_size,
            expansion_id,
            path,
            blocks,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.operation.as_u8());
        out.resize(out.len() + 2, 0);
        out.extend_from_slice(&(self.file_offset as i64).to_be_bytes());
        out.extend_from_slice(&self.file_size.to_be_bytes());
        out.extend_from_slice(&(self.path.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.expansion_id.to_be_bytes());
        out.resize(out.len() + 2, 0);
        out.extend_from_slice(self.path.as_bytes());
        for block in &self.blocks {
            block.write(out);
        }
    }
}

/// Which header of a container file a `SQPK H` command replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// Version header at offset 0.
    Version,
    /// Index segment header at offset 1024.
    Index,
    /// Data segment header at offset 1024.
    Data,
}

impl HeaderKind {
    fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            b'V' => Some(Self::Version),
            b'I' => Some(Self::Index),
            b'D' => Some(Self::Data),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Version => b'V',
            Self::Index => b'I',
            Self::Data => b'D',
        }
    }

    /// Target file offset the 1 KiB header block lands at.
    pub fn target_offset(self) -> u64 {
        match self {
            Self::Version => 0,
            Self::Index | Self::Data => 1024,
        }
    }
}

/// `SQPK H`: overwrite a 1 KiB header region of a dat or index file.
#[derive(Debug, Clone)]
pub struct SqpkHeader {
    pub header_kind: HeaderKind,
    pub target: SqpackRef,
    pub data: Vec<u8>,
    /// Absolute offset of `data` within the patch file (decode metadata).
    pub data_offset: u64,
}

pub const HEADER_SIZE: usize = 1024;

impl SqpkHeader {
    fn read(reader: &mut ChunkReader<'_>, chunk_offset: u64) -> Result<Self> {
        let file_kind = reader.read_u8()?;
        let target_kind = match file_kind {
            b'D' => SqpackKind::Dat,
            b'I' => SqpackKind::Index,
            command => {
                return Err(Error::UnknownSqpkCommand {
                    command,
                    offset: chunk_offset,
                })
            }
        };
        let raw_header = reader.read_u8()?;
        let header_kind = HeaderKind::from_u8(raw_header).ok_or(Error::UnknownSqpkCommand {
            command: raw_header,
            offset: chunk_offset,
        })?;
        reader.skip(1)?;
        let target = SqpackRef::read(reader, target_kind)?;
        let data_offset = chunk_offset + reader.position() as u64;
        let data = reader.read_bytes(HEADER_SIZE)?;
        Ok(Self {
            header_kind,
            target,
            data,
            data_offset,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(match self.target.kind {
            SqpackKind::Dat => b'D',
            SqpackKind::Index => b'I',
        });
        out.push(self.header_kind.as_u8());
        out.push(0);
        self.target.write(out);
        out.extend_from_slice(&self.data);
    }
}

/// `SQPK I` index edit record.
#[derive(Debug, Clone)]
pub struct SqpkIndex {
    pub is_add: bool,
    pub is_synonym: bool,
    pub target: SqpackRef,
    pub file_hash: u64,
    pub block_offset: u32,
    pub block_count: u32,
}

impl SqpkIndex {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        let is_add = reader.read_u8()? == b'A';
        let is_synonym = reader.read_u8()? != 0;
        reader.skip(1)?;
        let target = SqpackRef::read(reader, SqpackKind::Index)?;
        Ok(Self {
            is_add,
            is_synonym,
            target,
            file_hash: reader.read_u64()?,
            block_offset: reader.read_u32()?,
            block_count: reader.read_u32()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(if self.is_add { b'A' } else { b'D' });
        out.push(u8::from(self.is_synonym));
        out.push(0);
        self.target.write(out);
        out.extend_from_slice(&self.file_hash.to_be_bytes());
        out.extend_from_slice(&self.block_offset.to_be_bytes());
        out.extend_from_slice(&self.block_count.to_be_bytes());
    }
}

/// `SQPK T`: declares the install the patch was built against. Applying one
/// switches the active platform for all path resolution that follows.
#[derive(Debug, Clone)]
pub struct SqpkTargetInfo {
    pub platform: Platform,
    pub region: i16,
    pub is_debug: bool,
    pub version: u16,
    // Little-endian on the wire, unlike every other TargetInfo field.
    pub deleted_data_size: u64,
    pub seek_count: u64,
}

impl SqpkTargetInfo {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        reader.skip(3)?;
        Ok(Self {
            platform: Platform::from_u16(reader.read_u16()?),
            region: reader.read_i16()?,
            is_debug: reader.read_u16()? != 0,
            version: reader.read_u16()?,
            deleted_data_size: reader.read_u64_le()?,
            seek_count: reader.read_u64_le()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.resize(out.len() + 3, 0);
        out.extend_from_slice(&self.platform.as_u16().to_be_bytes());
        out.extend_from_slice(&self.region.to_be_bytes());
        out.extend_from_slice(&u16::from(self.is_debug).to_be_bytes());
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.deleted_data_size.to_le_bytes());
        out.extend_from_slice(&self.seek_count.to_le_bytes());
        // reserved tail
        out.resize(out.len() + 96, 0);
    }
}

/// `SQPK X` patch metadata record.
#[derive(Debug, Clone)]
pub struct SqpkPatchInfo {
    pub status: u8,
    pub version: u8,
    pub install_size: u64,
}

impl SqpkPatchInfo {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        let status = reader.read_u8()?;
        let version = reader.read_u8()?;
        reader.skip(1)?;
        Ok(Self {
            status,
            version,
            install_size: reader.read_u64()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.status);
        out.push(self.version);
        out.push(0);
        out.extend_from_slice(&self.install_size.to_be_bytes());
    }
}
