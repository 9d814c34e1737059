//! ZiPatch chunk model and decoder
//!
//! A patch file is a stream of self-describing chunks:
//! `[u32 size][4-byte tag][payload of size bytes][u32 crc]`, all big-endian.
//! The CRC trailer covers the tag and payload; the size field is excluded.
//!
//! Only the fixed tag set below appears in practice. `FHDR`, `APLY`, `SQPK` and
//! `EOF_` show up in every modern patch; `ADIR`/`DELD` can theoretically occur;
//! `APFS` no longer does but still decodes.

pub mod sqpk;

use crate::reader::ChunkReader;
use crate::{Error, Result};

pub use sqpk::SqpkCommand;

pub const TAG_FHDR: [u8; 4] = *b"FHDR";
pub const TAG_APLY: [u8; 4] = *b"APLY";
pub const TAG_APFS: [u8; 4] = *b"APFS";
pub const TAG_ADIR: [u8; 4] = *b"ADIR";
pub const TAG_DELD: [u8; 4] = *b"DELD";
pub const TAG_SQPK: [u8; 4] = *b"SQPK";
pub const TAG_EOF: [u8; 4] = *b"EOF_";
pub const TAG_XXXX: [u8; 4] = *b"XXXX";

/// One decoded chunk, immutable after decode.
///
/// Both checksums are captured so callers can report the exact stored/computed
/// pair; `PatchFile::next_chunk` already rejects mismatches.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Absolute offset of the chunk's tag within the patch file.
    pub offset: u64,
    /// Declared payload size.
    pub size: u32,
    /// CRC32 trailer as stored in the file.
    pub stored_checksum: u32,
    /// CRC32 computed over tag + payload while decoding.
    pub computed_checksum: u32,
    pub kind: ChunkKind,
}

impl Chunk {
    pub fn is_checksum_valid(&self) -> bool {
        self.stored_checksum == self.computed_checksum
    }

    pub fn tag(&self) -> [u8; 4] {
        self.kind.tag()
    }

    /// Encode this chunk to its full wire form, CRC trailer included.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.kind.to_bytes()
    }
}

/// Tagged chunk variant.
#[derive(Debug, Clone)]
pub enum ChunkKind {
    FileHeader(FileHeader),
    ApplyOption(ApplyOption),
    /// Legacy free-space hint, a no-op on apply.
    ApplyFreeSpace(ApplyFreeSpace),
    AddDirectory(String),
    DeleteDirectory(String),
    Sqpk(SqpkCommand),
    EndOfFile,
    /// `XXXX` padding chunk.
    Padding,
}

impl ChunkKind {
    pub fn tag(&self) -> [u8; 4] {
        match self {
            Self::FileHeader(_) => TAG_FHDR,
            Self::ApplyOption(_) => TAG_APLY,
            Self::ApplyFreeSpace(_) => TAG_APFS,
            Self::AddDirectory(_) => TAG_ADIR,
            Self::DeleteDirectory(_) => TAG_DELD,
            Self::Sqpk(_) => TAG_SQPK,
            Self::EndOfFile => TAG_EOF,
            Self::Padding => TAG_XXXX,
        }
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        match self {
            Self::FileHeader(h) => h.write(out),
            Self::ApplyOption(o) => o.write(out),
            Self::ApplyFreeSpace(f) => f.write(out),
            Self::AddDirectory(name) | Self::DeleteDirectory(name) => {
                out.extend_from_slice(&(name.len() as u32).to_be_bytes());
                out.extend_from_slice(name.as_bytes());
            }
            Self::Sqpk(cmd) => cmd.write(out),
            Self::EndOfFile => out.resize(out.len() + 32, 0),
            Self::Padding => {}
        }
    }

    /// Encode as `[size][tag][payload][crc]` with the correct trailer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        self.encode_payload(&mut payload);

        let mut out = Vec::with_capacity(payload.len() + 12);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.tag());
        out.extend_from_slice(&payload);

        let crc = crc32fast::hash(&out[4..]);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }
}

/// Decode one chunk body. `reader` covers tag + payload; the tag has already
/// been consumed. `offset` is the absolute position of the tag in the file.
pub(crate) fn decode_kind(
    tag: [u8; 4],
    reader: &mut ChunkReader<'_>,
    offset: u64,
) -> Result<ChunkKind> {
    let kind = match tag {
        TAG_FHDR => ChunkKind::FileHeader(FileHeader::read(reader)?),
        TAG_APLY => ChunkKind::ApplyOption(ApplyOption::read(reader)?),
        TAG_APFS => ChunkKind::ApplyFreeSpace(ApplyFreeSpace::read(reader)?),
        TAG_ADIR => ChunkKind::AddDirectory(read_dir_name(reader)?),
        TAG_DELD => ChunkKind::DeleteDirectory(read_dir_name(reader)?),
        TAG_SQPK => ChunkKind::Sqpk(SqpkCommand::read(reader, offset)?),
        TAG_EOF => ChunkKind::EndOfFile,
        TAG_XXXX => ChunkKind::Padding,
        tag => return Err(Error::UnknownChunkTag { tag, offset }),
    };
    // Unread trailing bytes are reserved, not an error; they still count
    // toward the checksum.
    reader.skip_to_end()?;
    Ok(kind)
}

fn read_dir_name(reader: &mut ChunkReader<'_>) -> Result<String> {
    let len = reader.read_u32()?;
    reader.read_string(len as usize)
}

/// `FHDR` file header.
///
/// The leading dword is little-endian with the version in its high 16 bits;
/// version 3 appends the command-count block. Both versions carry a reserved
/// tail that is skipped on decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u8,
    pub patch_type: String,
    pub entry_files: u32,
    pub v3: Option<FileHeaderCounts>,
}

/// Command counts present from FHDR version 3 on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeaderCounts {
    pub add_directories: u32,
    pub delete_directories: u32,
    pub delete_data_size: u64,
    pub minor_version: u32,
    pub repository_name: u32,
    pub commands: u32,
    pub sqpk_add_commands: u32,
    pub sqpk_delete_commands: u32,
    pub sqpk_expand_commands: u32,
    pub sqpk_header_commands: u32,
    pub sqpk_file_commands: u32,
}

impl FileHeader {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        let version = (reader.read_u32_le()? >> 16) as u8;
        let patch_type = reader.read_string(4)?;
        let entry_files = reader.read_u32()?;

        let v3 = if version == 3 {
            let add_directories = reader.read_u32()?;
            let delete_directories = reader.read_u32()?;
            // Split low dword first, high second.
            let delete_low = reader.read_u32()?;
            let delete_high = reader.read_u32()?;
            Some(FileHeaderCounts {
                add_directories,
                delete_directories,
                delete_data_size: u64::from(delete_low) | (u64::from(delete_high) << 32),
                minor_version: reader.read_u32()?,
                repository_name: reader.read_u32()?,
                commands: reader.read_u32()?,
                sqpk_add_commands: reader.read_u32()?,
                sqpk_delete_commands: reader.read_u32()?,
                sqpk_expand_commands: reader.read_u32()?,
                sqpk_header_commands: reader.read_u32()?,
                sqpk_file_commands: reader.read_u32()?,
            })
        } else {
            None
        };

        Ok(Self {
            version,
            patch_type,
            entry_files,
            v3,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(u32::from(self.version) << 16).to_le_bytes());
        let mut tag = [0u8; 4];
        let bytes = self.patch_type.as_bytes();
        tag[..bytes.len().min(4)].copy_from_slice(&bytes[..bytes.len().min(4)]);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&self.entry_files.to_be_bytes());

        if let Some(c) = &self.v3 {
            out.extend_from_slice(&c.add_directories.to_be_bytes());
            out.extend_from_slice(&c.delete_directories.to_be_bytes());
            out.extend_from_slice(&((c.delete_data_size & 0xFFFF_FFFF) as u32).to_be_bytes());
            out.extend_from_slice(&((c.delete_data_size >> 32) as u32).to_be_bytes());
            out.extend_from_slice(&c.minor_version.to_be_bytes());
            out.extend_from_slice(&c.repository_name.to_be_bytes());
            out.extend_from_slice(&c.commands.to_be_bytes());
            out.extend_from_slice(&c.sqpk_add_commands.to_be_bytes());
            out.extend_from_slice(&c.sqpk_delete_commands.to_be_bytes());
            out.extend_from_slice(&c.sqpk_expand_commands.to_be_bytes());
            out.extend_from_slice(&c.sqpk_header_commands.to_be_bytes());
            out.extend_from_slice(&c.sqpk_file_commands.to_be_bytes());
            // 0xB8 reserved bytes in v3 headers
            out.resize(out.len() + 0xB8, 0);
        } else {
            // 8 reserved bytes in v2 headers
            out.resize(out.len() + 8, 0);
        }
    }
}

/// `APLY` option kind. Only two kinds exist; anything else decodes but applies
/// as a no-op with a forced `false` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOptionKind {
    IgnoreMissing,
    IgnoreOldMismatch,
    Unknown(u32),
}

impl ApplyOptionKind {
    fn from_u32(raw: u32) -> Self {
        match raw {
            1 => Self::IgnoreMissing,
            2 => Self::IgnoreOldMismatch,
            other => Self::Unknown(other),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Self::IgnoreMissing => 1,
            Self::IgnoreOldMismatch => 2,
            Self::Unknown(other) => other,
        }
    }
}

/// `APLY` chunk: sets a compatibility flag read by later chunks in the same
/// file, the one piece of cross-chunk state in the format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOption {
    pub kind: ApplyOptionKind,
    pub value: bool,
}

impl ApplyOption {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        let kind = ApplyOptionKind::from_u32(reader.read_u32()?);
        reader.skip(4)?; // always 0x00000004 in observed files
        let raw_value = reader.read_u32()? != 0;
        let value = match kind {
            ApplyOptionKind::IgnoreMissing | ApplyOptionKind::IgnoreOldMismatch => raw_value,
            ApplyOptionKind::Unknown(_) => false,
        };
        Ok(Self { kind, value })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.kind.as_u32().to_be_bytes());
        out.extend_from_slice(&4u32.to_be_bytes());
        out.extend_from_slice(&u32::from(self.value).to_be_bytes());
    }
}

/// `APFS` chunk. No samples exist in modern patches; fields are carried for
/// completeness and the chunk applies as a no-op.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyFreeSpace {
    pub field_a: i64,
    pub field_b: i64,
}

impl ApplyFreeSpace {
    fn read(reader: &mut ChunkReader<'_>) -> Result<Self> {
        Ok(Self {
            field_a: reader.read_i64()?,
            field_b: reader.read_i64()?,
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.field_a.to_be_bytes());
        out.extend_from_slice(&self.field_b.to_be_bytes());
    }
}
