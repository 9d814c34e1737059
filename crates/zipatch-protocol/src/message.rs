//! Repair message contract
//!
//! One opcode byte, then big-endian fields. Strings and byte blobs are
//! u32-length-prefixed. The layout is transport-agnostic; framing is the
//! channel's job.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::{Error, Result};

pub const OP_PROVIDE_INDEX_FILE: u8 = 0;
pub const OP_PROVIDE_INDEX_FILE_FINISH: u8 = 1;
pub const OP_REQUEST_PARTIAL_FILE: u8 = 2;
pub const OP_PROVIDE_PARTIAL_FILE: u8 = 3;
pub const OP_FINISH_PARTIAL_FILE: u8 = 4;
pub const OP_STATUS_UPDATE: u8 = 5;
pub const OP_FINISHED: u8 = 6;

/// One span of a patch file the verifier needs back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedPart {
    /// Position of the target file within the patch set's index.
    pub target_file_id: u32,
    /// Position of the part within that target's plan.
    pub part_id: u32,
    /// Absolute offset of the span within the patch file.
    pub source_offset: u64,
    /// Upper bound on the span's length.
    pub source_size: u32,
}

/// Everything the two sides of a repair session say to each other.
///
/// The verifier side sends [`RequestPartialFile`](Self::RequestPartialFile),
/// [`StatusUpdate`](Self::StatusUpdate) and [`Finished`](Self::Finished); the
/// patch-holder side sends the rest.
#[derive(Debug, Clone, PartialEq)]
pub enum RepairMessage {
    /// Hand the verifier one serialized partial index and where its targets
    /// live relative to the install root.
    ProvideIndexFile {
        root_path: String,
        version_name: String,
        compressed_index: Vec<u8>,
    },
    /// No further indexes follow; verification may start.
    ProvideIndexFileFinish,
    /// The verifier needs these spans of one patch file.
    RequestPartialFile {
        patch_set_id: u32,
        source_file_id: u32,
        source_file_name: String,
        parts: Vec<RequestedPart>,
    },
    /// The requested patch file (or enough of it) is readable at this path.
    ProvidePartialFile {
        patch_set_id: u32,
        source_file_id: u32,
        local_path: String,
    },
    /// Nothing more will be provided for this patch file.
    FinishPartialFile {
        patch_set_id: u32,
        source_file_id: u32,
        source_file_name: String,
    },
    StatusUpdate {
        fraction_done: f32,
        bytes_done: u64,
        bytes_total: u64,
    },
    Finished,
}

impl RepairMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::ProvideIndexFile { .. } => OP_PROVIDE_INDEX_FILE,
            Self::ProvideIndexFileFinish => OP_PROVIDE_INDEX_FILE_FINISH,
            Self::RequestPartialFile { .. } => OP_REQUEST_PARTIAL_FILE,
            Self::ProvidePartialFile { .. } => OP_PROVIDE_PARTIAL_FILE,
            Self::FinishPartialFile { .. } => OP_FINISH_PARTIAL_FILE,
            Self::StatusUpdate { .. } => OP_STATUS_UPDATE,
            Self::Finished => OP_FINISHED,
        }
    }

    /// Short name for logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ProvideIndexFile { .. } => "ProvideIndexFile",
            Self::ProvideIndexFileFinish => "ProvideIndexFileFinish",
            Self::RequestPartialFile { .. } => "RequestPartialFile",
            Self::ProvidePartialFile { .. } => "ProvidePartialFile",
            Self::FinishPartialFile { .. } => "FinishPartialFile",
            Self::StatusUpdate { .. } => "StatusUpdate",
            Self::Finished => "Finished",
        }
    }

    /// Serialize into one frame payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Vec<u8> writes cannot fail.
        let _ = self.encode_into(&mut out);
        out
    }

    fn encode_into<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u8(self.opcode())?;
        match self {
            Self::ProvideIndexFile {
                root_path,
                version_name,
                compressed_index,
            } => {
                write_string(w, root_path)?;
                write_string(w, version_name)?;
                write_bytes(w, compressed_index)?;
            }
            Self::ProvideIndexFileFinish | Self::Finished => {}
            Self::RequestPartialFile {
                patch_set_id,
                source_file_id,
                source_file_name,
                parts,
            } => {
                w.write_u32::<BigEndian>(*patch_set_id)?;
                w.write_u32::<BigEndian>(*source_file_id)?;
                write_string(w, source_file_name)?;
                w.write_u32::<BigEndian>(parts.len() as u32)?;
                for part in parts {
                    w.write_u32::<BigEndian>(part.target_file_id)?;
                    w.write_u32::<BigEndian>(part.part_id)?;
                    w.write_u64::<BigEndian>(part.source_offset)?;
                    w.write_u32::<BigEndian>(part.source_size)?;
                }
            }
            Self::ProvidePartialFile {
                patch_set_id,
                source_file_id,
                local_path,
            } => {
                w.write_u32::<BigEndian>(*patch_set_id)?;
                w.write_u32::<BigEndian>(*source_file_id)?;
                write_string(w, local_path)?;
            }
            Self::FinishPartialFile {
                patch_set_id,
                source_file_id,
                source_file_name,
            } => {
                w.write_u32::<BigEndian>(*patch_set_id)?;
                w.write_u32::<BigEndian>(*source_file_id)?;
                write_string(w, source_file_name)?;
            }
            Self::StatusUpdate {
                fraction_done,
                bytes_done,
                bytes_total,
            } => {
                w.write_f32::<BigEndian>(*fraction_done)?;
                w.write_u64::<BigEndian>(*bytes_done)?;
                w.write_u64::<BigEndian>(*bytes_total)?;
            }
        }
        Ok(())
    }

    /// Parse one frame payload. The whole slice must be consumed.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let mut r = frame;
        let opcode = r.read_u8().map_err(|_| Error::TruncatedMessage)?;

        let message = match opcode {
            OP_PROVIDE_INDEX_FILE => Self::ProvideIndexFile {
                root_path: read_string(&mut r)?,
                version_name: read_string(&mut r)?,
                compressed_index: read_bytes(&mut r)?,
            },
            OP_PROVIDE_INDEX_FILE_FINISH => Self::ProvideIndexFileFinish,
            OP_REQUEST_PARTIAL_FILE => {
                let patch_set_id = read_u32(&mut r)?;
                let source_file_id = read_u32(&mut r)?;
                let source_file_name = read_string(&mut r)?;
                let count = read_u32(&mut r)? as usize;
                let mut parts = Vec::with_capacity(count.min(r.len() / 20));
                for _ in 0..count {
                    parts.push(RequestedPart {
                        target_file_id: read_u32(&mut r)?,
                        part_id: read_u32(&mut r)?,
                        source_offset: read_u64(&mut r)?,
                        source_size: read_u32(&mut r)?,
                    });
                }
                Self::RequestPartialFile {
                    patch_set_id,
                    source_file_id,
                    source_file_name,
                    parts,
                }
            }
            OP_PROVIDE_PARTIAL_FILE => Self::ProvidePartialFile {
                patch_set_id: read_u32(&mut r)?,
                source_file_id: read_u32(&mut r)?,
                local_path: read_string(&mut r)?,
            },
            OP_FINISH_PARTIAL_FILE => Self::FinishPartialFile {
                patch_set_id: read_u32(&mut r)?,
                source_file_id: read_u32(&mut r)?,
                source_file_name: read_string(&mut r)?,
            },
            OP_STATUS_UPDATE => Self::StatusUpdate {
                fraction_done: r
                    .read_f32::<BigEndian>()
                    .map_err(|_| Error::TruncatedMessage)?,
                bytes_done: read_u64(&mut r)?,
                bytes_total: read_u64(&mut r)?,
            },
            OP_FINISHED => Self::Finished,
            other => return Err(Error::UnknownOpcode(other)),
        };

        if !r.is_empty() {
            return Err(Error::OversizedMessage);
        }
        Ok(message)
    }
}

fn write_string<W: Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    w.write_u32::<BigEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    w.write_u32::<BigEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_u32(r: &mut &[u8]) -> Result<u32> {
    r.read_u32::<BigEndian>().map_err(|_| Error::TruncatedMessage)
}

fn read_u64(r: &mut &[u8]) -> Result<u64> {
    r.read_u64::<BigEndian>().map_err(|_| Error::TruncatedMessage)
}

fn read_bytes(r: &mut &[u8]) -> Result<Vec<u8>> {
    let len = read_u32(r)? as usize;
    if r.len() < len {
        return Err(Error::TruncatedMessage);
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|_| Error::TruncatedMessage)?;
    Ok(buf)
}

fn read_string(r: &mut &[u8]) -> Result<String> {
    let bytes = read_bytes(r)?;
    String::from_utf8(bytes).map_err(|e| Error::InvalidString(e.to_string()))
}
