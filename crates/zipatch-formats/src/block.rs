//! Sqpack compressed file blocks
//!
//! File payloads inside `SQPK F` chunks are stored as a sequence of 128-byte
//! aligned blocks, each either raw ("stored") or raw-deflate compressed. The
//! block header is little-endian, unlike the rest of the chunk format.

use std::io::Read;

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;

use crate::reader::ChunkReader;
use crate::{Error, Result};

/// Sentinel value of `compressed_size` marking a stored (uncompressed) block.
pub const STORED_SENTINEL: i32 = 0x7d00;

/// Size of the on-wire block header.
pub const BLOCK_HEADER_SIZE: i32 = 16;

/// One compressed (or stored) data block of a file chunk.
#[derive(Debug, Clone)]
pub struct CompressedBlock {
    pub header_size: i32,
    pub compressed_size: i32,
    pub decompressed_size: i32,
    /// Raw block bytes as stored in the patch file (deflate stream or literal).
    pub data: Vec<u8>,
    /// Absolute offset of `data` within the patch file; decode metadata used
    /// by partial-file indexing, not part of the wire form.
    pub data_offset: u64,
}

impl CompressedBlock {
    pub fn is_compressed(&self) -> bool {
        self.compressed_size != STORED_SENTINEL
    }

    /// Total on-wire length of the block, header included, padded to 128 bytes.
    pub fn block_length(&self) -> i32 {
        let payload = if self.is_compressed() {
            self.compressed_size
        } else {
            self.decompressed_size
        };
        (payload + 143) & !0x7F
    }

    /// Decode one block at the cursor. `base_offset` is the absolute patch-file
    /// offset the cursor's buffer starts at, used to record where the block
    /// data lives in the source file.
    pub fn read(reader: &mut ChunkReader<'_>, base_offset: u64) -> Result<Self> {
        let header_size = reader.read_i32_le()?;
        reader.read_u32_le()?; // pad
        let compressed_size = reader.read_i32_le()?;
        let decompressed_size = reader.read_i32_le()?;

        let mut block = Self {
            header_size,
            compressed_size,
            decompressed_size,
            data: Vec::new(),
            data_offset: base_offset + reader.position() as u64,
        };

        if block.is_compressed() {
            let len = (block.block_length() - header_size) as usize;
            block.data = reader.read_bytes(len)?;
        } else {
            block.data = reader.read_bytes(decompressed_size as usize)?;
            let padding = block.block_length() - header_size - decompressed_size;
            reader.skip(padding as usize)?;
        }
        Ok(block)
    }

    /// Append the wire form of this block to `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.header_size.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&self.compressed_size.to_le_bytes());
        out.extend_from_slice(&self.decompressed_size.to_le_bytes());
        out.extend_from_slice(&self.data);
        let written = self.header_size as usize + self.data.len();
        out.resize(out.len() + self.block_length() as usize - written, 0);
    }

    /// Build a stored (uncompressed) block around literal content.
    pub fn stored(content: &[u8]) -> Self {
        Self {
            header_size: BLOCK_HEADER_SIZE,
            compressed_size: STORED_SENTINEL,
            decompressed_size: content.len() as i32,
            data: content.to_vec(),
            data_offset: 0,
        }
    }

    /// Build a deflate-compressed block around content.
    pub fn deflated(content: &[u8]) -> Result<Self> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content)?;
        let data = encoder.finish()?;
        Ok(Self {
            header_size: BLOCK_HEADER_SIZE,
            compressed_size: data.len() as i32,
            decompressed_size: content.len() as i32,
            data,
            data_offset: 0,
        })
    }

    /// Decompress (or copy) the block content into `out`.
    ///
    /// The declared decompressed length is authoritative; producing a different
    /// number of bytes is a format error, not a tolerated variation.
    pub fn decompress_into<W: Write>(&self, out: &mut W) -> Result<u64> {
        if self.is_compressed() {
            let mut decoder = DeflateDecoder::new(self.data.as_slice());
            let mut decoded = Vec::with_capacity(self.decompressed_size as usize);
            decoder.read_to_end(&mut decoded)?;
            if decoded.len() != self.decompressed_size as usize {
                return Err(Error::BlockSizeMismatch {
                    expected: self.decompressed_size as usize,
                    actual: decoded.len(),
                });
            }
            out.write_all(&decoded)?;
        } else {
            out.write_all(&self.data)?;
        }
        Ok(self.decompressed_size as u64)
    }
}
