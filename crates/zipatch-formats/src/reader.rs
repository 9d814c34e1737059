//! Checksumming byte cursor over a chunk payload
//!
//! All multi-byte integers in the ZiPatch container are big-endian unless a
//! field is explicitly little-endian (the sqpack block headers). Every byte the
//! cursor consumes, including skipped padding, is folded into a running CRC32
//! when checksum tracking is enabled, because the chunk trailer covers the whole
//! tag+payload region even where the format leaves bytes uninterpreted.

use crc32fast::Hasher;

use crate::{Error, Result};

/// Sequential reader over one in-memory chunk buffer.
pub struct ChunkReader<'a> {
    buf: &'a [u8],
    pos: usize,
    hasher: Option<Hasher>,
}

impl<'a> ChunkReader<'a> {
    /// Create a reader without checksum tracking.
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            hasher: None,
        }
    }

    /// Create a reader that feeds every consumed byte into a CRC32 accumulator.
    pub fn with_checksum(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            hasher: Some(Hasher::new()),
        }
    }

    /// Current position within the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left before the declared end of the buffer.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// CRC32 of everything consumed so far.
    ///
    /// Returns 0 when checksum tracking is disabled.
    pub fn checksum(&self) -> u32 {
        self.hasher.as_ref().map_or(0, |h| h.clone().finalize())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::UnexpectedEof {
                wanted: n,
                available: self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        if let Some(h) = self.hasher.as_mut() {
            h.update(out);
        }
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// Read a little-endian u64; the TargetInfo bookkeeping fields use this.
    pub fn read_u64_le(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read a little-endian i32; the sqpack block headers use this.
    pub fn read_i32_le(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(self.read_i32_le()? as u32)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// Read a fixed-length ASCII string, trimming trailing NULs.
    pub fn read_string(&mut self, n: usize) -> Result<String> {
        let raw = self.take(n)?;
        let trimmed = raw
            .iter()
            .rposition(|&b| b != 0)
            .map_or(&raw[..0], |i| &raw[..=i]);
        std::str::from_utf8(trimmed)
            .map(str::to_owned)
            .map_err(|_| Error::InvalidString(format!("{trimmed:02x?}")))
    }

    /// Skip `n` bytes, still feeding them into the checksum.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Consume everything up to the declared end of the payload.
    ///
    /// Chunks like FHDR declare more bytes than they currently interpret;
    /// skipping without consuming would produce a false checksum failure.
    pub fn skip_to_end(&mut self) -> Result<()> {
        self.skip(self.remaining())
    }
}
