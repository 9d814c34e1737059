//! Patch file container
//!
//! `PatchFile` wraps any `Read` source, validates the leading magic and then
//! yields decoded chunks one at a time. Each chunk is read whole into a
//! buffer that is reused across chunks, so steady-state decoding allocates
//! only for payloads that outgrow every previous chunk.

use std::io::Read;

use tracing::trace;

use crate::chunk::{decode_kind, Chunk, TAG_EOF};
use crate::reader::ChunkReader;
use crate::{Error, Result};

/// Leading magic of every ZiPatch file.
pub const ZIPATCH_MAGIC: [u8; 12] = [
    0x91, 0x5A, 0x49, 0x50, 0x41, 0x54, 0x43, 0x48, 0x0D, 0x0A, 0x1A, 0x0A,
];

/// Streaming decoder over a ZiPatch byte source.
#[derive(Debug)]
pub struct PatchFile<R> {
    source: R,
    /// Reused chunk buffer: tag + payload + CRC trailer.
    buf: Vec<u8>,
    /// Absolute offset of the next unread byte in the source.
    offset: u64,
    done: bool,
}

impl<R: Read> PatchFile<R> {
    /// Validate the magic and position the decoder at the first chunk.
    pub fn open(mut source: R) -> Result<Self> {
        let mut magic = [0u8; 12];
        source.read_exact(&mut magic)?;
        if magic != ZIPATCH_MAGIC {
            return Err(Error::InvalidMagic(magic));
        }
        Ok(Self {
            source,
            buf: Vec::new(),
            offset: ZIPATCH_MAGIC.len() as u64,
            done: false,
        })
    }

    /// Decode the next chunk, enforcing its CRC trailer.
    ///
    /// Returns `Ok(None)` once the `EOF_` chunk has been yielded or the source
    /// is exhausted at a chunk boundary.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>> {
        if self.done {
            return Ok(None);
        }

        let mut size_bytes = [0u8; 4];
        match read_or_eof(&mut self.source, &mut size_bytes)? {
            Fill::Empty => {
                self.done = true;
                return Ok(None);
            }
            Fill::Partial(available) => {
                return Err(Error::TruncatedChunk {
                    offset: self.offset,
                    declared: 4,
                    available: available as u64,
                });
            }
            Fill::Full => {}
        }
        let size = u32::from_be_bytes(size_bytes);
        let tag_offset = self.offset + 4;

        // tag + payload + crc trailer
        let body_len = 4 + size as usize + 4;
        self.buf.resize(body_len, 0);
        self.source.read_exact(&mut self.buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                Error::TruncatedChunk {
                    offset: tag_offset,
                    declared: size,
                    available: 0,
                }
            } else {
                Error::Io(e)
            }
        })?;
        self.offset = tag_offset + body_len as u64;

        let mut reader = ChunkReader::with_checksum(&self.buf[..4 + size as usize]);
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&self.buf[..4]);
        reader.skip(4)?;

        let kind = decode_kind(tag, &mut reader, tag_offset)?;
        let computed = reader.checksum();
        let stored = u32::from_be_bytes([
            self.buf[body_len - 4],
            self.buf[body_len - 3],
            self.buf[body_len - 2],
            self.buf[body_len - 1],
        ]);
        if stored != computed {
            return Err(Error::ChecksumMismatch {
                tag,
                offset: tag_offset,
                stored,
                computed,
            });
        }

        trace!(
            tag = %String::from_utf8_lossy(&tag),
            offset = tag_offset,
            size,
            "decoded chunk"
        );

        if tag == TAG_EOF {
            self.done = true;
        }
        Ok(Some(Chunk {
            offset: tag_offset,
            size,
            stored_checksum: stored,
            computed_checksum: computed,
            kind,
        }))
    }

    /// Iterate over the remaining chunks.
    pub fn chunks(&mut self) -> Chunks<'_, R> {
        Chunks { file: self }
    }

    pub fn into_inner(self) -> R {
        self.source
    }
}

/// Iterator adapter over [`PatchFile::next_chunk`].
pub struct Chunks<'a, R> {
    file: &'a mut PatchFile<R>,
}

impl<R: Read> Iterator for Chunks<'_, R> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        self.file.next_chunk().transpose()
    }
}

enum Fill {
    Full,
    Partial(usize),
    Empty,
}

/// Fill `buf` completely, distinguishing a clean EOF at offset zero from a
/// short read inside the field.
fn read_or_eof<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<Fill> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(Fill::Empty),
            0 => return Ok(Fill::Partial(filled)),
            n => filled += n,
        }
    }
    Ok(Fill::Full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{ChunkKind, FileHeader};

    fn minimal_patch() -> Vec<u8> {
        let mut bytes = ZIPATCH_MAGIC.to_vec();
        bytes.extend_from_slice(
            &ChunkKind::FileHeader(FileHeader {
                version: 2,
                patch_type: "DIFF".into(),
                entry_files: 1,
                v3: None,
            })
            .to_bytes(),
        );
        bytes.extend_from_slice(&ChunkKind::EndOfFile.to_bytes());
        bytes
    }

    #[test]
    fn test_decode_minimal_patch() {
        let bytes = minimal_patch();
        let mut patch = PatchFile::open(bytes.as_slice()).unwrap();

        let header = patch.next_chunk().unwrap().unwrap();
        assert!(header.is_checksum_valid());
        match header.kind {
            ChunkKind::FileHeader(h) => {
                assert_eq!(h.version, 2);
                assert_eq!(h.patch_type, "DIFF");
            }
            other => panic!("expected file header, got {other:?}"),
        }

        let eof = patch.next_chunk().unwrap().unwrap();
        assert!(matches!(eof.kind, ChunkKind::EndOfFile));
        // Stream ends after EOF_, even if trailing bytes exist.
        assert!(patch.next_chunk().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = minimal_patch();
        bytes[0] = 0x00;
        let err = PatchFile::open(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::InvalidMagic(_)));
    }

    #[test]
    fn test_corrupt_payload_fails_checksum() {
        let mut bytes = minimal_patch();
        // Flip one payload byte of the first chunk (after magic + size + tag).
        bytes[ZIPATCH_MAGIC.len() + 8] ^= 0xFF;
        let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
        let err = patch.next_chunk().unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_truncated_chunk_is_reported() {
        let mut bytes = minimal_patch();
        bytes.truncate(ZIPATCH_MAGIC.len() + 10);
        let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
        let err = patch.next_chunk().unwrap_err();
        assert!(matches!(err, Error::TruncatedChunk { .. }));
    }

    #[test]
    fn test_chunk_offsets_are_absolute() {
        let bytes = minimal_patch();
        let mut patch = PatchFile::open(bytes.as_slice()).unwrap();
        let header = patch.next_chunk().unwrap().unwrap();
        // First tag sits right after the magic and the 4-byte size field.
        assert_eq!(header.offset, ZIPATCH_MAGIC.len() as u64 + 4);
        let eof = patch.next_chunk().unwrap().unwrap();
        assert_eq!(eof.offset, header.offset + 4 + u64::from(header.size) + 4 + 4);
    }
}
