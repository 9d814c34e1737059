//! Part locators
//!
//! A part describes one contiguous span of a target file and where its bytes
//! come from: a span of a patch file (stored or deflated), implicit zeros, or
//! the placeholder header of an emptied sqpack entry. Parts are the unit of
//! verification and repair; each can be checked and rebuilt independently.

use std::io::Read;

use flate2::read::DeflateDecoder;

use crate::{Error, Result};

/// Upper bound on the compressed span backing a deflated part. Patch block
/// payloads never exceed this, so repair reads are capped here.
pub const MAX_DEFLATED_SOURCE: u32 = 16384;

/// Interpreted prefix of an empty-block placeholder entry, six LE dwords.
pub const EMPTY_BLOCK_HEADER_SIZE: usize = 24;

/// Read grain for streamed verification.
const VERIFY_CHUNK: usize = 1 << 16;

/// Where a part's bytes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartSource {
    /// Byte span of one ingested patch file.
    Patch {
        /// Index into the owning index's source file list.
        patch: u16,
        /// Absolute offset of the span within the patch file.
        offset: u64,
        /// Span is a raw-deflate stream; the part covers a slice of its
        /// decompressed form.
        deflated: bool,
    },
    /// All zero bytes.
    Zeros,
    /// Placeholder entry header of an emptied sqpack span.
    EmptyBlock {
        /// Number of 128-byte blocks that follow the placeholder, stored in
        /// the header's fourth dword.
        follow_units: u32,
    },
    /// Known to exist but not rebuildable from any retained source.
    Unavailable,
}

/// How one part's verification went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Pass,
    /// Target file ended before the part's declared span.
    ShortRead,
    /// The bytes are present but wrong.
    Mismatch,
    /// No CRC was sealed and the source kind carries no inherent pattern.
    Unverifiable,
}

/// One span of a target file and the recipe to rebuild it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePart {
    pub target_offset: u64,
    pub target_size: u32,
    pub source: PartSource,
    /// Offset into the decoded source span where this part begins. Nonzero
    /// only after a split; always zero for stored patch spans.
    pub split_from: u32,
    /// CRC32 of the target bytes, once sealed. Splitting a part discards it.
    pub crc32: Option<u32>,
}

impl FilePart {
    pub fn target_end(&self) -> u64 {
        self.target_offset + u64::from(self.target_size)
    }

    pub fn is_from_patch(&self) -> bool {
        matches!(self.source, PartSource::Patch { .. })
    }

    pub fn patch_index(&self) -> Option<u16> {
        match self.source {
            PartSource::Patch { patch, .. } => Some(patch),
            _ => None,
        }
    }

    pub fn source_offset(&self) -> u64 {
        match self.source {
            PartSource::Patch { offset, .. } => offset,
            _ => 0,
        }
    }

    /// Most patch-file bytes a repair needs to read for this part.
    pub fn max_source_size(&self) -> u32 {
        match self.source {
            PartSource::Patch { deflated: true, .. } => MAX_DEFLATED_SOURCE,
            _ => self.target_size,
        }
    }

    pub fn max_source_end(&self) -> u64 {
        self.source_offset() + u64::from(self.max_source_size())
    }

    /// Check `buf` (the part's target span) against this part's recipe.
    ///
    /// A sealed CRC takes precedence over pattern checks; without one, only
    /// zero and empty-block parts are verifiable.
    pub fn verify(&self, buf: &[u8]) -> VerifyOutcome {
        if buf.len() != self.target_size as usize {
            return VerifyOutcome::ShortRead;
        }

        if let Some(crc) = self.crc32 {
            return if crc32fast::hash(buf) == crc {
                VerifyOutcome::Pass
            } else {
                VerifyOutcome::Mismatch
            };
        }

        match self.source {
            PartSource::Zeros => {
                if buf.iter().all(|&b| b == 0) {
                    VerifyOutcome::Pass
                } else {
                    VerifyOutcome::Mismatch
                }
            }
            PartSource::EmptyBlock { follow_units } => {
                if buf.len() >= EMPTY_BLOCK_HEADER_SIZE
                    && empty_block_header(follow_units)
                        .iter()
                        .eq(buf[..EMPTY_BLOCK_HEADER_SIZE].iter())
                    && buf[EMPTY_BLOCK_HEADER_SIZE..].iter().all(|&b| b == 0)
                {
                    VerifyOutcome::Pass
                } else {
                    VerifyOutcome::Mismatch
                }
            }
            PartSource::Patch { .. } | PartSource::Unavailable => VerifyOutcome::Unverifiable,
        }
    }

    /// Check the part's target span streamed from `reader`, which must be
    /// positioned at the part's target offset.
    ///
    /// Same verdicts and precedence as [`Self::verify`], but read in fixed-size
    /// chunks: wipe spans run to gigabytes and never need to sit in memory
    /// whole. Reads stop at the part's declared size.
    pub fn verify_stream<R: Read>(&self, mut reader: R) -> Result<VerifyOutcome> {
        let mut hasher = match (self.crc32, self.source) {
            (Some(_), _) => Some(crc32fast::Hasher::new()),
            (None, PartSource::Zeros | PartSource::EmptyBlock { .. }) => None,
            (None, PartSource::Patch { .. } | PartSource::Unavailable) => {
                return Ok(VerifyOutcome::Unverifiable);
            }
        };

        let header = match self.source {
            PartSource::EmptyBlock { follow_units } if hasher.is_none() => {
                if (self.target_size as usize) < EMPTY_BLOCK_HEADER_SIZE {
                    return Ok(VerifyOutcome::Mismatch);
                }
                Some(empty_block_header(follow_units))
            }
            _ => None,
        };

        let want = self.target_size as usize;
        let mut buf = [0u8; VERIFY_CHUNK];
        let mut seen = 0;
        while seen < want {
            let n = reader.read(&mut buf[..VERIFY_CHUNK.min(want - seen)])?;
            if n == 0 {
                return Ok(VerifyOutcome::ShortRead);
            }
            let chunk = &buf[..n];

            if let Some(hasher) = hasher.as_mut() {
                hasher.update(chunk);
            } else {
                // Pattern check: the placeholder header prefix (if any), zeros
                // everywhere after.
                let expected = header.as_ref().map_or(&[][..], |h| &h[..]);
                let in_header = expected.len().saturating_sub(seen).min(n);
                if chunk[..in_header] != expected[seen..seen + in_header]
                    || chunk[in_header..].iter().any(|&b| b != 0)
                {
                    return Ok(VerifyOutcome::Mismatch);
                }
            }
            seen += n;
        }

        match hasher {
            Some(h) if Some(h.clone().finalize()) != self.crc32 => Ok(VerifyOutcome::Mismatch),
            _ => Ok(VerifyOutcome::Pass),
        }
    }

    /// Rebuild a part that needs no patch data. `out` must be exactly the
    /// part's target span.
    pub fn reconstruct_headerless(&self, out: &mut [u8]) -> Result<()> {
        out.fill(0);
        match self.source {
            PartSource::Zeros => Ok(()),
            PartSource::EmptyBlock { follow_units } => {
                let header = empty_block_header(follow_units);
                let n = out.len().min(EMPTY_BLOCK_HEADER_SIZE);
                out[..n].copy_from_slice(&header[..n]);
                Ok(())
            }
            PartSource::Patch { .. } | PartSource::Unavailable => Err(Error::MalformedIndex(
                format!("part at {:#x} requires patch data", self.target_offset),
            )),
        }
    }

    /// Rebuild this part into `out` from `src`, the patch bytes starting at
    /// the part's source offset. `out` must be exactly the target span.
    ///
    /// With `check` set, the rebuilt bytes are verified against the sealed CRC
    /// before being accepted.
    pub fn reconstruct(&self, src: &[u8], out: &mut [u8], check: bool) -> Result<()> {
        let deflated = match self.source {
            PartSource::Patch { deflated, .. } => deflated,
            _ => return self.reconstruct_headerless(out),
        };

        let from = self.split_from as usize;
        let want = self.target_size as usize;

        if deflated {
            let mut decoded = Vec::with_capacity(from + want);
            let mut decoder = DeflateDecoder::new(src).take((from + want) as u64);
            decoder.read_to_end(&mut decoded)?;
            if decoded.len() < from + want {
                return Err(Error::InsufficientSourceData {
                    target_offset: self.target_offset,
                });
            }
            out.copy_from_slice(&decoded[from..from + want]);
        } else {
            if src.len() < from + want {
                return Err(Error::InsufficientSourceData {
                    target_offset: self.target_offset,
                });
            }
            out.copy_from_slice(&src[from..from + want]);
        }

        if check && self.verify(out) != VerifyOutcome::Pass {
            return Err(Error::SourceDataMismatch {
                target_offset: self.target_offset,
            });
        }
        Ok(())
    }
}

/// The six-dword prefix written over an emptied sqpack span: block size 128,
/// zero file size, and the count of following blocks.
pub fn empty_block_header(follow_units: u32) -> [u8; EMPTY_BLOCK_HEADER_SIZE] {
    let mut header = [0u8; EMPTY_BLOCK_HEADER_SIZE];
    header[..4].copy_from_slice(&(1i32 << 7).to_le_bytes());
    header[12..16].copy_from_slice(&follow_units.to_le_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zeros_part(size: u32) -> FilePart {
        FilePart {
            target_offset: 0,
            target_size: size,
            source: PartSource::Zeros,
            split_from: 0,
            crc32: None,
        }
    }

    #[test]
    fn test_short_read_beats_content_checks() {
        let part = zeros_part(16);
        assert_eq!(part.verify(&[0u8; 15]), VerifyOutcome::ShortRead);
        assert_eq!(part.verify(&[0u8; 16]), VerifyOutcome::Pass);
    }

    #[test]
    fn test_crc_takes_precedence_over_pattern() {
        let mut part = zeros_part(4);
        part.crc32 = Some(crc32fast::hash(&[1, 2, 3, 4]));
        assert_eq!(part.verify(&[0u8; 4]), VerifyOutcome::Mismatch);
        assert_eq!(part.verify(&[1, 2, 3, 4]), VerifyOutcome::Pass);
    }

    #[test]
    fn test_empty_block_pattern() {
        let part = FilePart {
            target_offset: 0,
            target_size: 128,
            source: PartSource::EmptyBlock { follow_units: 9 },
            split_from: 0,
            crc32: None,
        };

        let mut buf = vec![0u8; 128];
        part.reconstruct_headerless(&mut buf).unwrap();
        assert_eq!(&buf[..4], &(128i32).to_le_bytes());
        assert_eq!(&buf[12..16], &9u32.to_le_bytes());
        assert_eq!(part.verify(&buf), VerifyOutcome::Pass);

        buf[13] = 1; // wrong follow count
        assert_eq!(part.verify(&buf), VerifyOutcome::Mismatch);
    }

    #[test]
    fn test_verify_stream_matches_buffered_verdicts() {
        let mut part = zeros_part(4);
        part.crc32 = Some(crc32fast::hash(&[1, 2, 3, 4]));

        let check = |bytes: &[u8]| part.verify_stream(bytes).unwrap();
        assert_eq!(check(&[1, 2, 3, 4]), VerifyOutcome::Pass);
        assert_eq!(check(&[1, 2, 3, 9]), VerifyOutcome::Mismatch);
        assert_eq!(check(&[1, 2]), VerifyOutcome::ShortRead);
    }

    #[test]
    fn test_verify_stream_spans_multiple_read_chunks() {
        // Several read chunks plus a ragged tail, streamed from a generator
        // so the span never exists as one buffer.
        let size = (VERIFY_CHUNK * 3 + 17) as u32;
        let part = zeros_part(size);

        let clean = std::io::repeat(0).take(u64::from(size));
        assert_eq!(part.verify_stream(clean).unwrap(), VerifyOutcome::Pass);

        // One wrong byte at the very end.
        let tainted = std::io::repeat(0)
            .take(u64::from(size) - 1)
            .chain(std::io::Cursor::new([7u8]));
        assert_eq!(part.verify_stream(tainted).unwrap(), VerifyOutcome::Mismatch);
    }

    #[test]
    fn test_verify_stream_empty_block_header() {
        let part = FilePart {
            target_offset: 0,
            target_size: 128,
            source: PartSource::EmptyBlock { follow_units: 9 },
            split_from: 0,
            crc32: None,
        };

        let mut buf = vec![0u8; 128];
        part.reconstruct_headerless(&mut buf).unwrap();
        assert_eq!(
            part.verify_stream(buf.as_slice()).unwrap(),
            VerifyOutcome::Pass
        );

        buf[13] = 1; // wrong follow count
        assert_eq!(
            part.verify_stream(buf.as_slice()).unwrap(),
            VerifyOutcome::Mismatch
        );
    }

    #[test]
    fn test_unsealed_patch_part_is_unverifiable() {
        let part = FilePart {
            target_offset: 0,
            target_size: 4,
            source: PartSource::Patch {
                patch: 0,
                offset: 0,
                deflated: false,
            },
            split_from: 0,
            crc32: None,
        };
        assert_eq!(part.verify(&[0u8; 4]), VerifyOutcome::Unverifiable);
    }

    #[test]
    fn test_reconstruct_stored_slice() {
        let part = FilePart {
            target_offset: 0,
            target_size: 4,
            source: PartSource::Patch {
                patch: 0,
                offset: 100,
                deflated: false,
            },
            split_from: 2,
            crc32: Some(crc32fast::hash(b"cdef")),
        };

        let mut out = [0u8; 4];
        part.reconstruct(b"abcdef", &mut out, true).unwrap();
        assert_eq!(&out, b"cdef");
    }

    #[test]
    fn test_reconstruct_deflated_with_split() {
        let content = b"0123456789abcdef";
        let mut encoder =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(content).unwrap();
        let compressed = encoder.finish().unwrap();

        let part = FilePart {
            target_offset: 0,
            target_size: 6,
            source: PartSource::Patch {
                patch: 0,
                offset: 0,
                deflated: true,
            },
            split_from: 10,
            crc32: Some(crc32fast::hash(b"abcdef")),
        };

        let mut out = [0u8; 6];
        part.reconstruct(&compressed, &mut out, true).unwrap();
        assert_eq!(&out, b"abcdef");
    }

    #[test]
    fn test_reconstruct_detects_corrupt_source() {
        let part = FilePart {
            target_offset: 0,
            target_size: 4,
            source: PartSource::Patch {
                patch: 0,
                offset: 0,
                deflated: false,
            },
            split_from: 0,
            crc32: Some(crc32fast::hash(b"good")),
        };

        let mut out = [0u8; 4];
        let err = part.reconstruct(b"evil", &mut out, true).unwrap_err();
        assert!(matches!(err, Error::SourceDataMismatch { .. }));
        part.reconstruct(b"evil", &mut out, false).unwrap();
        assert_eq!(&out, b"evil");
    }
}
