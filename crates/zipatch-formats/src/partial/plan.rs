//! Target file part plans
//!
//! A plan is an ordered, gap-free list of parts covering a target file from
//! offset zero to its current size. Ingesting a patch chunk overlays a new
//! part onto the plan: existing parts are split at the new part's edges and
//! the covered range is replaced. Splitting invalidates any sealed CRC on the
//! affected parts, since it no longer describes either half.

use super::part::{FilePart, PartSource};

/// Ordered part list for one target file.
#[derive(Debug, Clone, Default)]
pub struct PartPlan {
    parts: Vec<FilePart>,
}

impl PartPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[FilePart] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [FilePart] {
        &mut self.parts
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    pub(crate) fn push_unchecked(&mut self, part: FilePart) {
        self.parts.push(part);
    }

    /// Current size of the described file.
    pub fn file_size(&self) -> u64 {
        self.parts.last().map_or(0, FilePart::target_end)
    }

    fn search(&self, target_offset: u64) -> Result<usize, usize> {
        self.parts
            .binary_search_by_key(&target_offset, |p| p.target_offset)
    }

    /// Ensure a part boundary exists at `offset`, splitting or zero-extending
    /// as needed.
    fn split_at(&mut self, offset: u64) {
        let i = match self.search(offset) {
            Ok(_) => return, // boundary already exists
            Err(i) => i,
        };

        if i == 0 {
            if offset == 0 {
                return;
            }
            debug_assert!(self.parts.is_empty());
            self.parts.push(FilePart {
                target_offset: 0,
                target_size: offset as u32,
                source: PartSource::Zeros,
                split_from: 0,
                crc32: None,
            });
            return;
        }

        if i == self.parts.len() {
            let end = self.parts[i - 1].target_end();
            if end == offset {
                return;
            }
            if end < offset {
                // Gap past the current file end becomes implicit zeros.
                self.parts.push(FilePart {
                    target_offset: end,
                    target_size: (offset - end) as u32,
                    source: PartSource::Zeros,
                    split_from: 0,
                    crc32: None,
                });
                return;
            }
        }

        let i = i - 1;
        let part = self.parts[i];
        let left_size = (offset - part.target_offset) as u32;
        let right_size = part.target_size - left_size;

        // Stored patch spans can be re-anchored by advancing the source
        // offset; deflated and empty-block parts keep their source anchor and
        // track the cut through split_from instead.
        let (left_source, right_source, right_split_from) = match part.source {
            PartSource::Patch {
                patch,
                offset: source_offset,
                deflated: false,
            } => {
                debug_assert_eq!(part.split_from, 0);
                (
                    part.source,
                    PartSource::Patch {
                        patch,
                        offset: source_offset + u64::from(left_size),
                        deflated: false,
                    },
                    0,
                )
            }
            PartSource::Patch { deflated: true, .. } | PartSource::EmptyBlock { .. } => {
                (part.source, part.source, part.split_from + left_size)
            }
            PartSource::Zeros | PartSource::Unavailable => (part.source, part.source, 0),
        };

        self.parts[i] = FilePart {
            target_offset: part.target_offset,
            target_size: left_size,
            source: left_source,
            split_from: part.split_from,
            crc32: None,
        };
        self.parts.insert(
            i + 1,
            FilePart {
                target_offset: offset,
                target_size: right_size,
                source: right_source,
                split_from: right_split_from,
                crc32: None,
            },
        );
    }

    /// Overlay `part` onto the plan, replacing whatever covered its range.
    pub fn update(&mut self, part: FilePart) {
        if part.target_size == 0 {
            return;
        }

        self.split_at(part.target_offset);
        self.split_at(part.target_end());

        let left = self.search(part.target_offset).unwrap_or_else(|i| i);
        if left == self.parts.len() {
            self.parts.push(part);
            return;
        }

        let right = self.search(part.target_end()).unwrap_or_else(|i| i);
        self.parts[left] = part;
        self.parts.drain(left + 1..right);
    }

    /// Check ordering and contiguity from offset zero.
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 0u64;
        for part in &self.parts {
            if part.target_offset != expected {
                return false;
            }
            expected = part.target_end();
        }
        true
    }
}
