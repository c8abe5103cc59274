//! Block index validation.
//!
//! A block index is laid out as fixed-size data blocks, then one entry record
//! per block, then a fixed trailer:
//!
//! ```text
//! 0x0000        4096 * n   data blocks
//! ...           24 * n     entry records, one per block:
//!                            0x00  8   truncated MD5 of the block
//!                            0x08  16  last key in the block
//! len - 28      28         trailer:
//!                            0x00  8   truncated MD5 of the entry records
//!                            0x08  8   reserved
//!                            0x10  4   entry count (u32 LE)
//!                            0x14  8   reserved
//! ```
//!
//! The block count is never stored; it is derived from the entry count as
//! `ceil(entries / 170)`, 170 being the number of 24-byte entries that fit a
//! 4096-byte block.

use crate::error::ValidationError;
use crate::hash::{SHORT_HASH_SIZE, short_digest};

/// Size of one data block.
pub const BLOCK_SIZE: usize = 4096;

/// Size of one entry record.
pub const ENTRY_RECORD_SIZE: usize = 24;

/// Number of entries described by one block.
pub const ENTRIES_PER_BLOCK: usize = 170;

/// Size of the trailer.
pub const TRAILER_SIZE: usize = 28;

/// Offset of the entry count, measured back from the end of the buffer.
const COUNT_FROM_END: usize = 12;

/// The decoded trailer of a block index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexTrailer {
    /// Truncated MD5 of the entry-record region.
    pub region_checksum: [u8; SHORT_HASH_SIZE],
    /// Number of entries the index describes.
    pub entry_count: u32,
}

impl IndexTrailer {
    /// Decode the trailer from the last 28 bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, ValidationError> {
        if buf.len() < TRAILER_SIZE {
            return Err(ValidationError::Truncated {
                needed: TRAILER_SIZE,
                actual: buf.len(),
            });
        }

        let trailer = &buf[buf.len() - TRAILER_SIZE..];
        let mut region_checksum = [0u8; SHORT_HASH_SIZE];
        region_checksum.copy_from_slice(&trailer[..SHORT_HASH_SIZE]);

        let count_at = buf.len() - COUNT_FROM_END;
        let mut count = [0u8; 4];
        count.copy_from_slice(&buf[count_at..count_at + 4]);

        Ok(Self {
            region_checksum,
            entry_count: u32::from_le_bytes(count),
        })
    }

    /// Number of data blocks implied by the entry count.
    pub fn block_count(&self) -> usize {
        (self.entry_count as usize).div_ceil(ENTRIES_PER_BLOCK)
    }

    /// Size of the entry-record region.
    pub fn region_size(&self) -> usize {
        self.block_count() * ENTRY_RECORD_SIZE
    }
}

/// Validate a block index held in memory.
///
/// Returns the number of validated blocks.
pub fn validate(buf: &[u8]) -> Result<usize, ValidationError> {
    let trailer = IndexTrailer::parse(buf)?;
    let block_count = trailer.block_count();
    let region_size = trailer.region_size();

    let needed = block_count * BLOCK_SIZE + region_size + TRAILER_SIZE;
    if buf.len() < needed {
        return Err(ValidationError::Truncated {
            needed,
            actual: buf.len(),
        });
    }

    let region_start = buf.len() - TRAILER_SIZE - region_size;
    let region = &buf[region_start..region_start + region_size];

    let computed = short_digest(region);
    if computed != trailer.region_checksum {
        return Err(ValidationError::EntryRegionChecksumMismatch {
            expected: hex::encode(trailer.region_checksum),
            actual: hex::encode(computed),
        });
    }

    for (block, data) in buf[..block_count * BLOCK_SIZE]
        .chunks_exact(BLOCK_SIZE)
        .enumerate()
    {
        let record = &region[block * ENTRY_RECORD_SIZE..];
        if short_digest(data)[..] != record[..SHORT_HASH_SIZE] {
            return Err(ValidationError::BlockChecksumMismatch { block });
        }
    }

    Ok(block_count)
}

/// Build a well-formed index of `blocks` blocks with pseudo-random contents.
#[cfg(test)]
pub(crate) fn build_index(blocks: usize, seed: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(blocks * (BLOCK_SIZE + ENTRY_RECORD_SIZE) + TRAILER_SIZE);
    let mut state = seed as u32 | 1;
    for _ in 0..blocks * BLOCK_SIZE {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        buf.push((state >> 16) as u8);
    }

    let mut region = Vec::with_capacity(blocks * ENTRY_RECORD_SIZE);
    for block in buf.chunks_exact(BLOCK_SIZE) {
        region.extend_from_slice(&short_digest(block));
        region.extend_from_slice(&block[BLOCK_SIZE - 16..]);
    }

    let entry_count = (blocks * ENTRIES_PER_BLOCK) as u32;
    let mut trailer = [0u8; TRAILER_SIZE];
    trailer[..SHORT_HASH_SIZE].copy_from_slice(&short_digest(&region));
    trailer[16..20].copy_from_slice(&entry_count.to_le_bytes());

    buf.extend_from_slice(&region);
    buf.extend_from_slice(&trailer);
    buf
}
