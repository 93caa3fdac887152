//! Mini allocation table and mini stream.
//!
//! Streams below the cutoff size are carved out of a single mini stream at
//! mini-sector granularity (64 bytes by default). The mini allocation table
//! uses the same entry format as the main table but its indexes address
//! mini sectors inside the mini stream container, which is itself an
//! ordinary big-sector chain anchored at the root directory entry.

use crate::block::{self, Block};
use crate::consts::*;
use crate::error::Result;
use crate::fat::AllocationTable;

/// Read one mini-sector chain out of the mini stream.
///
/// `sbat` is the decoded mini allocation table and `ministream` the
/// container bytes; the result is truncated to `size`. Chain faults are
/// reported with the same diagnostics as big-sector chains.
pub fn read_mini_chain(
    sbat: &AllocationTable,
    ministream: &[u8],
    start: u32,
    size: usize,
    mini_sector_size: usize,
) -> Result<Vec<u8>> {
    let limit = ministream.len().div_ceil(mini_sector_size);
    let chain = sbat.resolve(start, limit)?;

    let blocks: Vec<Block> = chain
        .iter()
        .map(|&mini| {
            let pos = mini as usize * mini_sector_size;
            let end = (pos + mini_sector_size).min(ministream.len());
            Block::from_slice(&ministream[pos..end], mini_sector_size)
        })
        .collect();

    let take = size.min(block::size_of(blocks.len(), mini_sector_size));
    let mut out = vec![0u8; take];
    block::read_from_blocks(&blocks, &mut out, 0)?;
    Ok(out)
}

/// Mini allocation table builder for the save path.
///
/// Packs every small document into the shared mini stream, records the mini
/// chains, and pads the container to a whole number of big sectors before
/// it is handed to the big-sector allocator.
#[derive(Debug)]
pub struct MiniFatBuilder {
    /// The mini table (maps mini sector ID to next mini sector in chain)
    minifat: Vec<u32>,
    /// Next available mini sector
    next_mini_sector: u32,
    /// Mini sector size (typically 64 bytes)
    mini_sector_size: usize,
    /// Mini stream contents as mini-sector blocks
    blocks: Vec<Block>,
}

impl MiniFatBuilder {
    /// Create a builder for the given mini sector size
    pub fn new(mini_sector_size: usize) -> Self {
        Self {
            minifat: Vec::new(),
            next_mini_sector: 0,
            mini_sector_size,
            blocks: Vec::new(),
        }
    }

    /// Pack a small document into the mini stream, returning the starting
    /// mini sector of its chain (`ENDOFCHAIN` for an empty document).
    pub fn add_stream(&mut self, data: &[u8]) -> u32 {
        if data.is_empty() {
            return ENDOFCHAIN;
        }

        let mut blocks = block::to_blocks(data, self.mini_sector_size);
        let num_mini_sectors = blocks.len();
        let start = self.next_mini_sector;

        let new_size = start as usize + num_mini_sectors;
        if new_size > self.minifat.len() {
            self.minifat.resize(new_size, FREESECT);
        }

        for i in 0..num_mini_sectors {
            let current = self.next_mini_sector;
            self.next_mini_sector += 1;

            self.minifat[current as usize] = if i < num_mini_sectors - 1 {
                current + 1
            } else {
                ENDOFCHAIN
            };
        }

        self.blocks.append(&mut blocks);
        start
    }

    /// Pad the container to a whole number of big sectors with filler
    /// blocks; returns the number of big sectors it occupies.
    pub fn pad_container(&mut self, sector_size: usize) -> usize {
        block::pad_to_unit(&mut self.blocks, sector_size / self.mini_sector_size)
    }

    /// The mini stream container contents
    pub fn container_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.container_size() as usize);
        for b in &self.blocks {
            data.extend_from_slice(b.bytes());
        }
        data
    }

    /// Total container byte length (the root entry's size field)
    pub fn container_size(&self) -> u64 {
        block::size_of(self.blocks.len(), self.mini_sector_size) as u64
    }

    /// Number of mini sectors allocated to documents (fillers excluded)
    pub fn mini_sector_count(&self) -> u32 {
        self.next_mini_sector
    }

    /// Whether no small documents were packed
    pub fn is_empty(&self) -> bool {
        self.minifat.is_empty()
    }

    /// The mini table entries built so far
    pub fn minifat(&self) -> &[u32] {
        &self.minifat
    }

    /// Serialize the mini table into big sectors with a `FREESECT` tail
    pub fn to_sectors(&self, sector_size: usize) -> Vec<Vec<u8>> {
        if self.minifat.is_empty() {
            return Vec::new();
        }

        let entries_per_sector = sector_size / 4;
        let num_sectors = self.minifat.len().div_ceil(entries_per_sector);

        let mut sectors = Vec::with_capacity(num_sectors);
        for sector_idx in 0..num_sectors {
            let mut data = vec![0xFFu8; sector_size];
            let start = sector_idx * entries_per_sector;
            let end = (start + entries_per_sector).min(self.minifat.len());

            for (i, &value) in self.minifat[start..end].iter().enumerate() {
                let offset = i * 4;
                data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }

            sectors.push(data);
        }

        sectors
    }
}
