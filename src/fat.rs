//! Allocation table (FAT) decoding, chain resolution and generation.
//!
//! The allocation table holds one "next sector" entry per sector. Regular
//! entries chain sectors into streams; `ENDOFCHAIN` terminates a chain,
//! `FREESECT` marks an unallocated sector, and `FATSECT` / `DIFSECT` flag
//! the table's own sectors and its extension sectors. The same entry format
//! is reused at mini-sector granularity by the mini allocation table.

use crate::consts::*;
use crate::error::{CfbError, ChainFault, Result};
use zerocopy::{FromBytes, LE, U32};

/// Decoded allocation table: one next-pointer per sector.
///
/// Works for both the main table (indexed by sector) and the mini table
/// (indexed by mini sector); resolution logic is identical.
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    entries: Vec<u32>,
}

impl AllocationTable {
    /// Decode a table from raw sector bytes (4-byte little-endian entries).
    ///
    /// Trailing bytes that do not form a whole entry are ignored, which
    /// tolerates a truncated final table sector.
    pub fn decode(data: &[u8]) -> Self {
        let entries = data
            .chunks_exact(4)
            .map(|chunk| {
                U32::<LE>::read_from_bytes(chunk)
                    .map(|v| v.get())
                    .unwrap_or(FREESECT)
            })
            .collect();
        AllocationTable { entries }
    }

    /// Decode a table from a sequence of sector slices
    pub fn from_sectors<'a>(sectors: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut entries = Vec::new();
        for sector in sectors {
            entries.extend(sector.chunks_exact(4).map(|chunk| {
                U32::<LE>::read_from_bytes(chunk)
                    .map(|v| v.get())
                    .unwrap_or(FREESECT)
            }));
        }
        AllocationTable { entries }
    }

    /// Next-pointer for the given sector, if the table covers it
    #[inline]
    pub fn entry(&self, sector: u32) -> Option<u32> {
        self.entries.get(sector as usize).copied()
    }

    /// Number of entries in the table
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Follow next-pointers from `start` until `ENDOFCHAIN`, collecting the
    /// ordered sector list.
    ///
    /// `limit` is the number of addressable sectors; the walk fails fast on
    /// a loop, an out-of-range index, a reserved table sector or a chain
    /// that runs onto a free sector, naming the offending sector and the
    /// chain's origin. A `start` of `ENDOFCHAIN` resolves to an empty chain.
    pub fn resolve(&self, start: u32, limit: usize) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        if start == ENDOFCHAIN {
            return Ok(chain);
        }

        let corrupt = |sector: u32, fault: ChainFault| CfbError::ChainCorruption {
            sector,
            origin: start,
            fault,
        };

        let mut visited = vec![false; limit.min(self.entries.len())];
        let mut current = start;
        loop {
            if current > MAXREGSECT || current as usize >= limit {
                return Err(corrupt(current, ChainFault::OutOfRange));
            }
            let index = current as usize;
            if index >= self.entries.len() {
                return Err(corrupt(current, ChainFault::OutOfRange));
            }
            if visited[index] {
                return Err(corrupt(current, ChainFault::Loop));
            }
            visited[index] = true;
            chain.push(current);

            match self.entries[index] {
                ENDOFCHAIN => return Ok(chain),
                FREESECT => return Err(corrupt(current, ChainFault::PrematureEnd)),
                FATSECT | DIFSECT => return Err(corrupt(current, ChainFault::Reserved)),
                next => current = next,
            }
        }
    }
}

/// Allocation table builder for the save path.
///
/// Hands out sectors in ascending order and records the chain links; the
/// whole table is rebuilt from scratch on every save, so there is no free
/// list to maintain.
#[derive(Debug)]
pub struct FatBuilder {
    /// The table (maps sector ID to next sector in chain)
    fat: Vec<u32>,
    /// Next available sector
    next_sector: u32,
    /// Sector size for this table
    sector_size: usize,
}

impl FatBuilder {
    /// Create a builder for the given sector size.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is not 512 or 4096.
    pub fn new(sector_size: usize) -> Self {
        assert!(
            sector_size == SECTOR_SIZE_V3 || sector_size == SECTOR_SIZE_V4,
            "Sector size must be 512 or 4096"
        );

        Self {
            fat: Vec::new(),
            next_sector: 0,
            sector_size,
        }
    }

    /// Allocate a chain of sectors covering `size` bytes.
    ///
    /// Returns the starting sector, or `ENDOFCHAIN` for an empty allocation.
    pub fn allocate_chain(&mut self, size: usize) -> u32 {
        if size == 0 {
            return ENDOFCHAIN;
        }

        let num_sectors = size.div_ceil(self.sector_size);
        let start_sector = self.next_sector;

        let new_size = (start_sector as usize + num_sectors).max(self.fat.len());
        if new_size > self.fat.len() {
            self.fat.resize(new_size, FREESECT);
        }

        for i in 0..num_sectors {
            let current = self.next_sector;
            self.next_sector += 1;

            self.fat[current as usize] = if i < num_sectors - 1 {
                current + 1
            } else {
                ENDOFCHAIN
            };
        }

        start_sector
    }

    /// Reserve a contiguous run of sectors marked with a sentinel.
    ///
    /// Used for the table's own sectors (`FATSECT`) and extension sectors
    /// (`DIFSECT`). Returns the first sector of the run, or `ENDOFCHAIN`
    /// when `count` is zero.
    pub fn allocate_special(&mut self, count: u32, marker: u32) -> u32 {
        if count == 0 {
            return ENDOFCHAIN;
        }

        let start = self.next_sector;
        let end = start + count;

        if self.fat.len() < end as usize {
            self.fat.resize(end as usize, FREESECT);
        }
        for s in start..end {
            self.fat[s as usize] = marker;
        }

        self.next_sector = end;
        start
    }

    /// The table entries built so far
    pub fn fat(&self) -> &[u32] {
        &self.fat
    }

    /// Total number of sectors handed out
    pub fn total_sectors(&self) -> u32 {
        self.next_sector
    }

    /// Number of table sectors needed to hold the current entries
    pub fn sector_count_needed(&self) -> usize {
        let entries_per_sector = self.sector_size / 4;
        self.fat.len().div_ceil(entries_per_sector)
    }

    /// Serialize the table into sectors; the final sector's unused tail is
    /// filled with `FREESECT`.
    pub fn to_sectors(&self) -> Vec<Vec<u8>> {
        let entries_per_sector = self.sector_size / 4;
        let num_sectors = self.fat.len().div_ceil(entries_per_sector);

        let mut sectors = Vec::with_capacity(num_sectors);
        for sector_idx in 0..num_sectors {
            // FREESECT is all 0xFF bytes, so start from that
            let mut data = vec![0xFFu8; self.sector_size];
            let start = sector_idx * entries_per_sector;
            let end = (start + entries_per_sector).min(self.fat.len());

            for (i, &value) in self.fat[start..end].iter().enumerate() {
                let offset = i * 4;
                data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }

            sectors.push(data);
        }

        sectors
    }

    /// Check the table for over-allocation before serializing.
    ///
    /// Every next-pointer must either be a sentinel or refer to a sector
    /// inside the allocated range; anything else means a chain was linked
    /// past the declared sector count and the save must abort.
    pub fn validate(&self) -> Result<()> {
        let total = self.next_sector;
        for (sector, &next) in self.fat.iter().enumerate() {
            match next {
                ENDOFCHAIN | FREESECT | FATSECT | DIFSECT => {}
                n if n < total => {}
                n => {
                    return Err(CfbError::InvalidData(format!(
                        "sector {} links to {} beyond the {} allocated sectors",
                        sector, n, total
                    )));
                }
            }
        }
        Ok(())
    }
}
