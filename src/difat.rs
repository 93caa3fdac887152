//! Extension table (DIFAT / XBAT) generation.
//!
//! The header holds the first 109 allocation-table sector indexes inline;
//! when the table needs more sectors than that, the overflow indexes are
//! chained through extension sectors. Each extension sector carries
//! `sectorSize/4 - 1` indexes plus one trailing pointer to the next
//! extension sector (`ENDOFCHAIN` on the last one).

use crate::consts::*;

/// Number of extension sectors required to hold `entry_count` overflow
/// table-sector indexes
pub fn sectors_for_entries(entry_count: usize, sector_size: usize) -> usize {
    let ids_per_sector = (sector_size / 4) - 1;
    entry_count.div_ceil(ids_per_sector)
}

/// Number of extension sectors required for a table of `total_fat_sectors`
/// sectors, after the inline header slots are used up
pub fn extension_sectors_needed(total_fat_sectors: usize, sector_size: usize) -> usize {
    sectors_for_entries(
        total_fat_sectors.saturating_sub(HEADER_FAT_SLOTS),
        sector_size,
    )
}

/// Builder for the extension-sector chain
#[derive(Debug)]
pub struct ExtensionTableBuilder {
    /// Table sector indexes beyond the first 109
    overflow: Vec<u32>,
    /// Sector size (512 or 4096 bytes)
    sector_size: usize,
}

impl ExtensionTableBuilder {
    /// Create a builder holding the given overflow table-sector indexes.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is not 512 or 4096.
    pub fn new(overflow: Vec<u32>, sector_size: usize) -> Self {
        assert!(
            sector_size == SECTOR_SIZE_V3 || sector_size == SECTOR_SIZE_V4,
            "Sector size must be 512 or 4096"
        );

        Self {
            overflow,
            sector_size,
        }
    }

    /// Whether any extension sectors are needed at all
    pub fn is_needed(&self) -> bool {
        !self.overflow.is_empty()
    }

    /// Number of extension sectors this builder will produce
    pub fn sector_count(&self) -> usize {
        sectors_for_entries(self.overflow.len(), self.sector_size)
    }

    /// Serialize the extension chain.
    ///
    /// The chain occupies `first_sector..first_sector + sector_count()`;
    /// every sector but the last carries the index of the following
    /// extension sector in its reserved trailing slot, the last carries
    /// `ENDOFCHAIN`, and slack in the final sector is `FREESECT`.
    pub fn build(&self, first_sector: u32) -> Vec<Vec<u8>> {
        if self.overflow.is_empty() {
            return Vec::new();
        }

        let ids_per_sector = (self.sector_size / 4) - 1;
        let num_sectors = self.sector_count();

        let mut sectors = Vec::with_capacity(num_sectors);
        for sector_idx in 0..num_sectors {
            // FREESECT slack
            let mut data = vec![0xFFu8; self.sector_size];

            let start = sector_idx * ids_per_sector;
            let end = (start + ids_per_sector).min(self.overflow.len());
            for (i, &id) in self.overflow[start..end].iter().enumerate() {
                let offset = i * 4;
                data[offset..offset + 4].copy_from_slice(&id.to_le_bytes());
            }

            let next = if sector_idx < num_sectors - 1 {
                first_sector + sector_idx as u32 + 1
            } else {
                ENDOFCHAIN
            };
            let next_offset = self.sector_size - 4;
            data[next_offset..next_offset + 4].copy_from_slice(&next.to_le_bytes());

            sectors.push(data);
        }

        sectors
    }
}
