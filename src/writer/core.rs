//! Compound file writer.
//!
//! All operations are buffered in memory until the container is saved. The
//! save path is a fixed pipeline: partition documents by the cutoff size,
//! pack small ones into the mini stream, allocate big sectors for large
//! documents, the mini stream container, the directory and the tables
//! themselves, rebuild the allocation and extension tables from scratch,
//! finalize the header, and serialize everything in sector order. A step
//! that discovers an unresolvable over-allocation aborts the save.

use crate::block;
use crate::consts::*;
use crate::difat::{ExtensionTableBuilder, extension_sectors_needed};
use crate::directory::{self, DirectoryTree};
use crate::error::{CfbError, Result};
use crate::fat::FatBuilder;
use crate::header::Header;
use crate::minifat::MiniFatBuilder;
use std::io::Write;

/// Compound file writer.
///
/// Stages streams and storages and writes a complete container to a byte
/// sink. Creating a stream that already exists replaces its contents.
pub struct CfbWriter {
    /// Sector size (512 or 4096 bytes)
    sector_size: usize,
    /// Mini sector size (typically 64 bytes)
    mini_sector_size: usize,
    /// Streams below this size are packed into the mini stream
    mini_stream_cutoff: u32,
    /// CLSID written on the root entry
    root_clsid: [u8; 16],
    /// Stream data in insertion order; insertion order decides sector
    /// allocation order
    streams: Vec<(Vec<String>, Vec<u8>)>,
    /// Explicitly created storages in insertion order
    storages: Vec<Vec<String>>,
}

impl CfbWriter {
    /// Create a writer with default settings (512-byte sectors)
    pub fn new() -> Self {
        Self::with_sector_size(SECTOR_SIZE_V3)
    }

    /// Create a writer with the given sector size.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is not 512 or 4096.
    pub fn with_sector_size(sector_size: usize) -> Self {
        assert!(
            sector_size == SECTOR_SIZE_V3 || sector_size == SECTOR_SIZE_V4,
            "Sector size must be 512 or 4096"
        );

        CfbWriter {
            sector_size,
            mini_sector_size: MINI_SECTOR_SIZE,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            root_clsid: [0; 16],
            streams: Vec::new(),
            storages: Vec::new(),
        }
    }

    /// Set the CLSID written on the root entry, identifying the container
    /// type to consumers
    pub fn set_root_clsid(&mut self, clsid: [u8; 16]) {
        self.root_clsid = clsid;
    }

    fn owned_path(path: &[&str]) -> Result<Vec<String>> {
        if path.is_empty() {
            return Err(CfbError::InvalidData("empty path".to_string()));
        }
        for component in path {
            directory::validate_name(component)?;
        }
        Ok(path.iter().map(|s| s.to_string()).collect())
    }

    /// Create or replace a stream at the given path.
    ///
    /// Parent storages are created automatically on save.
    pub fn create_stream(&mut self, path: &[&str], data: &[u8]) -> Result<()> {
        let owned = Self::owned_path(path)?;
        if let Some(pos) = self.streams.iter().position(|(p, _)| p == &owned) {
            self.streams[pos].1 = data.to_vec();
        } else {
            self.streams.push((owned, data.to_vec()));
        }
        Ok(())
    }

    /// Replace an existing stream; alias of [`CfbWriter::create_stream`]
    pub fn update_stream(&mut self, path: &[&str], data: &[u8]) -> Result<()> {
        self.create_stream(path, data)
    }

    /// Delete a stream
    pub fn delete_stream(&mut self, path: &[&str]) -> Result<()> {
        let owned = Self::owned_path(path)?;
        if let Some(pos) = self.streams.iter().position(|(p, _)| p == &owned) {
            self.streams.remove(pos);
            Ok(())
        } else {
            Err(CfbError::StreamNotFound)
        }
    }

    /// Create a storage at the given path
    pub fn create_storage(&mut self, path: &[&str]) -> Result<()> {
        let owned = Self::owned_path(path)?;
        if !self.storages.contains(&owned) {
            self.storages.push(owned);
        }
        Ok(())
    }

    fn has_children(&self, path: &[String]) -> bool {
        let is_under = |candidate: &Vec<String>| {
            candidate.len() > path.len() && candidate[..path.len()] == *path
        };
        self.streams.iter().any(|(p, _)| is_under(p)) || self.storages.iter().any(is_under)
    }

    /// Delete an empty storage.
    ///
    /// A storage still holding streams or storages is refused; tear the
    /// subtree down first or use [`CfbWriter::delete_storage_all`].
    pub fn delete_storage(&mut self, path: &[&str]) -> Result<()> {
        let owned = Self::owned_path(path)?;
        let pos = self
            .storages
            .iter()
            .position(|p| p == &owned)
            .ok_or(CfbError::StreamNotFound)?;
        if self.has_children(&owned) {
            return Err(CfbError::StorageNotEmpty);
        }
        self.storages.remove(pos);
        Ok(())
    }

    /// Delete a storage together with everything under it
    pub fn delete_storage_all(&mut self, path: &[&str]) -> Result<()> {
        let owned = Self::owned_path(path)?;
        if !self.storages.contains(&owned) {
            return Err(CfbError::StreamNotFound);
        }
        let keep = |candidate: &Vec<String>| {
            !(candidate.len() >= owned.len() && candidate[..owned.len()] == owned[..])
        };
        self.streams.retain(|(p, _)| keep(p));
        self.storages.retain(keep);
        Ok(())
    }

    /// Write the complete container to a byte sink.
    ///
    /// The allocation tables and the directory are rebuilt from scratch;
    /// sectors are emitted strictly in index order.
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        let sector_size = self.sector_size;

        // Partition by the cutoff size
        let mut small_streams: Vec<(&Vec<String>, &Vec<u8>)> = Vec::new();
        let mut large_streams: Vec<(&Vec<String>, &Vec<u8>)> = Vec::new();
        for (path, data) in &self.streams {
            if data.len() < self.mini_stream_cutoff as usize {
                small_streams.push((path, data));
            } else {
                large_streams.push((path, data));
            }
        }

        // Pack small documents into the mini stream and pad its container
        // to whole big sectors
        let mut minifat = MiniFatBuilder::new(self.mini_sector_size);
        let small_allocs: Vec<(&Vec<String>, &Vec<u8>, u32)> = small_streams
            .iter()
            .map(|&(path, data)| (path, data, minifat.add_stream(data)))
            .collect();
        if !minifat.is_empty() {
            minifat.pad_container(sector_size);
        }

        // Big-sector allocation; large documents first so the first created
        // stream lands at sector 0, which some consumers require
        let mut fat = FatBuilder::new(sector_size);
        let large_allocs: Vec<(&Vec<String>, &Vec<u8>, u32)> = large_streams
            .iter()
            .map(|&(path, data)| {
                let start = if data.is_empty() {
                    ENDOFCHAIN
                } else {
                    fat.allocate_chain(data.len())
                };
                (path, data, start)
            })
            .collect();

        let (ministream_start, ministream_size) = if minifat.is_empty() {
            (ENDOFCHAIN, 0u64)
        } else {
            let size = minifat.container_size();
            (fat.allocate_chain(size as usize), size)
        };

        // Directory tree, root fixed up with the mini stream anchor
        let mut tree = DirectoryTree::new();
        if self.root_clsid != [0u8; 16] {
            tree.set_root_clsid(self.root_clsid);
        }
        tree.set_root_stream(ministream_start, ministream_size);

        for path in &self.storages {
            let parts: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
            tree.insert_storage(&parts)?;
        }
        for (path, data, start) in &large_allocs {
            let parts: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
            tree.insert_stream(&parts, *start, data.len() as u64)?;
        }
        for (path, data, start) in &small_allocs {
            let parts: Vec<&str> = path.iter().map(|s| s.as_str()).collect();
            tree.insert_stream(&parts, *start, data.len() as u64)?;
        }

        let dir_stream = tree.serialize(sector_size);
        let dir_start = fat.allocate_chain(dir_stream.len());
        let dir_sector_count = (dir_stream.len() / sector_size) as u32;

        // Mini allocation table sectors
        let sbat_sectors = minifat.to_sectors(sector_size);
        let (sbat_start, num_sbat_sectors) = if sbat_sectors.is_empty() {
            (ENDOFCHAIN, 0u32)
        } else {
            (
                fat.allocate_chain(sbat_sectors.len() * sector_size),
                sbat_sectors.len() as u32,
            )
        };

        // The allocation table must also cover its own sectors and any
        // extension sectors, so its size is computed as a fixpoint
        let entries_per_sector = (sector_size / 4) as u32;
        let n_used = fat.total_sectors();
        let mut n_fat = 0u32;
        let mut n_difat = 0u32;
        for _ in 0..8 {
            let total = n_used + n_fat + n_difat;
            let new_n_fat = total.div_ceil(entries_per_sector);
            let new_n_difat = extension_sectors_needed(new_n_fat as usize, sector_size) as u32;
            if new_n_fat == n_fat && new_n_difat == n_difat {
                break;
            }
            n_fat = new_n_fat;
            n_difat = new_n_difat;
        }

        let difat_start = fat.allocate_special(n_difat, DIFSECT);
        let fat_start = fat.allocate_special(n_fat, FATSECT);

        if fat.sector_count_needed() != n_fat as usize {
            return Err(CfbError::InvalidData(
                "allocation table sizing did not converge".to_string(),
            ));
        }
        fat.validate()?;

        // Finalize the header
        let mut header = Header::new(sector_size);
        header.mini_stream_cutoff = self.mini_stream_cutoff;
        header.first_dir_sector = dir_start;
        header.num_dir_sectors = if sector_size == SECTOR_SIZE_V3 {
            0
        } else {
            dir_sector_count
        };
        header.first_minifat_sector = sbat_start;
        header.num_minifat_sectors = num_sbat_sectors;

        let overflow = header.assign_fat_sectors(n_fat, fat_start)?;
        if !overflow.is_empty() {
            header.first_difat_sector = difat_start;
            header.num_difat_sectors = n_difat;
        }

        // Lay every region into its sector slots, then emit in sector order
        let total_sectors = fat.total_sectors() as usize;
        let mut sectors: Vec<Option<Vec<u8>>> = vec![None; total_sectors];

        for (_, data, start) in &large_allocs {
            let run = block::to_blocks(data, sector_size)
                .iter()
                .map(|b| b.bytes().to_vec())
                .collect();
            place_run(&mut sectors, *start, run)?;
        }
        if ministream_start != ENDOFCHAIN {
            let run = block::to_blocks(&minifat.container_bytes(), sector_size)
                .iter()
                .map(|b| b.bytes().to_vec())
                .collect();
            place_run(&mut sectors, ministream_start, run)?;
        }
        place_run(
            &mut sectors,
            dir_start,
            dir_stream.chunks(sector_size).map(|c| c.to_vec()).collect(),
        )?;
        place_run(&mut sectors, sbat_start, sbat_sectors)?;
        if !overflow.is_empty() {
            let difat_sectors =
                ExtensionTableBuilder::new(overflow, sector_size).build(difat_start);
            place_run(&mut sectors, difat_start, difat_sectors)?;
        }
        place_run(&mut sectors, fat_start, fat.to_sectors())?;

        sink.write_all(&header.serialize())?;
        for (index, sector) in sectors.into_iter().enumerate() {
            match sector {
                Some(data) => sink.write_all(&data)?,
                None => {
                    return Err(CfbError::InvalidData(format!(
                        "sector {} was allocated but never produced",
                        index
                    )));
                }
            }
        }
        sink.flush()?;

        Ok(())
    }

    /// Save the container to a file path
    pub fn save<P: AsRef<std::path::Path>>(&mut self, path: P) -> Result<()> {
        let file = std::fs::File::create(path)?;
        let mut buffered = std::io::BufWriter::new(file);
        self.write_to(&mut buffered)?;
        buffered.flush()?;
        Ok(())
    }
}

impl Default for CfbWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Place a run of consecutive sectors starting at `start`; a slot that is
/// already occupied or out of range means the allocator and the emitters
/// disagree, which aborts the save
fn place_run(sectors: &mut [Option<Vec<u8>>], start: u32, run: Vec<Vec<u8>>) -> Result<()> {
    if run.is_empty() {
        return Ok(());
    }
    for (i, data) in run.into_iter().enumerate() {
        let index = start as usize + i;
        match sectors.get_mut(index) {
            Some(slot @ None) => *slot = Some(data),
            Some(_) => {
                return Err(CfbError::InvalidData(format!(
                    "sector {} assigned twice",
                    index
                )));
            }
            None => {
                return Err(CfbError::InvalidData(format!(
                    "sector {} lies beyond the {} allocated sectors",
                    index,
                    sectors.len()
                )));
            }
        }
    }
    Ok(())
}
