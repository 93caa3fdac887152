//! Compound file reader.
//!
//! Opening a container ingests the whole byte source, then resolves the
//! bootstrap structures in order: header, allocation table (inline slots
//! plus extension sectors), directory, mini allocation table and mini
//! stream, and finally every stream chain reachable from the root. Sectors
//! are claimed as chains are resolved, so a sector referenced by two chains
//! is reported as corruption instead of silently shared.
//!
//! Chain corruption in one stream does not poison the rest of the
//! container: the defect is recorded against that stream and returned when
//! it is opened, while other streams stay readable.

use crate::block::{self, Block};
use crate::consts::*;
use crate::directory::{self, DirectoryEntry};
use crate::error::{CfbError, ChainFault, Result, Warning};
use crate::fat::AllocationTable;
use crate::header::Header;
use crate::minifat;
use crate::sector::SectorStore;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Read;
use zerocopy::{FromBytes, LE, U32};

/// Check if a byte buffer starts with the compound file signature
pub fn is_cfb(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE && &data[0..8] == MAGIC
}

/// A chain defect recorded against one stream during open
#[derive(Debug, Clone, Copy)]
struct Defect {
    sector: u32,
    origin: u32,
    fault: ChainFault,
}

impl Defect {
    fn to_error(self) -> CfbError {
        CfbError::ChainCorruption {
            sector: self.sector,
            origin: self.origin,
            fault: self.fault,
        }
    }
}

/// An open compound file session.
///
/// The sector store, allocation table and directory are parsed once on open
/// and held immutable for the lifetime of the session; stream contents are
/// materialized eagerly and handed out as cheap [`Bytes`] clones.
#[derive(Debug)]
pub struct CfbFile {
    header: Header,
    store: SectorStore,
    entries: Vec<Option<DirectoryEntry>>,
    documents: HashMap<u32, Bytes>,
    defects: Vec<(u32, Vec<String>, Defect)>,
    warnings: Vec<Warning>,
}

impl CfbFile {
    /// Open a compound file, reading the source to its end first
    pub fn open<R: Read>(mut reader: R) -> Result<Self> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    /// Open a compound file from an in-memory image
    pub fn from_bytes(data: impl Into<Bytes>) -> Result<Self> {
        let data: Bytes = data.into();
        let header = Header::parse(&data)?;

        let sector_size = header.sector_size();
        let mini_sector_size = header.mini_sector_size();
        let cutoff = header.mini_stream_cutoff;
        let wide_sizes = sector_size != SECTOR_SIZE_V3;

        let image = if data.len() > sector_size {
            data.slice(sector_size..)
        } else {
            Bytes::new()
        };
        let mut store = SectorStore::load(image, sector_size);

        // Bootstrap the allocation table: inline slots first, then the
        // extension sector chain.
        let mut fat_sector_ids: Vec<u32> = header.inline_fat_sectors().collect();
        let mut difat_sector = header.first_difat_sector;
        for _ in 0..header.num_difat_sectors {
            if difat_sector == ENDOFCHAIN || difat_sector == FREESECT {
                break;
            }
            store.claim_single(difat_sector, header.first_difat_sector)?;
            let (ids, next) = read_extension_sector(
                store.sector(difat_sector).unwrap_or(&[]),
                sector_size,
            );
            fat_sector_ids.extend(ids);
            difat_sector = next;
        }

        for &id in &fat_sector_ids {
            store.claim_single(id, id)?;
        }
        let table =
            AllocationTable::from_sectors(fat_sector_ids.iter().filter_map(|&id| store.sector(id)));
        store.bind(table)?;

        // Directory sectors are resolved through the allocation table
        let dir_chain = store.claim_chain(header.first_dir_sector)?;
        let dir_data = chain_bytes(&store, &dir_chain);
        let entries = directory::parse_directory_stream(&dir_data, cutoff, wide_sizes)?;
        let root = match entries.first() {
            Some(Some(root)) if root.entry_type == STGTY_ROOT => root.clone(),
            _ => {
                return Err(CfbError::InvalidFormat(
                    "directory has no root entry".to_string(),
                ));
            }
        };

        // Mini allocation table and mini stream container. Corruption here
        // dooms only the small streams, so it is recorded instead of
        // propagated.
        let mut sbat = AllocationTable::default();
        let mut ministream = Vec::new();
        let mut mini_defect: Option<Defect> = None;

        if header.num_minifat_sectors > 0 && header.first_minifat_sector != ENDOFCHAIN {
            match store.claim_chain(header.first_minifat_sector) {
                Ok(chain) => sbat = AllocationTable::decode(&chain_bytes(&store, &chain)),
                Err(CfbError::ChainCorruption {
                    sector,
                    origin,
                    fault,
                }) => {
                    mini_defect = Some(Defect {
                        sector,
                        origin,
                        fault,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        if mini_defect.is_none() && root.start_sector != ENDOFCHAIN && root.size > 0 {
            match store.claim_chain(root.start_sector) {
                Ok(chain) => {
                    ministream = chain_bytes(&store, &chain);
                    ministream.truncate(root.size as usize);
                }
                Err(CfbError::ChainCorruption {
                    sector,
                    origin,
                    fault,
                }) => {
                    mini_defect = Some(Defect {
                        sector,
                        origin,
                        fault,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        // Walk the directory tree and materialize every reachable stream
        let mut documents = HashMap::new();
        let mut defects = Vec::new();
        let mut visited = vec![false; entries.len()];
        let mut stack: Vec<(u32, Vec<String>)> = vec![(root.sid_child, Vec::new())];

        while let Some((sid, path)) = stack.pop() {
            if sid == NOSTREAM || sid as usize >= entries.len() {
                continue;
            }
            if visited[sid as usize] {
                continue;
            }
            visited[sid as usize] = true;

            let Some(entry) = entries[sid as usize].as_ref() else {
                continue;
            };

            stack.push((entry.sid_left, path.clone()));
            stack.push((entry.sid_right, path.clone()));

            let mut full = path.clone();
            full.push(entry.name.clone());
            if entry.is_storage() {
                stack.push((entry.sid_child, full));
            } else if entry.is_stream() {
                match materialize_stream(
                    &mut store,
                    &sbat,
                    &ministream,
                    mini_defect,
                    entry,
                    mini_sector_size,
                ) {
                    Ok(bytes) => {
                        documents.insert(sid, bytes);
                    }
                    Err(CfbError::ChainCorruption {
                        sector,
                        origin,
                        fault,
                    }) => {
                        defects.push((
                            sid,
                            full,
                            Defect {
                                sector,
                                origin,
                                fault,
                            },
                        ));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let warnings = store.warnings().to_vec();

        Ok(CfbFile {
            header,
            store,
            entries,
            documents,
            defects,
            warnings,
        })
    }

    /// Sector size of this container in bytes
    pub fn sector_size(&self) -> usize {
        self.header.sector_size()
    }

    /// Total number of sectors in the store
    pub fn sector_count(&self) -> usize {
        self.store.sector_count()
    }

    /// The root directory entry
    pub fn root(&self) -> &DirectoryEntry {
        // presence was checked during open
        self.entries[0].as_ref().unwrap()
    }

    /// The root entry's name
    pub fn root_name(&self) -> &str {
        &self.root().name
    }

    /// Non-fatal conditions noticed while opening the container
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Streams whose chains were found corrupt at open, with the error
    /// that would be returned when opening them
    pub fn defects(&self) -> Vec<(Vec<String>, CfbError)> {
        self.defects
            .iter()
            .map(|(_, path, defect)| (path.clone(), defect.to_error()))
            .collect()
    }

    /// Find an entry by path, descending one sibling tree per component
    fn find_entry(&self, path: &[&str]) -> Result<&DirectoryEntry> {
        let mut entry = self.root();
        for component in path {
            if !entry.is_storage() {
                return Err(CfbError::NotStorage);
            }
            let sid = directory::find_child(&self.entries, entry.sid_child, component)
                .ok_or(CfbError::StreamNotFound)?;
            entry = self.entries[sid as usize]
                .as_ref()
                .ok_or(CfbError::StreamNotFound)?;
        }
        Ok(entry)
    }

    /// Look up the directory entry at a path; an empty path is the root
    pub fn entry(&self, path: &[&str]) -> Result<&DirectoryEntry> {
        self.find_entry(path)
    }

    /// Open a stream by path and return its contents.
    ///
    /// Streams whose chains were found corrupt at open return the recorded
    /// corruption error; unrelated streams are unaffected.
    pub fn open_stream(&self, path: &[&str]) -> Result<Bytes> {
        let entry = self.find_entry(path)?;
        if !entry.is_stream() {
            return Err(CfbError::NotStream);
        }

        if let Some(bytes) = self.documents.get(&entry.sid) {
            return Ok(bytes.clone());
        }
        if let Some((_, _, defect)) = self.defects.iter().find(|(sid, _, _)| *sid == entry.sid) {
            return Err(defect.to_error());
        }
        Err(CfbError::StreamNotFound)
    }

    /// Check if an entry exists at the given path
    pub fn exists(&self, path: &[&str]) -> bool {
        self.find_entry(path).is_ok()
    }

    /// Check if a storage exists at the given path
    pub fn storage_exists(&self, path: &[&str]) -> bool {
        self.find_entry(path).map(|e| e.is_storage()).unwrap_or(false)
    }

    /// List all entries directly under a storage, in sibling order
    pub fn list_entries(&self, path: &[&str]) -> Result<Vec<DirectoryEntry>> {
        let entry = self.find_entry(path)?;
        if !entry.is_storage() {
            return Err(CfbError::NotStorage);
        }

        let mut out = Vec::new();
        self.collect_in_order(entry.sid_child, &mut out, 0);
        Ok(out)
    }

    fn collect_in_order(&self, sid: u32, out: &mut Vec<DirectoryEntry>, depth: usize) {
        // corrupt sibling links must not recurse forever
        if sid == NOSTREAM || sid as usize >= self.entries.len() || depth > self.entries.len() {
            return;
        }
        if let Some(entry) = self.entries[sid as usize].as_ref() {
            self.collect_in_order(entry.sid_left, out, depth + 1);
            out.push(entry.clone());
            self.collect_in_order(entry.sid_right, out, depth + 1);
        }
    }

    /// List the paths of all streams in the container
    pub fn list_streams(&self) -> Vec<Vec<String>> {
        let mut streams = Vec::new();
        self.collect_streams(self.root().sid_child, &Vec::new(), &mut streams, 0);
        streams
    }

    fn collect_streams(
        &self,
        sid: u32,
        path: &Vec<String>,
        streams: &mut Vec<Vec<String>>,
        depth: usize,
    ) {
        if sid == NOSTREAM || sid as usize >= self.entries.len() || depth > self.entries.len() {
            return;
        }
        if let Some(entry) = self.entries[sid as usize].as_ref() {
            self.collect_streams(entry.sid_left, path, streams, depth + 1);

            let mut full = path.clone();
            full.push(entry.name.clone());
            if entry.is_stream() {
                streams.push(full);
            } else if entry.is_storage() {
                self.collect_streams(entry.sid_child, &full, streams, depth + 1);
            }

            self.collect_streams(entry.sid_right, path, streams, depth + 1);
        }
    }
}

/// Concatenate the raw bytes of a claimed chain; a short final sector
/// contributes its actual bytes
fn chain_bytes(store: &SectorStore, chain: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(chain.len() * store.sector_size());
    for &sector in chain {
        if let Some(slice) = store.sector(sector) {
            out.extend_from_slice(slice);
        }
    }
    out
}

/// Parse one extension-table sector: up to `sectorSize/4 - 1` table-sector
/// indexes plus the trailing pointer to the next extension sector
fn read_extension_sector(data: &[u8], sector_size: usize) -> (Vec<u32>, u32) {
    let ids_per_sector = sector_size / 4 - 1;

    let mut ids = Vec::new();
    for i in 0..ids_per_sector {
        let offset = i * 4;
        if offset + 4 > data.len() {
            break;
        }
        let id = U32::<LE>::read_from_bytes(&data[offset..offset + 4])
            .map(|v| v.get())
            .unwrap_or(FREESECT);
        if id == FREESECT || id == ENDOFCHAIN {
            break;
        }
        ids.push(id);
    }

    let next_offset = sector_size - 4;
    let next = if next_offset + 4 <= data.len() {
        U32::<LE>::read_from_bytes(&data[next_offset..next_offset + 4])
            .map(|v| v.get())
            .unwrap_or(ENDOFCHAIN)
    } else {
        ENDOFCHAIN
    };

    (ids, next)
}

/// Resolve, claim and read one stream's contents
fn materialize_stream(
    store: &mut SectorStore,
    sbat: &AllocationTable,
    ministream: &[u8],
    mini_defect: Option<Defect>,
    entry: &DirectoryEntry,
    mini_sector_size: usize,
) -> Result<Bytes> {
    if entry.size == 0 || entry.start_sector == ENDOFCHAIN {
        return Ok(Bytes::new());
    }

    if entry.is_minifat {
        if let Some(defect) = mini_defect {
            return Err(defect.to_error());
        }
        let data = minifat::read_mini_chain(
            sbat,
            ministream,
            entry.start_sector,
            entry.size as usize,
            mini_sector_size,
        )?;
        return Ok(Bytes::from(data));
    }

    let chain = store.claim_chain(entry.start_sector)?;
    let sector_size = store.sector_size();
    let blocks: Vec<Block> = chain
        .iter()
        .filter_map(|&sector| store.sector(sector))
        .map(|slice| Block::from_slice(slice, sector_size))
        .collect();

    // a truncated final sector may leave fewer bytes than the declared size
    let take = (entry.size as usize).min(block::size_of(blocks.len(), sector_size));
    let mut out = vec![0u8; take];
    block::read_from_blocks(&blocks, &mut out, 0)?;
    Ok(Bytes::from(out))
}
