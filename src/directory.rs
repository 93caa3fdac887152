//! Directory (property) tree: a flat array of fixed-size records encoding an
//! n-ary tree of storages and streams.
//!
//! Each storage's children form a binary search tree threaded through the
//! records' left/right sibling indexes, ordered by name length first and then
//! case-insensitive name. The record at index 0 is always the root entry; its
//! start-sector and size fields anchor the mini stream container.

use crate::consts::*;
use crate::error::{CfbError, Result};
use smallvec::SmallVec;
use std::cmp::Ordering;
use zerocopy::{FromBytes, LE, U16, U32, U64};
use zerocopy_derive::FromBytes as DeriveFromBytes;

/// Raw directory entry structure (128 bytes)
///
/// This represents the on-disk format of a directory entry.
#[derive(Debug, Clone, DeriveFromBytes)]
#[repr(C)]
struct RawDirectoryEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    /// Entry type (1 = storage, 2 = stream, 5 = root)
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    color: u8,
    /// Left sibling SID
    sid_left: U32<LE>,
    /// Right sibling SID
    sid_right: U32<LE>,
    /// Child SID
    sid_child: U32<LE>,
    /// CLSID (16 bytes)
    clsid: [u8; 16],
    /// State bits
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    creation_time: U64<LE>,
    /// Modified time (FILETIME)
    modified_time: U64<LE>,
    /// Starting sector
    start_sector: U32<LE>,
    /// Stream size
    stream_size: U64<LE>,
}

/// A parsed directory entry (stream or storage)
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Storage ID (index in the directory array)
    pub sid: u32,
    /// Entry name (UTF-16 decoded)
    pub name: String,
    /// Entry type (stream, storage, root, ...)
    pub entry_type: u8,
    /// Node color, structural bookkeeping only
    pub color: u8,
    /// Index of the left sibling
    pub sid_left: u32,
    /// Index of the right sibling
    pub sid_right: u32,
    /// Index of this storage's child subtree root
    pub sid_child: u32,
    /// CLSID formatted as `{XXXXXXXX-...}`, empty when all-zero
    pub clsid: String,
    /// State bits, carried but not interpreted
    pub state_bits: u32,
    /// Creation time (FILETIME), carried but not interpreted
    pub creation_time: u64,
    /// Modified time (FILETIME), carried but not interpreted
    pub modified_time: u64,
    /// First sector (or first mini sector for small streams)
    pub start_sector: u32,
    /// Stream size in bytes
    pub size: u64,
    /// Whether this stream lives in the mini stream
    pub is_minifat: bool,
}

impl DirectoryEntry {
    /// Whether this entry is a storage (the root counts)
    pub fn is_storage(&self) -> bool {
        self.entry_type == STGTY_STORAGE || self.entry_type == STGTY_ROOT
    }

    /// Whether this entry is a stream
    pub fn is_stream(&self) -> bool {
        self.entry_type == STGTY_STREAM
    }
}

/// Decode a UTF-16LE entry name
fn decode_name(bytes: &[u8]) -> String {
    let (decoded, _had_errors) = encoding_rs::UTF_16LE.decode_without_bom_handling(bytes);
    decoded.trim_end_matches('\0').to_string()
}

/// Format a CLSID as a human-readable string, empty when all-zero
fn format_clsid(bytes: &[u8; 16]) -> String {
    if bytes.iter().all(|&b| b == 0) {
        return String::new();
    }

    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        U32::<LE>::read_from_bytes(&bytes[0..4])
            .map(|v| v.get())
            .unwrap_or(0),
        U16::<LE>::read_from_bytes(&bytes[4..6])
            .map(|v| v.get())
            .unwrap_or(0),
        U16::<LE>::read_from_bytes(&bytes[6..8])
            .map(|v| v.get())
            .unwrap_or(0),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}

/// Check that a name is usable as a directory entry name
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CfbError::InvalidData("empty entry name".to_string()));
    }
    if name.encode_utf16().count() > MAX_NAME_LEN {
        return Err(CfbError::InvalidFormat(format!(
            "entry name '{}' exceeds {} UTF-16 code units",
            name, MAX_NAME_LEN
        )));
    }
    Ok(())
}

/// Sibling ordering: name length in UTF-16 code units first, then the names
/// themselves, case-insensitively
pub fn name_cmp(a: &str, b: &str) -> Ordering {
    let len_a = a.encode_utf16().count();
    let len_b = b.encode_utf16().count();
    match len_a.cmp(&len_b) {
        Ordering::Equal => a.to_uppercase().cmp(&b.to_uppercase()),
        other => other,
    }
}

/// Parse one 128-byte directory record.
///
/// `wide_sizes` selects whether the full 64-bit size field is trusted; for
/// 512-byte-sector files only the low 32 bits are authoritative.
pub fn parse_entry(data: &[u8], sid: u32, cutoff: u32, wide_sizes: bool) -> Result<DirectoryEntry> {
    let raw = RawDirectoryEntry::read_from_bytes(data)
        .map_err(|_| CfbError::InvalidFormat("directory entry requires 128 bytes".to_string()))?;

    let name_len = raw.name_len.get() as usize;
    let name_bytes = &raw.name[0..name_len.saturating_sub(2).min(64)];
    let name = decode_name(name_bytes);

    let size = if wide_sizes {
        raw.stream_size.get()
    } else {
        raw.stream_size.get() & 0xFFFFFFFF
    };

    let is_minifat = raw.entry_type == STGTY_STREAM && size < cutoff as u64;

    Ok(DirectoryEntry {
        sid,
        name,
        entry_type: raw.entry_type,
        color: raw.color,
        sid_left: raw.sid_left.get(),
        sid_right: raw.sid_right.get(),
        sid_child: raw.sid_child.get(),
        clsid: format_clsid(&raw.clsid),
        state_bits: raw.state_bits.get(),
        creation_time: raw.creation_time.get(),
        modified_time: raw.modified_time.get(),
        start_sector: raw.start_sector.get(),
        size,
        is_minifat,
    })
}

/// Parse a whole directory stream into an array indexed by SID.
///
/// All-zero (unused) records come back as `None`; tree walks treat them as
/// "no entry".
pub fn parse_directory_stream(
    data: &[u8],
    cutoff: u32,
    wide_sizes: bool,
) -> Result<Vec<Option<DirectoryEntry>>> {
    let mut entries = Vec::with_capacity(data.len() / DIRENTRY_SIZE);
    for (sid, record) in data.chunks_exact(DIRENTRY_SIZE).enumerate() {
        let entry = parse_entry(record, sid as u32, cutoff, wide_sizes)?;
        if entry.entry_type == STGTY_EMPTY {
            entries.push(None);
        } else {
            entries.push(Some(entry));
        }
    }
    Ok(entries)
}

/// Binary search for `name` among the siblings rooted at `sid`.
///
/// Returns the matching SID, or `None` when the name is absent or a sibling
/// link points outside the directory.
pub fn find_child(entries: &[Option<DirectoryEntry>], mut sid: u32, name: &str) -> Option<u32> {
    let mut steps = 0;
    while sid != NOSTREAM {
        // corrupt sibling links must not hang the lookup
        steps += 1;
        if steps > entries.len() {
            return None;
        }

        let entry = entries.get(sid as usize)?.as_ref()?;
        match name_cmp(name, &entry.name) {
            Ordering::Equal => return Some(sid),
            Ordering::Less => sid = entry.sid_left,
            Ordering::Greater => sid = entry.sid_right,
        }
    }
    None
}

/// A staged directory entry on the write path
#[derive(Debug, Clone)]
struct TreeEntry {
    name: String,
    entry_type: u8,
    start_sector: u32,
    size: u64,
    clsid: [u8; 16],
    sid_left: u32,
    sid_right: u32,
    sid_child: u32,
    removed: bool,
}

impl TreeEntry {
    fn new(name: String, entry_type: u8) -> Self {
        TreeEntry {
            name,
            entry_type,
            start_sector: ENDOFCHAIN,
            size: 0,
            clsid: [0; 16],
            sid_left: NOSTREAM,
            sid_right: NOSTREAM,
            sid_child: NOSTREAM,
            removed: false,
        }
    }

    /// Serialize this entry into its 128-byte on-disk record
    fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        let mut data = [0u8; DIRENTRY_SIZE];
        if self.removed {
            // unused records are all-zero
            return data;
        }

        let utf16: Vec<u16> = self.name.encode_utf16().collect();
        let name_len = utf16.len().min(MAX_NAME_LEN);
        for (i, &ch) in utf16.iter().take(name_len).enumerate() {
            let bytes = ch.to_le_bytes();
            data[i * 2] = bytes[0];
            data[i * 2 + 1] = bytes[1];
        }

        // name length in bytes, including the null terminator
        let name_len_bytes = ((name_len + 1) * 2) as u16;
        data[64..66].copy_from_slice(&name_len_bytes.to_le_bytes());

        data[66] = self.entry_type;
        // always black; readers only use the links
        data[67] = 1;

        data[68..72].copy_from_slice(&self.sid_left.to_le_bytes());
        data[72..76].copy_from_slice(&self.sid_right.to_le_bytes());
        data[76..80].copy_from_slice(&self.sid_child.to_le_bytes());
        data[80..96].copy_from_slice(&self.clsid);
        // state bits and timestamps stay zero
        data[116..120].copy_from_slice(&self.start_sector.to_le_bytes());
        data[120..128].copy_from_slice(&self.size.to_le_bytes());

        data
    }
}

/// Directory tree builder for the save path.
///
/// Entries are stored in a flat arena indexed by SID; each storage keeps its
/// children as a list sorted by [`name_cmp`], and the sibling links are
/// rebuilt from those lists as balanced binary search trees when the tree is
/// serialized.
#[derive(Debug)]
pub struct DirectoryTree {
    entries: Vec<TreeEntry>,
    children: Vec<SmallVec<[u32; 8]>>,
}

impl DirectoryTree {
    /// Create a tree holding only the root entry
    pub fn new() -> Self {
        DirectoryTree {
            entries: vec![TreeEntry::new(ROOT_ENTRY_NAME.to_string(), STGTY_ROOT)],
            children: vec![SmallVec::new()],
        }
    }

    /// Set the root entry's CLSID
    pub fn set_root_clsid(&mut self, clsid: [u8; 16]) {
        self.entries[0].clsid = clsid;
    }

    /// Anchor the mini stream: the root entry's start sector is the
    /// container's first big sector and its size the container byte length
    pub fn set_root_stream(&mut self, start_sector: u32, size: u64) {
        self.entries[0].start_sector = start_sector;
        self.entries[0].size = size;
    }

    /// Position of `name` in a parent's sorted child list
    fn child_slot(&self, parent: u32, name: &str) -> std::result::Result<usize, usize> {
        self.children[parent as usize]
            .binary_search_by(|&sid| name_cmp(&self.entries[sid as usize].name, name))
    }

    /// SID of the named child of `parent`, if present
    fn child_named(&self, parent: u32, name: &str) -> Option<u32> {
        self.child_slot(parent, name)
            .ok()
            .map(|slot| self.children[parent as usize][slot])
    }

    /// Look up the SID at a path of storage/stream names
    pub fn lookup(&self, path: &[&str]) -> Option<u32> {
        let mut sid = 0u32;
        for component in path {
            sid = self.child_named(sid, component)?;
        }
        Some(sid)
    }

    fn insert_child(&mut self, parent: u32, entry: TreeEntry) -> u32 {
        let slot = match self.child_slot(parent, &entry.name) {
            Ok(existing) => return self.children[parent as usize][existing],
            Err(slot) => slot,
        };
        let sid = self.entries.len() as u32;
        self.entries.push(entry);
        self.children.push(SmallVec::new());
        self.children[parent as usize].insert(slot, sid);
        sid
    }

    /// Ensure every storage along `path` exists, creating missing ones;
    /// returns the SID of the final component.
    pub fn insert_storage(&mut self, path: &[&str]) -> Result<u32> {
        let mut parent = 0u32;
        for component in path {
            validate_name(component)?;
            match self.child_named(parent, component) {
                Some(sid) => {
                    if !self.is_storage_sid(sid) {
                        return Err(CfbError::NotStorage);
                    }
                    parent = sid;
                }
                None => {
                    parent =
                        self.insert_child(parent, TreeEntry::new(component.to_string(), STGTY_STORAGE));
                }
            }
        }
        Ok(parent)
    }

    /// Insert a stream entry at `path`, creating parent storages as needed.
    ///
    /// An existing stream of the same name has its start sector and size
    /// replaced.
    pub fn insert_stream(&mut self, path: &[&str], start_sector: u32, size: u64) -> Result<u32> {
        let (name, parents) = path
            .split_last()
            .ok_or_else(|| CfbError::InvalidData("empty stream path".to_string()))?;
        validate_name(name)?;

        let parent = self.insert_storage(parents)?;
        if let Some(existing) = self.child_named(parent, name) {
            let entry = &mut self.entries[existing as usize];
            if entry.entry_type != STGTY_STREAM {
                return Err(CfbError::NotStream);
            }
            entry.start_sector = start_sector;
            entry.size = size;
            return Ok(existing);
        }

        let mut entry = TreeEntry::new(name.to_string(), STGTY_STREAM);
        entry.start_sector = start_sector;
        entry.size = size;
        Ok(self.insert_child(parent, entry))
    }

    fn is_storage_sid(&self, sid: u32) -> bool {
        let t = self.entries[sid as usize].entry_type;
        t == STGTY_STORAGE || t == STGTY_ROOT
    }

    /// Remove the entry at `path`.
    ///
    /// A storage can only be removed once its subtree is empty; use
    /// [`DirectoryTree::remove_recursive`] to tear a subtree down.
    pub fn remove(&mut self, path: &[&str]) -> Result<()> {
        let (name, parents) = path
            .split_last()
            .ok_or_else(|| CfbError::InvalidData("cannot remove the root entry".to_string()))?;
        let parent = match self.lookup(parents) {
            Some(sid) => sid,
            None => return Err(CfbError::StreamNotFound),
        };

        let slot = match self.child_slot(parent, name) {
            Ok(slot) => slot,
            Err(_) => return Err(CfbError::StreamNotFound),
        };
        let sid = self.children[parent as usize][slot];
        if !self.children[sid as usize].is_empty() {
            return Err(CfbError::StorageNotEmpty);
        }

        self.children[parent as usize].remove(slot);
        self.entries[sid as usize].removed = true;
        Ok(())
    }

    /// Remove the entry at `path` together with its whole subtree
    pub fn remove_recursive(&mut self, path: &[&str]) -> Result<()> {
        let sid = self.lookup(path).ok_or(CfbError::StreamNotFound)?;
        let children: Vec<String> = self.children[sid as usize]
            .iter()
            .map(|&c| self.entries[c as usize].name.clone())
            .collect();
        for child in &children {
            let mut sub: Vec<&str> = path.to_vec();
            sub.push(child.as_str());
            self.remove_recursive(&sub)?;
        }
        self.remove(path)
    }

    /// Number of entry slots in the arena (removed entries included)
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Rebuild every storage's sibling links as a balanced binary search
    /// tree over its sorted child list
    fn link_siblings(&mut self) {
        for sid in 0..self.entries.len() {
            let children = self.children[sid].clone();
            let root = self.link_range(&children);
            self.entries[sid].sid_child = root;
        }
    }

    fn link_range(&mut self, sorted: &[u32]) -> u32 {
        if sorted.is_empty() {
            return NOSTREAM;
        }
        let mid = sorted.len() / 2;
        let sid = sorted[mid];
        let left = self.link_range(&sorted[..mid]);
        let right = self.link_range(&sorted[mid + 1..]);
        let entry = &mut self.entries[sid as usize];
        entry.sid_left = left;
        entry.sid_right = right;
        sid
    }

    /// Serialize the directory into whole sectors.
    ///
    /// Output length is `ceil(N / (sectorSize/128)) * sectorSize`; trailing
    /// slots beyond the last entry are all-zero records.
    pub fn serialize(&mut self, sector_size: usize) -> Vec<u8> {
        self.link_siblings();

        let entries_per_sector = sector_size / DIRENTRY_SIZE;
        let sectors = self.entries.len().div_ceil(entries_per_sector).max(1);

        let mut data = vec![0u8; sectors * sector_size];
        for (i, entry) in self.entries.iter().enumerate() {
            let offset = i * DIRENTRY_SIZE;
            data[offset..offset + DIRENTRY_SIZE].copy_from_slice(&entry.to_bytes());
        }
        data
    }
}

impl Default for DirectoryTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_cmp_orders_by_length_then_name() {
        assert_eq!(name_cmp("Data", "1Table"), Ordering::Less);
        assert_eq!(name_cmp("1Table", "WordDocument"), Ordering::Less);
        assert_eq!(name_cmp("abc", "ABD"), Ordering::Less);
        assert_eq!(name_cmp("abc", "ABC"), Ordering::Equal);
    }

    #[test]
    fn test_entry_round_trip() {
        let mut tree = DirectoryTree::new();
        tree.insert_stream(&["Example"], 7, 1234).unwrap();
        let data = tree.serialize(512);

        let entries = parse_directory_stream(&data, 4096, false).unwrap();
        let root = entries[0].as_ref().unwrap();
        assert_eq!(root.name, ROOT_ENTRY_NAME);
        assert_eq!(root.entry_type, STGTY_ROOT);

        let sid = find_child(&entries, root.sid_child, "Example").unwrap();
        let entry = entries[sid as usize].as_ref().unwrap();
        assert_eq!(entry.name, "Example");
        assert_eq!(entry.start_sector, 7);
        assert_eq!(entry.size, 1234);
        assert!(entry.is_minifat);
    }

    #[test]
    fn test_serialize_pads_with_zeroed_records() {
        let mut tree = DirectoryTree::new();
        tree.insert_stream(&["A"], 0, 1).unwrap();
        let data = tree.serialize(512);

        assert_eq!(data.len(), 512);
        // two entries used, two zeroed tail slots
        assert!(data[2 * DIRENTRY_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_serialize_length_grows_by_sector() {
        let mut tree = DirectoryTree::new();
        for i in 0..4 {
            tree.insert_stream(&[format!("S{}", i).as_str()], 0, 1).unwrap();
        }
        // 5 entries no longer fit one 512-byte sector
        assert_eq!(tree.serialize(512).len(), 1024);
    }

    #[test]
    fn test_lookup_nested() {
        let mut tree = DirectoryTree::new();
        tree.insert_stream(&["Storage", "Inner"], 3, 10).unwrap();
        assert!(tree.lookup(&["Storage"]).is_some());
        assert!(tree.lookup(&["Storage", "Inner"]).is_some());
        assert!(tree.lookup(&["Storage", "Missing"]).is_none());
    }

    #[test]
    fn test_insert_replaces_existing_stream() {
        let mut tree = DirectoryTree::new();
        let a = tree.insert_stream(&["S"], 1, 10).unwrap();
        let b = tree.insert_stream(&["S"], 9, 20).unwrap();
        assert_eq!(a, b);
        assert_eq!(tree.entries[a as usize].start_sector, 9);
        assert_eq!(tree.entries[a as usize].size, 20);
    }

    #[test]
    fn test_remove_storage_with_children_fails() {
        let mut tree = DirectoryTree::new();
        tree.insert_stream(&["Dir", "Leaf"], 0, 5).unwrap();

        assert!(matches!(
            tree.remove(&["Dir"]),
            Err(CfbError::StorageNotEmpty)
        ));
        tree.remove(&["Dir", "Leaf"]).unwrap();
        tree.remove(&["Dir"]).unwrap();
        assert!(tree.lookup(&["Dir"]).is_none());
    }

    #[test]
    fn test_remove_recursive() {
        let mut tree = DirectoryTree::new();
        tree.insert_stream(&["Dir", "A"], 0, 5).unwrap();
        tree.insert_stream(&["Dir", "Sub", "B"], 0, 5).unwrap();

        tree.remove_recursive(&["Dir"]).unwrap();
        assert!(tree.lookup(&["Dir"]).is_none());

        // removed slots serialize as all-zero records
        let data = tree.serialize(512);
        let entries = parse_directory_stream(&data, 4096, false).unwrap();
        assert!(entries[1..].iter().all(|e| e.is_none()));
    }

    #[test]
    fn test_removed_name_can_be_reinserted() {
        let mut tree = DirectoryTree::new();
        tree.insert_stream(&["S"], 1, 10).unwrap();
        tree.remove(&["S"]).unwrap();
        tree.insert_stream(&["S"], 2, 20).unwrap();
        let sid = tree.lookup(&["S"]).unwrap();
        assert_eq!(tree.entries[sid as usize].start_sector, 2);
    }

    #[test]
    fn test_bst_links_are_searchable() {
        let mut tree = DirectoryTree::new();
        let names = ["Alpha", "Beta", "Gamma", "Delta", "Ep", "Zz", "Q"];
        for name in names {
            tree.insert_stream(&[name], 0, 1).unwrap();
        }
        let data = tree.serialize(512);
        let entries = parse_directory_stream(&data, 4096, false).unwrap();
        let root_child = entries[0].as_ref().unwrap().sid_child;

        for name in names {
            let sid = find_child(&entries, root_child, name).expect(name);
            assert_eq!(entries[sid as usize].as_ref().unwrap().name, name);
        }
        assert!(find_child(&entries, root_child, "Missing").is_none());
    }

    #[test]
    fn test_long_name_rejected() {
        let mut tree = DirectoryTree::new();
        let long = "x".repeat(32);
        assert!(tree.insert_stream(&[long.as_str()], 0, 1).is_err());
        let ok = "x".repeat(31);
        assert!(tree.insert_stream(&[ok.as_str()], 0, 1).is_ok());
    }
}
