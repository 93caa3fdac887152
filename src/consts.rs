/// Magic bytes that should be at the beginning of every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the on-disk header data in bytes
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Default sector size for major version 3 (512 bytes)
pub const SECTOR_SIZE_V3: usize = 512;

/// Default sector size for major version 4 (4096 bytes)
pub const SECTOR_SIZE_V4: usize = 4096;

/// Default mini sector size (64 bytes)
pub const MINI_SECTOR_SIZE: usize = 64;

/// Default mini stream cutoff: streams below this size live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Number of allocation-table sector slots held inline in the header
pub const HEADER_FAT_SLOTS: usize = 109;

/// Mini sectors per regular 512-byte sector; the mini stream container is
/// padded to a whole multiple of this
pub const MINI_SECTORS_PER_SECTOR: usize = 8;

/// Fill byte for the unused tail of data and mini-stream sectors
pub const FILL_BYTE: u8 = 0xFF;

// Sector IDs (from AAF specifications)
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes an extension-table (DIFAT) sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs (from AAF specifications)
/// Maximum directory entry ID
pub const MAXREGSID: u32 = 0xFFFFFFFA; // -6
/// Unallocated directory entry
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage (from AAF specifications)
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is an ILockBytes object
pub const STGTY_LOCKBYTES: u8 = 3;
/// Element is an IPropertyStorage object
pub const STGTY_PROPERTY: u8 = 4;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

/// Name of the mandatory entry at directory index 0
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Maximum entry name length in UTF-16 code units (excluding the terminator)
pub const MAX_NAME_LEN: usize = 31;
