//! Compound file header (the superblock occupying the first sector).
//!
//! The header carries the format version, sector-size exponents and the
//! pointers needed to bootstrap the allocation tables and the directory,
//! plus the 109 inline allocation-table sector slots. Only the 8-byte
//! signature and the byte-order mark are hard requirements on read;
//! referential integrity is checked later when chains are walked.

use crate::consts::*;
use crate::error::{CfbError, Result};
use zerocopy::{FromBytes, LE, U16, U32};

/// Parsed compound file header.
///
/// Round-trips through [`Header::parse`] / [`Header::serialize`]: serializing
/// and re-parsing a header returns the identical pointer values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Minor version (written as 0x003B)
    pub minor_version: u16,
    /// Major version: 3 for 512-byte sectors, 4 for 4096-byte sectors
    pub major_version: u16,
    /// Sector size exponent (9 or 12)
    pub sector_shift: u16,
    /// Mini sector size exponent (6)
    pub mini_sector_shift: u16,
    /// Directory sector count; 0 for major version 3
    pub num_dir_sectors: u32,
    /// Allocation-table sector count
    pub num_fat_sectors: u32,
    /// First directory sector, or `ENDOFCHAIN` if none yet
    pub first_dir_sector: u32,
    /// Transaction signature, carried but not interpreted
    pub transaction_signature: u32,
    /// Streams below this byte size live in the mini stream
    pub mini_stream_cutoff: u32,
    /// First mini-allocation-table sector, or `ENDOFCHAIN`
    pub first_minifat_sector: u32,
    /// Mini-allocation-table sector count
    pub num_minifat_sectors: u32,
    /// First extension-table sector, or `ENDOFCHAIN`
    pub first_difat_sector: u32,
    /// Extension-table sector count
    pub num_difat_sectors: u32,
    /// Inline allocation-table sector slots; unused entries are `FREESECT`
    pub difat: [u32; HEADER_FAT_SLOTS],
}

#[inline]
fn u16_at(data: &[u8], offset: usize) -> u16 {
    U16::<LE>::read_from_bytes(&data[offset..offset + 2])
        .map(|v| v.get())
        .unwrap_or(0)
}

#[inline]
fn u32_at(data: &[u8], offset: usize) -> u32 {
    U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .unwrap_or(0)
}

impl Header {
    /// Create a header with the default values this implementation writes.
    ///
    /// # Panics
    ///
    /// Panics if `sector_size` is not 512 or 4096.
    pub fn new(sector_size: usize) -> Self {
        assert!(
            sector_size == SECTOR_SIZE_V3 || sector_size == SECTOR_SIZE_V4,
            "Sector size must be 512 or 4096"
        );

        Header {
            minor_version: 0x003B,
            major_version: if sector_size == SECTOR_SIZE_V3 { 3 } else { 4 },
            sector_shift: if sector_size == SECTOR_SIZE_V3 { 9 } else { 12 },
            mini_sector_shift: 6,
            num_dir_sectors: 0,
            num_fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            transaction_signature: 0,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            first_minifat_sector: ENDOFCHAIN,
            num_minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_FAT_SLOTS],
        }
    }

    /// Parse a header from the first sector of a container.
    ///
    /// Validates the magic bytes, the byte-order mark at offset 28 and the
    /// sector-size exponent; all pointer fields are taken as-is.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(CfbError::InvalidFormat(format!(
                "header requires {} bytes, got {}",
                HEADER_SIZE,
                data.len()
            )));
        }

        if &data[0..8] != MAGIC {
            return Err(CfbError::InvalidFormat(
                "missing compound file signature".to_string(),
            ));
        }

        let byte_order = u16_at(data, 28);
        if byte_order != 0xFFFE {
            return Err(CfbError::InvalidFormat(format!(
                "invalid byte order mark 0x{:04X}",
                byte_order
            )));
        }

        let sector_shift = u16_at(data, 30);
        if !(7..=12).contains(&sector_shift) {
            return Err(CfbError::InvalidFormat(format!(
                "unsupported sector shift {}",
                sector_shift
            )));
        }

        let mut difat = [FREESECT; HEADER_FAT_SLOTS];
        for (i, slot) in difat.iter_mut().enumerate() {
            *slot = u32_at(data, 76 + i * 4);
        }

        Ok(Header {
            minor_version: u16_at(data, 24),
            major_version: u16_at(data, 26),
            sector_shift,
            mini_sector_shift: u16_at(data, 32),
            num_dir_sectors: u32_at(data, 40),
            num_fat_sectors: u32_at(data, 44),
            first_dir_sector: u32_at(data, 48),
            transaction_signature: u32_at(data, 52),
            mini_stream_cutoff: u32_at(data, 56),
            first_minifat_sector: u32_at(data, 60),
            num_minifat_sectors: u32_at(data, 64),
            first_difat_sector: u32_at(data, 68),
            num_difat_sectors: u32_at(data, 72),
            difat,
        })
    }

    /// Serialize into a full first sector.
    ///
    /// The on-disk header data is 512 bytes; for 4096-byte sectors the first
    /// sector spans 4096 bytes and the remainder is zero-filled. Unused
    /// inline slots are written as `FREESECT`.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.sector_size()];

        out[0..8].copy_from_slice(MAGIC);
        // CLSID at 8..24 stays zero
        out[24..26].copy_from_slice(&self.minor_version.to_le_bytes());
        out[26..28].copy_from_slice(&self.major_version.to_le_bytes());
        out[28..30].copy_from_slice(&0xFFFEu16.to_le_bytes());
        out[30..32].copy_from_slice(&self.sector_shift.to_le_bytes());
        out[32..34].copy_from_slice(&self.mini_sector_shift.to_le_bytes());
        // reserved 34..40 stays zero
        out[40..44].copy_from_slice(&self.num_dir_sectors.to_le_bytes());
        out[44..48].copy_from_slice(&self.num_fat_sectors.to_le_bytes());
        out[48..52].copy_from_slice(&self.first_dir_sector.to_le_bytes());
        out[52..56].copy_from_slice(&self.transaction_signature.to_le_bytes());
        out[56..60].copy_from_slice(&self.mini_stream_cutoff.to_le_bytes());
        out[60..64].copy_from_slice(&self.first_minifat_sector.to_le_bytes());
        out[64..68].copy_from_slice(&self.num_minifat_sectors.to_le_bytes());
        out[68..72].copy_from_slice(&self.first_difat_sector.to_le_bytes());
        out[72..76].copy_from_slice(&self.num_difat_sectors.to_le_bytes());

        for (i, &slot) in self.difat.iter().enumerate() {
            let offset = 76 + i * 4;
            out[offset..offset + 4].copy_from_slice(&slot.to_le_bytes());
        }

        out
    }

    /// Sector size in bytes derived from the sector-size exponent
    #[inline]
    pub fn sector_size(&self) -> usize {
        1usize << self.sector_shift
    }

    /// Mini sector size in bytes derived from the mini-sector exponent
    #[inline]
    pub fn mini_sector_size(&self) -> usize {
        1usize << self.mini_sector_shift
    }

    /// Record the allocation-table sector locations.
    ///
    /// The first 109 sectors of the table go into the inline slots; the rest
    /// must be listed in extension-table sectors and are returned for the
    /// extension builder to serialize separately. The table sectors are
    /// `first_sector..first_sector + count`.
    pub fn assign_fat_sectors(&mut self, count: u32, first_sector: u32) -> Result<Vec<u32>> {
        let end = first_sector.checked_add(count).ok_or_else(|| {
            CfbError::InvalidData(format!(
                "allocation table of {} sectors at {} exceeds the sector index space",
                count, first_sector
            ))
        })?;
        if end > MAXREGSECT {
            return Err(CfbError::InvalidData(format!(
                "allocation table of {} sectors at {} exceeds the sector index space",
                count, first_sector
            )));
        }

        self.num_fat_sectors = count;
        self.difat = [FREESECT; HEADER_FAT_SLOTS];

        let inline = (count as usize).min(HEADER_FAT_SLOTS);
        for (i, slot) in self.difat.iter_mut().take(inline).enumerate() {
            *slot = first_sector + i as u32;
        }

        let overflow = (first_sector + inline as u32..end).collect();
        Ok(overflow)
    }

    /// Inline allocation-table sector indexes, in order, stopping at the
    /// first unused slot
    pub fn inline_fat_sectors(&self) -> impl Iterator<Item = u32> + '_ {
        self.difat
            .iter()
            .copied()
            .take_while(|&s| s != FREESECT && s != ENDOFCHAIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_defaults() {
        let header = Header::new(512);
        assert_eq!(header.minor_version, 0x003B);
        assert_eq!(header.major_version, 3);
        assert_eq!(header.sector_shift, 9);
        assert_eq!(header.sector_size(), 512);
        assert_eq!(header.mini_sector_size(), 64);
        assert_eq!(header.mini_stream_cutoff, 4096);
        assert_eq!(header.first_dir_sector, ENDOFCHAIN);
        assert!(header.difat.iter().all(|&s| s == FREESECT));
    }

    #[test]
    fn test_serialize_layout() {
        let mut header = Header::new(512);
        header.first_dir_sector = 10;
        let data = header.serialize();

        assert_eq!(data.len(), 512);
        assert_eq!(&data[0..8], MAGIC);
        assert_eq!(&data[28..30], &0xFFFEu16.to_le_bytes());
        assert_eq!(&data[24..26], &0x003Bu16.to_le_bytes());
        assert_eq!(&data[48..52], &10u32.to_le_bytes());
        // unused inline slots are FREESECT
        assert_eq!(&data[76..80], &FREESECT.to_le_bytes());
        assert_eq!(&data[508..512], &FREESECT.to_le_bytes());
    }

    #[test]
    fn test_serialize_4096() {
        let header = Header::new(4096);
        let data = header.serialize();
        assert_eq!(data.len(), 4096);
        assert_eq!(&data[26..28], &4u16.to_le_bytes());
        assert_eq!(&data[30..32], &12u16.to_le_bytes());
    }

    #[test]
    fn test_parse_rejects_short_input() {
        assert!(matches!(
            Header::parse(&[0u8; 100]),
            Err(CfbError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_signature() {
        let data = vec![0u8; 512];
        assert!(matches!(
            Header::parse(&data),
            Err(CfbError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_byte_order() {
        let mut data = Header::new(512).serialize();
        data[28] = 0xFF;
        data[29] = 0xFF;
        assert!(matches!(
            Header::parse(&data),
            Err(CfbError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_parse_rejects_bad_sector_shift() {
        let mut data = Header::new(512).serialize();
        data[30..32].copy_from_slice(&15u16.to_le_bytes());
        assert!(matches!(
            Header::parse(&data),
            Err(CfbError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_round_trip() {
        let mut header = Header::new(512);
        header.first_dir_sector = 42;
        header.first_minifat_sector = 7;
        header.num_minifat_sectors = 2;
        header.first_difat_sector = 99;
        header.num_difat_sectors = 1;
        header.difat[0] = 3;
        header.difat[108] = 1000;

        let parsed = Header::parse(&header.serialize()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_assign_fat_sectors_inline_only() {
        let mut header = Header::new(512);
        let overflow = header.assign_fat_sectors(3, 5).unwrap();
        assert!(overflow.is_empty());
        assert_eq!(header.num_fat_sectors, 3);
        assert_eq!(header.difat[0], 5);
        assert_eq!(header.difat[2], 7);
        assert_eq!(header.difat[3], FREESECT);
        assert_eq!(header.inline_fat_sectors().collect::<Vec<_>>(), vec![5, 6, 7]);
    }

    #[test]
    fn test_assign_fat_sectors_overflow() {
        let mut header = Header::new(512);
        let overflow = header.assign_fat_sectors(120, 0).unwrap();
        assert_eq!(header.difat[108], 108);
        assert_eq!(overflow, (109..120).collect::<Vec<u32>>());
    }

    #[test]
    fn test_assign_fat_sectors_overflowing_index_space() {
        let mut header = Header::new(512);
        assert!(header.assign_fat_sectors(10, MAXREGSECT).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_pointer_round_trip(
                dir in 0u32..MAXREGSECT,
                minifat in 0u32..MAXREGSECT,
                difat in 0u32..MAXREGSECT,
                cutoff in 0u32..u32::MAX,
            ) {
                let mut header = Header::new(512);
                header.first_dir_sector = dir;
                header.first_minifat_sector = minifat;
                header.first_difat_sector = difat;
                header.mini_stream_cutoff = cutoff;

                let parsed = Header::parse(&header.serialize()).unwrap();
                prop_assert_eq!(parsed.first_dir_sector, dir);
                prop_assert_eq!(parsed.first_minifat_sector, minifat);
                prop_assert_eq!(parsed.first_difat_sector, difat);
                prop_assert_eq!(parsed.mini_stream_cutoff, cutoff);
            }
        }
    }
}
