//! Integration tests for the compound file writer.
//!
//! These tests verify that written containers can be read back by the
//! reader, byte layouts land where the format says they must, and corrupt
//! or truncated input degrades the way the error model promises.

use super::core::CfbWriter;
use crate::consts::*;
use crate::error::{CfbError, ChainFault, Warning};
use crate::file::CfbFile;

fn write_to_vec(writer: &mut CfbWriter) -> Vec<u8> {
    let mut buffer = Vec::new();
    writer.write_to(&mut buffer).unwrap();
    buffer
}

#[test]
fn test_write_simple_container() {
    let mut writer = CfbWriter::new();
    writer
        .create_stream(&["TestStream"], b"Hello, World!")
        .unwrap();

    let data = write_to_vec(&mut writer);
    assert!(data.len() >= 1536); // header + directory + FAT at minimum
    assert_eq!(&data[0..8], b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1");

    let cfb = CfbFile::from_bytes(data).unwrap();
    assert_eq!(cfb.root_name(), ROOT_ENTRY_NAME);
    let stream = cfb.open_stream(&["TestStream"]).unwrap();
    assert_eq!(&stream[..], b"Hello, World!");
}

#[test]
fn test_write_multiple_streams() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Small1"], b"Small").unwrap();
    writer.create_stream(&["Small2"], b"Data").unwrap();
    writer
        .create_stream(&["Large1"], &vec![0xAAu8; 5000])
        .unwrap();
    writer
        .create_stream(&["Large2"], &vec![0xBBu8; 10000])
        .unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();

    assert_eq!(&cfb.open_stream(&["Small1"]).unwrap()[..], b"Small");
    assert_eq!(&cfb.open_stream(&["Small2"]).unwrap()[..], b"Data");

    let large1 = cfb.open_stream(&["Large1"]).unwrap();
    assert_eq!(large1.len(), 5000);
    assert!(large1.iter().all(|&b| b == 0xAA));

    let large2 = cfb.open_stream(&["Large2"]).unwrap();
    assert_eq!(large2.len(), 10000);
    assert!(large2.iter().all(|&b| b == 0xBB));
}

#[test]
fn test_write_empty_stream() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Empty"], b"").unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    assert_eq!(cfb.open_stream(&["Empty"]).unwrap().len(), 0);
}

#[test]
fn test_write_empty_container() {
    let mut writer = CfbWriter::new();
    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    assert!(cfb.list_streams().is_empty());
    assert!(cfb.warnings().is_empty());
}

#[test]
fn test_write_many_small_streams() {
    let mut writer = CfbWriter::new();
    for i in 0..10 {
        let name = format!("Stream{}", i);
        let data = vec![i as u8; 100 + i * 50];
        writer.create_stream(&[&name], &data).unwrap();
    }

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    for i in 0..10 {
        let name = format!("Stream{}", i);
        let data = cfb.open_stream(&[&name]).unwrap();
        assert_eq!(data.len(), 100 + i * 50);
        assert!(data.iter().all(|&b| b == i as u8));
    }
}

#[test]
fn test_write_large_stream() {
    let mut writer = CfbWriter::new();
    writer
        .create_stream(&["LargeStream"], &vec![0x42u8; 100_000])
        .unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    let data = cfb.open_stream(&["LargeStream"]).unwrap();
    assert_eq!(data.len(), 100_000);
    assert!(data.iter().all(|&b| b == 0x42));
}

#[test]
fn test_nested_storages() {
    let mut writer = CfbWriter::new();
    writer.create_storage(&["Outer"]).unwrap();
    writer
        .create_stream(&["Outer", "Inner", "Leaf"], b"nested")
        .unwrap();
    writer.create_stream(&["Outer", "Direct"], b"direct").unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    assert!(cfb.storage_exists(&["Outer"]));
    assert!(cfb.storage_exists(&["Outer", "Inner"]));
    assert!(!cfb.storage_exists(&["Outer", "Direct"]));

    assert_eq!(
        &cfb.open_stream(&["Outer", "Inner", "Leaf"]).unwrap()[..],
        b"nested"
    );
    assert_eq!(&cfb.open_stream(&["Outer", "Direct"]).unwrap()[..], b"direct");

    let entries = cfb.list_entries(&["Outer"]).unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Inner", "Direct"]); // length order: Inner(5), Direct(6)
}

#[test]
fn test_list_streams() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Stream1"], b"Data1").unwrap();
    writer.create_stream(&["Stream2"], b"Data2").unwrap();
    writer.create_stream(&["Dir", "Stream3"], b"Data3").unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    let streams = cfb.list_streams();
    assert_eq!(streams.len(), 3);
    assert!(streams.contains(&vec!["Stream1".to_string()]));
    assert!(streams.contains(&vec!["Stream2".to_string()]));
    assert!(streams.contains(&vec!["Dir".to_string(), "Stream3".to_string()]));
}

#[test]
fn test_update_and_delete_before_save() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Test"], b"Initial").unwrap();
    writer.update_stream(&["Test"], b"Updated").unwrap();
    writer.create_stream(&["Test2"], b"Data").unwrap();
    writer.delete_stream(&["Test"]).unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    assert!(cfb.open_stream(&["Test"]).is_err());
    assert_eq!(&cfb.open_stream(&["Test2"]).unwrap()[..], b"Data");
}

#[test]
fn test_write_sector_size_4096() {
    let mut writer = CfbWriter::with_sector_size(4096);
    writer.create_stream(&["Test"], b"Hello, 4096!").unwrap();

    let data = write_to_vec(&mut writer);
    let sector_shift = u16::from_le_bytes([data[0x1E], data[0x1F]]);
    assert_eq!(sector_shift, 12);

    let cfb = CfbFile::from_bytes(data).unwrap();
    assert_eq!(cfb.sector_size(), 4096);
    assert_eq!(&cfb.open_stream(&["Test"]).unwrap()[..], b"Hello, 4096!");
}

#[test]
fn test_cutoff_boundaries() {
    let mut writer = CfbWriter::new();
    writer
        .create_stream(&["JustUnder"], &vec![0xAAu8; 4095])
        .unwrap();
    writer
        .create_stream(&["Exactly"], &vec![0xBBu8; 4096])
        .unwrap();
    writer
        .create_stream(&["JustOver"], &vec![0xCCu8; 4097])
        .unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();

    let under = cfb.entry(&["JustUnder"]).unwrap();
    assert!(under.is_minifat);
    assert!(!cfb.entry(&["Exactly"]).unwrap().is_minifat);

    assert_eq!(cfb.open_stream(&["JustUnder"]).unwrap().len(), 4095);
    assert_eq!(cfb.open_stream(&["Exactly"]).unwrap().len(), 4096);
    assert_eq!(cfb.open_stream(&["JustOver"]).unwrap().len(), 4097);
}

#[test]
fn test_root_clsid_round_trip() {
    let mut writer = CfbWriter::new();
    // Word 97-2003 document CLSID {00020906-0000-0000-C000-000000000046}
    let clsid = [
        0x06, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x46,
    ];
    writer.set_root_clsid(clsid);
    writer.create_stream(&["S"], b"x").unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    assert_eq!(cfb.root().clsid, "00020906-0000-0000-C000-000000000046");
}

/// One small document and one large document: the small one must land in the
/// mini stream, the large one in a ten-sector chain padded with fill bytes.
#[test]
fn test_small_and_large_placement() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Big"], &vec![0u8; 5000]).unwrap();
    writer.create_stream(&["Small"], b"hello").unwrap();

    let data = write_to_vec(&mut writer);
    let cfb = CfbFile::from_bytes(data.clone()).unwrap();

    // the large stream is allocated first: sectors 0..10
    let big = cfb.entry(&["Big"]).unwrap();
    assert!(!big.is_minifat);
    assert_eq!(big.start_sector, 0);
    assert_eq!(big.size, 5000);

    // its last sector is fill bytes from offset 5000 % 512 onward
    let last_sector_file_offset = (9 + 1) * 512;
    let tail = &data[last_sector_file_offset + 5000 % 512..last_sector_file_offset + 512];
    assert!(tail.iter().all(|&b| b == FILL_BYTE));

    // the small stream lives at mini sector 0 of the mini stream
    let small = cfb.entry(&["Small"]).unwrap();
    assert!(small.is_minifat);
    assert_eq!(small.start_sector, 0);

    // the root entry anchors the mini stream container; its first bytes are
    // the small document followed by fill
    let root = cfb.root();
    assert_ne!(root.start_sector, ENDOFCHAIN);
    assert_eq!(root.size, 512); // one mini sector padded to a whole big sector

    let container_offset = (root.start_sector as usize + 1) * 512;
    assert_eq!(&data[container_offset..container_offset + 5], b"hello");
    assert!(
        data[container_offset + 5..container_offset + 512]
            .iter()
            .all(|&b| b == FILL_BYTE)
    );

    assert_eq!(&cfb.open_stream(&["Big"]).unwrap()[..], &vec![0u8; 5000][..]);
    assert_eq!(&cfb.open_stream(&["Small"]).unwrap()[..], b"hello");
}

/// A corrupted chain in one stream is reported for that stream only.
#[test]
fn test_corrupt_chain_is_isolated() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Good"], &vec![0x11u8; 5000]).unwrap();
    writer.create_stream(&["Bad"], &vec![0x22u8; 5000]).unwrap();

    let mut data = write_to_vec(&mut writer);

    // layout: Good sectors 0..10, Bad sectors 10..20, directory 20, FAT 21.
    // Point Bad's first sector at itself.
    let fat_offset = (21 + 1) * 512;
    data[fat_offset + 10 * 4..fat_offset + 11 * 4].copy_from_slice(&10u32.to_le_bytes());

    let cfb = CfbFile::from_bytes(data).unwrap();

    // the good stream is unaffected
    let good = cfb.open_stream(&["Good"]).unwrap();
    assert_eq!(good.len(), 5000);
    assert!(good.iter().all(|&b| b == 0x11));

    // the bad stream reports the loop with its chain origin
    match cfb.open_stream(&["Bad"]) {
        Err(CfbError::ChainCorruption {
            sector,
            origin,
            fault,
        }) => {
            assert_eq!(sector, 10);
            assert_eq!(origin, 10);
            assert_eq!(fault, ChainFault::Loop);
        }
        other => panic!("expected chain corruption, got {:?}", other),
    }

    let defects = cfb.defects();
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].0, vec!["Bad".to_string()]);
}

/// Two directory entries sharing sectors are detected as a double claim.
#[test]
fn test_shared_sectors_detected() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["One"], &vec![0x11u8; 5000]).unwrap();
    writer.create_stream(&["Two"], &vec![0x22u8; 5000]).unwrap();

    let mut data = write_to_vec(&mut writer);

    // splice Two's chain into One's sectors: link sector 9 onward to 0
    let fat_offset = (21 + 1) * 512;
    data[fat_offset + 10 * 4..fat_offset + 11 * 4].copy_from_slice(&0u32.to_le_bytes());

    let cfb = CfbFile::from_bytes(data).unwrap();
    // exactly one of the two streams resolves; the other hits the claim guard
    let one = cfb.open_stream(&["One"]);
    let two = cfb.open_stream(&["Two"]);
    assert_eq!(one.is_ok() as u8 + two.is_ok() as u8, 1);
    let failed = if one.is_err() { one } else { two };
    assert!(matches!(
        failed,
        Err(CfbError::ChainCorruption {
            fault: ChainFault::AlreadyClaimed,
            ..
        })
    ));
}

/// A final sector shorter than the sector size is tolerated with a warning.
#[test]
fn test_truncated_final_sector_warns() {
    let mut writer = CfbWriter::new();
    writer.create_stream(&["Doc"], &vec![0x7Eu8; 5000]).unwrap();

    let mut data = write_to_vec(&mut writer);
    // layout: data 0..10, directory 10, FAT 11; chop into the FAT's
    // FREESECT tail
    data.truncate(data.len() - 10);

    let cfb = CfbFile::from_bytes(data).unwrap();
    assert_eq!(
        cfb.warnings(),
        &[Warning::TruncatedSector {
            index: 11,
            actual: 502,
            expected: 512,
        }]
    );

    let doc = cfb.open_stream(&["Doc"]).unwrap();
    assert_eq!(doc.len(), 5000);
    assert!(doc.iter().all(|&b| b == 0x7E));
}

/// More than 109 allocation-table sectors forces the extension-table path.
#[test]
fn test_extension_table_round_trip() {
    let mut writer = CfbWriter::new();
    // ~7.5 MB needs ~14650 data sectors and ~116 FAT sectors
    let big = vec![0x5Au8; 7_500_000];
    writer.create_stream(&["Huge"], &big).unwrap();
    writer.create_stream(&["Tiny"], b"still here").unwrap();

    let data = write_to_vec(&mut writer);

    // the header records an extension chain
    let num_difat = u32::from_le_bytes([data[72], data[73], data[74], data[75]]);
    assert_eq!(num_difat, 1);

    let cfb = CfbFile::from_bytes(data).unwrap();
    let huge = cfb.open_stream(&["Huge"]).unwrap();
    assert_eq!(huge.len(), big.len());
    assert_eq!(&huge[..], &big[..]);
    assert_eq!(&cfb.open_stream(&["Tiny"]).unwrap()[..], b"still here");
}

#[test]
fn test_save_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("container.ole");

    let mut writer = CfbWriter::new();
    writer.create_stream(&["TestFile"], b"File content").unwrap();
    writer.save(&path).unwrap();

    let file = std::fs::File::open(&path).unwrap();
    let cfb = CfbFile::open(file).unwrap();
    assert_eq!(&cfb.open_stream(&["TestFile"]).unwrap()[..], b"File content");
}

#[test]
fn test_open_stream_on_storage_fails() {
    let mut writer = CfbWriter::new();
    writer.create_storage(&["Dir"]).unwrap();
    writer.create_stream(&["Dir", "S"], b"x").unwrap();

    let cfb = CfbFile::from_bytes(write_to_vec(&mut writer)).unwrap();
    assert!(matches!(
        cfb.open_stream(&["Dir"]),
        Err(CfbError::NotStream)
    ));
    assert!(matches!(
        cfb.open_stream(&["Missing"]),
        Err(CfbError::StreamNotFound)
    ));
    assert!(cfb.exists(&["Dir", "S"]));
    assert!(!cfb.exists(&["Dir", "T"]));
}
