//! CHM integration tests (`spec.md` §8, `encints-64bit-both`-style
//! directory traversal): a section-0 stored entry and a section-1 LZX
//! entry driven off a one-entry reset table, round-tripped through both
//! `ChmFile` directly and `ArchiveHandle`, plus a malformed directory
//! chunk signature.

mod common;

use std::io::Cursor;

use expandms::container::chm::ChmFile;
use expandms::{ArchiveHandle, ExpandError};

const ITSP_HEADER_SIZE: u64 = 0x54;

struct Layout {
    bytes: Vec<u8>,
    hello: &'static [u8],
    doc: &'static [u8],
}

fn build(corrupt_chunk_signature: bool) -> Layout {
    let hello: &[u8] = b"hello from section zero";
    let doc: &[u8] = b"<html>hello doc</html>";
    let lzx_bytes = common::lzx_uncompressed_stream(doc);

    let chunk_size: u32 = 0x1000;
    let header_section1_offset: u64 = 0x60;
    let chunks_start = header_section1_offset + ITSP_HEADER_SIZE;
    let content_section_offset = chunks_start + chunk_size as u64;

    let control_data_off = 0u64;
    let control_data_len = 24u64;
    let reset_table_off = control_data_off + control_data_len;
    let reset_table_len = 48u64;
    let hello_off = reset_table_off + reset_table_len;
    let content_off = hello_off + hello.len() as u64; // section-1 LZX stream start

    let mut bytes = Vec::new();

    // ITSF header: 4-byte signature, 0x54 fixed bytes, 8-byte trailer
    // (version 3 carries the content section offset explicitly).
    bytes.extend_from_slice(b"ITSF");
    let mut fixed = vec![0u8; 0x54];
    fixed[0..4].copy_from_slice(&3u32.to_le_bytes()); // version
    fixed[0x34 - 4..0x3C - 4].copy_from_slice(&0u64.to_le_bytes()); // section0 offset, unused
    fixed[0x3C - 4..0x44 - 4].copy_from_slice(&0u64.to_le_bytes()); // section0 length, unused
    fixed[0x44 - 4..0x4C - 4].copy_from_slice(&header_section1_offset.to_le_bytes());
    fixed[0x4C - 4..0x54 - 4].copy_from_slice(&0u64.to_le_bytes()); // section1 length, unused
    bytes.extend_from_slice(&fixed);
    bytes.extend_from_slice(&content_section_offset.to_le_bytes());
    assert_eq!(bytes.len() as u64, header_section1_offset);

    // ITSP header: 4-byte signature, 0x50 fixed bytes.
    bytes.extend_from_slice(b"ITSP");
    let mut itsp_fixed = vec![0u8; 0x50];
    itsp_fixed[0x10 - 4..0x14 - 4].copy_from_slice(&chunk_size.to_le_bytes());
    itsp_fixed[0x20 - 4..0x24 - 4].copy_from_slice(&0u32.to_le_bytes()); // first_pmgl_chunk
    itsp_fixed[0x24 - 4..0x28 - 4].copy_from_slice(&0u32.to_le_bytes()); // last_pmgl_chunk
    itsp_fixed[0x2c - 4..0x30 - 4].copy_from_slice(&1u32.to_le_bytes()); // num_chunks
    bytes.extend_from_slice(&itsp_fixed);
    assert_eq!(bytes.len() as u64, chunks_start);

    // One PMGL directory chunk naming the control data, reset table, the
    // section-1 content start, and the two files.
    let entries = [
        common::PmglEntry {
            name: "::DataSpace/Storage/MSCompressed/ControlData",
            section: 0,
            offset: control_data_off,
            length: control_data_len,
        },
        common::PmglEntry {
            name: "::DataSpace/Storage/MSCompressed/Transform/{7FC28940-9D31-11D0-9B27-00A0C91E9C7C}/InstanceData/ResetTable",
            section: 0,
            offset: reset_table_off,
            length: reset_table_len,
        },
        common::PmglEntry {
            name: "::DataSpace/Storage/MSCompressed/Content",
            section: 0,
            offset: content_off,
            length: 0,
        },
        common::PmglEntry { name: "hello.txt", section: 0, offset: hello_off, length: hello.len() as u64 },
        common::PmglEntry { name: "doc.html", section: 1, offset: 0, length: doc.len() as u64 },
    ];
    let mut chunk = common::build_pmgl_chunk(&entries, chunk_size as usize);
    if corrupt_chunk_signature {
        chunk[0..4].copy_from_slice(b"XXXX");
    }
    bytes.extend_from_slice(&chunk);
    assert_eq!(bytes.len() as u64, content_section_offset);

    // Content area: ControlData, ResetTable, the raw section-0 file,
    // then the section-1 LZX stream.
    let mut control_data = vec![0u8; 24];
    control_data[4..8].copy_from_slice(b"LZXC");
    control_data[8..12].copy_from_slice(&2u32.to_le_bytes()); // reset_interval_frames
    control_data[12..16].copy_from_slice(&(1u32 << 15).to_le_bytes()); // window_size -> 15 bits
    bytes.extend_from_slice(&control_data);

    let mut reset_table = vec![0u8; 48];
    reset_table[4..8].copy_from_slice(&1u32.to_le_bytes()); // num_entries
    reset_table[8..12].copy_from_slice(&8u32.to_le_bytes()); // entry_size
    reset_table[12..16].copy_from_slice(&40u32.to_le_bytes()); // table_offset
    reset_table[0x1c..0x24].copy_from_slice(&0x8000u64.to_le_bytes()); // frame_len
    reset_table[40..48].copy_from_slice(&0u64.to_le_bytes()); // entries[0].compressed_offset
    bytes.extend_from_slice(&reset_table);

    bytes.extend_from_slice(hello);
    bytes.extend_from_slice(&lzx_bytes);

    Layout { bytes, hello, doc }
}

#[test]
fn chm_file_extracts_a_stored_section_zero_entry_and_an_lzx_section_one_entry() {
    let layout = build(false);
    let mut reader = Cursor::new(layout.bytes);
    let chm = ChmFile::open(&mut reader).unwrap();

    let entries = chm.entries();
    assert_eq!(entries.len(), 2);
    let hello_entry = entries.iter().find(|e| e.name == b"hello.txt").unwrap();
    let doc_entry = entries.iter().find(|e| e.name == b"doc.html").unwrap();
    assert_eq!(hello_entry.folder_key, 0);
    assert_eq!(doc_entry.folder_key, 1);

    let hello_out = chm.extract(&mut reader, hello_entry).unwrap();
    assert_eq!(hello_out, layout.hello);

    let doc_out = chm.extract(&mut reader, doc_entry).unwrap();
    assert_eq!(doc_out, layout.doc);
}

#[test]
fn archive_handle_round_trips_the_same_archive_from_a_real_file() {
    let layout = build(false);
    let path = common::temp_file("help.chm", &layout.bytes);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    let entries = handle.entries();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        let mut out = Vec::new();
        handle.extract(entry, &mut out).unwrap();
        if entry.name == b"hello.txt" {
            assert_eq!(out, layout.hello);
        } else if entry.name == b"doc.html" {
            assert_eq!(out, layout.doc);
        } else {
            panic!("unexpected entry {:?}", entry.name);
        }
    }

    let info = handle.info();
    assert_eq!(info.format.to_string(), "CHM");
    assert_eq!(info.file_count, 2);
}

#[test]
fn a_directory_chunk_with_neither_pmgl_nor_pmgi_signature_is_a_typed_format_error() {
    let layout = build(true);
    let mut reader = Cursor::new(layout.bytes);
    let err = ChmFile::open(&mut reader).unwrap_err();
    assert!(matches!(err, ExpandError::Format(_)));
}
