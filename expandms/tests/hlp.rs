//! WinHelp integration tests (`spec.md` §4.4.5, §8): raw and Zeck-
//! compressed internal files, `|Phrases` substitution, a round trip
//! through `ArchiveHandle`, and the multi-level B-tree Non-goal
//! rejection.

mod common;

use std::io::Cursor;

use expandms::container::hlp::HlpFile;
use expandms::{ArchiveHandle, ExpandError};

const MAGIC_31: u32 = 0x00035F3F;
const BTREE_MAGIC: u16 = 0x293B;

/// Builds a single-leaf-page WinHelp file holding `internal_files`
/// (name, raw-on-disk bytes, flags). Mirrors the private fixture builder
/// `hlp.rs` keeps for its own unit tests, since that one can't be
/// imported across the crate boundary.
fn build_hlp(internal_files: &[(&[u8], &[u8], u8)], num_levels: u16) -> Vec<u8> {
    let mut body = Vec::new();
    let mut headers = Vec::new();
    for (_, data, flags) in internal_files {
        headers.push(body.len() as u32);
        body.extend_from_slice(&(data.len() as u32).to_le_bytes()); // reserved_space
        body.extend_from_slice(&(data.len() as u32).to_le_bytes()); // used_space
        body.push(*flags);
        body.extend_from_slice(data);
    }

    let directory_start = 16u32;
    let mut directory = Vec::new();
    directory.extend_from_slice(&BTREE_MAGIC.to_le_bytes());
    directory.extend_from_slice(&0u16.to_le_bytes()); // flags
    let page_size = 512u16;
    directory.extend_from_slice(&page_size.to_le_bytes());
    directory.extend_from_slice(&[0u8; 16]); // structure
    directory.extend_from_slice(&0u16.to_le_bytes());
    directory.extend_from_slice(&0u16.to_le_bytes()); // page splits
    directory.extend_from_slice(&0u16.to_le_bytes()); // root page
    directory.extend_from_slice(&0u16.to_le_bytes());
    directory.extend_from_slice(&1u16.to_le_bytes()); // total pages
    directory.extend_from_slice(&num_levels.to_le_bytes());
    directory.extend_from_slice(&(internal_files.len() as u32).to_le_bytes());
    assert_eq!(directory.len(), 40);

    let mut page = vec![0u8; page_size as usize];
    page[2..4].copy_from_slice(&(internal_files.len() as i16).to_le_bytes());
    page[6..8].copy_from_slice(&(-1i16).to_le_bytes());
    let mut cursor = 8usize;
    for (i, (name, _, _)) in internal_files.iter().enumerate() {
        page[cursor..cursor + name.len()].copy_from_slice(name);
        cursor += name.len();
        page[cursor] = 0;
        cursor += 1;
        let file_offset = directory_start + directory.len() as u32 + page_size as u32 + headers[i];
        page[cursor..cursor + 4].copy_from_slice(&file_offset.to_le_bytes());
        cursor += 4;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC_31.to_le_bytes());
    out.extend_from_slice(&directory_start.to_le_bytes());
    out.extend_from_slice(&(-1i32).to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&directory);
    out.extend_from_slice(&page);
    out.extend_from_slice(&body);
    out
}

#[test]
fn a_zeck_compressed_topic_with_no_phrases_file_decodes_without_substitution() {
    // Flag byte 0x00: every one of the following literals is raw, not a
    // back-reference (Zeck inverts LZSS's convention: a clear bit means
    // literal here).
    let mut topic_raw = vec![0x00u8];
    topic_raw.extend_from_slice(b"See you");
    let bytes = build_hlp(&[(b"|TOPIC", &topic_raw, 0x04)], 0);

    let mut reader = Cursor::new(bytes);
    let hlp = HlpFile::open(&mut reader).unwrap();
    let out = hlp.extract_by_name(&mut reader, b"|TOPIC").unwrap();
    assert_eq!(out, b"See you");
}

#[test]
fn phrase_substitution_expands_topic_text_when_a_phrases_file_is_present() {
    let mut topic_raw = vec![0x00u8];
    topic_raw.extend_from_slice(&[0x10, b'x', 0x11]);

    let mut phrases_raw = Vec::new();
    phrases_raw.extend_from_slice(b"the \0and \0");

    let bytes = build_hlp(
        &[(b"|Phrases", &phrases_raw, 0), (b"|TOPIC", &topic_raw, 0x04)],
        0,
    );

    let mut reader = Cursor::new(bytes);
    let hlp = HlpFile::open(&mut reader).unwrap();
    let out = hlp.extract_by_name(&mut reader, b"|TOPIC").unwrap();
    assert_eq!(out, b"the xand ");
}

#[test]
fn archive_handle_round_trips_an_uncompressed_internal_file_from_a_real_file() {
    let bytes = build_hlp(&[(b"|SYSTEM", b"sysdata", 0)], 0);
    let path = common::temp_file("winhelp.hlp", &bytes);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    let entries = handle.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, b"|SYSTEM");

    let mut out = Vec::new();
    handle.extract(&entries[0], &mut out).unwrap();
    assert_eq!(out, b"sysdata");

    assert_eq!(handle.info().format.to_string(), "HLP");
}

#[test]
fn a_multi_level_directory_btree_is_a_typed_unsupported_error() {
    let bytes = build_hlp(&[(b"|SYSTEM", b"sysdata", 0)], 2);
    let mut reader = Cursor::new(bytes);
    let err = HlpFile::open(&mut reader).unwrap_err();
    assert!(matches!(err, ExpandError::Unsupported(_)));
}
