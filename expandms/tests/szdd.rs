//! SZDD integration tests (`spec.md` §8): literal-only LZSS round trip
//! through `ArchiveHandle`, filename restoration, and a malformed
//! compression-mode rejection.

mod common;

use std::io::Cursor;

use expandms::container::szdd::SzddFile;
use expandms::{ArchiveHandle, ExpandError};

const SIGNATURE_SZDD: &[u8] = b"SZDD\x88\xF0\x27\x33";

fn build_szdd(missing_char: u8, plaintext: &[u8]) -> Vec<u8> {
    assert!(plaintext.len() <= 8, "fixture uses a single all-literal flag byte");
    let mut bytes = SIGNATURE_SZDD.to_vec();
    bytes.push(b'A'); // mode
    bytes.push(missing_char);
    bytes.extend_from_slice(&(plaintext.len() as u32).to_le_bytes());
    bytes.push(0xFF); // flag byte: every one of up to 8 literals follows raw
    bytes.extend_from_slice(plaintext);
    bytes
}

#[test]
fn archive_handle_restores_the_stored_filename_and_decompresses() {
    let plaintext = b"Hello, w";
    let bytes = build_szdd(b'c', plaintext);
    // The stem "report_" triggers the trailing-underscore replacement
    // rule: the on-disk name carries the generic `_` extension marker.
    let path = common::temp_file("report_", &bytes);

    let mut handle = ArchiveHandle::open(&path).unwrap();
    let entries = handle.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, b"reportc");

    let mut out = Vec::new();
    handle.extract(&entries[0], &mut out).unwrap();
    assert_eq!(out, plaintext);

    let info = handle.info();
    assert_eq!(info.format.to_string(), "SZDD");
    assert_eq!(info.file_count, 1);
}

#[test]
fn an_unsupported_compression_mode_byte_is_a_typed_format_error() {
    let mut bytes = SIGNATURE_SZDD.to_vec();
    bytes.push(b'B'); // only mode 'A' is defined
    bytes.push(b'c');
    bytes.extend_from_slice(&0u32.to_le_bytes());

    let mut reader = Cursor::new(bytes);
    let err = SzddFile::read_header(&mut reader).unwrap_err();
    assert!(matches!(err, ExpandError::Format(_)));
}

#[test]
fn a_short_literal_run_stops_at_input_end_rather_than_panicking() {
    // The header declares 8 bytes but only 3 literals are actually
    // present; the format has no end marker besides the declared size,
    // so decoding silently yields fewer bytes instead of erroring.
    let mut bytes = SIGNATURE_SZDD.to_vec();
    bytes.push(b'A');
    bytes.push(b'c');
    bytes.extend_from_slice(&8u32.to_le_bytes());
    bytes.push(0xFF);
    bytes.extend_from_slice(b"abc");

    let mut reader = Cursor::new(bytes);
    let file = SzddFile::read_header(&mut reader).unwrap();
    let decoded = file.decompress(&mut reader).unwrap();
    assert_eq!(&decoded, b"abc");
    assert!(decoded.len() < file.uncompressed_size as usize);
}
