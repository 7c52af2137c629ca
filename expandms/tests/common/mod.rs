//! Shared fixture helpers for the per-format integration tests. Nothing
//! here is specific to one container format: a temp-file helper for
//! exercising `ArchiveHandle::open` (which needs a real path to detect
//! format from), an ENCINT/PMGL chunk builder for CHM and LIT, and a
//! hand-rolled bit packer for constructing a valid LZX "Uncompressed"
//! block without needing an LZX encoder (this crate only ever decodes).

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Writes `bytes` to a fresh file under the system temp directory named
/// `name`, returning its path. Unique per call (and per process), so
/// concurrently-run tests never collide.
pub fn temp_file(name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "expandms-integration-test-{}-{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

/// Encodes `v` as a CHM ENCINT. Only needed for the small values these
/// fixtures use (directory offsets/lengths under a few KiB), so anything
/// requiring more than 7 bits is out of scope here.
pub fn write_encint(buf: &mut Vec<u8>, v: u64) {
    assert!(v < 0x80, "fixture ENCINT values must fit one byte: {}", v);
    buf.push(v as u8);
}

/// One PMGL directory entry destined for [`build_pmgl_chunk`]: name,
/// section, offset, length (all encoded as single-byte ENCINTs).
pub struct PmglEntry {
    pub name: &'static str,
    pub section: u64,
    pub offset: u64,
    pub length: u64,
}

/// Builds one PMGL chunk of exactly `chunk_size` bytes: the fixed
/// 20-byte header (`spec.md` §4.5.2) followed by `entries`, zero-padded
/// to `chunk_size` with `free_space` set so the real entries are found.
pub fn build_pmgl_chunk(entries: &[PmglEntry], chunk_size: usize) -> Vec<u8> {
    let mut body = Vec::new();
    for entry in entries {
        write_encint(&mut body, entry.name.len() as u64);
        body.extend_from_slice(entry.name.as_bytes());
        write_encint(&mut body, entry.section);
        write_encint(&mut body, entry.offset);
        write_encint(&mut body, entry.length);
    }
    assert!(20 + body.len() <= chunk_size, "fixture entries overflow chunk_size");

    let mut chunk = vec![0u8; chunk_size];
    chunk[0..4].copy_from_slice(b"PMGL");
    let free_space = (chunk_size - 20 - body.len()) as u32;
    chunk[4..8].copy_from_slice(&free_space.to_le_bytes());
    chunk[20..20 + body.len()].copy_from_slice(&body);
    chunk
}

/// Packs bits MSB-first into 16-bit little-endian words, the exact
/// inverse of `expandms::bitstream::WordBitReader`: each `write_bits`
/// call pushes its value's bits high-to-low into a 16-bit accumulator,
/// which flushes to two bytes (low byte first) once full.
struct WordBitWriter {
    bytes: Vec<u8>,
    acc: u32,
    fill: u32,
}

impl WordBitWriter {
    fn new() -> Self {
        Self { bytes: Vec::new(), acc: 0, fill: 0 }
    }

    fn write_bits(&mut self, value: u32, n: u32) {
        for i in (0..n).rev() {
            let bit = (value >> i) & 1;
            self.acc = (self.acc << 1) | bit;
            self.fill += 1;
            if self.fill == 16 {
                self.bytes.extend_from_slice(&(self.acc as u16).to_le_bytes());
                self.acc = 0;
                self.fill = 0;
            }
        }
    }

    fn align_to_word(&mut self) {
        if self.fill > 0 {
            self.acc <<= 16 - self.fill;
            self.bytes.extend_from_slice(&(self.acc as u16).to_le_bytes());
            self.acc = 0;
            self.fill = 0;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.align_to_word();
        self.bytes
    }
}

/// Builds a complete, standalone LZX stream carrying `payload` as a
/// single `Uncompressed` block (`spec.md` §4.4.3): this is the only LZX
/// block type hand-constructable without building Huffman tables, so
/// it's the fixture of choice for every container that drives
/// `LzxDecoder` in these tests. `payload.len()` must not exceed one
/// 32 KiB frame; decoding it back requires `LzxConfig.intel_filesize ==
/// 0` so the leading translation flag is a single always-zero bit.
pub fn lzx_uncompressed_stream(payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 32 * 1024);
    lzx_uncompressed_blocks(&[payload])
}

fn write_lzx_uncompressed_block(w: &mut WordBitWriter, payload: &[u8]) {
    w.write_bits(3, 3); // block type: Uncompressed
    let size = payload.len() as u32;
    w.write_bits(size >> 8, 16);
    w.write_bits(size & 0xFF, 8);
    w.align_to_word();
    // Three little-endian u32 repeated offsets (new R0, R1, R2), each as
    // two aligned 16-bit words, low word first, matching
    // `WordBitReader::read_u32_le_aligned`. 1 is the decoder's own
    // initial repeated-offset value, so this is a no-op refresh.
    for _ in 0..3 {
        w.write_bits(1, 16);
        w.write_bits(0, 16);
    }
    for &byte in payload {
        w.write_bits(byte as u32, 8);
    }
}

/// Builds a complete LZX stream carrying each of `blocks` as its own
/// `Uncompressed` block, one per `LzxDecoder::decode` frame (`spec.md`
/// §8's frame-boundary-edge case at 32768/32769 bytes): the first block
/// is expected to land exactly on a 32 KiB frame boundary so the
/// realignment `decode` performs between frames is a no-op, matching
/// what an all-`Uncompressed` LZX stream actually produces there.
pub fn lzx_uncompressed_blocks(blocks: &[&[u8]]) -> Vec<u8> {
    let mut w = WordBitWriter::new();
    w.write_bits(0, 1); // e8 translation flag: off, read once for the whole stream
    for block in blocks {
        write_lzx_uncompressed_block(&mut w, block);
    }
    w.finish()
}
