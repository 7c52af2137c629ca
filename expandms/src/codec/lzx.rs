//! LZX (`spec.md` §4.4.3): CAB, CHM section 1, LIT sections, OAB patch
//! blocks.
//!
//! No teacher source exists for this codec (the teacher depended on the
//! external `lzxd` crate instead of implementing it); this module is
//! built from the algorithm description in `spec.md` §4.4.3, following
//! the same bitstream/Huffman-table/ring-buffer building blocks used
//! throughout the rest of this crate so its shape matches them rather
//! than looking transplanted from elsewhere.

use tracing::debug;

use crate::bitstream::WordBitReader;
use crate::codec::LzxConfig;
use crate::error::ExpandError;
use crate::huffman::{BitOrder, HuffmanTable};
use crate::ring_buffer::RingBuffer;

pub const FRAME_SIZE: usize = 32 * 1024;
const MIN_WINDOW_BITS: u8 = 15;
const MAX_WINDOW_BITS: u8 = 25;
const PRETREE_SYMBOLS: usize = 20;
const LENGTH_TREE_SYMBOLS: usize = 249;
const ALIGNED_TREE_SYMBOLS: usize = 8;
const MIN_MATCH: usize = 2;
const NUM_REPEATED_OFFSETS: usize = 3;
const TABLE_BITS: u32 = 9;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum BlockType {
    Verbatim,
    AlignedOffset,
    Uncompressed,
}

impl BlockType {
    fn from_bits(v: u16) -> Result<Self, ExpandError> {
        match v {
            1 => Ok(Self::Verbatim),
            2 => Ok(Self::AlignedOffset),
            3 => Ok(Self::Uncompressed),
            other => Err(ExpandError::CorruptBitstream(format!("invalid LZX block type {}", other))),
        }
    }
}

/// Footer-bit width for a given position slot (`spec.md` glossary:
/// "footer_bits"). Slots 0-3 address window offsets 0-3 directly; from
/// slot 4 onward the footer width grows by one every two slots, the same
/// exponential-Golomb shape DEFLATE uses for its distance table, just
/// with a wider slot count.
fn footer_bits_for_slot(slot: u32) -> u32 {
    if slot < 4 {
        0
    } else {
        (slot - 2) / 2
    }
}

/// Builds the position-slot base-value table up to (and one past) the
/// slot whose base first reaches `window_size`, which is exactly as many
/// slots as `window_size` needs addressable.
fn build_position_slot_bases(window_size: usize) -> Vec<u32> {
    let mut bases = vec![0u32];
    while (*bases.last().unwrap() as usize) < window_size {
        let slot = bases.len() as u32;
        let footer = footer_bits_for_slot(slot - 1);
        bases.push(bases[(slot - 1) as usize] + (1u32 << footer));
    }
    bases
}

/// LZX's rolling cache of the three most recently used match distances,
/// invoked by position slots 0/1/2 (`spec.md` §4.4.3).
#[derive(Clone, Copy, Debug)]
struct RepeatedOffsets {
    offsets: [u32; NUM_REPEATED_OFFSETS],
}

impl RepeatedOffsets {
    fn new() -> Self {
        Self { offsets: [1, 1, 1] }
    }

    fn use_repeat(&mut self, slot: usize) -> u32 {
        let distance = self.offsets[slot];
        self.offsets.swap(0, slot);
        distance
    }

    fn use_new(&mut self, distance: u32) {
        self.offsets[2] = self.offsets[1];
        self.offsets[1] = self.offsets[0];
        self.offsets[0] = distance;
    }
}

struct BlockTrees {
    main: HuffmanTable,
    length: HuffmanTable,
    aligned: Option<HuffmanTable>,
}

/// Decodes a whole LZX-compressed stream, one 32 KiB frame at a time,
/// maintaining a single window and Huffman code-length history across
/// blocks (reset only when the container explicitly reinitialises the
/// codec at a CHM reset-interval boundary, modelled by constructing a
/// fresh `LzxDecoder`).
pub struct LzxDecoder {
    config: LzxConfig,
    window: RingBuffer,
    repeated_offsets: RepeatedOffsets,
    position_slot_bases: Vec<u32>,
    num_position_slots: usize,
    main_lengths: Vec<u8>,
    length_lengths: Vec<u8>,
    aligned_lengths: [u8; ALIGNED_TREE_SYMBOLS],
    bytes_produced: usize,
    e8_translation_decided: bool,
    e8_active: bool,
    e8_filesize: u32,
}

impl LzxDecoder {
    pub fn new(config: LzxConfig) -> Self {
        assert!(config.window_bits >= MIN_WINDOW_BITS && config.window_bits <= MAX_WINDOW_BITS);
        let window_size = config.window_size();
        let position_slot_bases = build_position_slot_bases(window_size);
        let num_position_slots = position_slot_bases.len();
        let num_main_symbols = 256 + num_position_slots * 8;
        Self {
            config,
            window: RingBuffer::new(window_size, 0),
            repeated_offsets: RepeatedOffsets::new(),
            position_slot_bases,
            num_position_slots,
            main_lengths: vec![0u8; num_main_symbols],
            length_lengths: vec![0u8; LENGTH_TREE_SYMBOLS],
            aligned_lengths: [0u8; ALIGNED_TREE_SYMBOLS],
            bytes_produced: 0,
            e8_translation_decided: false,
            e8_active: false,
            e8_filesize: 0,
        }
    }

    /// Seeds the window with a preset dictionary (`spec.md` glossary
    /// "preset dictionary"), used by LZX-DELTA and by OAB's incremental
    /// patch format, whose matches may reach back into a base file that
    /// was never itself part of this stream's compressed bytes. Only the
    /// last `window_size` bytes of `data` matter; anything before that
    /// falls outside any reachable match distance anyway.
    pub fn seed_preset_dictionary(&mut self, data: &[u8]) {
        let window_size = self.config.window_size();
        let tail_start = data.len().saturating_sub(window_size);
        self.window.extend(data[tail_start..].iter().copied());
    }

    /// Decodes exactly `total_len` bytes from a bounded reader holding
    /// the compressed stream, applying E8 call untranslation to the first
    /// frame when the stream declares it active.
    pub fn decode<R: std::io::Read>(&mut self, reader: &mut R, total_len: usize) -> Result<Vec<u8>, ExpandError> {
        let mut bits = WordBitReader::new(reader);
        let mut output = Vec::with_capacity(total_len);

        if !self.e8_translation_decided {
            let flag = bits.read_bits(1)?;
            self.e8_active = flag != 0 && self.config.intel_filesize != 0;
            if self.e8_active {
                let hi = bits.read_bits(16)? as u32;
                let lo = bits.read_bits(16)? as u32;
                self.e8_filesize = (hi << 16) | lo;
            }
            self.e8_translation_decided = true;
        }

        while output.len() < total_len {
            let frame_target = ((output.len() / FRAME_SIZE) + 1) * FRAME_SIZE;
            let frame_cap = frame_target.min(total_len);
            self.decode_block_sequence_into(&mut bits, &mut output, frame_cap)?;
            bits.align_to_word();
        }

        if self.e8_active {
            apply_e8_untranslation(&mut output, self.e8_filesize);
        }

        Ok(output)
    }

    fn decode_block_sequence_into<R: std::io::Read>(
        &mut self,
        bits: &mut WordBitReader<R>,
        output: &mut Vec<u8>,
        frame_cap: usize,
    ) -> Result<(), ExpandError> {
        while output.len() < frame_cap {
            self.decode_one_block(bits, output)?;
        }
        Ok(())
    }

    fn decode_one_block<R: std::io::Read>(
        &mut self,
        bits: &mut WordBitReader<R>,
        output: &mut Vec<u8>,
    ) -> Result<(), ExpandError> {
        let block_type = BlockType::from_bits(bits.read_bits(3)?)?;
        let uncompressed_size = ((bits.read_bits(16)? as u32) << 8 | (bits.read_bits(8)? as u32)) as usize;
        debug!("lzx: block type {:?}, {} bytes", block_type, uncompressed_size);

        match block_type {
            BlockType::Uncompressed => {
                bits.align_to_word();
                let r0 = bits.read_u32_le_aligned()?;
                let r1 = bits.read_u32_le_aligned()?;
                let r2 = bits.read_u32_le_aligned()?;
                self.repeated_offsets.offsets = [r0, r1, r2];
                let mut raw = Vec::with_capacity(uncompressed_size);
                for _ in 0..uncompressed_size {
                    raw.push(bits.read_bits(8)? as u8);
                }
                self.window.extend(raw.iter().copied());
                output.extend_from_slice(&raw);
                self.bytes_produced += raw.len();
            }
            BlockType::Verbatim | BlockType::AlignedOffset => {
                let aligned = block_type == BlockType::AlignedOffset;
                if aligned {
                    for len in self.aligned_lengths.iter_mut() {
                        *len = bits.read_bits(3)? as u8;
                    }
                }

                self.read_pretree_deltas(bits, 0, 256, true)?;
                self.read_pretree_deltas(bits, 256, 256 + self.num_position_slots * 8, true)?;
                self.read_pretree_deltas(bits, 0, LENGTH_TREE_SYMBOLS, false)?;

                let main_table = HuffmanTable::from_lengths(&self.main_lengths, BitOrder::Msb, TABLE_BITS)?;
                let length_table = HuffmanTable::from_lengths(&self.length_lengths, BitOrder::Msb, TABLE_BITS)?;
                let aligned_table: Option<HuffmanTable> = if aligned {
                    Some(HuffmanTable::from_lengths(&self.aligned_lengths, BitOrder::Msb, 3)?)
                } else {
                    None
                };
                let trees = BlockTrees { main: main_table, length: length_table, aligned: aligned_table };

                let mut produced = 0usize;
                while produced < uncompressed_size {
                    let symbol = trees.main.decode(bits)? as usize;
                    if symbol < 256 {
                        let b = symbol as u8;
                        output.push(b);
                        self.window.push(b);
                        produced += 1;
                        self.bytes_produced += 1;
                    } else {
                        let match_symbol = symbol - 256;
                        let position_slot = match_symbol / 8;
                        let length_header = match_symbol % 8;

                        let length = if length_header == 7 {
                            let extra = trees.length.decode(bits)? as usize;
                            MIN_MATCH + 7 + extra
                        } else {
                            MIN_MATCH + length_header
                        };

                        let distance = if position_slot < NUM_REPEATED_OFFSETS {
                            self.repeated_offsets.use_repeat(position_slot)
                        } else {
                            let footer_bits = footer_bits_for_slot(position_slot as u32);
                            let base = self.position_slot_bases[position_slot];
                            let extra = if aligned && footer_bits >= 3 {
                                let aligned_bits = trees.aligned.as_ref().unwrap().decode(bits)? as u32;
                                let direct_bits = if footer_bits > 3 { bits.read_bits(footer_bits - 3)? as u32 } else { 0 };
                                (direct_bits << 3) | aligned_bits
                            } else {
                                bits.read_bits(footer_bits)? as u32
                            };
                            let distance = base + extra - 2;
                            self.repeated_offsets.use_new(distance);
                            distance
                        };

                        let copied = self.window.recall_checked(distance as usize, length)?;
                        output.extend_from_slice(&copied);
                        produced += copied.len();
                        self.bytes_produced += copied.len();
                    }
                }
            }
        }

        Ok(())
    }

    /// Decodes the pre-tree-delta-coded length array for `start..end` of
    /// either the main tree or the length tree, in place, preceded by its
    /// own 20-symbol pre-tree header. `spec.md` §4.4.3's main tree is
    /// transmitted as two such pre-tree-coded halves, literals `0..256`
    /// and length/position-slot headers `256..end`, each with a fresh
    /// pre-tree; the length tree is a single `0..LENGTH_TREE_SYMBOLS`
    /// pass. `lengths` persist block to block; only the symbols actually
    /// touched by a delta are updated.
    fn read_pretree_deltas<R: std::io::Read>(
        &mut self,
        bits: &mut WordBitReader<R>,
        start: usize,
        end: usize,
        is_main_tree: bool,
    ) -> Result<(), ExpandError> {
        let mut pretree_lengths = [0u8; PRETREE_SYMBOLS];
        for len in pretree_lengths.iter_mut() {
            *len = bits.read_bits(4)? as u8;
        }
        let pretree = HuffmanTable::from_lengths(&pretree_lengths, BitOrder::Msb, 6)?;

        let lengths: &mut [u8] = if is_main_tree { &mut self.main_lengths } else { &mut self.length_lengths };

        let mut i = start;
        while i < end {
            let symbol = pretree.decode(bits)?;
            match symbol {
                0..=16 => {
                    let previous = lengths[i] as i32;
                    let delta = symbol as i32;
                    let new_length = ((previous - delta).rem_euclid(17)) as u8;
                    lengths[i] = new_length;
                    i += 1;
                }
                17 => {
                    let count = 4 + bits.read_bits(4)? as usize;
                    for _ in 0..count {
                        if i >= end {
                            break;
                        }
                        lengths[i] = 0;
                        i += 1;
                    }
                }
                18 => {
                    let count = 20 + bits.read_bits(5)? as usize;
                    for _ in 0..count {
                        if i >= end {
                            break;
                        }
                        lengths[i] = 0;
                        i += 1;
                    }
                }
                19 => {
                    let count = 4 + bits.read_bits(1)? as usize;
                    let next = pretree.decode(bits)? as i32;
                    let previous = lengths[i] as i32;
                    let new_length = ((previous - next).rem_euclid(17)) as u8;
                    for _ in 0..count {
                        if i >= end {
                            break;
                        }
                        lengths[i] = new_length;
                        i += 1;
                    }
                }
                other => {
                    return Err(ExpandError::CorruptBitstream(format!("invalid LZX pre-tree symbol {}", other)));
                }
            }
        }

        Ok(())
    }
}

/// Reverses the E8 call-translation pre-process applied by the encoder to
/// the first 32 KiB of the stream (`spec.md` §4.4.3, glossary "E8 call
/// translation"): 32-bit little-endian operands of `E8 xx xx xx xx` (CALL
/// rel32) instructions were rewritten from relative to absolute, offset
/// from the start of the stream; decoding must undo that.
fn apply_e8_untranslation(data: &mut [u8], filesize: u32) {
    let scan_len = data.len().min(FRAME_SIZE).saturating_sub(10);
    let mut i = 0;
    while i < scan_len {
        if data[i] == 0xE8 {
            let operand = u32::from_le_bytes([data[i + 1], data[i + 2], data[i + 3], data[i + 4]]);
            if operand < filesize {
                let absolute = operand.wrapping_sub(i as u32).wrapping_sub(5);
                data[i + 1..i + 5].copy_from_slice(&absolute.to_le_bytes());
                i += 5;
                continue;
            } else if operand >= (0u32.wrapping_sub(filesize)) {
                let absolute = operand.wrapping_add(filesize);
                data[i + 1..i + 5].copy_from_slice(&absolute.to_le_bytes());
                i += 5;
                continue;
            }
        }
        i += 1;
    }
}
