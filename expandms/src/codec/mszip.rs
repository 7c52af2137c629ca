//! MSZIP: DEFLATE (RFC 1951) framed into CAB/KWAJ blocks behind a `CK`
//! signature (`spec.md` §4.4.2).
//!
//! This replaces the teacher's `inflate.rs` binary-tree decoder with the
//! table-driven [`HuffmanTable`], but keeps its block-type dispatch and
//! length/distance base tables verbatim.

use std::borrow::Cow;
use std::io::Read;
use std::sync::LazyLock;

use tracing::debug;

use crate::bitstream::LsbBitReader;
use crate::codec::MszipConfig;
use crate::error::ExpandError;
use crate::huffman::{BitOrder, HuffmanTable};
use crate::ring_buffer::RingBuffer;

pub const WINDOW_SIZE: usize = 32 * 1024;
const TABLE_BITS: u32 = 9;

struct BaseExtra {
    base: usize,
    extra_bits: u32,
}
const fn be(base: usize, extra_bits: u32) -> BaseExtra {
    BaseExtra { base, extra_bits }
}

const LENGTH_VALUES: [BaseExtra; 29] = [
    be(3, 0), be(4, 0), be(5, 0), be(6, 0), be(7, 0), be(8, 0), be(9, 0), be(10, 0),
    be(11, 1), be(13, 1), be(15, 1), be(17, 1),
    be(19, 2), be(23, 2), be(27, 2), be(31, 2),
    be(35, 3), be(43, 3), be(51, 3), be(59, 3),
    be(67, 4), be(83, 4), be(99, 4), be(115, 4),
    be(131, 5), be(163, 5), be(195, 5), be(227, 5),
    be(258, 0),
];
const DISTANCE_VALUES: [BaseExtra; 30] = [
    be(1, 0), be(2, 0), be(3, 0), be(4, 0),
    be(5, 1), be(7, 1),
    be(9, 2), be(13, 2),
    be(17, 3), be(25, 3),
    be(33, 4), be(49, 4),
    be(65, 5), be(97, 5),
    be(129, 6), be(193, 6),
    be(257, 7), be(385, 7),
    be(513, 8), be(769, 8),
    be(1025, 9), be(1537, 9),
    be(2049, 10), be(3073, 10),
    be(4097, 11), be(6145, 11),
    be(8193, 12), be(12289, 12),
    be(16385, 13), be(24577, 13),
];
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

static FIXED_LITERAL_TABLE: LazyLock<HuffmanTable> = LazyLock::new(|| {
    let mut lengths = [0u8; 288];
    for (i, l) in lengths.iter_mut().enumerate() {
        *l = if i <= 143 {
            8
        } else if i <= 255 {
            9
        } else if i <= 279 {
            7
        } else {
            8
        };
    }
    HuffmanTable::from_lengths(&lengths, BitOrder::LsbReversed, TABLE_BITS)
        .expect("fixed literal/length table is always well-formed")
});
static FIXED_DISTANCE_TABLE: LazyLock<HuffmanTable> = LazyLock::new(|| {
    HuffmanTable::from_lengths(&[5u8; 30], BitOrder::LsbReversed, 5)
        .expect("fixed distance table is always well-formed")
});

/// A DEFLATE decoder whose window survives across CAB/KWAJ blocks within
/// one folder (`spec.md` §4.4.2).
pub struct MszipDecoder {
    window: RingBuffer,
    config: MszipConfig,
}

impl MszipDecoder {
    pub fn new(config: MszipConfig) -> Self {
        Self { window: RingBuffer::new(WINDOW_SIZE, 0), config }
    }

    /// Decodes one `CK`-prefixed MSZIP block. `reader` must be bounded to
    /// exactly this block's compressed bytes. `expected_output_len` caps
    /// how many bytes are collected before returning, matching CAB's
    /// declared per-block uncompressed size.
    pub fn decode_block<R: Read>(
        &mut self,
        reader: &mut R,
        expected_output_len: usize,
    ) -> Result<Vec<u8>, ExpandError> {
        let mut signature = [0u8; 2];
        reader.read_exact(&mut signature)?;
        if &signature != b"CK" {
            return Err(ExpandError::Signature { expected: "CK", context: "MSZIP block" });
        }

        if !self.config.share_history_across_blocks {
            self.window = RingBuffer::new(WINDOW_SIZE, 0);
        }

        let mut bits = LsbBitReader::new(reader);
        let mut output = Vec::with_capacity(expected_output_len);
        loop {
            let is_final = inflate_block(&mut bits, &mut self.window, &mut output)?;
            if is_final || output.len() >= expected_output_len {
                break;
            }
        }
        Ok(output)
    }
}

/// Decodes one RFC 1951 block, returning whether it was the final block.
fn inflate_block<R: Read>(
    bits: &mut LsbBitReader<R>,
    window: &mut RingBuffer,
    output: &mut Vec<u8>,
) -> Result<bool, ExpandError> {
    let is_final = bits.read_bit()?;
    let block_type = bits.read_bits(2)?;

    match block_type {
        0 => {
            debug!("mszip: stored block");
            bits.align_to_byte();
            let len = bits.read_u16_le_aligned()?;
            let _nlen = bits.read_u16_le_aligned()?;
            let raw = bits.read_raw_bytes(len as usize)?;
            output.extend_from_slice(&raw);
            window.extend(raw.iter().copied());
        }
        1 | 2 => {
            let (literal_table, distance_table): (Cow<HuffmanTable>, Cow<HuffmanTable>) = if block_type == 1 {
                debug!("mszip: fixed Huffman block");
                (Cow::Borrowed(&*FIXED_LITERAL_TABLE), Cow::Borrowed(&*FIXED_DISTANCE_TABLE))
            } else {
                debug!("mszip: dynamic Huffman block");
                let (l, d) = read_dynamic_tables(bits)?;
                (Cow::Owned(l), Cow::Owned(d))
            };

            loop {
                let symbol = literal_table.decode(bits)?;
                if symbol == 256 {
                    break;
                } else if symbol < 256 {
                    let b = symbol as u8;
                    output.push(b);
                    window.push(b);
                } else {
                    let idx = (symbol - 257) as usize;
                    let length_value = LENGTH_VALUES
                        .get(idx)
                        .ok_or_else(|| ExpandError::CorruptBitstream("invalid length code".to_string()))?;
                    let extra = bits.read_bits(length_value.extra_bits)? as usize;
                    let length = length_value.base + extra;

                    let distance_symbol = distance_table.decode(bits)? as usize;
                    let distance_value = DISTANCE_VALUES
                        .get(distance_symbol)
                        .ok_or_else(|| ExpandError::CorruptBitstream("invalid distance code".to_string()))?;
                    let dextra = bits.read_bits(distance_value.extra_bits)? as usize;
                    let distance = distance_value.base + dextra;

                    let copied = window.recall_checked(distance, length)?;
                    output.extend_from_slice(&copied);
                }
            }
        }
        3 => return Err(ExpandError::CorruptBitstream("reserved DEFLATE block type 3".to_string())),
        _ => unreachable!("2-bit field"),
    }

    Ok(is_final)
}

fn read_dynamic_tables<R: Read>(bits: &mut LsbBitReader<R>) -> Result<(HuffmanTable, HuffmanTable), ExpandError> {
    let literal_count = bits.read_bits(5)? as usize + 257;
    let distance_count = bits.read_bits(5)? as usize + 1;
    let code_length_count = bits.read_bits(4)? as usize + 4;

    let mut code_length_lengths = [0u8; 19];
    for i in 0..code_length_count {
        code_length_lengths[CODE_LENGTH_ORDER[i]] = bits.read_bits(3)? as u8;
    }
    let code_length_table = HuffmanTable::from_lengths(&code_length_lengths, BitOrder::LsbReversed, 7)?;

    let total = literal_count + distance_count;
    let mut lengths = Vec::with_capacity(total);
    let mut previous: Option<u8> = None;
    while lengths.len() < total {
        let symbol = code_length_table.decode(bits)?;
        match symbol {
            0..=15 => {
                lengths.push(symbol as u8);
                previous = Some(symbol as u8);
            }
            16 => {
                let prev = previous.ok_or_else(|| {
                    ExpandError::CorruptBitstream("repeat-previous code with no previous length".to_string())
                })?;
                let count = bits.read_bits(2)? as usize + 3;
                lengths.extend(std::iter::repeat(prev).take(count));
            }
            17 => {
                let count = bits.read_bits(3)? as usize + 3;
                lengths.extend(std::iter::repeat(0).take(count));
            }
            18 => {
                let count = bits.read_bits(7)? as usize + 11;
                lengths.extend(std::iter::repeat(0).take(count));
            }
            _ => return Err(ExpandError::CorruptBitstream("invalid code-length symbol".to_string())),
        }
    }
    lengths.truncate(total);

    let (literal_lengths, distance_lengths) = lengths.split_at(literal_count);
    let literal_table = HuffmanTable::from_lengths(literal_lengths, BitOrder::LsbReversed, TABLE_BITS)?;
    let distance_table = HuffmanTable::from_lengths(distance_lengths, BitOrder::LsbReversed, 6)?;
    Ok((literal_table, distance_table))
}
