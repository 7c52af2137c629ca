//! Zeck LZ77, WinHelp's topic-text compressor (`spec.md` §4.4.5).
//!
//! The back-reference shape is the same absolute-window-position
//! addressing LZSS uses elsewhere in this crate (12-bit offset, 4-bit
//! length, packed the same way); what's new here is an escape length code
//! for runs past 18 bytes and an optional post-decode phrase-substitution
//! pass.

use std::io::Read;

use crate::error::ExpandError;
use crate::ring_buffer::RingBuffer;

pub const WINDOW_SIZE: usize = 4096;
const MIN_MATCH: usize = 3;
const ESCAPE_LENGTH_CODE: u8 = 15;
const ESCAPE_BASE: usize = 19;

pub struct ZeckDecoder {
    window: RingBuffer,
}

impl Default for ZeckDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZeckDecoder {
    pub fn new() -> Self {
        Self { window: RingBuffer::new(WINDOW_SIZE, 0) }
    }

    /// Decodes up to `expected_output_len` bytes of raw (pre-phrase-
    /// substitution) topic text. Use [`apply_phrases`] afterward if a
    /// phrase dictionary is available.
    pub fn decode<R: Read>(&mut self, reader: &mut R, expected_output_len: usize) -> Result<Vec<u8>, ExpandError> {
        let mut output = Vec::with_capacity(expected_output_len);
        loop {
            if output.len() >= expected_output_len {
                return Ok(output);
            }

            let mut control_byte = [0u8];
            if reader.read(&mut control_byte)? == 0 {
                return Ok(output);
            }

            for bit in 0..8 {
                if output.len() >= expected_output_len {
                    return Ok(output);
                }

                if control_byte[0] & (1 << bit) == 0 {
                    let mut literal = [0u8];
                    if reader.read(&mut literal)? == 0 {
                        return Ok(output);
                    }
                    output.push(literal[0]);
                    self.window.push(literal[0]);
                } else {
                    let mut token = [0u8; 2];
                    if reader.read(&mut token)? < 2 {
                        return Ok(output);
                    }
                    let position = usize::from(token[0]) | (usize::from(token[1] & 0xF0) << 4);
                    let length_code = token[1] & 0x0F;
                    let length = if length_code == ESCAPE_LENGTH_CODE {
                        let mut extra = [0u8];
                        reader.read_exact(&mut extra)?;
                        ESCAPE_BASE + usize::from(extra[0])
                    } else {
                        usize::from(length_code) + MIN_MATCH
                    };

                    let copied = self.window.recall_absolute(position, length);
                    output.extend_from_slice(&copied);
                }
            }
        }
    }
}

/// WinHelp's optional phrase-replacement layer (`spec.md` §4.4.5): up to
/// 512 short byte strings, loaded from a `|Phrases` internal file,
/// substituted back in after LZ77 decoding. A topic with no `|Phrases`
/// file decodes its Zeck stream with no substitution at all; callers
/// simply never build a `PhraseDictionary` for it.
#[derive(Clone, Debug, Default)]
pub struct PhraseDictionary {
    phrases: Vec<Vec<u8>>,
}

impl PhraseDictionary {
    pub fn new(phrases: Vec<Vec<u8>>) -> Self {
        Self { phrases }
    }

    pub fn get(&self, code: u8) -> Option<&[u8]> {
        self.phrases.get(usize::from(code)).map(Vec::as_slice)
    }
}

/// Substitutes phrase-reference bytes (0x10..=0xFF) in already-LZ77-
/// decoded text for their dictionary entries. Bytes below 0x10, and
/// phrase codes with no entry in the dictionary, pass through unchanged.
pub fn apply_phrases(decoded: &[u8], phrases: Option<&PhraseDictionary>) -> Vec<u8> {
    let Some(dict) = phrases else {
        return decoded.to_vec();
    };
    let mut out = Vec::with_capacity(decoded.len());
    for &b in decoded {
        if b >= 0x10 {
            if let Some(phrase) = dict.get(b - 0x10) {
                out.extend_from_slice(phrase);
                continue;
            }
        }
        out.push(b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decodes_all_literal_text() {
        let plaintext = b"See Also";
        let mut compressed = vec![0xFFu8];
        compressed.extend_from_slice(plaintext);

        let mut decoder = ZeckDecoder::new();
        let mut reader = Cursor::new(compressed);
        let output = decoder.decode(&mut reader, plaintext.len()).unwrap();
        assert_eq!(&output, plaintext);
    }

    #[test]
    fn decodes_a_back_reference_with_escape_length() {
        let mut decoder = ZeckDecoder::new();
        let mut compressed = Vec::new();
        // flag: bit0 literal, bit1 match
        compressed.push(0b0000_0010);
        compressed.push(b'Q');
        // match: position 0, escape length code (15), extra byte 0 -> length 19
        compressed.push(0x00);
        compressed.push(0x0F);
        compressed.push(0x00);

        let mut reader = Cursor::new(compressed);
        let output = decoder.decode(&mut reader, 20).unwrap();
        assert_eq!(output.len(), 20);
        assert!(output.iter().all(|&b| b == b'Q'));
    }

    #[test]
    fn phrase_substitution_expands_high_bytes() {
        let dict = PhraseDictionary::new(vec![b"the ".to_vec(), b"and ".to_vec()]);
        let decoded = vec![0x10, b'x', 0x11];
        let expanded = apply_phrases(&decoded, Some(&dict));
        assert_eq!(expanded, b"the xand ");
    }

    #[test]
    fn phrase_substitution_is_identity_without_a_dictionary() {
        let decoded = vec![0x10, b'x'];
        assert_eq!(apply_phrases(&decoded, None), decoded);
    }
}
