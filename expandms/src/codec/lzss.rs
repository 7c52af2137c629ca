//! LZSS, as used by SZDD and KWAJ's "SZ" sub-format (`spec.md` §4.4.1).
//!
//! Grounded on the teacher's `szdd.rs`/`kwaj/sz.rs`, which implemented the
//! same control-byte/token loop twice with only the window's initial
//! cursor position differing; this generalises that into one decoder
//! parameterised by [`LzssDialect`].

use std::io::Read;

use tracing::debug;

use crate::codec::{LzssConfig, LzssDialect};
use crate::error::ExpandError;
use crate::ring_buffer::RingBuffer;

pub const WINDOW_SIZE: usize = 4096;
const MIN_MATCH: usize = 3;

pub struct LzssDecoder {
    window: RingBuffer,
}

impl LzssDecoder {
    pub fn new(config: LzssConfig) -> Self {
        let mut window = RingBuffer::new(WINDOW_SIZE, b' ');
        let initial_position = match config.dialect {
            LzssDialect::Szdd => WINDOW_SIZE - 16,
            LzssDialect::KwajSz => 0,
        };
        window.set_position(initial_position);
        Self { window }
    }

    /// Decodes the whole LZSS-compressed tail of `reader` into `output`,
    /// stopping once `expected_output_len` bytes have been produced or
    /// the input runs out (the format has no other end marker).
    pub fn decode<R: Read>(
        &mut self,
        reader: &mut R,
        expected_output_len: usize,
        output: &mut Vec<u8>,
    ) -> Result<(), ExpandError> {
        loop {
            if output.len() >= expected_output_len {
                return Ok(());
            }

            let mut control_byte = [0u8];
            let bytes_read = reader.read(&mut control_byte).map_err(ExpandError::from)?;
            if bytes_read == 0 {
                return Ok(());
            }

            for bit in 0..8 {
                if output.len() >= expected_output_len {
                    return Ok(());
                }

                if control_byte[0] & (1 << bit) != 0 {
                    let mut literal = [0u8];
                    match reader.read(&mut literal)? {
                        0 => return Ok(()),
                        _ => {}
                    }
                    output.push(literal[0]);
                    self.window.push(literal[0]);
                } else {
                    let mut match_info = [0u8; 2];
                    if reader.read(&mut match_info)? < 2 {
                        return Ok(());
                    }
                    let match_position =
                        usize::from(match_info[0]) | (usize::from(match_info[1] & 0xF0) << 4);
                    let match_length = usize::from(match_info[1] & 0x0F) + MIN_MATCH;
                    debug!("lzss: match at window position {} for {} bytes", match_position, match_length);

                    let copied = self.window.recall_absolute(match_position, match_length);
                    output.extend_from_slice(&copied);
                }
            }
        }
    }
}
