//! Standalone SZDD compressed files (`spec.md` §4.5.3).
//!
//! Grounded on the teacher's `szdd.rs`, which already distinguished the
//! two signature dialects (`decompress_szdd`/`decompress_sz`); this keeps
//! that split but drives the shared `LzssDecoder` instead of a bespoke
//! window, and follows the component description's header shape (mode
//! byte, missing-character byte, 4-byte size) for both dialects rather
//! than the teacher's shorter `decompress_sz` header.

use std::io::Read;

use crate::codec::lzss::LzssDecoder;
use crate::codec::{LzssConfig, LzssDialect};
use crate::error::ExpandError;

const SIGNATURE_SZDD: &[u8; 8] = b"SZDD\x88\xF0\x27\x33";
const SIGNATURE_SZ: &[u8; 8] = b"SZ \x88\xF0\x27\x33\xD1";
const NORMAL_MODE: u8 = b'A';

#[derive(Clone, Debug)]
pub struct SzddFile {
    pub dialect: LzssDialect,
    /// The character that replaces the trailing `_` in the stored
    /// filename's extension on extraction (`spec.md` §4.5.3).
    pub missing_character: u8,
    pub uncompressed_size: u32,
}

impl SzddFile {
    pub fn read_header<R: Read>(reader: &mut R) -> Result<Self, ExpandError> {
        let mut signature = [0u8; 8];
        reader.read_exact(&mut signature)?;
        let dialect = if &signature == SIGNATURE_SZDD {
            LzssDialect::Szdd
        } else if &signature == SIGNATURE_SZ {
            LzssDialect::KwajSz
        } else {
            return Err(ExpandError::Signature { expected: "SZDD or SZ ", context: "SZDD header" });
        };

        let mut rest = [0u8; 6];
        reader.read_exact(&mut rest)?;
        if rest[0] != NORMAL_MODE {
            return Err(ExpandError::Format(format!("unsupported SZDD compression mode {:#04x}", rest[0])));
        }
        let missing_character = rest[1];
        let uncompressed_size = u32::from_le_bytes(rest[2..6].try_into().unwrap());

        Ok(Self { dialect, missing_character, uncompressed_size })
    }

    /// Decompresses the LZSS payload that follows the header. `reader`
    /// must be positioned immediately after [`Self::read_header`] has run.
    pub fn decompress<R: Read>(&self, reader: &mut R) -> Result<Vec<u8>, ExpandError> {
        let mut decoder = LzssDecoder::new(LzssConfig { dialect: self.dialect });
        let mut output = Vec::with_capacity(self.uncompressed_size as usize);
        decoder.decode(reader, self.uncompressed_size as usize, &mut output)?;
        Ok(output)
    }

    /// Reconstructs the original filename from a stored `name._`-style
    /// entry, replacing the trailing underscore with [`Self::missing_character`].
    pub fn restore_filename(&self, stored_name: &[u8]) -> Vec<u8> {
        let mut name = stored_name.to_vec();
        if name.last() == Some(&b'_') {
            *name.last_mut().unwrap() = self.missing_character;
        }
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_the_szdd_dialect_header() {
        let mut bytes = SIGNATURE_SZDD.to_vec();
        bytes.push(b'A');
        bytes.push(b't');
        bytes.extend_from_slice(&13u32.to_le_bytes());
        let mut reader = Cursor::new(bytes);
        let file = SzddFile::read_header(&mut reader).unwrap();
        assert_eq!(file.dialect, LzssDialect::Szdd);
        assert_eq!(file.missing_character, b't');
        assert_eq!(file.uncompressed_size, 13);
    }

    #[test]
    fn restores_the_trailing_extension_character() {
        let mut bytes = SIGNATURE_SZDD.to_vec();
        bytes.push(b'A');
        bytes.push(b'x');
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let mut reader = Cursor::new(bytes);
        let file = SzddFile::read_header(&mut reader).unwrap();
        assert_eq!(file.restore_filename(b"readme._"), b"readme.x");
    }

    #[test]
    fn rejects_unknown_signature() {
        let mut reader = Cursor::new(b"NOTREAL!".to_vec());
        assert!(matches!(SzddFile::read_header(&mut reader), Err(ExpandError::Signature { .. })));
    }

    #[test]
    fn round_trips_a_literal_only_payload() {
        let mut bytes = SIGNATURE_SZDD.to_vec();
        bytes.push(b'A');
        bytes.push(b'c');
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.push(0xFF); // flag byte: 5 literals follow, all literal bits set
        bytes.extend_from_slice(b"Howdy");

        let mut reader = Cursor::new(bytes);
        let file = SzddFile::read_header(&mut reader).unwrap();
        let decoded = file.decompress(&mut reader).unwrap();
        assert_eq!(&decoded, b"Howdy");
    }
}
