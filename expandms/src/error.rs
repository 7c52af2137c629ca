//! The error taxonomy shared by every codec and container reader.

use std::fmt;
use std::path::PathBuf;

use crate::huffman::HuffmanConstructionError;

/// Every fallible operation in this crate returns one of these kinds.
#[derive(Debug)]
pub enum ExpandError {
    /// Failure at the byte layer: open/read/write/seek.
    Io(std::io::Error),
    /// Magic bytes did not match any known format, or a nested magic
    /// (e.g. `ITSF`, `LZXC`) differed from what was expected.
    Signature { expected: &'static str, context: &'static str },
    /// Structurally valid header but an impossible value: chunk size
    /// below minimum, tag mismatch, unknown version, reset interval not a
    /// multiple of the frame size, window bits out of range, and so on.
    Format(String),
    /// The compressed range ended before the codec reached its declared
    /// uncompressed length.
    TruncatedInput,
    /// Huffman tree neither complete nor the degenerate single-symbol
    /// case; invalid block type; invalid pre-code length; match offset
    /// exceeds the current window fill.
    CorruptBitstream(String),
    /// A CAB block checksum, OAB block CRC-32, or CHM declared
    /// uncompressed length disagreed with what was observed.
    ChecksumMismatch { what: &'static str },
    /// Recognised but deliberately unimplemented: DRM-encrypted LIT
    /// sections, KWAJ LZH, WinHelp macro execution, etc.
    Unsupported(&'static str),
    /// A caller-facing policy was violated: path traversal, output exists
    /// without `overwrite`.
    Policy(String),
    /// A Huffman table could not be constructed from the supplied code
    /// lengths.
    Huffman(HuffmanConstructionError),
}

impl fmt::Display for ExpandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Signature { expected, context } => {
                write!(f, "bad signature in {}: expected {}", context, expected)
            }
            Self::Format(msg) => write!(f, "format error: {}", msg),
            Self::TruncatedInput => write!(f, "compressed input ended before the declared uncompressed length was reached"),
            Self::CorruptBitstream(msg) => write!(f, "corrupt bitstream: {}", msg),
            Self::ChecksumMismatch { what } => write!(f, "checksum mismatch: {}", what),
            Self::Unsupported(what) => write!(f, "unsupported feature: {}", what),
            Self::Policy(msg) => write!(f, "policy violation: {}", msg),
            Self::Huffman(e) => write!(f, "Huffman tree construction error: {}", e),
        }
    }
}

impl std::error::Error for ExpandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Huffman(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ExpandError {
    fn from(value: std::io::Error) -> Self {
        if value.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::TruncatedInput
        } else {
            Self::Io(value)
        }
    }
}

impl From<HuffmanConstructionError> for ExpandError {
    fn from(value: HuffmanConstructionError) -> Self {
        Self::Huffman(value)
    }
}

/// Failure extracting a single entry; carries enough context for the
/// extraction pipeline (`crate::extract`) to report it and move on.
#[derive(Debug)]
pub struct EntryError {
    pub path: PathBuf,
    pub source: ExpandError,
}

impl fmt::Display for EntryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.source)
    }
}

impl std::error::Error for EntryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
