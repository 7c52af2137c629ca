//! Microsoft Reader (`.lit`) files: `ITOLITLS` header plus an
//! ITSP-shaped directory of LZX-compressed (or DES-encrypted) sections
//! (`spec.md` §4.5.2, Non-goals).
//!
//! No teacher source exists for this format. Grounded on the same public
//! `ITOLITLS` header shape documented alongside CHM's `ITSF` (LIT reuses
//! the CHM directory chunk layout almost verbatim), so the directory
//! walk here is a thin reuse of [`crate::container::chm`]'s PMGL/PMGI
//! chunk reader rather than a reimplementation. DRM-protected (DES or
//! RC4-keyed) sections are out of scope (`spec.md` Non-goals) and are
//! reported as [`ExpandError::Unsupported`] rather than decrypted.

use std::io::{Read, Seek, SeekFrom};

use crate::codec::lzx::LzxDecoder;
use crate::codec::LzxConfig;
use crate::container::chm::ChmLocation;
use crate::container::{Entry, EntryAttributes};
use crate::error::ExpandError;

const SIGNATURE: &[u8; 8] = b"ITOLITLS";
const LIT_WINDOW_BITS: u8 = 16;

#[derive(Clone, Debug)]
pub struct LitHeader {
    pub version: u32,
    pub directory_offset: u64,
    pub directory_length: u64,
    pub content_offset: u64,
    pub has_drm: bool,
}

impl LitHeader {
    fn read<R: Read>(reader: &mut R) -> Result<Self, ExpandError> {
        let mut signature = [0u8; 8];
        reader.read_exact(&mut signature)?;
        if &signature != SIGNATURE {
            return Err(ExpandError::Signature { expected: "ITOLITLS", context: "LIT header" });
        }

        let mut fixed = [0u8; 0x30];
        reader.read_exact(&mut fixed)?;
        let version = u32::from_le_bytes(fixed[0..4].try_into().unwrap());
        let directory_offset = u32::from_le_bytes(fixed[4..8].try_into().unwrap()) as u64;
        let directory_length = u32::from_le_bytes(fixed[8..12].try_into().unwrap()) as u64;
        let content_offset = u32::from_le_bytes(fixed[12..16].try_into().unwrap()) as u64;
        let drm_flags = u32::from_le_bytes(fixed[16..20].try_into().unwrap());

        Ok(Self { version, directory_offset, directory_length, content_offset, has_drm: drm_flags != 0 })
    }
}

fn read_directory_chunks<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    length: u64,
) -> Result<Vec<(Vec<u8>, ChmLocation)>, ExpandError> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut raw = vec![0u8; length as usize];
    reader.read_exact(&mut raw)?;

    let mut entries = Vec::new();
    const CHUNK_SIZE: usize = 0x1000;
    for chunk in raw.chunks(CHUNK_SIZE) {
        if chunk.len() < 20 {
            continue;
        }
        if &chunk[0..4] == b"PMGL" {
            entries.extend(crate::container::chm::read_pmgl_entries(chunk)?);
        }
    }
    Ok(entries)
}

pub struct LitFile {
    pub header: LitHeader,
    directory: Vec<(Vec<u8>, ChmLocation)>,
}

impl LitFile {
    pub fn open<R: Read + Seek>(reader: &mut R) -> Result<Self, ExpandError> {
        let header = LitHeader::read(reader)?;
        let directory = read_directory_chunks(reader, header.directory_offset, header.directory_length)?;
        Ok(Self { header, directory })
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.directory
            .iter()
            .filter(|(name, _)| !name.starts_with(b"/#") && !name.starts_with(b"/$"))
            .map(|(name, loc)| Entry {
                name: name.clone(),
                uncompressed_length: loc.length,
                offset_in_folder: loc.offset,
                folder_key: loc.section as usize,
                attributes: EntryAttributes::default(),
                timestamp: None,
            })
            .collect()
    }

    pub fn extract<R: Read + Seek>(&self, reader: &mut R, entry: &Entry) -> Result<Vec<u8>, ExpandError> {
        if self.header.has_drm {
            return Err(ExpandError::Unsupported("DRM-protected LIT sections"));
        }

        reader.seek(SeekFrom::Start(self.header.content_offset + entry.offset_in_folder))?;

        if entry.folder_key == 0 {
            let mut out = vec![0u8; entry.uncompressed_length as usize];
            reader.read_exact(&mut out)?;
            return Ok(out);
        }

        let mut lzx = LzxDecoder::new(LzxConfig {
            window_bits: LIT_WINDOW_BITS,
            reset_interval_frames: 0,
            intel_filesize: 0,
            is_delta: false,
        });
        lzx.decode(reader, entry.uncompressed_length as usize)
    }
}
