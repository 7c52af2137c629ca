//! WinHelp (`.hlp`) files: internal file system enumeration and
//! Zeck-LZ77 decompression of individual internal files (`spec.md`
//! §4.4.5, `SPEC_FULL.md` §B).
//!
//! No teacher source exists for this format. Grounded on the long-public
//! `helpdeco`-documented WinHelp layout (32-bit header, a B-tree-indexed
//! internal file system, a per-file `FILEHEADER` preceding each entry's
//! bytes) and on this crate's own [`crate::codec::zeck`] for the payload
//! codec. Multi-level directory B-trees (`NLevels > 1`, rare outside very
//! large help files) are reported as [`ExpandError::Unsupported`] rather
//! than guessed at without a reference to check against.

use std::io::{Read, Seek, SeekFrom};

use crate::codec::zeck::{apply_phrases, PhraseDictionary, ZeckDecoder};
use crate::container::{Entry, EntryAttributes};
use crate::error::ExpandError;

const MAGIC_31: u32 = 0x00035F3F;
const MAGIC_LEGACY: u32 = 0x000A35F3; // 3.0 signature variant.
const BTREE_MAGIC: u16 = 0x293B;
const FLAG_COMPRESSED: u8 = 0x04;

#[derive(Clone, Debug)]
pub struct HlpHeader {
    pub directory_start: u32,
    pub free_chain_start: i32,
    pub file_size: u32,
}

impl HlpHeader {
    fn read<R: Read>(reader: &mut R) -> Result<Self, ExpandError> {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf)?;
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC_31 && magic != MAGIC_LEGACY {
            return Err(ExpandError::Signature { expected: "WinHelp 0x00035F3F", context: "HLP header" });
        }
        Ok(Self {
            directory_start: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            free_chain_start: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            file_size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

struct InternalFile {
    name: Vec<u8>,
    file_header_offset: u32,
}

fn read_internal_directory<R: Read + Seek>(
    reader: &mut R,
    directory_start: u32,
) -> Result<Vec<InternalFile>, ExpandError> {
    reader.seek(SeekFrom::Start(directory_start as u64))?;
    let mut header = [0u8; 40];
    reader.read_exact(&mut header)?;
    let magic = u16::from_le_bytes(header[0..2].try_into().unwrap());
    if magic != BTREE_MAGIC {
        return Err(ExpandError::Signature { expected: "WinHelp B-tree (0x293B)", context: "HLP directory" });
    }
    let page_size = u16::from_le_bytes(header[4..6].try_into().unwrap()) as u64;
    let root_page = u16::from_le_bytes(header[24..26].try_into().unwrap());
    let num_levels = u16::from_le_bytes(header[30..32].try_into().unwrap());
    if num_levels > 1 {
        return Err(ExpandError::Unsupported("multi-level WinHelp directory B-tree"));
    }

    let pages_start = directory_start as u64 + 40;
    let mut page_num = root_page;
    let mut files = Vec::new();

    loop {
        reader.seek(SeekFrom::Start(pages_start + page_num as u64 * page_size))?;
        let mut page = vec![0u8; page_size as usize];
        reader.read_exact(&mut page)?;

        let num_entries = i16::from_le_bytes(page[2..4].try_into().unwrap());
        let next_page = i16::from_le_bytes(page[6..8].try_into().unwrap());

        let mut cursor = 8usize;
        for _ in 0..num_entries.max(0) {
            let name_end = page[cursor..].iter().position(|&b| b == 0).ok_or_else(|| {
                ExpandError::Format("WinHelp directory entry has no terminated filename".to_string())
            })?;
            let name = page[cursor..cursor + name_end].to_vec();
            cursor += name_end + 1;
            let offset = u32::from_le_bytes(
                page[cursor..cursor + 4]
                    .try_into()
                    .map_err(|_| ExpandError::Format("WinHelp directory entry truncated".to_string()))?,
            );
            cursor += 4;
            files.push(InternalFile { name, file_header_offset: offset });
        }

        if next_page < 0 {
            break;
        }
        page_num = next_page as u16;
    }

    Ok(files)
}

struct FileHeader {
    used_space: u32,
    flags: u8,
    data_offset: u64,
}

fn read_file_header<R: Read + Seek>(reader: &mut R, offset: u32) -> Result<FileHeader, ExpandError> {
    reader.seek(SeekFrom::Start(offset as u64))?;
    let mut fixed = [0u8; 9];
    reader.read_exact(&mut fixed)?;
    let used_space = u32::from_le_bytes(fixed[4..8].try_into().unwrap());
    let flags = fixed[8];
    Ok(FileHeader { used_space, flags, data_offset: offset as u64 + 9 })
}

pub struct HlpFile {
    pub header: HlpHeader,
    files: Vec<InternalFile>,
}

impl HlpFile {
    pub fn open<R: Read + Seek>(reader: &mut R) -> Result<Self, ExpandError> {
        let header = HlpHeader::read(reader)?;
        let files = read_internal_directory(reader, header.directory_start)?;
        Ok(Self { header, files })
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.files
            .iter()
            .enumerate()
            .map(|(index, f)| Entry {
                name: f.name.clone(),
                uncompressed_length: 0,
                offset_in_folder: f.file_header_offset as u64,
                folder_key: index,
                attributes: EntryAttributes::default(),
                timestamp: None,
            })
            .collect()
    }

    /// Loads the `|Phrases` internal file (if present) and builds the
    /// dictionary used to expand `|TOPIC` text. Absence of `|Phrases` is
    /// not an error: help files with no phrase table decode `|TOPIC` with
    /// no substitution at all.
    fn load_phrase_dictionary<R: Read + Seek>(&self, reader: &mut R) -> Result<Option<PhraseDictionary>, ExpandError> {
        let Some(entry) = self.files.iter().find(|f| f.name == b"|Phrases") else {
            return Ok(None);
        };
        let raw = self.read_internal_file_raw(reader, entry)?;
        let mut phrases = Vec::new();
        for chunk in raw.split(|&b| b == 0) {
            if !chunk.is_empty() {
                phrases.push(chunk.to_vec());
            }
        }
        Ok(Some(PhraseDictionary::new(phrases)))
    }

    fn read_internal_file_raw<R: Read + Seek>(&self, reader: &mut R, file: &InternalFile) -> Result<Vec<u8>, ExpandError> {
        let header = read_file_header(reader, file.file_header_offset)?;
        reader.seek(SeekFrom::Start(header.data_offset))?;
        let mut raw = vec![0u8; header.used_space as usize];
        reader.read_exact(&mut raw)?;

        if header.flags & FLAG_COMPRESSED != 0 {
            let mut zeck = ZeckDecoder::new();
            let mut cursor = std::io::Cursor::new(raw);
            zeck.decode(&mut cursor, header.used_space as usize * 4)
        } else {
            Ok(raw)
        }
    }

    /// Reads one internal file by name, applying phrase substitution when
    /// the file is `|TOPIC` and a `|Phrases` table exists.
    pub fn extract_by_name<R: Read + Seek>(&self, reader: &mut R, name: &[u8]) -> Result<Vec<u8>, ExpandError> {
        let file = self
            .files
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ExpandError::Format(format!("no such internal WinHelp file: {}", String::from_utf8_lossy(name))))?;
        let raw = self.read_internal_file_raw(reader, file)?;
        if name == b"|TOPIC" {
            let phrases = self.load_phrase_dictionary(reader)?;
            Ok(apply_phrases(&raw, phrases.as_ref()))
        } else {
            Ok(raw)
        }
    }

    pub fn extract<R: Read + Seek>(&self, reader: &mut R, entry: &Entry) -> Result<Vec<u8>, ExpandError> {
        self.extract_by_name(reader, &entry.name)
    }
}
