//! Compiled HTML Help files: ITSF/ITSP directory and section-1 framed LZX
//! with reset tables (`spec.md` §4.5.2).
//!
//! No teacher source exists for this format. Grounded directly on the
//! component description (ITSF header shape, PMGL's 20-byte fixed header
//! plus a trailing entry count, `ControlData`/`ResetTable`/`SpanInfo`'s
//! role in locating the LZX parameters) and on the public ITSF/ITSP field
//! layout long documented by `chmlib`/`libmspack`, reading against `Read +
//! Seek` the same way [`crate::container::cab`] does, and driving the
//! shared [`crate::codec::lzx::LzxDecoder`].

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};

use tracing::debug;

use crate::codec::lzx::LzxDecoder;
use crate::codec::LzxConfig;
use crate::container::{Entry, EntryAttributes};
use crate::error::ExpandError;

const ITSF_SIGNATURE: &[u8; 4] = b"ITSF";
const ITSP_SIGNATURE: &[u8; 4] = b"ITSP";
const PMGL_SIGNATURE: &[u8; 4] = b"PMGL";
const PMGI_SIGNATURE: &[u8; 4] = b"PMGI";
const LZXC_SIGNATURE: &[u8; 4] = b"LZXC";

/// Canonical internal directory entry names real CHM encoders use to
/// publish the LZX parameters for content section 1 (`spec.md` §4.5.2).
const NAME_CONTROL_DATA: &str = "::DataSpace/Storage/MSCompressed/ControlData";
const NAME_RESET_TABLE: &str =
    "::DataSpace/Storage/MSCompressed/Transform/{7FC28940-9D31-11D0-9B27-00A0C91E9C7C}/InstanceData/ResetTable";
const NAME_SPAN_INFO: &str = "::DataSpace/Storage/MSCompressed/SpanInfo";
const NAME_CONTENT: &str = "::DataSpace/Storage/MSCompressed/Content";

#[derive(Clone, Debug)]
pub struct ItsfHeader {
    pub version: u32,
    pub header_section0_offset: u64,
    pub header_section0_length: u64,
    pub header_section1_offset: u64,
    pub header_section1_length: u64,
    pub content_section_offset: u64,
}

impl ItsfHeader {
    fn read<R: Read + Seek>(reader: &mut R) -> Result<Self, ExpandError> {
        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        if &signature != ITSF_SIGNATURE {
            return Err(ExpandError::Signature { expected: "ITSF", context: "CHM header" });
        }

        let mut fixed = [0u8; 0x54];
        reader.read_exact(&mut fixed)?;
        let version = u32::from_le_bytes(fixed[0..4].try_into().unwrap());

        let header_section0_offset = u64::from_le_bytes(fixed[0x38 - 4..0x40 - 4].try_into().unwrap());
        let header_section0_length = u64::from_le_bytes(fixed[0x40 - 4..0x48 - 4].try_into().unwrap());
        let header_section1_offset = u64::from_le_bytes(fixed[0x48 - 4..0x50 - 4].try_into().unwrap());
        let header_section1_length = u64::from_le_bytes(fixed[0x50 - 4..0x58 - 4].try_into().unwrap());

        let content_section_offset = if version >= 3 {
            let mut extra = [0u8; 8];
            reader.read_exact(&mut extra)?;
            u64::from_le_bytes(extra)
        } else {
            header_section1_offset + header_section1_length
        };

        Ok(Self {
            version,
            header_section0_offset,
            header_section0_length,
            header_section1_offset,
            header_section1_length,
            content_section_offset,
        })
    }
}

#[derive(Clone, Debug)]
struct ItspHeader {
    chunk_size: u32,
    first_pmgl_chunk: u32,
    last_pmgl_chunk: u32,
    num_chunks: u32,
}

impl ItspHeader {
    fn read<R: Read>(reader: &mut R) -> Result<Self, ExpandError> {
        let mut signature = [0u8; 4];
        reader.read_exact(&mut signature)?;
        if &signature != ITSP_SIGNATURE {
            return Err(ExpandError::Signature { expected: "ITSP", context: "CHM directory header" });
        }
        let mut fixed = [0u8; 0x50];
        reader.read_exact(&mut fixed)?;
        let chunk_size = u32::from_le_bytes(fixed[0x10 - 4..0x14 - 4].try_into().unwrap());
        let first_pmgl_chunk = u32::from_le_bytes(fixed[0x20 - 4..0x24 - 4].try_into().unwrap());
        let last_pmgl_chunk = u32::from_le_bytes(fixed[0x24 - 4..0x28 - 4].try_into().unwrap());
        let num_chunks = u32::from_le_bytes(fixed[0x2c - 4..0x30 - 4].try_into().unwrap());
        if chunk_size < 0x54 {
            return Err(ExpandError::Format(format!("CHM directory chunk size {} below minimum", chunk_size)));
        }
        Ok(Self { chunk_size, first_pmgl_chunk, last_pmgl_chunk, num_chunks })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChmLocation {
    pub section: u64,
    pub offset: u64,
    pub length: u64,
}

/// Reads one CHM ENCINT: a big-endian base-128 varint where each byte's
/// high bit marks "more bytes follow".
fn read_encint<R: Read>(reader: &mut R) -> Result<u64, ExpandError> {
    let mut value: u64 = 0;
    for _ in 0..9 {
        let mut byte = [0u8];
        reader.read_exact(&mut byte)?;
        value = (value << 7) | (byte[0] & 0x7F) as u64;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(ExpandError::CorruptBitstream("CHM ENCINT exceeds 9 bytes".to_string()))
}

pub(crate) fn read_pmgl_entries(chunk: &[u8]) -> Result<Vec<(Vec<u8>, ChmLocation)>, ExpandError> {
    if chunk.len() < 20 {
        return Err(ExpandError::Format("CHM PMGL chunk shorter than its fixed header".to_string()));
    }
    let free_space = u32::from_le_bytes(chunk[4..8].try_into().unwrap()) as usize;
    let entries_end = chunk.len().saturating_sub(free_space.max(2));
    let mut cursor = std::io::Cursor::new(&chunk[20..entries_end.max(20)]);

    let mut entries = Vec::new();
    while (cursor.position() as usize) < cursor.get_ref().len() {
        let name_len = match read_encint(&mut cursor) {
            Ok(v) => v,
            Err(_) => break,
        };
        let mut name = vec![0u8; name_len as usize];
        cursor.read_exact(&mut name)?;
        let section = read_encint(&mut cursor)?;
        let offset = read_encint(&mut cursor)?;
        let length = read_encint(&mut cursor)?;
        entries.push((name, ChmLocation { section, offset, length }));
    }
    Ok(entries)
}

#[derive(Clone, Debug)]
pub struct LzxControlData {
    pub reset_interval_frames: u32,
    pub window_bits: u8,
}

fn read_control_data(bytes: &[u8]) -> Result<LzxControlData, ExpandError> {
    if bytes.len() < 0x18 {
        return Err(ExpandError::Format("CHM ControlData shorter than expected".to_string()));
    }
    if &bytes[4..8] != LZXC_SIGNATURE {
        return Err(ExpandError::Signature { expected: "LZXC", context: "CHM ControlData" });
    }
    let reset_interval_blocks = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let window_size = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let window_bits = 32 - window_size.leading_zeros().saturating_sub(1) as u8;
    let window_bits = if window_size.is_power_of_two() { window_size.trailing_zeros() as u8 } else { window_bits };
    Ok(LzxControlData { reset_interval_frames: reset_interval_blocks, window_bits })
}

#[derive(Clone, Debug)]
pub struct ResetTableEntry {
    pub uncompressed_offset: u64,
    pub compressed_offset: u64,
}

#[derive(Clone, Debug)]
pub struct ResetTable {
    pub frame_len: u64,
    pub entries: Vec<ResetTableEntry>,
}

fn read_reset_table(bytes: &[u8]) -> Result<ResetTable, ExpandError> {
    if bytes.len() < 0x28 {
        return Err(ExpandError::Format("CHM ResetTable shorter than expected".to_string()));
    }
    let num_entries = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let entry_size = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let table_offset = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let frame_len = u64::from_le_bytes(bytes[0x1c..0x24].try_into().unwrap());

    let mut entries = Vec::with_capacity(num_entries);
    for i in 0..num_entries {
        let pos = table_offset + i * entry_size;
        let compressed_offset = u64::from_le_bytes(
            bytes.get(pos..pos + 8).ok_or_else(|| ExpandError::Format("CHM ResetTable entry out of range".to_string()))?
                .try_into()
                .unwrap(),
        );
        entries.push(ResetTableEntry { uncompressed_offset: i as u64 * frame_len, compressed_offset });
    }
    Ok(ResetTable { frame_len, entries })
}

pub struct ChmFile {
    pub header: ItsfHeader,
    directory: Vec<(Vec<u8>, ChmLocation)>,
    control_data: Option<LzxControlData>,
    reset_table: Option<ResetTable>,
    content_section1_offset: u64,
}

impl ChmFile {
    pub fn open<R: Read + Seek>(reader: &mut R) -> Result<Self, ExpandError> {
        let header = ItsfHeader::read(reader)?;

        reader.seek(SeekFrom::Start(header.header_section1_offset))?;
        let itsp = ItspHeader::read(reader)?;
        const ITSP_HEADER_SIZE: u64 = 0x54;
        let chunks_start = header.header_section1_offset + ITSP_HEADER_SIZE;

        let mut directory = Vec::new();
        for chunk_index in 0..itsp.num_chunks {
            reader.seek(SeekFrom::Start(chunks_start + chunk_index as u64 * itsp.chunk_size as u64))?;
            let mut chunk = vec![0u8; itsp.chunk_size as usize];
            reader.read_exact(&mut chunk)?;
            if &chunk[0..4] == PMGL_SIGNATURE {
                directory.extend(read_pmgl_entries(&chunk)?);
            } else if &chunk[0..4] == PMGI_SIGNATURE {
                // Index chunks exist purely to speed up lookups via
                // binary search; a full linear scan of every PMGL chunk
                // (done above/below) already visits every entry, so the
                // index itself carries nothing this reader needs.
                debug!("chm: skipping PMGI index chunk {}", chunk_index);
            } else {
                return Err(ExpandError::Format(format!(
                    "CHM directory chunk {} has neither PMGL nor PMGI signature",
                    chunk_index
                )));
            }
        }
        let _ = (itsp.first_pmgl_chunk, itsp.last_pmgl_chunk);

        let control_data = directory
            .iter()
            .find(|(name, _)| name.as_slice() == NAME_CONTROL_DATA.as_bytes())
            .map(|(_, loc)| *loc);
        let reset_table_loc = directory
            .iter()
            .find(|(name, _)| name.as_slice() == NAME_RESET_TABLE.as_bytes())
            .map(|(_, loc)| *loc);
        let content_loc = directory
            .iter()
            .find(|(name, _)| name.as_slice() == NAME_CONTENT.as_bytes())
            .map(|(_, loc)| *loc);

        let control_data = match control_data {
            Some(loc) => {
                let bytes = read_section0_bytes(reader, &header, loc)?;
                Some(read_control_data(&bytes)?)
            }
            None => None,
        };
        let reset_table = match reset_table_loc {
            Some(loc) => {
                let bytes = read_section0_bytes(reader, &header, loc)?;
                Some(read_reset_table(&bytes)?)
            }
            None => None,
        };
        let content_section1_offset = content_loc.map(|loc| loc.offset).unwrap_or(0);

        Ok(Self { header, directory, control_data, reset_table, content_section1_offset })
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.directory
            .iter()
            .filter(|(name, _)| !name.starts_with(b"::") && !name.starts_with(b"/#") && !name.starts_with(b"/$"))
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

    /// Extracts one entry, dispatching on which content section it lives
    /// in: section 0 is a flat uncompressed byte range; section 1 is the
    /// LZX-compressed stream, decoded starting from the nearest reset
    /// point at or before the entry's offset (`spec.md` §4.5.2).
    pub fn extract<R: Read + Seek>(&self, reader: &mut R, entry: &Entry) -> Result<Vec<u8>, ExpandError> {
        if entry.folder_key == 0 {
            reader.seek(SeekFrom::Start(self.header.content_section_offset + entry.offset_in_folder))?;
            let mut out = vec![0u8; entry.uncompressed_length as usize];
            reader.read_exact(&mut out)?;
            return Ok(out);
        }

        let control_data = self.control_data.as_ref().ok_or_else(|| {
            ExpandError::Format("CHM section-1 file with no ControlData present".to_string())
        })?;
        let reset_table = self.reset_table.as_ref().ok_or_else(|| {
            ExpandError::Format("CHM section-1 file with no ResetTable present".to_string())
        })?;

        let reset_index = reset_table
            .entries
            .iter()
            .rposition(|e| e.uncompressed_offset <= entry.offset_in_folder)
            .ok_or_else(|| ExpandError::Format("CHM ResetTable has no entry covering this offset".to_string()))?;
        let reset_entry = &reset_table.entries[reset_index];

        reader.seek(SeekFrom::Start(
            self.header.content_section_offset + self.content_section1_offset + reset_entry.compressed_offset,
        ))?;

        let mut lzx = LzxDecoder::new(LzxConfig {
            window_bits: control_data.window_bits,
            reset_interval_frames: control_data.reset_interval_frames,
            intel_filesize: 0,
            is_delta: false,
        });

        let skip = (entry.offset_in_folder - reset_entry.uncompressed_offset) as usize;
        let total_from_reset = skip + entry.uncompressed_length as usize;
        let decoded = lzx.decode(reader, total_from_reset)?;
        Ok(decoded[skip..].to_vec())
    }
}

fn read_section0_bytes<R: Read + Seek>(
    reader: &mut R,
    header: &ItsfHeader,
    loc: ChmLocation,
) -> Result<Vec<u8>, ExpandError> {
    reader.seek(SeekFrom::Start(header.content_section_offset + loc.offset))?;
    let mut buf = vec![0u8; loc.length as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_data_rejects_bad_signature() {
        let mut bytes = vec![0u8; 0x18];
        bytes[4..8].copy_from_slice(b"XXXX");
        assert!(matches!(read_control_data(&bytes), Err(ExpandError::Signature { .. })));
    }

    #[test]
    fn control_data_parses_window_bits_from_a_power_of_two_size() {
        let mut bytes = vec![0u8; 0x18];
        bytes[4..8].copy_from_slice(LZXC_SIGNATURE);
        bytes[8..12].copy_from_slice(&2u32.to_le_bytes()); // reset interval
        bytes[12..16].copy_from_slice(&(1u32 << 16).to_le_bytes()); // window size
        let cd = read_control_data(&bytes).unwrap();
        assert_eq!(cd.window_bits, 16);
        assert_eq!(cd.reset_interval_frames, 2);
    }

    #[test]
    fn reset_table_reads_entries_after_its_header() {
        let mut bytes = vec![0u8; 0x28];
        bytes[4..8].copy_from_slice(&2u32.to_le_bytes()); // num_entries
        bytes[8..12].copy_from_slice(&8u32.to_le_bytes()); // entry_size
        bytes[12..16].copy_from_slice(&0x28u32.to_le_bytes()); // table_offset
        bytes[0x1c..0x24].copy_from_slice(&0x8000u64.to_le_bytes()); // frame_len
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&1234u64.to_le_bytes());

        let table = read_reset_table(&bytes).unwrap();
        assert_eq!(table.entries.len(), 2);
        assert_eq!(table.entries[0].uncompressed_offset, 0);
        assert_eq!(table.entries[1].uncompressed_offset, 0x8000);
        assert_eq!(table.entries[1].compressed_offset, 1234);
    }

    #[test]
    fn pmgl_entries_parse_encint_fields() {
        let mut chunk = vec![0u8; 40];
        chunk[0..4].copy_from_slice(PMGL_SIGNATURE);
        // free_space = 0 -> entries run to the end of the chunk.
        chunk[4..8].copy_from_slice(&0u32.to_le_bytes());

        let mut entry_bytes = Vec::new();
        entry_bytes.push(5); // name_len (encint, single byte since < 0x80)
        entry_bytes.extend_from_slice(b"/home");
        entry_bytes.push(0); // section
        entry_bytes.push(10); // offset
        entry_bytes.push(20); // length
        chunk[20..20 + entry_bytes.len()].copy_from_slice(&entry_bytes);

        let entries = read_pmgl_entries(&chunk).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, b"/home");
        assert_eq!(entries[0].1, ChmLocation { section: 0, offset: 10, length: 20 });
    }
}
