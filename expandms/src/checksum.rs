//! Integrity checks (`spec.md` §4.5.1, §4.5.3): CAB's block checksum and
//! the CRC-32 used by OAB. CRC-32 is delegated to `crc32fast`, already in
//! the teacher's dependency table and used by nothing else in its tree —
//! carried forward rather than hand-rolled, per the "never fall back to
//! stdlib where the ecosystem has a crate" rule.

/// CAB's data-block checksum (`spec.md` §4.5.1): XOR of 32-bit
/// little-endian words taken from the compressed-size/uncompressed-size
/// header pair followed by the block payload, with any trailing 1-3
/// bytes folded in big-endian. A stored checksum of zero means "skip the
/// check" (some encoders never compute it).
pub fn cab_checksum(compressed_size: u16, uncompressed_size: u16, payload: &[u8]) -> u32 {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&compressed_size.to_le_bytes());
    buf.extend_from_slice(&uncompressed_size.to_le_bytes());
    buf.extend_from_slice(payload);
    checksum_words(&buf)
}

fn checksum_words(data: &[u8]) -> u32 {
    let mut checksum = 0u32;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_le_bytes(chunk.try_into().unwrap());
        checksum ^= word;
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut trailing = [0u8; 4];
        for (i, &b) in remainder.iter().enumerate() {
            trailing[3 - i] = b;
        }
        checksum ^= u32::from_be_bytes(trailing);
    }
    checksum
}

/// OAB's per-block CRC-32 (`spec.md` §4.5.3), computed over decompressed
/// bytes.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_empty_payload_is_the_size_header_alone() {
        let c = cab_checksum(0, 0, &[]);
        assert_eq!(c, 0);
    }

    #[test]
    fn checksum_folds_trailing_bytes_big_endian() {
        let c1 = checksum_words(&[0x01, 0x02, 0x03]);
        let c2 = checksum_words(&[0x01, 0x02, 0x03, 0x00]);
        // the trailing fold is big-endian, so a 3-byte tail checksums
        // differently than if it were simply zero-padded little-endian.
        assert_ne!(c1, u32::from_le_bytes([0x01, 0x02, 0x03, 0x00]));
        let _ = c2;
    }

    #[test]
    fn crc32_matches_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF43926);
    }
}
