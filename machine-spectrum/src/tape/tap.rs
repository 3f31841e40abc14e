//! TAP file format.
//!
//! The simplest Spectrum tape container: a concatenation of records, each a
//! 2-byte little-endian length followed by that many payload bytes. The
//! first payload byte is the flag (0x00 header, 0xFF data) and the last is
//! an XOR checksum — carried through verbatim; the core does not verify it.

use crate::tape::TapeBlock;

/// Pause after each TAP block, in milliseconds. TAP carries no pause
/// information; one second matches what the ROM saver leaves on real tapes.
const BLOCK_PAUSE_MS: u32 = 1000;

/// Parse a TAP image into blocks.
///
/// # Errors
///
/// Returns a message naming the offset of any truncated record.
pub fn parse(data: &[u8]) -> Result<Vec<TapeBlock>, String> {
    let mut blocks = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if offset + 2 > data.len() {
            return Err(format!(
                "truncated TAP: expected 2-byte length at offset {offset}"
            ));
        }

        let length = usize::from(u16::from(data[offset]) | (u16::from(data[offset + 1]) << 8));
        offset += 2;

        if offset + length > data.len() {
            return Err(format!(
                "truncated TAP block at offset {}: need {length} bytes, {} remain",
                offset - 2,
                data.len() - offset
            ));
        }

        blocks.push(TapeBlock::standard(
            data[offset..offset + length].to_vec(),
            BLOCK_PAUSE_MS,
        ));
        offset += length;
    }

    Ok(blocks)
}

/// Serialize blocks back into a TAP image: u16 LE length + payload each.
#[must_use]
pub fn serialize(blocks: &[TapeBlock]) -> Vec<u8> {
    let mut out = Vec::new();
    for block in blocks {
        let length = block.data.len() as u16;
        out.push(length as u8);
        out.push((length >> 8) as u8);
        out.extend_from_slice(&block.data);
    }
    out
}

/// Build a well-formed TAP record from a flag byte and payload, computing
/// the checksum. Used by the recorder and by tests.
#[must_use]
pub fn make_record(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut checksum = flag;
    for &byte in payload {
        checksum ^= byte;
    }
    let length = (payload.len() + 2) as u16;
    let mut record = Vec::with_capacity(payload.len() + 4);
    record.push(length as u8);
    record.push((length >> 8) as u8);
    record.push(flag);
    record.extend_from_slice(payload);
    record.push(checksum);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_image() {
        assert!(parse(&[]).expect("empty is valid").is_empty());
    }

    #[test]
    fn parse_single_record() {
        let image = make_record(0x00, &[1, 2, 3]);
        let blocks = parse(&image).expect("valid record");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].data, vec![0x00, 1, 2, 3, 0x00]);
        assert_eq!(blocks[0].pause_ms, 1000);
    }

    #[test]
    fn parse_two_records() {
        let mut image = make_record(0x00, &[0x11]);
        image.extend(make_record(0xFF, &[0xAA, 0xBB]));
        let blocks = parse(&image).expect("valid records");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].data[0], 0x00);
        assert_eq!(blocks[1].data[0], 0xFF);
    }

    #[test]
    fn parse_truncated_length() {
        let err = parse(&[0x05]).unwrap_err();
        assert!(err.contains("offset 0"), "{err}");
    }

    #[test]
    fn parse_truncated_payload() {
        let err = parse(&[0x05, 0x00, 0x01, 0x02]).unwrap_err();
        assert!(err.contains("truncated"), "{err}");
    }

    #[test]
    fn serialize_round_trip() {
        let mut image = make_record(0x00, &[0u8; 17]);
        image.extend(make_record(0xFF, &[9, 8, 7]));
        let blocks = parse(&image).expect("valid");
        assert_eq!(serialize(&blocks), image);
    }
}
