//! TZX file format (subset).
//!
//! A TZX file is a 10-byte header (`"ZXTape!" 0x1A` + major/minor) followed
//! by ID-tagged blocks. Supported here: standard speed data (0x10), turbo
//! speed data (0x11), pause (0x20), group start/end (0x21/0x22), text
//! description (0x30), and archive info (0x32) — the metadata blocks parse
//! and contribute nothing to playback. Any other ID aborts the load with
//! the ID and file offset: silently skipping an unknown block desyncs every
//! block after it.
//!
//! Reference: <https://worldofspectrum.net/TZXformat.html>

use crate::tape::{BlockTimings, TapeBlock};

/// TZX header magic: "ZXTape!" + 0x1A.
const MAGIC: &[u8; 8] = b"ZXTape!\x1A";

/// A parsed TZX file, lowered to playable blocks.
#[derive(Debug, Clone)]
pub struct TzxFile {
    pub major: u8,
    pub minor: u8,
    pub blocks: Vec<TapeBlock>,
}

/// Parse a TZX image.
///
/// # Errors
///
/// Returns a message for a bad signature, a truncated block, or an
/// unsupported block ID (naming the ID and its file offset).
pub fn parse(data: &[u8]) -> Result<TzxFile, String> {
    if data.len() < 10 {
        return Err("TZX file too short for header (need 10 bytes)".to_string());
    }
    if &data[0..8] != MAGIC {
        return Err("invalid TZX signature (expected \"ZXTape!\" + 0x1A)".to_string());
    }

    let major = data[8];
    let minor = data[9];
    let mut blocks = Vec::new();
    let mut pos = 10;

    while pos < data.len() {
        let block_offset = pos;
        let block_id = data[pos];
        pos += 1;

        match block_id {
            0x10 => blocks.push(parse_standard_speed(data, &mut pos)?),
            0x11 => blocks.push(parse_turbo_speed(data, &mut pos)?),
            0x20 => {
                // A standalone pause extends the previous block's pause
                need(data, pos, 2, "pause block")?;
                let pause_ms = u32::from(read_u16_le(data, pos));
                pos += 2;
                if let Some(last) = blocks.last_mut() {
                    last.pause_ms += pause_ms;
                }
            }
            0x21 => skip_len_prefixed(data, &mut pos, 1, "group start")?,
            0x22 => {}
            0x30 => skip_len_prefixed(data, &mut pos, 1, "text description")?,
            0x32 => skip_len_prefixed(data, &mut pos, 2, "archive info")?,
            other => {
                return Err(format!(
                    "unsupported TZX block ID 0x{other:02X} at offset {block_offset}"
                ));
            }
        }
    }

    Ok(TzxFile {
        major,
        minor,
        blocks,
    })
}

fn need(data: &[u8], pos: usize, n: usize, what: &str) -> Result<(), String> {
    if pos + n > data.len() {
        Err(format!(
            "truncated TZX {what} at offset {pos}: need {n} bytes, {} remain",
            data.len() - pos
        ))
    } else {
        Ok(())
    }
}

fn read_u16_le(data: &[u8], pos: usize) -> u16 {
    u16::from(data[pos]) | (u16::from(data[pos + 1]) << 8)
}

fn read_u24_le(data: &[u8], pos: usize) -> u32 {
    u32::from(data[pos]) | (u32::from(data[pos + 1]) << 8) | (u32::from(data[pos + 2]) << 16)
}

/// Block 0x10: u16 pause (ms), u16 length, payload.
fn parse_standard_speed(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 4, "standard speed header")?;
    let pause_ms = u32::from(read_u16_le(data, *pos));
    let length = usize::from(read_u16_le(data, *pos + 2));
    *pos += 4;

    need(data, *pos, length, "standard speed data")?;
    let payload = data[*pos..*pos + length].to_vec();
    *pos += length;

    Ok(TapeBlock::standard(payload, pause_ms))
}

/// Block 0x11: custom pilot/sync/bit timings, u24 length, payload.
fn parse_turbo_speed(data: &[u8], pos: &mut usize) -> Result<TapeBlock, String> {
    need(data, *pos, 18, "turbo speed header")?;
    let timings = BlockTimings {
        pilot_pulse: read_u16_le(data, *pos),
        sync1: read_u16_le(data, *pos + 2),
        sync2: read_u16_le(data, *pos + 4),
        zero_pulse: read_u16_le(data, *pos + 6),
        one_pulse: read_u16_le(data, *pos + 8),
        pilot_count: Some(read_u16_le(data, *pos + 10)),
        used_bits_last: match data[*pos + 12] {
            0 => 8,
            bits => bits,
        },
    };
    let pause_ms = u32::from(read_u16_le(data, *pos + 13));
    let length = read_u24_le(data, *pos + 15) as usize;
    *pos += 18;

    need(data, *pos, length, "turbo speed data")?;
    let payload = data[*pos..*pos + length].to_vec();
    *pos += length;

    Ok(TapeBlock {
        data: payload,
        pause_ms,
        timings,
    })
}

/// Skip a metadata block whose body starts with its own length field.
fn skip_len_prefixed(
    data: &[u8],
    pos: &mut usize,
    length_bytes: usize,
    what: &str,
) -> Result<(), String> {
    need(data, *pos, length_bytes, what)?;
    let length = if length_bytes == 1 {
        usize::from(data[*pos])
    } else {
        usize::from(read_u16_le(data, *pos))
    };
    *pos += length_bytes;
    need(data, *pos, length, what)?;
    *pos += length;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::timing;

    fn header() -> Vec<u8> {
        let mut data = MAGIC.to_vec();
        data.push(1); // major
        data.push(20); // minor
        data
    }

    fn standard_block(pause_ms: u16, payload: &[u8]) -> Vec<u8> {
        let mut block = vec![0x10];
        block.extend_from_slice(&pause_ms.to_le_bytes());
        block.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        block.extend_from_slice(payload);
        block
    }

    #[test]
    fn parse_standard_speed_block() {
        let mut image = header();
        image.extend(standard_block(500, &[0xFF, 1, 2, 3, 0xFD]));

        let tzx = parse(&image).expect("valid TZX");
        assert_eq!(tzx.major, 1);
        assert_eq!(tzx.minor, 20);
        assert_eq!(tzx.blocks.len(), 1);
        assert_eq!(tzx.blocks[0].pause_ms, 500);
        assert_eq!(tzx.blocks[0].data, vec![0xFF, 1, 2, 3, 0xFD]);
        assert_eq!(tzx.blocks[0].timings.zero_pulse, timing::ZERO_PULSE);
    }

    #[test]
    fn parse_turbo_block_carries_custom_timings() {
        let mut image = header();
        image.push(0x11);
        image.extend_from_slice(&1500u16.to_le_bytes()); // pilot pulse
        image.extend_from_slice(&400u16.to_le_bytes()); // sync1
        image.extend_from_slice(&500u16.to_le_bytes()); // sync2
        image.extend_from_slice(&600u16.to_le_bytes()); // zero
        image.extend_from_slice(&1200u16.to_le_bytes()); // one
        image.extend_from_slice(&4000u16.to_le_bytes()); // pilot count
        image.push(6); // used bits in last byte
        image.extend_from_slice(&100u16.to_le_bytes()); // pause
        image.extend_from_slice(&[2, 0, 0]); // u24 length
        image.extend_from_slice(&[0xAB, 0xCD]);

        let tzx = parse(&image).expect("valid turbo block");
        let block = &tzx.blocks[0];
        assert_eq!(block.timings.pilot_pulse, 1500);
        assert_eq!(block.timings.pilot_count, Some(4000));
        assert_eq!(block.timings.used_bits_last, 6);
        assert_eq!(block.pause_ms, 100);
        assert_eq!(block.data, vec![0xAB, 0xCD]);
    }

    #[test]
    fn pause_block_extends_previous_pause() {
        let mut image = header();
        image.extend(standard_block(100, &[0xFF, 0xFF]));
        image.push(0x20);
        image.extend_from_slice(&2000u16.to_le_bytes());

        let tzx = parse(&image).expect("valid");
        assert_eq!(tzx.blocks[0].pause_ms, 2100);
    }

    #[test]
    fn metadata_blocks_are_skipped() {
        let mut image = header();
        image.push(0x30); // text description
        image.push(4);
        image.extend_from_slice(b"Test");
        image.push(0x21); // group start
        image.push(1);
        image.push(b'G');
        image.push(0x22); // group end
        image.extend(standard_block(0, &[0xFF]));

        let tzx = parse(&image).expect("valid");
        assert_eq!(tzx.blocks.len(), 1);
    }

    #[test]
    fn unknown_block_id_names_id_and_offset() {
        let mut image = header();
        image.extend(standard_block(0, &[0xFF]));
        let unknown_offset = image.len();
        image.push(0x19); // generalized data: unsupported

        let err = parse(&image).unwrap_err();
        assert!(err.contains("0x19"), "{err}");
        assert!(err.contains(&unknown_offset.to_string()), "{err}");
    }

    #[test]
    fn bad_signature_rejected() {
        let err = parse(b"NotATape!!\x1A\x01\x14").unwrap_err();
        assert!(err.contains("signature"), "{err}");
    }

    #[test]
    fn truncated_block_rejected() {
        let mut image = header();
        image.push(0x10);
        image.extend_from_slice(&[0, 0, 10, 0]); // claims 10 bytes, has none
        assert!(parse(&image).is_err());
    }
}
