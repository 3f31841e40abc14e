//! Pulse-to-bytes decoder for recorded TAP blocks.
//!
//! Classifies a captured pulse run against the ROM loader timings. A block
//! is pilot tone, two sync pulses, then bit pairs (two equal half-pulses
//! per bit, MSB first). Pulses that drift are accepted within a tolerance
//! of a quarter reference length (at least 200 T-states); ambiguous pairs
//! fall back to comparing the pair sum against twice the reference.

use crate::tape::timing;

/// Minimum pilot pulses before sync is accepted.
const MIN_PILOT_PULSES: usize = 100;

fn tolerance(reference: u32) -> u32 {
    (reference / 4).max(200)
}

fn matches(pulse: u32, reference: u32) -> bool {
    pulse.abs_diff(reference) <= tolerance(reference)
}

/// Decode one block's pulse run into bytes.
///
/// # Errors
///
/// Returns a message when the pilot is too short, sync is missing, or a
/// bit pair cannot be classified.
pub fn decode_pulses(pulses: &[u32]) -> Result<Vec<u8>, String> {
    let pilot = u32::from(timing::PILOT_PULSE);
    let sync1 = u32::from(timing::SYNC1_PULSE);
    let sync2 = u32::from(timing::SYNC2_PULSE);

    let mut index = 0;
    while index < pulses.len() && matches(pulses[index], pilot) {
        index += 1;
    }
    if index < MIN_PILOT_PULSES {
        return Err(format!("pilot too short: {index} pulses"));
    }

    if index + 2 > pulses.len() {
        return Err("block ends before sync pulses".to_string());
    }
    if !matches(pulses[index], sync1) || !matches(pulses[index + 1], sync2) {
        return Err(format!(
            "sync pulses out of range: {} / {}",
            pulses[index],
            pulses[index + 1]
        ));
    }
    index += 2;

    // Trim trailing pulses so the data region holds whole bytes
    // (16 pulses = 8 bit pairs = 1 byte).
    let data = &pulses[index..];
    let data = &data[..data.len() - (data.len() % 16)];
    if data.is_empty() {
        return Err("no data pulses after sync".to_string());
    }

    let mut bytes = Vec::with_capacity(data.len() / 16);
    let mut current = 0u8;
    let mut bits = 0u8;
    for pair in data.chunks_exact(2) {
        let bit = classify_pair(pair[0], pair[1])?;
        current = (current << 1) | bit;
        bits += 1;
        if bits == 8 {
            bytes.push(current);
            current = 0;
            bits = 0;
        }
    }

    Ok(bytes)
}

/// Classify a bit pair as 0 or 1.
fn classify_pair(first: u32, second: u32) -> Result<u8, String> {
    let zero = u32::from(timing::ZERO_PULSE);
    let one = u32::from(timing::ONE_PULSE);

    if matches(first, zero) && matches(second, zero) {
        return Ok(0);
    }
    if matches(first, one) && matches(second, one) {
        return Ok(1);
    }

    // Tie-break on the pair sum against twice the reference
    let sum = first + second;
    if sum.abs_diff(2 * zero) <= tolerance(2 * zero) {
        Ok(0)
    } else if sum.abs_diff(2 * one) <= tolerance(2 * one) {
        Ok(1)
    } else {
        Err(format!("unclassifiable bit pair: {first} / {second}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tape::timing::{ONE_PULSE, PILOT_PULSE, SYNC1_PULSE, SYNC2_PULSE, ZERO_PULSE};

    /// Build a clean pulse run for the given bytes.
    fn make_pulses(payload: &[u8], pilot_count: usize) -> Vec<u32> {
        let mut pulses = vec![u32::from(PILOT_PULSE); pilot_count];
        pulses.push(u32::from(SYNC1_PULSE));
        pulses.push(u32::from(SYNC2_PULSE));
        for &byte in payload {
            for bit in (0..8).rev() {
                let len = if byte & (1 << bit) != 0 {
                    u32::from(ONE_PULSE)
                } else {
                    u32::from(ZERO_PULSE)
                };
                pulses.push(len);
                pulses.push(len);
            }
        }
        pulses
    }

    #[test]
    fn clean_block_decodes() {
        let payload = [0x00, 0x03, 0xAA, 0x55, 0xFF];
        let pulses = make_pulses(&payload, 500);
        assert_eq!(decode_pulses(&pulses).expect("decodes"), payload);
    }

    #[test]
    fn jittered_pulses_within_tolerance_decode() {
        let payload = [0xC3, 0x3C];
        let mut pulses = make_pulses(&payload, 200);
        for (i, pulse) in pulses.iter_mut().enumerate() {
            // ±150 T-states of jitter, inside every tolerance band
            *pulse = if i % 2 == 0 { *pulse + 150 } else { *pulse - 150 };
        }
        assert_eq!(decode_pulses(&pulses).expect("decodes"), payload);
    }

    #[test]
    fn short_pilot_rejected() {
        let pulses = make_pulses(&[0xFF], 50);
        let err = decode_pulses(&pulses).unwrap_err();
        assert!(err.contains("pilot"), "{err}");
    }

    #[test]
    fn missing_sync_rejected() {
        let mut pulses = vec![u32::from(PILOT_PULSE); 200];
        pulses.push(u32::from(ZERO_PULSE)); // no sync pair
        pulses.push(u32::from(ZERO_PULSE));
        assert!(decode_pulses(&pulses).is_err());
    }

    #[test]
    fn trailing_partial_byte_trimmed() {
        let payload = [0x12, 0x34];
        let mut pulses = make_pulses(&payload, 150);
        // Six stray pulses: less than a byte, trimmed away
        pulses.extend_from_slice(&[u32::from(ZERO_PULSE); 6]);
        assert_eq!(decode_pulses(&pulses).expect("decodes"), payload);
    }

    #[test]
    fn garbage_pair_aborts() {
        let mut pulses = make_pulses(&[0xFF], 150);
        // Corrupt one data pulse beyond any tolerance or tie-break
        let len = pulses.len();
        pulses[len - 4] = 5000;
        pulses[len - 3] = 5000;
        assert!(decode_pulses(&pulses).is_err());
    }

    #[test]
    fn tie_break_on_pair_sum() {
        let payload = [0x80];
        let mut pulses = make_pulses(&payload, 150);
        // Skew the first bit pair: halves individually off, sum preserved
        let base = pulses.len() - 16;
        pulses[base] = u32::from(ONE_PULSE) + 500;
        pulses[base + 1] = u32::from(ONE_PULSE) - 500;
        assert_eq!(decode_pulses(&pulses).expect("decodes"), payload);
    }
}
