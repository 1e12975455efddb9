//! Radix-85 text encoding for digests
//!
//! Every 4-byte group becomes 5 characters in `'!'..='u'`. An all-zero full
//! group is written as the single character `z`. A trailing partial group of
//! `n` bytes is zero-padded, encoded, and only its first `n + 1` characters
//! are kept; the decoder pads such a group back with `u` and drops the extra
//! bytes, so the two operations are exact inverses.

use crate::error::{FimError, Result};

const FIRST_CHAR: u8 = b'!';
const ZERO_GROUP: u8 = b'z';
const PADDING_CHAR: u8 = b'u';
const MAX_DIGIT: u8 = 84;

/// Encode bytes as Ascii85 text
pub fn encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len().div_ceil(4) * 5);

    for chunk in bytes.chunks(4) {
        if chunk.len() == 4 && chunk.iter().all(|b| *b == 0) {
            out.push(ZERO_GROUP as char);
            continue;
        }

        let mut group = [0u8; 4];
        group[..chunk.len()].copy_from_slice(chunk);
        let mut word = u32::from_be_bytes(group);

        let mut digits = [0u8; 5];
        for digit in digits.iter_mut().rev() {
            *digit = (word % 85) as u8 + FIRST_CHAR;
            word /= 85;
        }
        for digit in &digits[..chunk.len() + 1] {
            out.push(*digit as char);
        }
    }

    out
}

/// Decode Ascii85 text produced by [`encode`]
///
/// # Errors
///
/// [`FimError::Encoding`] on characters outside the alphabet, a `z` inside a
/// group, a lone trailing character, or a group that overflows 32 bits.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let input = text.as_bytes();
    let mut out = Vec::with_capacity(input.len() / 5 * 4 + 4);
    let mut group = [0u8; 5];
    let mut filled = 0usize;

    for (position, &c) in input.iter().enumerate() {
        if c == ZERO_GROUP {
            if filled != 0 {
                return Err(FimError::encoding(format!(
                    "'z' inside a group at offset {}",
                    position
                )));
            }
            out.extend_from_slice(&[0, 0, 0, 0]);
            continue;
        }

        let digit = c.wrapping_sub(FIRST_CHAR);
        if c < FIRST_CHAR || digit > MAX_DIGIT {
            return Err(FimError::encoding(format!(
                "invalid character {:?} at offset {}",
                c as char, position
            )));
        }

        group[filled] = digit;
        filled += 1;
        if filled == 5 {
            out.extend_from_slice(&decode_group(&group)?);
            filled = 0;
        }
    }

    match filled {
        0 => {}
        1 => return Err(FimError::encoding("truncated final group")),
        n => {
            for slot in group.iter_mut().skip(n) {
                *slot = PADDING_CHAR - FIRST_CHAR;
            }
            let bytes = decode_group(&group)?;
            out.extend_from_slice(&bytes[..n - 1]);
        }
    }

    Ok(out)
}

fn decode_group(digits: &[u8; 5]) -> Result<[u8; 4]> {
    let word = digits
        .iter()
        .fold(0u64, |acc, digit| acc * 85 + u64::from(*digit));
    let word = u32::try_from(word).map_err(|_| FimError::encoding("group exceeds 32 bits"))?;
    Ok(word.to_be_bytes())
}
