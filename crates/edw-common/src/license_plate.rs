//! License plates
//!
//! A license plate is `prefix + DDDLLL`: three decimal digits followed by three
//! upper case letters. The letters are the low-order positions, so consecutive
//! sequence numbers differ in the last letter first (`000AAA`, `000AAB`, ...,
//! `000ZZZ`, `001AAA`).

use crate::error::{EdwError, Result};

const DIGIT_PLACES: u32 = 3;
const LETTER_PLACES: u32 = 3;

/// Number of distinct plates for one prefix, `10^3 * 26^3`.
pub const PLATE_CAPACITY: i64 = 10i64.pow(DIGIT_PLACES) * 26i64.pow(LETTER_PLACES);

/// Encode a 0-based sequence number.
pub fn encode(prefix: &str, sequence: i64) -> Result<String> {
    if !(0..PLATE_CAPACITY).contains(&sequence) {
        return Err(EdwError::OutOfRange {
            sequence,
            limit: PLATE_CAPACITY,
        });
    }

    let mut remaining = sequence;
    let mut letters = [b'A'; LETTER_PLACES as usize];
    for slot in letters.iter_mut().rev() {
        *slot = b'A' + (remaining % 26) as u8;
        remaining /= 26;
    }

    let mut digits = [b'0'; DIGIT_PLACES as usize];
    for slot in digits.iter_mut().rev() {
        *slot = b'0' + (remaining % 10) as u8;
        remaining /= 10;
    }

    let mut plate = String::with_capacity(prefix.len() + (DIGIT_PLACES + LETTER_PLACES) as usize);
    plate.push_str(prefix);
    plate.extend(digits.iter().map(|b| char::from(*b)));
    plate.extend(letters.iter().map(|b| char::from(*b)));
    Ok(plate)
}

/// Plate for a database file id. Ids start at 1, so id 1 is `000AAA`.
pub fn plate_for_file_id(prefix: &str, file_id: i64) -> Result<String> {
    encode(prefix, file_id - 1)
}

/// True when `plate` is `prefix` followed by a well formed `DDDLLL` suffix.
pub fn has_plate_shape(prefix: &str, plate: &str) -> bool {
    match plate.strip_prefix(prefix) {
        Some(suffix) if suffix.len() == 6 => {
            let (digits, letters) = suffix.split_at(3);
            digits.bytes().all(|b| b.is_ascii_digit())
                && letters.bytes().all(|b| b.is_ascii_uppercase())
        },
        _ => false,
    }
}
