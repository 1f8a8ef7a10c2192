//! Content fingerprints
//!
//! A file is identified by the MD5 of its bytes. The validation key is a short
//! checksum over (hash, size) that a manifest row must carry to prove the
//! submitter actually hashed the real file.

use crate::error::{EdwError, Result};
use std::io::Read;
use std::path::Path;

/// Number of hex digits in an MD5 digest.
pub const MD5_HEX_LEN: usize = 32;

/// Modulus applied to the validation key sum.
pub const VALIDATION_KEY_MODULUS: u64 = 10_000;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// MD5 of an in-memory buffer as lowercase hex.
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// MD5 of everything readable from `reader`, streamed in fixed-size chunks.
pub fn md5_reader<R: Read>(reader: &mut R) -> Result<String> {
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// MD5 of a file on disk.
pub fn file_md5(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    md5_reader(&mut file)
}

/// True when `s` looks like an MD5 as the warehouse stores it: 32 lowercase hex digits.
pub fn is_md5_hex(s: &str) -> bool {
    s.len() == MD5_HEX_LEN && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Derive the validation key for a (hash, size) pair.
///
/// The byte size is added to the value of every byte decoded from the hex
/// digest, the sum is reduced modulo [`VALIDATION_KEY_MODULUS`] and rendered
/// as `V<n>`. Upper case hex is accepted; anything that does not decode to
/// exactly 16 bytes is [`EdwError::MalformedHash`].
pub fn compute_validation_key(content_hash_hex: &str, byte_size: u64) -> Result<String> {
    if content_hash_hex.len() != MD5_HEX_LEN {
        return Err(EdwError::MalformedHash(content_hash_hex.to_string()));
    }

    let bytes = hex::decode(content_hash_hex)
        .map_err(|_| EdwError::MalformedHash(content_hash_hex.to_string()))?;

    let sum = bytes
        .iter()
        .fold(byte_size % VALIDATION_KEY_MODULUS, |acc, b| {
            (acc + u64::from(*b)) % VALIDATION_KEY_MODULUS
        });

    Ok(format!("V{}", sum))
}
