//! Content hash verification.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Outcome of comparing content against a catalog hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashCheck {
    pub matched: bool,
    pub actual: String,
    pub expected: String,
}

/// Hash `data` with the algorithm implied by `expected` and compare.
///
/// A 40 character reference is SHA-1, anything else is SHA-256.
pub fn check_hash(data: &[u8], expected: &str) -> HashCheck {
    let actual = if expected.len() == 40 {
        format!("{:x}", Sha1::digest(data))
    } else {
        format!("{:x}", Sha256::digest(data))
    };
    HashCheck {
        matched: actual.eq_ignore_ascii_case(expected),
        actual,
        expected: expected.to_string(),
    }
}
