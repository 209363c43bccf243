//! `digest(text, n)`: derives a stable 64-bit identifier from a string and a
//! counter.

use sha1::{Digest, Sha1};

/// SHA-1 of `text`'s UTF-8 bytes concatenated with the big-endian bytes of
/// `n`, truncated to its low 64 bits and returned in host-endian form.
pub fn digest(text: &str, n: u64) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    hasher.update(n.to_be_bytes());
    let result = hasher.finalize();

    let mut low = [0u8; 8];
    low.copy_from_slice(&result[12..20]);
    u64::from_be_bytes(low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic() {
        assert_eq!(digest("server-1", 7), digest("server-1", 7));
    }

    #[test]
    fn changes_with_text() {
        assert_ne!(digest("server-1", 7), digest("server-2", 7));
    }

    #[test]
    fn changes_with_n() {
        assert_ne!(digest("server-1", 7), digest("server-1", 8));
    }
}
