//! SHA-256 content checksums shared by the fetcher, the store and the ledger.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Checksum of a news item, derived from its title and link.
pub fn item_checksum(title: &str, url: &str) -> String {
    sha256_hex(format!("{}:{}", title, url).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_deterministic_and_content_sensitive() {
        let a = sha256_hex(b"quarterly report");
        assert_eq!(a, sha256_hex(b"quarterly report"));
        assert_ne!(a, sha256_hex(b"quarterly report."));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_item_checksum_uses_title_and_url() {
        assert_eq!(item_checksum("T", "https://x"), sha256_hex(b"T:https://x"));
    }
}
