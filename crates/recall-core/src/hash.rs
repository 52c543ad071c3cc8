//! Content fingerprints for change detection.

/// Computes stable content hashes with blake3.
///
/// The hash covers the exact text bytes, so any edit (including whitespace)
/// produces a different fingerprint.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// Hex-encoded blake3 digest of `text` (64 characters).
    pub fn hash(text: &str) -> String {
        blake3::hash(text.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(ContentHasher::hash("hello"), ContentHasher::hash("hello"));
    }

    #[test]
    fn test_hash_length() {
        assert_eq!(ContentHasher::hash("hello").len(), 64);
        assert_eq!(ContentHasher::hash("").len(), 64);
    }

    #[test]
    fn test_near_duplicates_differ() {
        let a = ContentHasher::hash("The quick brown fox.");
        let b = ContentHasher::hash("The quick brown fox!");
        let c = ContentHasher::hash("The quick brown fox. ");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
