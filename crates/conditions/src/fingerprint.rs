use sha2::{Digest, Sha256};

/// Computes a condition fingerprint: the SHA-256 of the canonical JSON,
/// truncated to 128 bits and rendered as lower-case base16 (32 chars).
///
/// Stability matters more than anything else here — fingerprints are
/// primary keys that survive process restarts and deduplicate conditions
/// across bots. Semantically equal conditions must collide; semantically
/// different ones must not, except with cryptographic negligibility.
pub fn fingerprint(canonical_json: &str) -> String {
    let digest = Sha256::digest(canonical_json.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_32_hex_chars() {
        let fp = fingerprint("{\"type\":\"indicator\"}");
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn fingerprint_is_deterministic_and_input_sensitive() {
        let a = fingerprint("abc");
        assert_eq!(a, fingerprint("abc"));
        assert_ne!(a, fingerprint("abd"));
    }
}
