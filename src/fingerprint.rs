//! Canonical alert identity.
//!
//! The fingerprint is a pure function of the label set: pairs sorted by key,
//! fed through 64-bit FNV-1a as key bytes, separator, value bytes, separator.
//! This matches the Alertmanager wire fingerprint, so producers migrating
//! from stock Alertmanager keep their identities. A SHA-256 mode exists for
//! legacy deployments and nothing else.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::models::FingerprintAlgorithm;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Byte inserted between every key and value. Prevents ("ab","c") from
/// colliding with ("a","bc").
const SEPARATOR: u8 = 0xfe;

#[inline]
fn fnv1a_update(mut hash: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// FNV-1a fingerprint: 16 lowercase hex digits.
pub fn fnv1a_fingerprint(labels: &BTreeMap<String, String>) -> String {
    // BTreeMap already iterates in sorted key order.
    let mut hash = FNV_OFFSET;
    for (key, value) in labels {
        hash = fnv1a_update(hash, key.as_bytes());
        hash = fnv1a_update(hash, &[SEPARATOR]);
        hash = fnv1a_update(hash, value.as_bytes());
        hash = fnv1a_update(hash, &[SEPARATOR]);
    }
    format!("{:016x}", hash)
}

/// SHA-256 fingerprint over the same byte stream: 64 lowercase hex digits.
pub fn sha256_fingerprint(labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update([SEPARATOR]);
        hasher.update(value.as_bytes());
        hasher.update([SEPARATOR]);
    }
    hex::encode(hasher.finalize())
}

/// Compute the fingerprint under the configured algorithm.
pub fn fingerprint(labels: &BTreeMap<String, String>, algo: FingerprintAlgorithm) -> String {
    match algo {
        FingerprintAlgorithm::Fnv1a => fnv1a_fingerprint(labels),
        FingerprintAlgorithm::Sha256 => sha256_fingerprint(labels),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_deterministic_and_order_independent() {
        let a = labels(&[("alertname", "HighCPU"), ("instance", "web-01")]);
        let b = labels(&[("instance", "web-01"), ("alertname", "HighCPU")]);

        assert_eq!(fnv1a_fingerprint(&a), fnv1a_fingerprint(&b));
        assert_eq!(fnv1a_fingerprint(&a), fnv1a_fingerprint(&a));
        assert_eq!(sha256_fingerprint(&a), sha256_fingerprint(&b));
    }

    #[test]
    fn test_value_sensitivity() {
        let a = labels(&[("alertname", "HighCPU"), ("instance", "web-01")]);
        let b = labels(&[("alertname", "HighCPU"), ("instance", "web-02")]);

        assert_ne!(fnv1a_fingerprint(&a), fnv1a_fingerprint(&b));
    }

    #[test]
    fn test_separator_prevents_concatenation_collisions() {
        let a = labels(&[("ab", "c")]);
        let b = labels(&[("a", "bc")]);

        assert_ne!(fnv1a_fingerprint(&a), fnv1a_fingerprint(&b));
    }

    #[test]
    fn test_empty_labels_stable() {
        let empty = BTreeMap::new();
        // Hash of the empty stream is the FNV offset basis.
        assert_eq!(fnv1a_fingerprint(&empty), format!("{:016x}", FNV_OFFSET));
        assert_eq!(fnv1a_fingerprint(&empty).len(), 16);
        assert_eq!(sha256_fingerprint(&empty).len(), 64);
    }

    #[test]
    fn test_output_shape() {
        let l = labels(&[("alertname", "DiskFull")]);
        let fp = fnv1a_fingerprint(&l);

        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fp.to_lowercase());
    }

    #[test]
    fn test_algorithm_selector() {
        let l = labels(&[("alertname", "DiskFull")]);
        assert_eq!(
            fingerprint(&l, FingerprintAlgorithm::Fnv1a).len(),
            16
        );
        assert_eq!(fingerprint(&l, FingerprintAlgorithm::Sha256).len(), 64);
    }
}
