//! Representative fingerprints
//!
//! SHA-256 over the normalized name, district, and jurisdiction. Two
//! candidates in one run sharing a fingerprint are the same person under
//! different external ids and get merged.

use sha2::{Digest, Sha256};

/// Compute the dedup fingerprint for a representative
#[must_use]
pub fn representative_fingerprint(
    full_name: &str,
    district: Option<&str>,
    jurisdiction_code: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(full_name.trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(district.unwrap_or("").trim().to_lowercase().as_bytes());
    hasher.update(b"|");
    hasher.update(jurisdiction_code.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_share_a_fingerprint() {
        let a = representative_fingerprint("Sandra Tremblay", Some("Ottawa Centre"), "ca-on");
        let b = representative_fingerprint("sandra tremblay", Some("OTTAWA CENTRE"), "ca-on");
        assert_eq!(a, b);
    }

    #[test]
    fn district_and_jurisdiction_participate() {
        let base = representative_fingerprint("Sandra Tremblay", Some("Ottawa Centre"), "ca-on");
        assert_ne!(
            base,
            representative_fingerprint("Sandra Tremblay", Some("Ottawa South"), "ca-on")
        );
        assert_ne!(
            base,
            representative_fingerprint("Sandra Tremblay", Some("Ottawa Centre"), "ca-qc")
        );
    }

    #[test]
    fn missing_district_is_stable() {
        let a = representative_fingerprint("Sandra Tremblay", None, "ca-on");
        let b = representative_fingerprint("Sandra Tremblay", Some(""), "ca-on");
        assert_eq!(a, b);
    }
}
