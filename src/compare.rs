use serde::Serialize;

use crate::error::Error;
use crate::hash::{Fingerprint, HASH_BITS};

/// Similarity at or above this percentage counts as the same subject.
/// Policy constant, tuned for photos of people; not derived from anything.
pub const MATCH_THRESHOLD: f64 = 85.0;

/// Outcome of comparing two fingerprints. Pure data, derived entirely from
/// the two operands.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ComparisonResult {
    /// Differing bits across all 64 positions.
    pub hamming_distance: u32,
    /// (1 - distance/64) * 100, so 0..=100.
    pub similarity: f64,
    pub is_match: bool,
}

/// Hamming-compare two fingerprints of the same algorithm.
pub fn compare(a: &Fingerprint, b: &Fingerprint) -> Result<ComparisonResult, Error> {
    if a.algorithm() != b.algorithm() {
        return Err(Error::IncompatibleHash(format!(
            "cannot compare {:?} ({} bits) against {:?} ({} bits)",
            a.algorithm(),
            a.algorithm().bit_len(),
            b.algorithm(),
            b.algorithm().bit_len(),
        )));
    }
    let hamming_distance = (a.bits() ^ b.bits()).count_ones();
    let similarity = (1.0 - f64::from(hamming_distance) / f64::from(HASH_BITS)) * 100.0;
    Ok(ComparisonResult {
        hamming_distance,
        similarity,
        is_match: similarity >= MATCH_THRESHOLD,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Algorithm;

    fn fp(bits: u64) -> Fingerprint {
        Fingerprint::from_bits(bits, Algorithm::DHash)
    }

    #[test]
    fn identical_fingerprints_match_fully() {
        let r = compare(&fp(0xdead_beef_0123_4567), &fp(0xdead_beef_0123_4567)).unwrap();
        assert_eq!(r.hamming_distance, 0);
        assert_eq!(r.similarity, 100.0);
        assert!(r.is_match);
    }

    #[test]
    fn distance_is_symmetric_and_bounded() {
        let a = fp(0xffff_0000_ffff_0000);
        let b = fp(0x0f0f_0f0f_0f0f_0f0f);
        let ab = compare(&a, &b).unwrap();
        let ba = compare(&b, &a).unwrap();
        assert_eq!(ab.hamming_distance, ba.hamming_distance);
        assert!(ab.hamming_distance <= 64);
    }

    #[test]
    fn similarity_is_linear_in_distance() {
        // 16 differing bits -> 75.0, exactly.
        let r = compare(&fp(0), &fp(0xffff)).unwrap();
        assert_eq!(r.hamming_distance, 16);
        assert_eq!(r.similarity, 75.0);

        // All 64 bits differ -> 0.0.
        let r = compare(&fp(0), &fp(u64::MAX)).unwrap();
        assert_eq!(r.hamming_distance, 64);
        assert_eq!(r.similarity, 0.0);
    }

    #[test]
    fn match_threshold_boundary() {
        // 9 bits apart: 85.9375% similar, still a match.
        let nine = compare(&fp(0), &fp(0x1ff)).unwrap();
        assert_eq!(nine.hamming_distance, 9);
        assert!(nine.similarity >= MATCH_THRESHOLD);
        assert!(nine.is_match);

        // 10 bits apart: 84.375%, no longer a match.
        let ten = compare(&fp(0), &fp(0x3ff)).unwrap();
        assert_eq!(ten.hamming_distance, 10);
        assert_eq!(ten.similarity, 84.375);
        assert!(!ten.is_match);
    }

    #[test]
    fn mixed_algorithms_are_incompatible() {
        let d = Fingerprint::from_bits(0, Algorithm::DHash);
        let g = Fingerprint::from_bits(0, Algorithm::Gradient);
        assert!(matches!(
            compare(&d, &g),
            Err(Error::IncompatibleHash(_))
        ));
    }

    #[test]
    fn result_serializes_for_collaborators() {
        let r = compare(&fp(0), &fp(0x3)).unwrap();
        let json = serde_json::to_value(r).unwrap();
        assert_eq!(json["hamming_distance"], 2);
        assert_eq!(json["is_match"], true);
    }
}
