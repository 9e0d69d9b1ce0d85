//! Perceptual fingerprinting for raster images, plus the counter-move.
//!
//! [`extract_fingerprint`] hashes an image into a compact 64-bit value and
//! [`compare_fingerprints`] scores two of them into a same/different
//! verdict. [`evade`] goes the other way: it derives a visually
//! near-identical variant of an image whose fingerprint diverges from the
//! original's, defeating similarity lookups built on this hash family.
//!
//! Every operation is a synchronous, stateless function of its input bytes.
//! Transport, storage and presentation belong to the caller.

mod compare;
mod decode;
mod error;
mod evade;
mod hash;

pub use compare::{ComparisonResult, MATCH_THRESHOLD};
pub use decode::PixelGrid;
pub use error::Error;
pub use evade::{EvadeConfig, EvasionReport};
pub use hash::{extract, Algorithm, Fingerprint, HASH_BITS};

/// Fingerprint raw image bytes with the requested algorithm.
pub fn extract_fingerprint(bytes: &[u8], algorithm: Algorithm) -> Result<Fingerprint, Error> {
    let grid = PixelGrid::decode(bytes)?;
    hash::extract(&grid, algorithm)
}

/// Score two fingerprints into distance, similarity and a match verdict.
pub fn compare_fingerprints(a: &Fingerprint, b: &Fingerprint) -> Result<ComparisonResult, Error> {
    compare::compare(a, b)
}

/// Decode, hash and compare two images in one call.
pub fn compare_images(a: &[u8], b: &[u8], algorithm: Algorithm) -> Result<ComparisonResult, Error> {
    let fa = extract_fingerprint(a, algorithm)?;
    let fb = extract_fingerprint(b, algorithm)?;
    compare::compare(&fa, &fb)
}

/// Produce a visually close variant of `bytes` whose gradient fingerprint
/// diverges from the original's, with the before/after distance reported.
pub fn evade(bytes: &[u8], config: &EvadeConfig) -> Result<EvasionReport, Error> {
    evade::evade(bytes, config)
}
