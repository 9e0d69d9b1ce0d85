use thiserror::Error;

/// Failures surfaced by the core. Every one is a deterministic function of
/// the input, so none of them is worth retrying.
#[derive(Debug, Error)]
pub enum Error {
    /// Input bytes are not a raster we can read (unsupported format,
    /// truncated or corrupt).
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    /// The derived image could not be re-encoded.
    #[error("failed to encode modified image: {0}")]
    Encode(image::ImageError),

    /// The grid is too small to carry any adjacent-pixel signal.
    #[error("image of {width}x{height} pixels is too small to hash")]
    EmptyImage { width: u32, height: u32 },

    /// The two fingerprints cannot be compared bit-for-bit.
    #[error("incompatible fingerprints: {0}")]
    IncompatibleHash(String),
}
