use std::fmt;

use image::{imageops, GrayImage};
use serde::{Deserialize, Serialize};

use crate::decode::PixelGrid;
use crate::error::Error;

/// Nominal bit width of every fingerprint at the comparison layer.
pub const HASH_BITS: u32 = 64;

/// The two fingerprint algorithms. They are numerically incompatible, so the
/// active one is always an explicit tag, never inferred from the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// 9x8 difference hash: 64 adjacent horizontal pairs, bit set when the
    /// left pixel is brighter than the right.
    DHash,
    /// 8x8 gradient hash: each pixel against its left neighbor, 7 bits per
    /// row, 56 bits total.
    Gradient,
}

impl Algorithm {
    /// Bits actually carried by the algorithm; the rest is zero padding.
    pub fn bit_len(self) -> u32 {
        match self {
            Algorithm::DHash => 64,
            Algorithm::Gradient => 56,
        }
    }
}

/// A 64-bit perceptual fingerprint tagged with the algorithm that produced
/// it. A plain value: computed once, copied freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    bits: u64,
    algorithm: Algorithm,
}

impl Fingerprint {
    pub fn from_bits(bits: u64, algorithm: Algorithm) -> Self {
        Self { bits, algorithm }
    }

    /// Parse a hex fingerprint. Accepts unpadded strings (the gradient
    /// variant renders without leading zeros); anything encoding more than
    /// 64 bits cannot take part in a comparison and is rejected.
    pub fn from_hex(hex: &str, algorithm: Algorithm) -> Result<Self, Error> {
        if hex.len() > 16 {
            return Err(Error::IncompatibleHash(format!(
                "{} hex digits encode more than {HASH_BITS} bits",
                hex.len()
            )));
        }
        let bits = u64::from_str_radix(hex, 16).map_err(|e| {
            Error::IncompatibleHash(format!("bad hex fingerprint {hex:?}: {e}"))
        })?;
        Ok(Self { bits, algorithm })
    }

    pub fn bits(self) -> u64 {
        self.bits
    }

    pub fn algorithm(self) -> Algorithm {
        self.algorithm
    }

    /// Canonical text form: lowercase hex, zero-padded to 16 digits.
    pub fn to_hex(self) -> String {
        format!("{:016x}", self.bits)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.bits)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Fingerprint an already-decoded grid with the requested algorithm.
pub fn extract(grid: &PixelGrid, algorithm: Algorithm) -> Result<Fingerprint, Error> {
    let gray = grid.to_luma8();
    check_hashable(&gray)?;
    let bits = match algorithm {
        Algorithm::DHash => dhash_bits(&gray),
        Algorithm::Gradient => gradient_bits(&gray),
    };
    Ok(Fingerprint { bits, algorithm })
}

/// A grid below 2x2 has no adjacent pair left after downscaling.
fn check_hashable(gray: &GrayImage) -> Result<(), Error> {
    let (width, height) = gray.dimensions();
    if width < 2 || height < 2 {
        return Err(Error::EmptyImage { width, height });
    }
    Ok(())
}

fn dhash_bits(gray: &GrayImage) -> u64 {
    // One spare column so every one of the 8x8 positions has a right
    // neighbor. Box downscale keeps the hash stable under resampling noise.
    let small = imageops::thumbnail(gray, 9, 8);
    let mut bits = 0u64;
    for y in 0..8 {
        for x in 0..8 {
            let left = small.get_pixel(x, y)[0];
            let right = small.get_pixel(x + 1, y)[0];
            bits = (bits << 1) | u64::from(left > right);
        }
    }
    bits
}

fn gradient_bits(gray: &GrayImage) -> u64 {
    // 7 comparisons per row; the first column only ever serves as a left
    // neighbor. Packed big-endian into the low 56 bits.
    let small = imageops::thumbnail(gray, 8, 8);
    let mut bits = 0u64;
    for y in 0..8 {
        for x in 1..8 {
            let prev = small.get_pixel(x - 1, y)[0];
            let cur = small.get_pixel(x, y)[0];
            bits = (bits << 1) | u64::from(cur > prev);
        }
    }
    bits
}
