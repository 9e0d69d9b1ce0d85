use std::io::Cursor;

use image::{imageops, DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::filter::filter3x3;
use imageproc::geometric_transformations::{warp, Interpolation, Projection};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::decode::PixelGrid;
use crate::error::Error;
use crate::hash::{Algorithm, Fingerprint};

// Stage policy constants. Kept verbatim from the tuned pipeline; none of
// them is derived.
const DIAGONAL_STRIDE: u32 = 15;
const NOISE_SPAN: i16 = 15;
const TEXTURE_STRIDE: u32 = 8;
const TEXTURE_BOOST: i16 = 10;
const PERMUTE_STRIDE: u32 = 30;
/// Draws above this rotate the channels, i.e. 40% of lattice points.
const PERMUTE_SKIP: f64 = 0.6;
const LIFT_GAIN: f32 = 1.15;
const LIFT_BIAS: f32 = 10.0;
const DITHER_STRIDE: u32 = 4;
const DITHER_AMPLITUDE: i16 = 8;
const GRID_STRIDE: u32 = 25;
const GRID_INTENSITY: f32 = 50.0;
const GRID_OPACITY: f32 = 0.05;
const WARP_JITTER: u32 = 3;
const CAST_SPAN: i16 = 8;
const POLISH_CONTRAST: f32 = 1.05;
const POLISH_SATURATION: f32 = 1.10;

/// 3x3 Gaussian, the separable [1 2 1]/4 tap pair.
const BLUR_KERNEL: [f32; 9] = [
    1.0 / 16.0,
    2.0 / 16.0,
    1.0 / 16.0,
    2.0 / 16.0,
    4.0 / 16.0,
    2.0 / 16.0,
    1.0 / 16.0,
    2.0 / 16.0,
    1.0 / 16.0,
];
const SHARPEN_KERNEL: [f32; 9] = [0.0, -1.0, 0.0, -1.0, 5.0, -1.0, 0.0, -1.0, 0.0];

/// Knobs for an evasion run. Defaults reproduce the stock pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvadeConfig {
    /// Final brightness scale (0.85 = slight darkening).
    pub brightness_factor: f32,
    /// Additive boost along the diagonal accent lines.
    pub gradient_factor: i16,
    /// Seed for every random draw in the run. Same seed, same input bytes,
    /// same config: byte-identical output.
    pub seed: u64,
}

impl Default for EvadeConfig {
    fn default() -> Self {
        Self {
            brightness_factor: 0.85,
            gradient_factor: 80,
            seed: 42,
        }
    }
}

/// What an evasion run produced. `image` holds the re-encoded PNG and stays
/// out of the serialized form; collaborators ship the bytes separately.
#[derive(Debug, Clone, Serialize)]
pub struct EvasionReport {
    pub original: Fingerprint,
    pub modified: Fingerprint,
    pub hamming_distance: u32,
    #[serde(skip_serializing)]
    pub image: Vec<u8>,
}

/// Run the perturbation pipeline over `bytes` and report how far the
/// fingerprint moved.
///
/// The working buffer is one exclusively-owned RGB grid mutated stage by
/// stage. Before/after fingerprints are always the gradient variant so the
/// reported distance is measured consistently, whatever callers hash with
/// elsewhere. Stages whose stride exceeds the image simply skip those
/// coordinates; tiny images are not an error.
pub fn evade(bytes: &[u8], config: &EvadeConfig) -> Result<EvasionReport, Error> {
    let original = gradient_hash(bytes)?;

    let mut img = PixelGrid::decode(bytes)?.to_rgb8();
    let mut rng = StdRng::seed_from_u64(config.seed);

    // Pattern overlays
    accent_diagonals(&mut img, config.gradient_factor);
    inject_noise(&mut img, &mut rng);
    texture_grid(&mut img);

    // Color and contrast
    permute_channels(&mut img, &mut rng);
    lift_contrast(&mut img);
    dither(&mut img);

    // Edge, frequency and geometry
    img = blur_sharpen(&img);
    grid_overlay(&mut img);
    img = perspective_jitter(&img, &mut rng);
    color_cast(&mut img, &mut rng);

    polish(&mut img, config.brightness_factor);

    let png = encode_png(img)?;
    let modified = gradient_hash(&png)?;
    let hamming_distance = (original.bits() ^ modified.bits()).count_ones();
    tracing::debug!("evaded {original} -> {modified}, {hamming_distance} bits apart");

    Ok(EvasionReport {
        original,
        modified,
        hamming_distance,
        image: png,
    })
}

/// Gradient hash of encoded bytes. Deliberately local to the pipeline: the
/// before/after comparison is pinned to this one variant instead of going
/// through the general extractor's algorithm selection.
fn gradient_hash(bytes: &[u8]) -> Result<Fingerprint, Error> {
    let gray = PixelGrid::decode(bytes)?.to_luma8();
    let (width, height) = gray.dimensions();
    if width < 2 || height < 2 {
        return Err(Error::EmptyImage { width, height });
    }
    let small = imageops::thumbnail(&gray, 8, 8);
    let mut bits = 0u64;
    for y in 0..8 {
        for x in 1..8 {
            let prev = small.get_pixel(x - 1, y)[0];
            let cur = small.get_pixel(x, y)[0];
            bits = (bits << 1) | u64::from(cur > prev);
        }
    }
    Ok(Fingerprint::from_bits(bits, Algorithm::Gradient))
}

fn shift(v: u8, delta: i16) -> u8 {
    (i16::from(v) + delta).clamp(0, 255) as u8
}

fn saturate(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Stage 1: brighten every 15th pixel along both main diagonals.
fn accent_diagonals(img: &mut RgbImage, boost: i16) {
    let (w, h) = img.dimensions();
    for i in (0..w.min(h)).step_by(DIAGONAL_STRIDE as usize) {
        for (x, y) in [(i, i), (w - 1 - i, i)] {
            for c in img.get_pixel_mut(x, y).0.iter_mut() {
                *c = shift(*c, boost);
            }
        }
    }
}

/// Stage 2: uniform noise in [-15, +15] on every channel of every pixel.
fn inject_noise(img: &mut RgbImage, rng: &mut StdRng) {
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = shift(*c, rng.random_range(-NOISE_SPAN..=NOISE_SPAN));
        }
    }
}

/// Stage 3: +10 on an 8-pixel lattice where (x+y) lands on the 16-phase.
fn texture_grid(img: &mut RgbImage) {
    let (w, h) = img.dimensions();
    for y in (0..h).step_by(TEXTURE_STRIDE as usize) {
        for x in (0..w).step_by(TEXTURE_STRIDE as usize) {
            if (x + y) % (2 * TEXTURE_STRIDE) == 0 {
                for c in img.get_pixel_mut(x, y).0.iter_mut() {
                    *c = shift(*c, TEXTURE_BOOST);
                }
            }
        }
    }
}

/// Stage 4: rotate the channels of 40% of the points on a 30-pixel lattice.
/// Leaves luminance roughly alone while flipping local gradient signs.
fn permute_channels(img: &mut RgbImage, rng: &mut StdRng) {
    let (w, h) = img.dimensions();
    for y in (0..h).step_by(PERMUTE_STRIDE as usize) {
        for x in (0..w).step_by(PERMUTE_STRIDE as usize) {
            if rng.random::<f64>() > PERMUTE_SKIP {
                let [r, g, b] = img.get_pixel(x, y).0;
                img.put_pixel(x, y, Rgb([g, b, r]));
            }
        }
    }
}

/// Stage 5: global affine lift, v -> 1.15v + 10.
fn lift_contrast(img: &mut RgbImage) {
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = saturate(f32::from(*c) * LIFT_GAIN + LIFT_BIAS);
        }
    }
}

/// Stage 6: checkerboard dither, +-8 on a 4-pixel lattice.
fn dither(img: &mut RgbImage) {
    let (w, h) = img.dimensions();
    for y in (0..h).step_by(DITHER_STRIDE as usize) {
        for x in (0..w).step_by(DITHER_STRIDE as usize) {
            let delta = if (x + y) % (2 * DITHER_STRIDE) == 0 {
                DITHER_AMPLITUDE
            } else {
                -DITHER_AMPLITUDE
            };
            for c in img.get_pixel_mut(x, y).0.iter_mut() {
                *c = shift(*c, delta);
            }
        }
    }
}

/// Stage 7: 3x3 Gaussian smoothing, then a mild sharpen to put edge energy
/// back without undoing the hash divergence.
fn blur_sharpen(img: &RgbImage) -> RgbImage {
    let blurred = filter3x3::<_, f32, u8>(img, &BLUR_KERNEL);
    filter3x3::<_, f32, u8>(&blurred, &SHARPEN_KERNEL)
}

/// Stage 8: blend a faint 1-pixel line grid (every 25 pixels, intensity 50)
/// at 5% opacity.
fn grid_overlay(img: &mut RgbImage) {
    for (x, y, p) in img.enumerate_pixels_mut() {
        let overlay = if x % GRID_STRIDE == 0 || y % GRID_STRIDE == 0 {
            GRID_INTENSITY
        } else {
            0.0
        };
        for c in p.0.iter_mut() {
            *c = saturate(f32::from(*c) * (1.0 - GRID_OPACITY) + overlay * GRID_OPACITY);
        }
    }
}

/// Stage 9: pull each corner inward by 0-3 pixels and resample through the
/// resulting perspective transform, keeping the output dimensions.
fn perspective_jitter(img: &RgbImage, rng: &mut StdRng) -> RgbImage {
    let (w, h) = img.dimensions();
    let (right, bottom) = ((w - 1) as f32, (h - 1) as f32);
    let mut jitter = || rng.random_range(0..=WARP_JITTER) as f32;
    let from = [(0.0, 0.0), (right, 0.0), (0.0, bottom), (right, bottom)];
    let to = [
        (jitter(), jitter()),
        (right - jitter(), jitter()),
        (jitter(), bottom - jitter()),
        (right - jitter(), bottom - jitter()),
    ];
    match Projection::from_control_points(from, to) {
        Some(projection) => warp(img, &projection, Interpolation::Bilinear, Rgb([0, 0, 0])),
        // Corners collapse only for 1-2 pixel images; nothing to warp then.
        None => img.clone(),
    }
}

/// Stage 10: one constant cast per channel in [-8, +8], drawn in the wire
/// order blue, green, red.
fn color_cast(img: &mut RgbImage, rng: &mut StdRng) {
    let b = rng.random_range(-CAST_SPAN..=CAST_SPAN);
    let g = rng.random_range(-CAST_SPAN..=CAST_SPAN);
    let r = rng.random_range(-CAST_SPAN..=CAST_SPAN);
    for p in img.pixels_mut() {
        p.0 = [shift(p.0[0], r), shift(p.0[1], g), shift(p.0[2], b)];
    }
}

/// Stage 11: brightness scale, contrast about the rounded global luma mean,
/// then saturation toward per-pixel luma.
fn polish(img: &mut RgbImage, brightness_factor: f32) {
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = saturate(f32::from(*c) * brightness_factor);
        }
    }

    let mut sum = 0.0f64;
    for p in img.pixels() {
        sum += f64::from(luma(p));
    }
    let pixels = u64::from(img.width()) * u64::from(img.height());
    let mean = (sum / pixels as f64).round() as f32;
    for p in img.pixels_mut() {
        for c in p.0.iter_mut() {
            *c = saturate(mean + (f32::from(*c) - mean) * POLISH_CONTRAST);
        }
    }

    for p in img.pixels_mut() {
        let gray = luma(p);
        for c in p.0.iter_mut() {
            *c = saturate(gray + (f32::from(*c) - gray) * POLISH_SATURATION);
        }
    }
}

/// Rec.601 luma.
fn luma(p: &Rgb<u8>) -> f32 {
    0.299 * f32::from(p.0[0]) + 0.587 * f32::from(p.0[1]) + 0.114 * f32::from(p.0[2])
}

fn encode_png(img: RgbImage) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(Error::Encode)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(img: RgbImage) -> Vec<u8> {
        encode_png(img).unwrap()
    }

    #[test]
    fn runs_end_to_end_on_a_tiny_image() {
        // 8x8: every stride larger than the image degrades to a no-op
        // rather than an error.
        let img = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 60]));
        let report = evade(&png(img), &EvadeConfig::default()).unwrap();
        assert!(report.hamming_distance <= 64);
        assert!(!report.image.is_empty());
    }

    #[test]
    fn unreadable_input_is_a_decode_error() {
        assert!(matches!(
            evade(b"nope", &EvadeConfig::default()),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn one_pixel_input_is_empty_not_a_panic() {
        let img = RgbImage::from_pixel(1, 1, Rgb([1, 2, 3]));
        assert!(matches!(
            evade(&png(img), &EvadeConfig::default()),
            Err(Error::EmptyImage { .. })
        ));
    }

    #[test]
    fn uniform_input_still_produces_a_report() {
        // A flat image may legitimately land on the same (zero) hash; the
        // pipeline reports whatever distance it measured.
        let img = RgbImage::from_pixel(64, 64, Rgb([77, 77, 77]));
        let report = evade(&png(img), &EvadeConfig::default()).unwrap();
        assert_eq!(report.original.bits() & !((1u64 << 56) - 1), 0);
        assert!(report.hamming_distance <= 56);
    }

    #[test]
    fn config_defaults_fill_in_from_empty_json() {
        let cfg: EvadeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.brightness_factor, 0.85);
        assert_eq!(cfg.gradient_factor, 80);
        assert_eq!(cfg.seed, 42);
    }

    #[test]
    fn report_serializes_without_image_bytes() {
        let img = RgbImage::from_fn(32, 32, |x, y| Rgb([(x ^ y) as u8 * 8, 0, 200]));
        let report = evade(&png(img), &EvadeConfig::default()).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert!(json.get("image").is_none());
        assert_eq!(json["original"].as_str().unwrap().len(), 16);
        assert_eq!(json["modified"].as_str().unwrap().len(), 16);
        assert!(json["hamming_distance"].is_u64());
    }
}
