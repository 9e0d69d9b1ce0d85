use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::Error;

/// A decoded raster. Parses the bytes once and hands out owned pixel views,
/// so concurrent callers never share a working buffer.
pub struct PixelGrid {
    img: DynamicImage,
}

impl PixelGrid {
    /// Decode PNG/JPEG (or anything else the `image` crate recognizes).
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let img = image::load_from_memory(bytes)?;
        Ok(Self { img })
    }

    pub fn width(&self) -> u32 {
        self.img.width()
    }

    pub fn height(&self) -> u32 {
        self.img.height()
    }

    /// 3-channel color view.
    pub fn to_rgb8(&self) -> RgbImage {
        self.img.to_rgb8()
    }

    /// Luminance-converted 8-bit view.
    pub fn to_luma8(&self) -> GrayImage {
        self.img.to_luma8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(img: RgbImage) -> Vec<u8> {
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
            .unwrap();
        out
    }

    #[test]
    fn decodes_png_and_exposes_both_views() {
        let img = RgbImage::from_fn(12, 7, |x, y| Rgb([x as u8, y as u8, 0]));
        let grid = PixelGrid::decode(&png_bytes(img)).unwrap();
        assert_eq!((grid.width(), grid.height()), (12, 7));
        assert_eq!(grid.to_rgb8().dimensions(), (12, 7));
        assert_eq!(grid.to_luma8().dimensions(), (12, 7));
    }

    #[test]
    fn rejects_garbage_bytes() {
        let err = PixelGrid::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn rejects_truncated_png() {
        let mut bytes = png_bytes(RgbImage::from_pixel(32, 32, Rgb([9, 9, 9])));
        bytes.truncate(bytes.len() / 2);
        assert!(matches!(
            PixelGrid::decode(&bytes),
            Err(Error::Decode(_))
        ));
    }
}
