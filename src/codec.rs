//! Image codec collaborator.
//!
//! [`ImageCodec`] is the contract the materializer relies on for re-encoding and resizing pages.
//! Implementations are synchronous and are always called from blocking threads.
//! [`ImageCrateCodec`] is the default implementation, built on the `image` crate.

use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::error::{Error, Result};
use crate::path_utils::decimal_digits;
use crate::types::ResizeMode;

/// Alpha of the band drawn behind a cover index label.
const STAMP_BAND_ALPHA: u8 = 200;
/// Offset of the band from the top-left corner, in pixels.
const STAMP_OFFSET: u32 = 5;

/// Contract for decoding, resizing and encoding page images.
pub trait ImageCodec: Send + Sync {
    fn open(&self, path: &Path) -> Result<DynamicImage>;

    /// Encodes `image` at `quality` (0-100).
    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>>;

    /// Decodes the file at `path` and encodes it again at `quality`.
    fn reencode(&self, path: &Path, quality: u8) -> Result<Vec<u8>> {
        let image = self.open(path)?;
        self.encode(&image, quality)
    }

    /// Resizes to `height` pixels, keeping the aspect ratio.
    fn resize_to_height(&self, path: &Path, height: u32) -> Result<DynamicImage>;

    /// Resizes both dimensions to `percent` of the original.
    fn resize_to_ratio(&self, path: &Path, percent: u32) -> Result<DynamicImage>;
}

/// [`ImageCodec`] over the `image` crate: Lanczos3 resampling and JPEG output.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCrateCodec {
    fn resize(image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        image.resize_exact(width.max(1), height.max(1), FilterType::Lanczos3)
    }
}

impl ImageCodec for ImageCrateCodec {
    fn open(&self, path: &Path) -> Result<DynamicImage> {
        image::open(path).map_err(|e| {
            log::error!("Unable to decode image {:?}: {}", path, e);
            Error::tool("decode", path, e)
        })
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            // JPEG has no alpha channel
            encoder.encode_image(&image.to_rgb8())?;
        }
        Ok(buffer)
    }

    fn resize_to_height(&self, path: &Path, height: u32) -> Result<DynamicImage> {
        let image = self.open(path)?;
        let width = (u64::from(image.width()) * u64::from(height))
            .div_ceil(u64::from(image.height().max(1))) as u32;
        Ok(Self::resize(&image, width, height))
    }

    fn resize_to_ratio(&self, path: &Path, percent: u32) -> Result<DynamicImage> {
        let image = self.open(path)?;
        let width = (u64::from(image.width()) * u64::from(percent) / 100) as u32;
        let height = (u64::from(image.height()) * u64::from(percent) / 100) as u32;
        Ok(Self::resize(&image, width, height))
    }
}

/// Renders one page according to the transcode policy.
///
/// Resizes when `resize` asks for it, stamps the cover label when `stamp` holds
/// `(index, total)`, then encodes at `quality`.
///
/// # Arguments
///
/// * `codec` - Codec used for every step
/// * `source` - Page to render
/// * `quality` - Encoding quality (0-100)
/// * `resize` - Resize mode, `ResizeMode::None` to keep dimensions
/// * `stamp` - Optional cover label
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Encoded bytes, ready to be written to the destination
pub fn render_page(
    codec: &dyn ImageCodec,
    source: &Path,
    quality: u8,
    resize: ResizeMode,
    stamp: Option<(usize, usize)>,
) -> Result<Vec<u8>> {
    let image = match resize.effective() {
        ResizeMode::ToHeight(height) => Some(codec.resize_to_height(source, height)?),
        ResizeMode::ToRatio(percent) => Some(codec.resize_to_ratio(source, percent)?),
        ResizeMode::None if stamp.is_some() => Some(codec.open(source)?),
        ResizeMode::None => None,
    };

    match (image, stamp) {
        (Some(image), Some((index, total))) => {
            codec.encode(&stamp_cover_index(&image, index, total), quality)
        }
        (Some(image), None) => codec.encode(&image, quality),
        (None, _) => codec.reencode(source, quality),
    }
}

/// Draws `"{index}/{total}"` on a semi-transparent white band in the top-left corner.
///
/// The index is zero-padded to the digit count of `total`. Glyphs come from a built-in 5x7
/// bitmap font scaled with the image height; the band is clipped to the image bounds.
pub fn stamp_cover_index(image: &DynamicImage, index: usize, total: usize) -> DynamicImage {
    let mut canvas: RgbaImage = image.to_rgba8();
    let label = format!(
        "{:0width$}/{}",
        index,
        total,
        width = decimal_digits(total)
    );

    let scale = (canvas.height() / 100).max(1);
    let padding = 2 * scale;
    let advance = (GLYPH_WIDTH + 1) * scale;
    let band_width = 2 * padding + advance * label.len() as u32 - scale;
    let band_height = 2 * padding + GLYPH_HEIGHT * scale;

    let x_end = (STAMP_OFFSET + band_width).min(canvas.width());
    let y_end = (STAMP_OFFSET + band_height).min(canvas.height());
    for y in STAMP_OFFSET.min(y_end)..y_end {
        for x in STAMP_OFFSET.min(x_end)..x_end {
            let pixel = canvas.get_pixel_mut(x, y);
            *pixel = blend_white(*pixel, STAMP_BAND_ALPHA);
        }
    }

    let mut cursor = STAMP_OFFSET + padding;
    for ch in label.chars() {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    let x0 = cursor + col * scale;
                    let y0 = STAMP_OFFSET + padding + row as u32 * scale;
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let (x, y) = (x0 + dx, y0 + dy);
                            if x < canvas.width() && y < canvas.height() {
                                canvas.put_pixel(x, y, Rgba([0, 0, 0, 255]));
                            }
                        }
                    }
                }
            }
        }
        cursor += advance;
    }

    DynamicImage::ImageRgba8(canvas)
}

fn blend_white(pixel: Rgba<u8>, alpha: u8) -> Rgba<u8> {
    let a = u16::from(alpha);
    let mix = |c: u8| ((u16::from(c) * (255 - a) + 255 * a) / 255) as u8;
    Rgba([mix(pixel[0]), mix(pixel[1]), mix(pixel[2]), pixel[3].max(alpha)])
}

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;

// 5x7 bitmaps, one byte per row, bit 4 is the leftmost column.
static DIGIT_GLYPHS: [[u8; 7]; 10] = [
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
];
static SLASH_GLYPH: [u8; 7] = [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10];

fn glyph(ch: char) -> Option<&'static [u8; 7]> {
    match ch {
        '/' => Some(&SLASH_GLYPH),
        c => c.to_digit(10).map(|d| &DIGIT_GLYPHS[d as usize]),
    }
}
