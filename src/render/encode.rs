//! Canvas to sticker bytes, with format signature verification.

use std::io::Cursor;

use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageFormat, RgbaImage};

use crate::error::{AppError, AppResult};
use crate::models::{RenderedSticker, StickerFormat};

/// Which caller the bytes are for. Pack uploads get the highest quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeProfile {
    Pack,
    Preview,
}

impl EncodeProfile {
    pub fn quality(self) -> u8 {
        match self {
            EncodeProfile::Pack => 100,
            EncodeProfile::Preview => 92,
        }
    }
}

/// Lowest quality tried before giving up on the size limit.
const MIN_QUALITY: u8 = 50;

#[derive(Debug, Clone)]
pub struct Encoder {
    max_bytes: usize,
}

impl Encoder {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn encode(&self, canvas: &RgbaImage, profile: EncodeProfile) -> AppResult<RenderedSticker> {
        self.encode_with(canvas, profile, encode_lossless, encode_canonical)
    }

    /// Encodes at decreasing quality until the result fits the byte limit.
    fn encode_with(
        &self,
        canvas: &RgbaImage,
        profile: EncodeProfile,
        primary: impl Fn(&RgbaImage) -> AppResult<Vec<u8>>,
        canonical: impl Fn(&RgbaImage) -> AppResult<Vec<u8>>,
    ) -> AppResult<RenderedSticker> {
        let mut quality = profile.quality();

        let size = loop {
            let quantized = quantize(canvas, quality);
            let bytes = encode_verified(&quantized, &primary, &canonical)?;

            if bytes.len() <= self.max_bytes {
                tracing::debug!(quality, size = bytes.len(), "Encoded sticker");
                return Ok(RenderedSticker::new(bytes, StickerFormat::WebP));
            }
            if quality <= MIN_QUALITY {
                break bytes.len();
            }
            tracing::debug!(quality, size = bytes.len(), "Sticker over size limit, lowering quality");
            quality = quality.saturating_sub(10).max(MIN_QUALITY);
        };

        Err(AppError::StickerTooLarge {
            size,
            limit: self.max_bytes,
        })
    }
}

fn encode_verified(
    canvas: &RgbaImage,
    primary: &impl Fn(&RgbaImage) -> AppResult<Vec<u8>>,
    canonical: &impl Fn(&RgbaImage) -> AppResult<Vec<u8>>,
) -> AppResult<Vec<u8>> {
    let bytes = primary(canvas)?;
    if has_webp_signature(&bytes) {
        return Ok(bytes);
    }

    tracing::warn!("Encoded sticker lacks WebP signature, re-encoding");
    let bytes = canonical(canvas)?;
    if has_webp_signature(&bytes) {
        return Ok(bytes);
    }

    Err(AppError::EncodeSignatureMismatch)
}

/// `RIFF....WEBP` container header.
pub fn has_webp_signature(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP"
}

fn encode_lossless(canvas: &RgbaImage) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    WebPEncoder::new_lossless(&mut buf)
        .encode(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| AppError::Render(format!("WebP encode failed: {}", e)))?;
    Ok(buf)
}

fn encode_canonical(canvas: &RgbaImage) -> AppResult<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(canvas.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)
        .map_err(|e| AppError::Render(format!("WebP encode failed: {}", e)))?;
    Ok(buf)
}

/// Drops low colour bits so lower qualities compress smaller.
fn quantize(canvas: &RgbaImage, quality: u8) -> RgbaImage {
    let mask = match quality {
        100..=u8::MAX => return canvas.clone(),
        90..=99 => 0xFE,
        80..=89 => 0xFC,
        60..=79 => 0xF8,
        _ => 0xF0,
    };

    let mut out = canvas.clone();
    for pixel in out.pixels_mut() {
        for c in &mut pixel.0[..3] {
            *c &= mask;
        }
    }
    out
}
