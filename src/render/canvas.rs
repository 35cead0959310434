//! Background construction and caption drawing on the fixed sticker canvas.

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use super::fit::FittedText;
use super::fonts::FontFace;
use super::script::Script;
use crate::config::RenderConfig;
use crate::models::{BackgroundMode, HexColor, Position, CANVAS_SIZE};

/// Two-colour vertical gradient used for solid backgrounds.
#[derive(Debug, Clone, Copy)]
pub struct BackgroundScheme {
    pub top: HexColor,
    pub bottom: HexColor,
}

impl Default for BackgroundScheme {
    fn default() -> Self {
        Self {
            top: HexColor { r: 56, g: 189, b: 248 },
            bottom: HexColor { r: 99, g: 102, b: 241 },
        }
    }
}

/// Offset duplicate drawn under every glyph for legibility.
#[derive(Debug, Clone, Copy)]
pub struct StrokeStyle {
    pub color: [u8; 4],
    pub offset: i32,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: [0, 0, 0, 220],
            offset: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Composer {
    pub scheme: BackgroundScheme,
    pub stroke: StrokeStyle,
    pub padding: u32,
}

impl Composer {
    pub fn from_config(config: &RenderConfig) -> Self {
        let defaults = BackgroundScheme::default();
        let parse = |raw: &str, fallback: HexColor| {
            raw.parse().unwrap_or_else(|_| {
                tracing::warn!("Invalid background colour {:?}, using default", raw);
                fallback
            })
        };

        Self {
            scheme: BackgroundScheme {
                top: parse(&config.background_top, defaults.top),
                bottom: parse(&config.background_bottom, defaults.bottom),
            },
            stroke: StrokeStyle::default(),
            padding: config.padding,
        }
    }

    /// Interior box available to the caption.
    pub fn text_box(&self) -> (f32, f32) {
        let inner = CANVAS_SIZE.saturating_sub(2 * self.padding) as f32;
        (inner, inner)
    }

    pub fn background(&self, mode: BackgroundMode, photo: Option<&[u8]>) -> RgbaImage {
        match (mode, photo) {
            (BackgroundMode::Transparent, _) => RgbaImage::new(CANVAS_SIZE, CANVAS_SIZE),
            (BackgroundMode::Solid, _) => self.gradient(),
            (BackgroundMode::Photo, Some(bytes)) => match image::load_from_memory(bytes) {
                Ok(photo) => photo
                    .resize_to_fill(CANVAS_SIZE, CANVAS_SIZE, FilterType::Lanczos3)
                    .to_rgba8(),
                Err(e) => {
                    tracing::warn!("Failed to decode background photo: {}", e);
                    self.gradient()
                }
            },
            (BackgroundMode::Photo, None) => {
                tracing::warn!("Photo background requested without a photo");
                self.gradient()
            }
        }
    }

    fn gradient(&self) -> RgbaImage {
        let (top, bottom) = (self.scheme.top, self.scheme.bottom);
        if top == bottom {
            return RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgba(top.rgba(255)));
        }

        let last = (CANVAS_SIZE - 1) as f32;
        let lerp = |a: u8, b: u8, t: f32| (a as f32 * (1.0 - t) + b as f32 * t).round() as u8;
        let img = RgbaImage::from_fn(CANVAS_SIZE, CANVAS_SIZE, |_, y| {
            let t = y as f32 / last;
            Rgba([
                lerp(top.r, bottom.r, t),
                lerp(top.g, bottom.g, t),
                lerp(top.b, bottom.b, t),
                255,
            ])
        });
        // Light blur against banding.
        imageops::blur(&img, 0.5)
    }

    /// Draws fitted lines anchored per `position`.
    pub fn draw_caption(
        &self,
        canvas: &mut RgbaImage,
        fitted: &FittedText,
        face: &FontFace,
        script: Script,
        position: Position,
        color: HexColor,
    ) {
        let size = CANVAS_SIZE as f32;
        let pad = self.padding as f32;
        let px = fitted.px as f32;

        let top = match position {
            Position::Top => pad,
            Position::Bottom => size - pad - fitted.block_height,
            Position::Center | Position::Left | Position::Right => {
                (size - fitted.block_height) / 2.0
            }
        };

        let fill = color.rgba(255);
        for (i, line) in fitted.lines.iter().enumerate() {
            let x = match (position, script.is_rtl()) {
                (Position::Center, _) => (size - line.width) / 2.0,
                (Position::Left, _) => pad,
                (Position::Right, _) => size - pad - line.width,
                (_, true) => size - pad - line.width,
                (_, false) => pad,
            };
            let baseline = top + fitted.ascent + i as f32 * fitted.line_height;
            self.draw_line(canvas, face, px, x, baseline, &line.display, fill);
        }
    }

    fn draw_line(
        &self,
        canvas: &mut RgbaImage,
        face: &FontFace,
        px: f32,
        x: f32,
        baseline: f32,
        text: &str,
        fill: [u8; 4],
    ) {
        let mut pen = x;
        for c in text.chars() {
            let glyph = face.rasterize(c, px);
            if glyph.width > 0 && glyph.height > 0 {
                let gx = (pen + glyph.xmin as f32).round() as i32;
                let gy = (baseline - glyph.ymin as f32 - glyph.height as f32).round() as i32;
                let offset = self.stroke.offset;
                blit(canvas, &glyph.coverage, glyph.width, gx + offset, gy + offset, self.stroke.color);
                blit(canvas, &glyph.coverage, glyph.width, gx, gy, fill);
            }
            pen += glyph.advance;
        }
    }
}

/// Source-over blend of a coverage mask in `color` at (`x0`, `y0`).
fn blit(canvas: &mut RgbaImage, coverage: &[u8], width: usize, x0: i32, y0: i32, color: [u8; 4]) {
    let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);

    for (i, &cov) in coverage.iter().enumerate() {
        if cov == 0 {
            continue;
        }
        let x = x0 + (i % width) as i32;
        let y = y0 + (i / width) as i32;
        if x < 0 || y < 0 || x >= cw || y >= ch {
            continue;
        }

        let dst = canvas.get_pixel_mut(x as u32, y as u32);
        let sa = (color[3] as f32 / 255.0) * (cov as f32 / 255.0);
        let da = dst.0[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            continue;
        }
        for c in 0..3 {
            let blended = (color[c] as f32 * sa + dst.0[c] as f32 * da * (1.0 - sa)) / out_a;
            dst.0[c] = blended.round().clamp(0.0, 255.0) as u8;
        }
        dst.0[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::fit::{fit_text, FitBox};
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    fn composer() -> Composer {
        Composer::from_config(&RenderConfig::default())
    }

    fn fitted(text: &str, composer: &Composer) -> FittedText {
        let (width, height) = composer.text_box();
        fit_text(text, Script::Latin, &FontFace::Builtin, FitBox { width, height }, 64)
    }

    #[test]
    fn transparent_background_is_empty() {
        let img = composer().background(BackgroundMode::Transparent, None);
        assert_eq!(img.dimensions(), (512, 512));
        assert!(img.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn solid_background_is_an_opaque_vertical_gradient() {
        let composer = composer();
        let img = composer.background(BackgroundMode::Solid, None);
        assert!(img.pixels().all(|p| p.0[3] == 255));

        let top = img.get_pixel(256, 0).0;
        let bottom = img.get_pixel(256, 511).0;
        assert!((top[0] as i32 - 56).abs() <= 3, "top {:?}", top);
        assert!((bottom[0] as i32 - 99).abs() <= 3, "bottom {:?}", bottom);
    }

    #[test]
    fn photo_background_is_cropped_to_the_square() {
        let photo = RgbaImage::from_pixel(200, 100, Rgba([200, 10, 10, 255]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(photo)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let img = composer().background(BackgroundMode::Photo, Some(&bytes));
        assert_eq!(img.dimensions(), (512, 512));
        let center = img.get_pixel(256, 256).0;
        assert!(center[0] > 190 && center[1] < 20, "center {:?}", center);
    }

    #[test]
    fn undecodable_photo_falls_back_to_gradient() {
        let img = composer().background(BackgroundMode::Photo, Some(b"not an image"));
        assert!(img.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn caption_is_filled_and_stroked() {
        let composer = composer();
        let mut canvas = composer.background(BackgroundMode::Transparent, None);
        let text = fitted("Hi", &composer);
        let red = HexColor { r: 255, g: 0, b: 0 };
        composer.draw_caption(&mut canvas, &text, &FontFace::Builtin, Script::Latin, Position::Center, red);

        let has_fill = canvas.pixels().any(|p| p.0 == [255, 0, 0, 255]);
        let has_stroke = canvas
            .pixels()
            .any(|p| p.0[3] > 0 && p.0[0] == 0 && p.0[1] == 0 && p.0[2] == 0);
        assert!(has_fill);
        assert!(has_stroke);
    }

    #[test]
    fn anchors_follow_position_and_script() {
        let composer = composer();
        let text = fitted("Hi", &composer);
        let white = HexColor::WHITE;

        let first_opaque_column = |canvas: &RgbaImage| {
            (0..512).find(|&x| (0..512).any(|y| canvas.get_pixel(x, y).0[3] > 0))
        };

        let mut left = RgbaImage::new(512, 512);
        composer.draw_caption(&mut left, &text, &FontFace::Builtin, Script::Latin, Position::Top, white);
        let mut right = RgbaImage::new(512, 512);
        composer.draw_caption(&mut right, &text, &FontFace::Builtin, Script::RtlConnected, Position::Top, white);

        let left_x = first_opaque_column(&left).unwrap();
        let right_x = first_opaque_column(&right).unwrap();
        assert!(left_x < 60, "latin starts near the left padding, got {}", left_x);
        assert!(right_x > 256, "rtl hugs the right padding, got {}", right_x);

        let first_opaque_row = (0..512)
            .find(|&y| (0..512).any(|x| left.get_pixel(x, y).0[3] > 0))
            .unwrap();
        assert!(first_opaque_row < 128, "top anchor, got {}", first_opaque_row);
    }
}
