//! Text to sticker pipeline: classify, reshape, resolve a font, fit, compose
//! and encode.

pub mod canvas;
pub mod encode;
pub mod fit;
pub mod fonts;
pub mod script;
pub mod shaping;

use std::sync::Arc;

pub use canvas::Composer;
pub use encode::{EncodeProfile, Encoder};
pub use fonts::FontRegistry;
pub use script::Script;

use crate::config::RenderConfig;
use crate::error::{AppError, AppResult};
use crate::models::{RenderedSticker, StyleRequest};

#[derive(Clone)]
pub struct Renderer {
    fonts: Arc<FontRegistry>,
    composer: Composer,
    encoder: Encoder,
}

impl Renderer {
    pub fn new(fonts: Arc<FontRegistry>, config: &RenderConfig) -> Self {
        Self {
            fonts,
            composer: Composer::from_config(config),
            encoder: Encoder::new(config.max_sticker_bytes),
        }
    }

    pub fn fonts(&self) -> &FontRegistry {
        &self.fonts
    }

    /// Renders one sticker. `photo` is only used for photo backgrounds.
    pub fn render(
        &self,
        request: &StyleRequest,
        photo: Option<&[u8]>,
        profile: EncodeProfile,
    ) -> AppResult<RenderedSticker> {
        if request.text.trim().is_empty() {
            return Err(AppError::Validation("Sticker text is empty".to_string()));
        }

        let script = script::classify(&request.text);
        let font = self.fonts.resolve(request.font.as_deref(), &request.text);
        let logical = shaping::reshape(&request.text);

        let (width, height) = self.composer.text_box();
        let fitted = fit::fit_text(
            &logical,
            script,
            &font.face,
            fit::FitBox { width, height },
            request.size.nominal_px(),
        );
        if fitted.overflow {
            tracing::warn!(px = fitted.px, "Caption does not fit at the minimum size");
        }

        let mut canvas = self.composer.background(request.background, photo);
        self.composer.draw_caption(
            &mut canvas,
            &fitted,
            &font.face,
            script,
            request.position,
            request.color,
        );

        let sticker = self.encoder.encode(&canvas, profile)?;
        tracing::info!(
            font = %font.id,
            script = ?script,
            px = fitted.px,
            lines = fitted.lines.len(),
            size = sticker.byte_len(),
            "Rendered sticker"
        );
        Ok(sticker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BackgroundMode, Position};
    use image::ImageFormat;

    fn renderer() -> Renderer {
        Renderer::new(Arc::new(FontRegistry::builtin_only()), &RenderConfig::default())
    }

    #[test]
    fn renders_rtl_caption_to_a_webp_square() {
        let request = StyleRequest::new("سلام دنیا");
        let sticker = renderer().render(&request, None, EncodeProfile::Pack).unwrap();

        assert!(encode::has_webp_signature(sticker.bytes()));

        let decoded = image::load_from_memory_with_format(sticker.bytes(), ImageFormat::WebP)
            .unwrap()
            .to_rgba8();
        assert_eq!(decoded.dimensions(), (512, 512));
        assert!(decoded.pixels().any(|p| p.0[3] == 255));
    }

    #[test]
    fn rtl_caption_is_drawn_in_visual_order() {
        let logical = shaping::reshape("سلام دنیا");
        let fitted = fit::fit_text(
            &logical,
            Script::RtlConnected,
            &fonts::FontFace::Builtin,
            fit::FitBox { width: 432.0, height: 432.0 },
            64,
        );
        // The first drawn glyph is the last logical letter.
        let first = fitted.lines[0].display.chars().next();
        assert_eq!(first, logical.chars().last());
    }

    #[test]
    fn solid_background_with_bottom_caption() {
        let mut request = StyleRequest::new("Hello");
        request.background = BackgroundMode::Solid;
        request.position = Position::Bottom;
        let sticker = renderer().render(&request, None, EncodeProfile::Preview).unwrap();

        let decoded = image::load_from_memory(sticker.bytes()).unwrap().to_rgba8();
        assert!(decoded.pixels().all(|p| p.0[3] == 255));
    }

    #[test]
    fn empty_text_is_rejected() {
        let result = renderer().render(&StyleRequest::new("   "), None, EncodeProfile::Pack);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
