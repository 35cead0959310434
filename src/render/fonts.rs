//! Font registry and resolution.
//!
//! The registry maps logical font ids to candidate asset files and script
//! families to ordered fallback lists. Resolution never fails: when no asset
//! is installed a built-in block face is returned so rendering can proceed.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use super::script::{classify, Script};
use crate::config::RenderConfig;

/// Declarative registry layout, loadable from JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct FontCatalog {
    /// Font id to candidate file names, first existing file wins.
    pub fonts: BTreeMap<String, Vec<String>>,
    /// Fallback order for connected right-to-left text.
    pub rtl: Vec<String>,
    /// Fallback order for Latin text.
    pub latin: Vec<String>,
    /// Hard default when the family list has nothing installed.
    pub default: String,
}

impl Default for FontCatalog {
    fn default() -> Self {
        let fonts = [
            ("Vazirmatn", &["Vazirmatn-Regular.ttf", "Vazirmatn-Medium.ttf"][..]),
            ("NotoNaskh", &["NotoNaskhArabic-Regular.ttf", "NotoNaskhArabic-Medium.ttf"][..]),
            ("Sahel", &["Sahel.ttf", "Sahel-Bold.ttf"][..]),
            ("IRANSans", &["IRANSans.ttf", "IRANSansX-Regular.ttf"][..]),
            ("Roboto", &["Roboto-Regular.ttf", "Roboto-Medium.ttf"][..]),
        ]
        .into_iter()
        .map(|(id, files)| {
            (
                id.to_string(),
                files.iter().map(|f| f.to_string()).collect(),
            )
        })
        .collect();

        Self {
            fonts,
            rtl: vec![
                "Vazirmatn".into(),
                "NotoNaskh".into(),
                "Sahel".into(),
                "IRANSans".into(),
            ],
            latin: vec!["Roboto".into()],
            default: "Vazirmatn".into(),
        }
    }
}

pub const BUILTIN_FONT_ID: &str = "builtin";

#[derive(Debug, Clone, Copy)]
pub struct LineMetrics {
    pub ascent: f32,
    pub descent: f32,
    pub line_height: f32,
}

/// A rasterized glyph: coverage bitmap plus placement relative to the pen.
#[derive(Debug, Clone)]
pub struct Glyph {
    pub width: usize,
    pub height: usize,
    pub xmin: i32,
    pub ymin: i32,
    pub advance: f32,
    pub coverage: Vec<u8>,
}

#[derive(Clone)]
pub enum FontFace {
    Outline(Arc<fontdue::Font>),
    /// Fixed-advance block glyphs, used when no asset could be loaded.
    Builtin,
}

impl std::fmt::Debug for FontFace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FontFace::Outline(_) => f.write_str("FontFace::Outline"),
            FontFace::Builtin => f.write_str("FontFace::Builtin"),
        }
    }
}

impl FontFace {
    pub fn advance(&self, c: char, px: f32) -> f32 {
        match self {
            FontFace::Outline(font) => font.metrics(c, px).advance_width,
            FontFace::Builtin => builtin_advance(c, px),
        }
    }

    pub fn text_width(&self, text: &str, px: f32) -> f32 {
        text.chars().map(|c| self.advance(c, px)).sum()
    }

    pub fn line_metrics(&self, px: f32) -> LineMetrics {
        let builtin = LineMetrics {
            ascent: px * 0.8,
            descent: -px * 0.2,
            line_height: px * 1.2,
        };
        match self {
            FontFace::Outline(font) => font
                .horizontal_line_metrics(px)
                .map(|m| LineMetrics {
                    ascent: m.ascent,
                    descent: m.descent,
                    line_height: m.new_line_size,
                })
                .unwrap_or(builtin),
            FontFace::Builtin => builtin,
        }
    }

    pub fn rasterize(&self, c: char, px: f32) -> Glyph {
        match self {
            FontFace::Outline(font) => {
                let (metrics, coverage) = font.rasterize(c, px);
                Glyph {
                    width: metrics.width,
                    height: metrics.height,
                    xmin: metrics.xmin,
                    ymin: metrics.ymin,
                    advance: metrics.advance_width,
                    coverage,
                }
            }
            FontFace::Builtin => builtin_glyph(c, px),
        }
    }
}

fn builtin_advance(c: char, px: f32) -> f32 {
    if c.is_whitespace() {
        px * 0.3
    } else {
        px * 0.6
    }
}

fn builtin_glyph(c: char, px: f32) -> Glyph {
    let advance = builtin_advance(c, px);
    if c.is_whitespace() || c.is_control() {
        return Glyph {
            width: 0,
            height: 0,
            xmin: 0,
            ymin: 0,
            advance,
            coverage: Vec::new(),
        };
    }

    let width = (px * 0.45).round().max(1.0) as usize;
    let height = (px * 0.65).round().max(1.0) as usize;
    Glyph {
        width,
        height,
        xmin: (px * 0.075).round() as i32,
        ymin: 0,
        advance,
        coverage: vec![255; width * height],
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedFont {
    pub id: String,
    pub face: FontFace,
}

pub struct FontRegistry {
    catalog: FontCatalog,
    installed: BTreeMap<String, Arc<fontdue::Font>>,
}

impl FontRegistry {
    /// Loads the registry layout (JSON override or built-in) and parses every
    /// font asset found under the configured directory.
    pub fn load(config: &RenderConfig) -> Self {
        let catalog = config
            .font_registry
            .as_deref()
            .and_then(load_catalog)
            .unwrap_or_default();

        let mut installed = BTreeMap::new();
        for (id, candidates) in &catalog.fonts {
            match load_first(&config.font_dir, candidates) {
                Some(font) => {
                    installed.insert(id.clone(), Arc::new(font));
                }
                None => {
                    tracing::warn!(font = %id, dir = %config.font_dir.display(), "Font asset not installed");
                }
            }
        }

        tracing::info!("Loaded {} font(s) from {}", installed.len(), config.font_dir.display());
        Self { catalog, installed }
    }

    /// A registry with nothing installed; every lookup resolves to the
    /// built-in face.
    pub fn builtin_only() -> Self {
        Self {
            catalog: FontCatalog::default(),
            installed: BTreeMap::new(),
        }
    }

    pub fn available(&self) -> Vec<String> {
        self.installed.keys().cloned().collect()
    }

    pub fn resolve(&self, explicit: Option<&str>, text: &str) -> ResolvedFont {
        let id = self.pick(explicit, classify(text), |id| self.installed.contains_key(id));

        match id.and_then(|id| self.installed.get(&id).map(|font| (id, font))) {
            Some((id, font)) => ResolvedFont {
                id,
                face: FontFace::Outline(font.clone()),
            },
            None => {
                tracing::warn!("No font asset installed, using built-in face");
                ResolvedFont {
                    id: BUILTIN_FONT_ID.to_string(),
                    face: FontFace::Builtin,
                }
            }
        }
    }

    /// Resolution order: explicit id, script family list, hard default, then
    /// any installed font.
    fn pick(
        &self,
        explicit: Option<&str>,
        script: Script,
        is_installed: impl Fn(&str) -> bool,
    ) -> Option<String> {
        if let Some(id) = explicit {
            if is_installed(id) {
                return Some(id.to_string());
            }
            tracing::warn!(font = %id, "Requested font is not installed, falling back");
        }

        let family: &[String] = match script {
            Script::RtlConnected => &self.catalog.rtl,
            Script::Latin => &self.catalog.latin,
            Script::Neutral => &[],
        };

        family
            .iter()
            .chain(std::iter::once(&self.catalog.default))
            .chain(self.catalog.fonts.keys())
            .find(|id| is_installed(id))
            .cloned()
    }
}

fn load_catalog(path: &Path) -> Option<FontCatalog> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!("Failed to read font registry {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(catalog) => Some(catalog),
        Err(e) => {
            tracing::warn!("Invalid font registry {}: {}", path.display(), e);
            None
        }
    }
}

fn load_first(dir: &Path, candidates: &[String]) -> Option<fontdue::Font> {
    candidates.iter().find_map(|name| {
        let path: PathBuf = dir.join(name);
        let bytes = fs::read(&path).ok()?;
        match fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default()) {
            Ok(font) => Some(font),
            Err(e) => {
                tracing::warn!("Failed to parse font {}: {}", path.display(), e);
                None
            }
        }
    })
}
