use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CANVAS_SIZE: u32 = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StickerFormat {
    WebP,
}

impl StickerFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            StickerFormat::WebP => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            StickerFormat::WebP => "webp",
        }
    }
}

/// An encoded 512x512 sticker, ready for delivery or upload.
#[derive(Debug, Clone)]
pub struct RenderedSticker {
    bytes: Vec<u8>,
    format: StickerFormat,
}

impl RenderedSticker {
    pub(crate) fn new(bytes: Vec<u8>, format: StickerFormat) -> Self {
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> StickerFormat {
        self.format
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// Local metadata for a user-owned pack in the upstream store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerPack {
    pub owner: i64,
    pub name: String,
    pub title: String,
    pub sticker_count: u32,
    pub capacity: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StickerPack {
    pub fn is_full(&self) -> bool {
        self.sticker_count >= self.capacity
    }
}

/// Names of the packs a user owns, most recent last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPacks {
    pub names: Vec<String>,
}

/// Builds the upstream short name for a pack: `<slug>_<owner>_by_<bot>`.
///
/// The upstream store requires names made of ASCII letters, digits and
/// underscores, starting with a letter, at most 64 characters long.
pub fn derive_pack_name(title: &str, owner: i64, bot_username: &str) -> String {
    let mut slug: String = title
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if c.is_whitespace() || c == '_' || c == '-' {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    while slug.contains("__") {
        slug = slug.replace("__", "_");
    }
    let mut slug = slug.trim_matches('_').to_string();

    if !slug.starts_with(|c: char| c.is_ascii_alphabetic()) {
        slug.insert_str(0, "pack_");
    }

    let suffix = format!("_{}_by_{}", owner.unsigned_abs(), bot_username);
    let max_slug = 64usize.saturating_sub(suffix.len()).max(1);
    slug.truncate(max_slug);
    let slug = slug.trim_end_matches('_');

    format!("{}{}", slug, suffix)
}

/// Link that lets a user add a pack by hand.
pub fn manual_attach_link(pack_name: &str) -> String {
    format!("https://t.me/addstickers/{}", pack_name)
}
