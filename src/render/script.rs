//! Dominant writing-system detection.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Script {
    /// Arabic, Persian and related connected right-to-left scripts.
    RtlConnected,
    Latin,
    /// Empty or nothing classifiable.
    Neutral,
}

impl Script {
    pub fn is_rtl(self) -> bool {
        matches!(self, Script::RtlConnected)
    }
}

/// Share thresholds used by [`classify_with`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScriptThresholds {
    pub rtl_share: f32,
    pub latin_share: f32,
}

impl Default for ScriptThresholds {
    fn default() -> Self {
        Self {
            rtl_share: 0.30,
            latin_share: 0.50,
        }
    }
}

pub fn is_rtl_connected(c: char) -> bool {
    matches!(
        c as u32,
        0x0600..=0x06FF | 0x0750..=0x077F | 0x08A0..=0x08FF | 0xFB50..=0xFDFF | 0xFE70..=0xFEFF
    )
}

fn is_latin_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || (matches!(c as u32, 0x00C0..=0x024F) && c.is_alphabetic())
}

pub fn classify(text: &str) -> Script {
    classify_with(text, ScriptThresholds::default())
}

pub fn classify_with(text: &str, thresholds: ScriptThresholds) -> Script {
    let mut rtl = 0usize;
    let mut latin = 0usize;

    for c in text.chars() {
        if is_rtl_connected(c) {
            if c.is_alphabetic() {
                rtl += 1;
            }
        } else if is_latin_letter(c) {
            latin += 1;
        }
    }

    let classifiable = rtl + latin;
    if classifiable == 0 {
        return Script::Neutral;
    }

    let total = classifiable as f32;
    if rtl as f32 / total > thresholds.rtl_share {
        return Script::RtlConnected;
    }
    if latin as f32 / total <= thresholds.latin_share {
        tracing::debug!(rtl, latin, "mixed-script text, falling back to latin");
    }
    Script::Latin
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_family_strings_get_their_tag() {
        assert_eq!(classify("سلام دنیا"), Script::RtlConnected);
        assert_eq!(classify("مرحبا بالعالم"), Script::RtlConnected);
        assert_eq!(classify("Hello world"), Script::Latin);
        assert_eq!(classify("Déjà vu"), Script::Latin);
    }

    #[test]
    fn empty_and_unclassifiable_are_neutral() {
        assert_eq!(classify(""), Script::Neutral);
        assert_eq!(classify("12345 !?"), Script::Neutral);
        assert_eq!(classify("😊😊"), Script::Neutral);
    }

    #[test]
    fn mixed_text_leans_rtl_above_threshold() {
        // 4 rtl letters vs 5 latin letters: rtl share ~44%.
        assert_eq!(classify("سلام Hello"), Script::RtlConnected);
        // 2 rtl letters vs 10 latin letters: rtl share ~17%.
        assert_eq!(classify("Hello world با"), Script::Latin);
    }

    #[test]
    fn thresholds_are_tunable() {
        let strict = ScriptThresholds {
            rtl_share: 0.9,
            latin_share: 0.5,
        };
        assert_eq!(classify_with("سلام Hello", strict), Script::Latin);
    }
}
