//! Logical-to-display text normalization for connected right-to-left scripts.
//!
//! Two steps, both pure string transforms:
//!
//! 1. [`reshape`] replaces each Arabic/Persian letter with the presentation
//!    form (isolated, initial, medial, final) dictated by its neighbours. This
//!    is table substitution only; no ligatures are formed.
//! 2. [`reorder_line`] runs the Unicode Bidirectional Algorithm (UAX #9, via
//!    `unicode-bidi`) so right-to-left runs come out in visual order and can be
//!    drawn by naive left-to-right glyph placement.
//!
//! Reordering works on a single line. Callers that wrap text must wrap first
//! (in logical order) and reorder each line afterwards, otherwise the lines of
//! a right-to-left paragraph come out in reverse order.

use std::borrow::Cow;

use unicode_bidi::{BidiInfo, Level};

use super::script::{classify, Script};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joining {
    /// Joins on neither side.
    None,
    /// Joins only to the preceding letter.
    Right,
    /// Joins on both sides.
    Dual,
}

struct Forms {
    code: u32,
    joining: Joining,
    isolated: u32,
    final_: u32,
    initial: u32,
    medial: u32,
}

const fn dual(code: u32, isolated: u32) -> Forms {
    Forms {
        code,
        joining: Joining::Dual,
        isolated,
        final_: isolated + 1,
        initial: isolated + 2,
        medial: isolated + 3,
    }
}

const fn right(code: u32, isolated: u32) -> Forms {
    Forms {
        code,
        joining: Joining::Right,
        isolated,
        final_: isolated + 1,
        initial: isolated,
        medial: isolated + 1,
    }
}

// Sorted by code point; looked up with a binary search.
const FORMS: &[Forms] = &[
    Forms {
        code: 0x0621,
        joining: Joining::None,
        isolated: 0xFE80,
        final_: 0xFE80,
        initial: 0xFE80,
        medial: 0xFE80,
    },
    right(0x0622, 0xFE81), // alef with madda
    right(0x0623, 0xFE83), // alef with hamza above
    right(0x0624, 0xFE85), // waw with hamza
    right(0x0625, 0xFE87), // alef with hamza below
    dual(0x0626, 0xFE89),  // yeh with hamza
    right(0x0627, 0xFE8D), // alef
    dual(0x0628, 0xFE8F),  // beh
    right(0x0629, 0xFE93), // teh marbuta
    dual(0x062A, 0xFE95),  // teh
    dual(0x062B, 0xFE99),  // theh
    dual(0x062C, 0xFE9D),  // jeem
    dual(0x062D, 0xFEA1),  // hah
    dual(0x062E, 0xFEA5),  // khah
    right(0x062F, 0xFEA9), // dal
    right(0x0630, 0xFEAB), // thal
    right(0x0631, 0xFEAD), // reh
    right(0x0632, 0xFEAF), // zain
    dual(0x0633, 0xFEB1),  // seen
    dual(0x0634, 0xFEB5),  // sheen
    dual(0x0635, 0xFEB9),  // sad
    dual(0x0636, 0xFEBD),  // dad
    dual(0x0637, 0xFEC1),  // tah
    dual(0x0638, 0xFEC5),  // zah
    dual(0x0639, 0xFEC9),  // ain
    dual(0x063A, 0xFECD),  // ghain
    Forms {
        code: 0x0640,
        joining: Joining::Dual,
        isolated: 0x0640,
        final_: 0x0640,
        initial: 0x0640,
        medial: 0x0640,
    },
    dual(0x0641, 0xFED1),  // feh
    dual(0x0642, 0xFED5),  // qaf
    dual(0x0643, 0xFED9),  // kaf
    dual(0x0644, 0xFEDD),  // lam
    dual(0x0645, 0xFEE1),  // meem
    dual(0x0646, 0xFEE5),  // noon
    dual(0x0647, 0xFEE9),  // heh
    right(0x0648, 0xFEED), // waw
    right(0x0649, 0xFEEF), // alef maksura
    dual(0x064A, 0xFEF1),  // yeh
    dual(0x067E, 0xFB56),  // peh
    dual(0x0686, 0xFB7A),  // tcheh
    right(0x0698, 0xFB8A), // jeh
    dual(0x06A9, 0xFB8E),  // keheh
    dual(0x06AF, 0xFB92),  // gaf
    dual(0x06CC, 0xFBFC),  // farsi yeh
];

const ZWJ: char = '\u{200D}';

fn forms(c: char) -> Option<&'static Forms> {
    let code = c as u32;
    FORMS
        .binary_search_by_key(&code, |f| f.code)
        .ok()
        .map(|i| &FORMS[i])
}

fn joining(c: char) -> Joining {
    if c == ZWJ {
        return Joining::Dual;
    }
    forms(c).map_or(Joining::None, |f| f.joining)
}

/// Combining marks that do not interrupt joining.
fn is_transparent(c: char) -> bool {
    matches!(c as u32, 0x0610..=0x061A | 0x064B..=0x065F | 0x0670 | 0x06D6..=0x06DC | 0x06DF..=0x06E4 | 0x06E7 | 0x06E8 | 0x06EA..=0x06ED)
}

/// Substitutes every connected-script letter with its contextual form.
pub fn reshape(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    for (i, &c) in chars.iter().enumerate() {
        let Some(f) = forms(c) else {
            out.push(c);
            continue;
        };

        let prev = chars[..i].iter().rev().find(|&&p| !is_transparent(p));
        let next = chars[i + 1..].iter().find(|&&n| !is_transparent(n));

        let joins_prev = f.joining != Joining::None
            && prev.map_or(false, |&p| joining(p) == Joining::Dual);
        let joins_next = f.joining == Joining::Dual
            && next.map_or(false, |&n| joining(n) != Joining::None);

        let code = match (joins_prev, joins_next) {
            (false, false) => f.isolated,
            (true, false) => f.final_,
            (false, true) => f.initial,
            (true, true) => f.medial,
        };
        out.push(char::from_u32(code).unwrap_or(c));
    }

    out
}

/// Reorders one line from logical to visual order.
///
/// With `rtl_base` the paragraph direction is forced to right-to-left;
/// otherwise it is taken from the first strong character.
pub fn reorder_line(line: &str, rtl_base: bool) -> String {
    if line.is_empty() {
        return String::new();
    }

    let base = if rtl_base { Some(Level::rtl()) } else { None };
    let info = BidiInfo::new(line, base);
    if !info.has_rtl() {
        return line.to_string();
    }

    let mut out = String::with_capacity(line.len());
    for para in &info.paragraphs {
        let reordered: Cow<'_, str> = info.reorder_line(para, para.range.clone());
        out.push_str(&reordered);
    }
    out
}

/// Reshapes and reorders `text`, line by line, for display.
pub fn to_display(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let rtl_base = classify(text) == Script::RtlConnected;
    let reshaped = reshape(text);
    reshaped
        .split('\n')
        .map(|line| reorder_line(line, rtl_base))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(s: &str) -> Vec<u32> {
        s.chars().map(|c| c as u32).collect()
    }

    #[test]
    fn latin_input_is_unchanged() {
        for text in ["", "Hello, world!", "Line one\nLine two", "v1.2 (beta) 100%"] {
            assert_eq!(to_display(text), text);
        }
    }

    #[test]
    fn joins_letters_by_neighbours() {
        // seen(initial) lam(medial) alef(final) meem(isolated)
        assert_eq!(codes(&reshape("سلام")), vec![0xFEB3, 0xFEE0, 0xFE8E, 0xFEE1]);
        // dal(isolated) noon(initial) farsi-yeh(medial) alef(final)
        assert_eq!(codes(&reshape("دنیا")), vec![0xFEA9, 0xFEE7, 0xFBFF, 0xFE8E]);
    }

    #[test]
    fn zwnj_breaks_joining() {
        // meem, zwnj, yeh: neither letter takes a joined form.
        let shaped = reshape("م\u{200C}ی");
        assert_eq!(codes(&shaped), vec![0xFEE1, 0x200C, 0xFBFC]);
    }

    #[test]
    fn harakat_are_transparent_to_joining() {
        // beh + fatha + beh: both behs still join across the mark.
        let shaped = reshape("بَب");
        assert_eq!(codes(&shaped), vec![0xFE91, 0x064E, 0xFE90]);
    }

    #[test]
    fn rtl_words_come_out_in_visual_order() {
        let display = to_display("سلام دنیا");
        let expected: String = reshape("سلام دنیا").chars().rev().collect();
        assert_eq!(display, expected);
        // First visual glyph is the final alef of the second logical word.
        assert_eq!(display.chars().next(), Some('\u{FE8E}'));
    }

    #[test]
    fn embedded_numbers_keep_their_direction() {
        let display = to_display("سال 2024");
        assert!(display.starts_with("2024 "));
        assert_eq!(display.chars().count(), "سال 2024".chars().count());
    }

    #[test]
    fn lines_are_reordered_independently() {
        let display = to_display("سلام\nدنیا");
        let lines: Vec<&str> = display.split('\n').collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], reshape("سلام").chars().rev().collect::<String>());
        assert_eq!(lines[1], reshape("دنیا").chars().rev().collect::<String>());
    }
}
