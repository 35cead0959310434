//! Finds the largest font size and line wrap that fit a caption in a box.

use super::fonts::FontFace;
use super::script::Script;
use super::shaping::reorder_line;

/// Smallest size the fitter will go down to.
pub const MIN_FONT_PX: u32 = 12;

#[derive(Debug, Clone, Copy)]
pub struct FitBox {
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct FittedLine {
    /// Visual-order text, ready for left-to-right glyph placement.
    pub display: String,
    pub width: f32,
}

#[derive(Debug, Clone)]
pub struct FittedText {
    pub px: u32,
    pub lines: Vec<FittedLine>,
    pub ascent: f32,
    pub line_height: f32,
    pub block_width: f32,
    pub block_height: f32,
    /// Set when even the floor size does not fit.
    pub overflow: bool,
}

#[derive(Debug, Clone, PartialEq)]
struct WrappedLine {
    words: Vec<String>,
    paragraph: usize,
}

impl WrappedLine {
    fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// Fits logical-order (already reshaped) `text` into `bounds`.
///
/// Sizes are tried from `nominal_px` down to [`MIN_FONT_PX`]; the first size
/// at which the greedy wrap fits both dimensions wins. If none does, the floor
/// size is returned with `overflow` set.
pub fn fit_text(
    text: &str,
    script: Script,
    face: &FontFace,
    bounds: FitBox,
    nominal_px: u32,
) -> FittedText {
    let nominal_px = nominal_px.max(MIN_FONT_PX);

    for px in (MIN_FONT_PX..=nominal_px).rev() {
        let size = px as f32;
        let measure = |s: &str| face.text_width(s, size);
        let Some(mut lines) = wrap(text, &measure, bounds.width, true) else {
            continue;
        };
        if block_height(face, size, lines.len()) <= bounds.height {
            if script.is_rtl() {
                rebalance(&mut lines, &measure, bounds.width);
            }
            return finish(lines, script, face, px, false);
        }
    }

    let size = MIN_FONT_PX as f32;
    let measure = |s: &str| face.text_width(s, size);
    let lines = wrap(text, &measure, bounds.width, false).unwrap_or_default();
    tracing::debug!(lines = lines.len(), "Caption overflows at the minimum font size");
    finish(lines, script, face, MIN_FONT_PX, true)
}

fn block_height(face: &FontFace, px: f32, line_count: usize) -> f32 {
    if line_count == 0 {
        return 0.0;
    }
    let m = face.line_metrics(px);
    m.line_height * (line_count - 1) as f32 + (m.ascent - m.descent)
}

/// Greedy whitespace wrap. With `strict`, a single word wider than
/// `max_width` makes the wrap fail instead of overflowing.
fn wrap(
    text: &str,
    measure: &impl Fn(&str) -> f32,
    max_width: f32,
    strict: bool,
) -> Option<Vec<WrappedLine>> {
    let mut lines = Vec::new();
    let blank = text.trim().is_empty();

    for (paragraph, para) in text.split('\n').enumerate() {
        // A blank paragraph keeps its place as an empty line.
        if para.trim().is_empty() {
            if !blank {
                lines.push(WrappedLine {
                    words: Vec::new(),
                    paragraph,
                });
            }
            continue;
        }

        let mut current: Vec<String> = Vec::new();

        for word in para.split_whitespace() {
            if strict && measure(word) > max_width {
                return None;
            }

            if current.is_empty() {
                current.push(word.to_string());
                continue;
            }

            let candidate = format!("{} {}", current.join(" "), word);
            if measure(&candidate) <= max_width {
                current.push(word.to_string());
            } else {
                lines.push(WrappedLine {
                    words: std::mem::take(&mut current),
                    paragraph,
                });
                current.push(word.to_string());
            }
        }

        if !current.is_empty() {
            lines.push(WrappedLine {
                words: current,
                paragraph,
            });
        }
    }

    Some(lines)
}

/// Moves trailing words down into a short dangling last line of each
/// paragraph. Only break points change; the word sequence is untouched.
fn rebalance(lines: &mut [WrappedLine], measure: &impl Fn(&str) -> f32, max_width: f32) {
    for i in 1..lines.len() {
        let is_last_of_paragraph =
            i + 1 == lines.len() || lines[i + 1].paragraph != lines[i].paragraph;
        if !is_last_of_paragraph || lines[i - 1].paragraph != lines[i].paragraph {
            continue;
        }

        loop {
            let prev_width = measure(&lines[i - 1].text());
            let last_width = measure(&lines[i].text());
            if last_width * 3.0 >= prev_width || lines[i - 1].words.len() < 2 {
                break;
            }

            let Some(moved) = lines[i - 1].words.pop() else {
                break;
            };
            lines[i].words.insert(0, moved);

            let new_last = measure(&lines[i].text());
            let new_prev = measure(&lines[i - 1].text());
            if new_last > max_width || new_last > new_prev {
                let moved = lines[i].words.remove(0);
                lines[i - 1].words.push(moved);
                break;
            }
        }
    }
}

fn finish(
    lines: Vec<WrappedLine>,
    script: Script,
    face: &FontFace,
    px: u32,
    overflow: bool,
) -> FittedText {
    let size = px as f32;
    let metrics = face.line_metrics(size);

    let lines: Vec<FittedLine> = lines
        .iter()
        .map(|line| {
            let logical = line.text();
            let width = face.text_width(&logical, size);
            FittedLine {
                display: reorder_line(&logical, script.is_rtl()),
                width,
            }
        })
        .collect();

    let block_width = lines.iter().map(|l| l.width).fold(0.0, f32::max);
    let block_height = block_height(face, size, lines.len());

    FittedText {
        px,
        lines,
        ascent: metrics.ascent,
        line_height: metrics.line_height,
        block_width,
        block_height,
        overflow,
    }
}
