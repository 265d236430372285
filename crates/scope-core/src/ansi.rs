//! Interpreter for SGR color escapes embedded in raw process output.
//!
//! Raw terminal bytes are untrusted: the interpreter accepts any input and
//! degrades to plain text instead of erroring. Non-SGR escape sequences are
//! removed without effect on style.

/// Color component of a style, in terminal terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnsiColor {
    #[default]
    Default,
    Indexed(u8),
    Rgb(u8, u8, u8),
}

/// Style in effect for a run of text. Persists across consecutive non-escape
/// text within a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextStyle {
    pub fg: AnsiColor,
    pub bg: AnsiColor,
    pub bold: bool,
    pub dim: bool,
    pub italic: bool,
    pub underline: bool,
    pub inverse: bool,
}

impl TextStyle {
    fn reset(&mut self) {
        *self = TextStyle::default();
    }

    pub fn is_plain(&self) -> bool {
        *self == TextStyle::default()
    }
}

/// A styled run of text. Produced transiently per rendered line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSegment {
    pub text: String,
    pub style: TextStyle,
}

/// Splits a line into styled segments.
///
/// Concatenating the segment texts reconstructs `strip(raw)`. A line without
/// escapes yields a single default-styled segment.
pub fn parse_line(raw: &str) -> Vec<StyledSegment> {
    let mut segments = Vec::new();
    let mut style = TextStyle::default();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            current.push(ch);
            continue;
        }
        match chars.peek() {
            Some('[') => {
                chars.next();
                if let Some(params) = consume_csi(&mut chars) {
                    if !current.is_empty() {
                        segments.push(StyledSegment {
                            text: std::mem::take(&mut current),
                            style,
                        });
                    }
                    apply_sgr(&params, &mut style);
                }
            }
            Some(']') => {
                chars.next();
                consume_osc(&mut chars);
            }
            Some(_) => {
                // Two-character escape (ESC c, ESC =, ...): drop it.
                chars.next();
            }
            None => {}
        }
    }

    if !current.is_empty() || segments.is_empty() {
        segments.push(StyledSegment {
            text: current,
            style,
        });
    }
    segments
}

/// Removes all escape sequences. Idempotent: the output contains no escapes.
pub fn strip(raw: &str) -> String {
    parse_line(raw)
        .into_iter()
        .map(|segment| segment.text)
        .collect()
}

/// Consumes a CSI sequence after `ESC [`. Returns the parameter list when the
/// sequence is an SGR (`m` final byte); any other CSI is swallowed whole.
fn consume_csi(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<Vec<u16>> {
    let mut params: Vec<u16> = Vec::new();
    let mut digits = String::new();
    let mut sgr_shaped = true;

    for ch in chars.by_ref() {
        match ch {
            '0'..='9' => digits.push(ch),
            ';' | ':' => {
                params.push(parse_param(&digits));
                digits.clear();
            }
            // Final byte range per ECMA-48.
            '\u{40}'..='\u{7e}' => {
                if ch == 'm' && sgr_shaped {
                    params.push(parse_param(&digits));
                    return Some(params);
                }
                return None;
            }
            _ => sgr_shaped = false,
        }
    }
    // Truncated sequence at end of line: nothing to apply.
    None
}

/// Empty parameters mean 0 (reset); out-of-range values become a code no SGR
/// rule recognizes, so they are ignored rather than misread as a reset.
fn parse_param(digits: &str) -> u16 {
    if digits.is_empty() {
        return 0;
    }
    digits.parse().unwrap_or(u16::MAX)
}

/// Consumes an OSC sequence after `ESC ]`, terminated by BEL or ESC `\`.
fn consume_osc(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while let Some(ch) = chars.next() {
        match ch {
            '\u{7}' => return,
            '\u{1b}' => {
                if chars.peek() == Some(&'\\') {
                    chars.next();
                }
                return;
            }
            _ => {}
        }
    }
}

/// Applies an SGR parameter list to the current style. Unrecognized codes
/// leave the style unchanged.
fn apply_sgr(params: &[u16], style: &mut TextStyle) {
    let mut iter = params.iter().peekable();
    while let Some(&param) = iter.next() {
        match param {
            0 => style.reset(),
            1 => style.bold = true,
            2 => style.dim = true,
            3 => style.italic = true,
            4 => style.underline = true,
            7 => style.inverse = true,
            22 => {
                style.bold = false;
                style.dim = false;
            }
            23 => style.italic = false,
            24 => style.underline = false,
            27 => style.inverse = false,
            30..=37 => style.fg = AnsiColor::Indexed((param - 30) as u8),
            38 => {
                if let Some(color) = extended_color(&mut iter) {
                    style.fg = color;
                }
            }
            39 => style.fg = AnsiColor::Default,
            40..=47 => style.bg = AnsiColor::Indexed((param - 40) as u8),
            48 => {
                if let Some(color) = extended_color(&mut iter) {
                    style.bg = color;
                }
            }
            49 => style.bg = AnsiColor::Default,
            90..=97 => style.fg = AnsiColor::Indexed((param - 90 + 8) as u8),
            100..=107 => style.bg = AnsiColor::Indexed((param - 100 + 8) as u8),
            _ => {}
        }
    }
}

/// Parses the `5;n` (256-color) and `2;r;g;b` (truecolor) forms after 38/48.
fn extended_color<'a>(
    iter: &mut std::iter::Peekable<std::slice::Iter<'a, u16>>,
) -> Option<AnsiColor> {
    match iter.next() {
        Some(5) => iter.next().map(|&n| AnsiColor::Indexed(n as u8)),
        Some(2) => {
            let r = iter.next().copied().unwrap_or(0) as u8;
            let g = iter.next().copied().unwrap_or(0) as u8;
            let b = iter.next().copied().unwrap_or(0) as u8;
            Some(AnsiColor::Rgb(r, g, b))
        }
        _ => None,
    }
}
