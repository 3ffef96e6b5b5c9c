//! Log sanitation helpers. Device output arrives as raw frames that may hold
//! control bytes; these keep every log record on a single line.

use std::fmt::Write;

/// Escape device text for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Other control characters become `\xNN`; overlong input is truncated
///   with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 240;
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lossy single-line preview of a frame that is probably text.
pub fn text_preview(data: &[u8]) -> String {
    escape_log(&String::from_utf8_lossy(data))
}

/// Lowercase-hex preview of at most `max` bytes, with a trailing `..` when
/// the frame is longer.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let shown = data.len().min(max);
    let mut out = String::with_capacity(shown * 2 + 2);
    for b in &data[..shown] {
        let _ = write!(out, "{b:02x}");
    }
    if data.len() > shown {
        out.push_str("..");
    }
    out
}
