//! Keeps user-supplied text on a single log line.

/// Longest preview of message content written to the log.
pub const CONTENT_PREVIEW_CHARS: usize = 60;

/// Escape `s` for single-line logging and cap it at `max_chars` characters.
///
/// Newlines, carriage returns, tabs and backslashes get their usual escapes; any
/// other control character becomes `\xNN`. A truncated preview ends in `…`.
pub fn preview(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= max_chars {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Preview of message content at the default length.
pub fn escape_log(s: &str) -> String {
    preview(s, CONTENT_PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_log("a\nb\r\tc\\"), "a\\nb\\r\\tc\\\\");
        assert_eq!(escape_log("bell\u{7}"), "bell\\x07");
    }

    #[test]
    fn truncates_long_content() {
        let long = "x".repeat(500);
        let out = escape_log(&long);
        assert_eq!(out.chars().count(), CONTENT_PREVIEW_CHARS + 1);
        assert!(out.ends_with('…'));
        assert_eq!(preview("héllo", 2), "hé…");
    }
}
