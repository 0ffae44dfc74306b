//! Plain-text transcript extraction from raw terminal output.
//!
//! Each line is replayed on a column model so in-line edits (carriage
//! return, backspace, cursor movement, erase) leave the text the user saw.
//! Unlike reading the emulator's screen, nothing is lost when output
//! scrolls past the scrollback limit.

use std::iter::Peekable;
use std::str::Chars;

const TAB_WIDTH: usize = 8;

/// Converts raw terminal bytes into plain text lines.
///
/// `\r\n` collapses to `\n`, tabs advance to the next multiple of 8, escape
/// sequences other than the line-editing ones are dropped and trailing
/// whitespace is trimmed.
pub fn normalize(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut out = String::with_capacity(text.len());
    let mut line = Line::default();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                out.push_str(line.take().trim_end());
                out.push('\n');
            }
            '\r' => line.cursor = 0,
            '\x08' => line.cursor = line.cursor.saturating_sub(1),
            '\t' => line.cursor = (line.cursor / TAB_WIDTH + 1) * TAB_WIDTH,
            '\x1b' => escape(&mut chars, &mut line),
            c if c.is_control() => {}
            c => line.put(c),
        }
    }
    out.push_str(line.take().trim_end());
    out
}

#[derive(Debug, Default)]
struct Line {
    cells: Vec<char>,
    cursor: usize,
}

impl Line {
    fn put(&mut self, ch: char) {
        if self.cursor < self.cells.len() {
            self.cells[self.cursor] = ch;
        } else {
            self.cells.resize(self.cursor, ' ');
            self.cells.push(ch);
        }
        self.cursor += 1;
    }

    /// Erase in line: 0 from the cursor, 1 up to and including it, 2 all.
    fn erase(&mut self, mode: usize) {
        match mode {
            0 => self.cells.truncate(self.cursor),
            1 => {
                let end = (self.cursor + 1).min(self.cells.len());
                self.cells[..end].fill(' ');
            }
            2 => self.cells.clear(),
            _ => {}
        }
    }

    fn delete(&mut self, count: usize) {
        if self.cursor < self.cells.len() {
            let end = (self.cursor + count).min(self.cells.len());
            self.cells.drain(self.cursor..end);
        }
    }

    fn apply_csi(&mut self, action: char, params: &str) {
        let first = params.split(';').next().and_then(|p| p.parse::<usize>().ok());
        let count = first.unwrap_or(1).max(1);
        match action {
            'D' => self.cursor = self.cursor.saturating_sub(count),
            'C' => self.cursor += count,
            'G' => self.cursor = count - 1,
            'K' => self.erase(first.unwrap_or(0)),
            'P' => self.delete(count),
            _ => {}
        }
    }

    fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.cells).into_iter().collect()
    }
}

/// Consumes the sequence after an ESC, applying it to `line` when it edits
/// the current line.
fn escape(chars: &mut Peekable<Chars<'_>>, line: &mut Line) {
    match chars.next() {
        Some('[') => {
            let mut params = String::new();
            // A control character inside the sequence aborts it and is kept.
            while let Some(&ch) = chars.peek() {
                if ch.is_control() {
                    return;
                }
                chars.next();
                if ('\x40'..='\x7e').contains(&ch) {
                    line.apply_csi(ch, &params);
                    return;
                }
                params.push(ch);
            }
        }
        Some(']') => {
            // OSC, terminated by BEL or ESC \
            while let Some(ch) = chars.next() {
                match ch {
                    '\x07' => return,
                    '\x1b' => {
                        chars.next_if_eq(&'\\');
                        return;
                    }
                    _ => {}
                }
            }
        }
        Some('(' | ')' | '*' | '+' | '#' | '%') => {
            chars.next();
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_lines_pass_through() {
        assert_eq!(normalize(b"1\n2\n3\n4\n5\n"), "1\n2\n3\n4\n5\n");
    }

    #[test]
    fn test_crlf_collapses() {
        assert_eq!(normalize(b"hello\r\nworld\r\n"), "hello\nworld\n");
    }

    #[test]
    fn test_color_codes_removed() {
        assert_eq!(
            normalize(b"\x1b[31mTraceback\x1b[0m (most recent call last):\r\n"),
            "Traceback (most recent call last):\n"
        );
    }

    #[test]
    fn test_carriage_return_overwrites() {
        assert_eq!(normalize(b"progress 10%\rprogress 100%\n"), "progress 100%\n");
        assert_eq!(normalize(b"abcdef\rXY\n"), "XYcdef\n");
    }

    #[test]
    fn test_backspace_echo_erases() {
        assert_eq!(normalize(b"Name: abcd\x08 \x08\r\n"), "Name: abc\n");
        assert_eq!(normalize(b"\x08\x08ok\n"), "ok\n");
    }

    #[test]
    fn test_cursor_left_then_overwrite() {
        assert_eq!(normalize(b"12345\x1b[3Dxy\n"), "12xy5\n");
        assert_eq!(normalize(b"12345\x1b[Dx\n"), "1234x\n");
    }

    #[test]
    fn test_cursor_right_pads_with_spaces() {
        assert_eq!(normalize(b"a\x1b[3Cb\n"), "a   b\n");
    }

    #[test]
    fn test_erase_in_line() {
        assert_eq!(normalize(b"abcdef\x1b[3D\x1b[K\n"), "abc\n");
        assert_eq!(normalize(b"abcdef\x1b[3D\x1b[1K\n"), "    ef\n");
        assert_eq!(normalize(b"abcdef\x1b[2Kxy\n"), "      xy\n");
    }

    #[test]
    fn test_readline_redraw_with_delete_char() {
        // Cursor back over "world", then delete two characters.
        assert_eq!(normalize(b"hello world\x1b[5D\x1b[2Prld\n"), "hello rld\n");
    }

    #[test]
    fn test_tabs_advance_to_next_stop() {
        assert_eq!(normalize(b"ab\tc\n"), "ab      c\n");
        assert_eq!(normalize(b"12345678\tx\n"), "12345678        x\n");
    }

    #[test]
    fn test_title_and_mode_sequences_dropped() {
        assert_eq!(normalize(b"\x1b]0;python3\x07>>> \x1b[?2004h1+1\r\n"), ">>> 1+1\n");
        assert_eq!(normalize(b"\x1b]2;title\x1b\\ok\n"), "ok\n");
    }

    #[test]
    fn test_trailing_spaces_trimmed() {
        assert_eq!(normalize(b">>>    \n"), ">>>\n");
    }

    #[test]
    fn test_missing_final_newline_preserved() {
        assert_eq!(normalize(b"Enter a number: "), "Enter a number:");
    }

    #[test]
    fn test_utf8_text_kept() {
        assert_eq!(normalize("héllo\r\n".as_bytes()), "héllo\n");
    }
}
