const ESC: char = '\u{1b}';

/// Turns the raw byte stream of a device into text lines.
///
/// Bytes are buffered until a `\n` arrives, so a line split across several reads comes out
/// whole. A trailing `\r` is dropped, VT100 escape sequences (colors, cursor movement, which
/// device shells like to emit) are removed and invalid UTF-8 is replaced. Lines that are empty
/// after cleanup are skipped.
#[derive(Debug, Default)]
pub struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds newly received bytes and returns every line they complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in bytes {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.partial);
                let line = clean_line(&raw);
                if !line.is_empty() {
                    lines.push(line);
                }
            } else {
                self.partial.push(byte);
            }
        }

        lines
    }
}

fn clean_line(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let mut cleaned = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == ESC {
            // CSI sequences end with a byte in 0x40..=0x7e, other escapes are two characters long
            if chars.next_if_eq(&'[').is_some() {
                while let Some(c) = chars.next() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            } else {
                chars.next();
            }
        } else if c != '\r' {
            cleaned.push(c);
        }
    }

    cleaned.trim_end().to_string()
}
