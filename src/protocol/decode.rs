//! Streaming line-protocol decoder.
//!
//! Records have the shape
//!
//! ```text
//! measurement[,tag=val,...] field=value[,field=value...] [timestamp]
//! ```
//!
//! The decoder makes one forward pass over the buffer. Every section scanner
//! stops at a newline, so a malformed record can never swallow the next one.
//! Reserved characters are not unescaped: a `\,` or `\ ` in a name is read as
//! a plain delimiter.

use crate::protocol::point::{FieldValue, Point};

/// Decode every record in `buffer`.
///
/// Blank lines and `#` comments are skipped. Malformed records yield partial
/// points instead of errors: pairs without `=` are dropped, a record without
/// any delimiter becomes a bare measurement. Invalid UTF-8 is replaced.
pub fn decode(buffer: impl AsRef<[u8]>) -> Vec<Point> {
    let mut scanner = Scanner::new(buffer.as_ref());
    let mut points = Vec::new();
    while let Some(point) = scanner.next_point() {
        points.push(point);
    }
    points
}

/// Delimiter that ended a section scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Comma,
    Space,
    LineEnd,
}

struct Scanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn stop_here(&self) -> Stop {
        match self.peek() {
            Some(b',') => Stop::Comma,
            Some(b' ') => Stop::Space,
            _ => Stop::LineEnd,
        }
    }

    /// Skip blank lines, comment lines and leading blanks of a record.
    /// Returns false at end of input.
    fn seek_record(&mut self) -> bool {
        loop {
            match self.peek() {
                None => return false,
                Some(b'\n' | b'\r' | b' ' | b'\t') => self.pos += 1,
                Some(b'#') => self.skip_line(),
                Some(_) => return true,
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            self.pos += 1;
            if c == b'\n' {
                break;
            }
        }
    }

    fn next_point(&mut self) -> Option<Point> {
        if !self.seek_record() {
            return None;
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b',' | b' ' | b'\n') {
                break;
            }
            self.pos += 1;
        }
        let mut point = Point::new(text(&self.data[start..self.pos]));

        if self.stop_here() == Stop::Comma {
            self.pos += 1;
            self.scan_pairs(|key, value| point.insert_tag(key, value));
        }

        if self.stop_here() == Stop::Space {
            self.pos += 1;
            self.scan_pairs(|key, value| point.insert_field(key, FieldValue::new(value)));
        }

        if self.stop_here() == Stop::Space {
            self.pos += 1;
            let start = self.pos;
            while let Some(c) = self.peek() {
                if c == b'\n' {
                    break;
                }
                self.pos += 1;
            }
            let raw = text(&self.data[start..self.pos]);
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                point.timestamp = Some(trimmed.to_string());
            }
        }

        // Anything left on the line (a stray delimiter after a bare
        // measurement) belongs to no section.
        self.skip_line();
        Some(point)
    }

    /// Scan `key=value` pairs separated by commas until a space or line end.
    fn scan_pairs<F: FnMut(String, String)>(&mut self, mut emit: F) {
        loop {
            let start = self.pos;
            let mut eq = None;
            while let Some(c) = self.peek() {
                match c {
                    b'=' if eq.is_none() => eq = Some(self.pos),
                    b',' | b' ' | b'\n' => break,
                    _ => {},
                }
                self.pos += 1;
            }

            if let Some(eq) = eq {
                let key = &self.data[start..eq];
                let value = trim_cr(&self.data[eq + 1..self.pos]);
                if !key.is_empty() {
                    emit(text(key), text(value));
                }
            }

            if self.stop_here() == Stop::Comma {
                self.pos += 1;
                continue;
            }
            return;
        }
    }
}

fn trim_cr(bytes: &[u8]) -> &[u8] {
    bytes.strip_suffix(b"\r").unwrap_or(bytes)
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(trim_cr(bytes)).into_owned()
}
