//! Line-protocol encoder, the inverse of [`decode`](super::decode) for
//! names and values that do not contain reserved characters.

use crate::protocol::point::Point;
use std::fmt::Write;

impl Point {
    /// Render this point as a single line-protocol record (no newline).
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::with_capacity(64);
        write_point(&mut line, self);
        line
    }
}

/// Encode `points` as newline-terminated records.
pub fn encode<'a, I>(points: I) -> String
where
    I: IntoIterator<Item = &'a Point>,
{
    let mut buffer = String::new();
    for point in points {
        write_point(&mut buffer, point);
        buffer.push('\n');
    }
    buffer
}

fn write_point(out: &mut String, point: &Point) {
    out.push_str(&point.measurement);
    for (key, value) in point.tags.iter() {
        let _ = write!(out, ",{}={}", key, value);
    }

    for (i, (key, value)) in point.fields.iter().enumerate() {
        out.push(if i == 0 { ' ' } else { ',' });
        let _ = write!(out, "{}={}", key, value.raw());
    }

    if let Some(timestamp) = &point.timestamp {
        let _ = write!(out, " {}", timestamp);
    }
}
