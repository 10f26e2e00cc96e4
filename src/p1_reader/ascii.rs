use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

use crate::obis_utils::obis;

lazy_static! {
    // 1-0:1.8.1(001234.567*kWh)
    static ref OBIS_LINE: Regex =
        Regex::new(r"^1-0:([0-9]+)\.([0-9]+)\.([0-9]+)\(\s*([-+]?(?:[0-9]+\.?[0-9]*|\.[0-9]+)(?:[eE][-+]?[0-9]+)?)").unwrap();
}

#[derive(Debug, PartialEq)]
pub enum AsciiLine<'a> {
    Obis { obis: u32, value: f64 },
    Text(Cow<'a, str>),
}

pub struct LineStep<'a> {
    pub line: Option<AsciiLine<'a>>,
    /// The end marker or the end of the data was reached.
    pub last: bool,
}

/// Walks an ASCII telegram line by line.
pub struct AsciiDecoder {
    cursor: usize,
}

impl AsciiDecoder {
    pub fn new() -> Self {
        Self { cursor: 0 }
    }

    pub fn start(&mut self) {
        self.cursor = 0;
    }

    pub fn next_line<'a>(&mut self, data: &'a [u8]) -> LineStep<'a> {
        while self.cursor < data.len() && matches!(data[self.cursor], b'\r' | b'\n') {
            self.cursor += 1;
        }

        let start = self.cursor.min(data.len());
        let end = data[start..]
            .iter()
            .position(|b| matches!(b, b'\r' | b'\n' | b'!'))
            .map(|p| start + p)
            .unwrap_or(data.len());

        let last = end >= data.len() || data[end] == b'!';
        self.cursor = end + 1;

        let line = if end > start { Some(parse_line(String::from_utf8_lossy(&data[start..end]))) } else { None };
        LineStep { line, last }
    }
}

impl Default for AsciiDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric "1-0:a.b.c(value" lines become OBIS values, everything else is text.
pub fn parse_line(line: Cow<'_, str>) -> AsciiLine<'_> {
    if let Some(caps) = OBIS_LINE.captures(&line) {
        let parsed = (
            caps[1].parse::<u32>(),
            caps[2].parse::<u32>(),
            caps[3].parse::<u32>(),
            caps[4].parse::<f64>(),
        );
        if let (Ok(major), Ok(minor), Ok(micro), Ok(value)) = parsed {
            return AsciiLine::Obis { obis: obis(major, minor, micro), value };
        }
    }
    AsciiLine::Text(line)
}
