//! Reading octal memory images.
//!
//! An image is text.  Each line holds an octal address, a colon and
//! any number of octal words, which are loaded at consecutive
//! addresses starting there:
//!
//! ```text
//! # A loop.
//! 1000: 001000710000
//! ```
//!
//! Everything after a `#` is ignored, as are blank lines.
use std::error::Error;
use std::fmt::{self, Display, Formatter};

use base::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub words: Vec<Word36>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageError {
    pub line: usize,
    pub problem: String,
}

impl Display for ImageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "line {}: {}", self.line, self.problem)
    }
}

impl Error for ImageError {}

fn parse_word(token: &str) -> Result<Word36, String> {
    let value =
        u64::from_str_radix(token, 8).map_err(|e| format!("'{token}' is not an octal number: {e}"))?;
    Word36::try_from(value).map_err(|_| format!("{token} does not fit in 36 bits"))
}

fn parse_line(text: &str) -> Result<Option<Segment>, String> {
    let text = match text.split_once('#') {
        Some((before, _)) => before,
        None => text,
    }
    .trim();
    if text.is_empty() {
        return Ok(None);
    }
    let (address, words) = text
        .split_once(':')
        .ok_or_else(|| "expected an address followed by ':'".to_string())?;
    let address = address.trim();
    let start = usize::from_str_radix(address, 8)
        .map_err(|e| format!("'{address}' is not an octal address: {e}"))?;
    let words = words
        .split_whitespace()
        .map(parse_word)
        .collect::<Result<Vec<Word36>, String>>()?;
    Ok(Some(Segment { start, words }))
}

pub fn parse_image(text: &str) -> Result<Vec<Segment>, ImageError> {
    text.lines()
        .enumerate()
        .filter_map(|(n, line)| match parse_line(line) {
            Ok(segment) => segment.map(Ok),
            Err(problem) => Some(Err(ImageError { line: n + 1, problem })),
        })
        .collect()
}

#[test]
fn test_parse_image() {
    let image = "# comment\n\n1000: 1 2 # trailing\n  20:777777777777\n";
    assert_eq!(
        parse_image(image),
        Ok(vec![
            Segment {
                start: 0o1000,
                words: vec![Word36::ONE, Word36::truncating(2)],
            },
            Segment {
                start: 0o20,
                words: vec![Word36::MAX],
            },
        ])
    );
}

#[test]
fn test_parse_image_errors() {
    let err = parse_image("100: 1\n100 2\n").expect_err("missing colon");
    assert_eq!(err.line, 2);
    let err = parse_image("100: 8\n").expect_err("not octal");
    assert_eq!(err.line, 1);
    assert!(parse_image("0: 1000000000000\n").is_err());
}
