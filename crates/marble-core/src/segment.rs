//! Overlapping, line-numbered text segmenter.
//!
//! Splits a document into fixed-size character windows that overlap by a
//! configurable amount, and records the 1-indexed inclusive line range each
//! window covers so answers can cite `[start_line, end_line]`.
//!
//! # Algorithm
//!
//! 1. Treat the text as a sequence of characters (not bytes) with a
//!    parallel prefix count of `\n` occurrences.
//! 2. Emit a window of `chunk_size` characters, advance by
//!    `chunk_size - overlap`, and repeat until the remaining tail is no
//!    longer than `chunk_size`; the tail becomes the final segment.
//! 3. `start_line` is one plus the newlines before the window start;
//!    `end_line` is one plus the newlines before the window's last
//!    character.
//!
//! The number of segments is `ceil((len - overlap) / (chunk_size - overlap))`
//! with a minimum of one for any non-empty input. Empty or whitespace-only
//! text yields no segments at all; callers treat that as "no content".
//!
//! # Example
//!
//! ```rust
//! use marble_core::segment::segment;
//!
//! let segments = segment("alpha\nbeta\ngamma", 1500, 200).unwrap();
//! assert_eq!(segments.len(), 1);
//! assert_eq!((segments[0].start_line, segments[0].end_line), (1, 3));
//! ```

use crate::error::{Error, Result};

/// One window of text with its inclusive line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
}

/// Split `text` into overlapping windows of `chunk_size` characters.
///
/// # Errors
///
/// Returns [`Error::Validation`] when `chunk_size` is zero or
/// `overlap >= chunk_size`.
pub fn segment(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Segment>> {
    if chunk_size == 0 {
        return Err(Error::validation("chunk size must be greater than zero"));
    }
    if overlap >= chunk_size {
        return Err(Error::validation(format!(
            "overlap ({}) must be smaller than chunk size ({})",
            overlap, chunk_size
        )));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let newlines_before = newline_prefix(&chars);
    let step = chunk_size - overlap;
    let len = chars.len();

    let mut segments = Vec::with_capacity(expected_count(len, chunk_size, overlap));
    let mut start = 0usize;

    loop {
        let end = if len - start <= chunk_size {
            len
        } else {
            start + chunk_size
        };

        segments.push(Segment {
            content: chars[start..end].iter().collect(),
            start_line: 1 + newlines_before[start] as i64,
            end_line: 1 + newlines_before[end - 1] as i64,
        });

        if end == len {
            break;
        }
        start += step;
    }

    Ok(segments)
}

/// `ceil((len - overlap) / (chunk_size - overlap))`, at least one.
pub fn expected_count(len: usize, chunk_size: usize, overlap: usize) -> usize {
    if len == 0 {
        return 0;
    }
    if len <= chunk_size {
        return 1;
    }
    let step = chunk_size - overlap;
    (len - overlap).div_ceil(step)
}

/// `out[i]` is the number of `\n` characters in `chars[..i]`.
fn newline_prefix(chars: &[char]) -> Vec<usize> {
    let mut out = Vec::with_capacity(chars.len() + 1);
    let mut count = 0usize;
    out.push(0);
    for &c in chars {
        if c == '\n' {
            count += 1;
        }
        out.push(count);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_lines(n: usize) -> String {
        (1..=n)
            .map(|i| format!("line {:03} of the handbook", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn single_line_is_one_segment() {
        let text = "Project Marble empowers teams to chat with their files.";
        let segments = segment(text, 1500, 200).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].content, text);
        assert_eq!((segments[0].start_line, segments[0].end_line), (1, 1));
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert!(segment("", 100, 10).unwrap().is_empty());
        assert!(segment("  \n\t \n", 100, 10).unwrap().is_empty());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        assert!(matches!(segment("abc", 10, 10), Err(Error::Validation(_))));
        assert!(matches!(segment("abc", 10, 12), Err(Error::Validation(_))));
        assert!(matches!(segment("abc", 0, 0), Err(Error::Validation(_))));
    }

    #[test]
    fn count_matches_formula() {
        let text = "x".repeat(1000);
        for (size, overlap) in [(100, 0), (100, 20), (300, 299), (999, 1), (1000, 5), (1001, 0)] {
            let segments = segment(&text, size, overlap).unwrap();
            assert_eq!(
                segments.len(),
                expected_count(1000, size, overlap),
                "size={} overlap={}",
                size,
                overlap
            );
        }
        assert_eq!(expected_count(1000, 100, 20), 13);
    }

    #[test]
    fn windows_overlap_by_configured_amount() {
        let text: String = ('a'..='z').collect();
        let segments = segment(&text, 10, 4).unwrap();
        assert_eq!(segments[0].content, "abcdefghij");
        assert_eq!(segments[1].content, "ghijklmnop");
        assert!(segments.last().unwrap().content.ends_with('z'));
        assert!(segments.last().unwrap().content.chars().count() <= 10);
    }

    #[test]
    fn line_ranges_are_monotonic_and_bounded() {
        let text = numbered_lines(120);
        let total_lines = text.lines().count() as i64;
        let segments = segment(&text, 300, 60).unwrap();
        assert!(segments.len() > 1);

        let mut prev = (1i64, 1i64);
        for s in &segments {
            assert!(s.start_line >= 1);
            assert!(s.start_line <= s.end_line);
            assert!(s.end_line <= total_lines);
            assert!(s.start_line >= prev.0);
            assert!(s.end_line >= prev.1);
            prev = (s.start_line, s.end_line);
        }
        assert_eq!(segments[0].start_line, 1);
        assert_eq!(segments.last().unwrap().end_line, total_lines);
    }

    #[test]
    fn line_numbers_match_content() {
        let text = numbered_lines(40);
        for s in segment(&text, 200, 50).unwrap() {
            let first_full = s
                .content
                .lines()
                .find(|l| l.starts_with("line ") && l.len() == "line 001 of the handbook".len());
            if let Some(line) = first_full {
                let n: i64 = line[5..8].parse().unwrap();
                assert!(n >= s.start_line && n <= s.end_line, "{:?}", s);
            }
        }
    }

    #[test]
    fn trailing_newline_stays_on_its_line() {
        let segments = segment("only line\n", 100, 10).unwrap();
        assert_eq!((segments[0].start_line, segments[0].end_line), (1, 1));
    }

    #[test]
    fn counts_characters_not_bytes() {
        let text = "┌──┐\n│é │\n└──┘";
        let segments = segment(text, 5, 1).unwrap();
        for s in &segments {
            assert!(s.content.chars().count() <= 5);
        }
        assert_eq!(segments.len(), expected_count(text.chars().count(), 5, 1));
    }

    #[test]
    fn deterministic() {
        let text = numbered_lines(30);
        assert_eq!(segment(&text, 120, 30).unwrap(), segment(&text, 120, 30).unwrap());
    }
}
