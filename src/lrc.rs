// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parsing of LRC-style timestamped lyric text
//!
//! LRC lines carry zero or more bracketed timestamps followed by the
//! lyric text for those times:
//!
//! ```text
//! [00:12.34]Some lyric line
//! [00:15.00][01:20.00]A line sung twice
//! A line with no timing at all
//! ```
//!
//! Accepted timestamp forms are `[mm:ss]`, `[mm:ss.x]`, `[mm:ss.xx]`,
//! `[mm:ss.xxx]` and `[hh:mm:ss]`.  Anything else between brackets
//! (`[ar:...]` metadata tags included) is left in the line's text.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One timed lyric line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LyricLine {
    /// Time the line is sung, in seconds from the start of the track
    pub time: f64,
    /// The lyric text itself
    pub text: String,
}

/// The two renderings produced from one lyric source
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Lyrics {
    /// Lyric lines joined by newline, in their original order
    pub plain: Option<String>,
    /// Timed lines in ascending time order
    pub synced: Option<Vec<LyricLine>>,
}

/// Parses lyric text into plain and time-synced renderings
///
/// Lines are trimmed, blank lines dropped, and a line whose text is
/// empty (or the `//` placeholder) once its timestamps are removed is
/// dropped entirely.  A line with several timestamps produces one
/// synced entry per timestamp, all sharing the text.  Synced entries
/// are sorted by time, ties keeping their encounter order; plain text
/// keeps the original line order regardless of timing.  Both renderings
/// are `None` rather than empty when nothing qualifies.
///
/// # Example
///
/// ```
/// use tag_codec::lrc;
///
/// let lyrics = lrc::parse("[00:10.00][00:05.00]twice\n[00:01.00]//\nuntimed");
///
/// assert_eq!(lyrics.plain.as_deref(), Some("twice\nuntimed"));
///
/// let synced = lyrics.synced.unwrap();
/// assert_eq!(synced.len(), 2);
/// assert_eq!(synced[0].time, 5.0);
/// assert_eq!(synced[1].time, 10.0);
/// assert_eq!(synced[1].text, "twice");
/// ```
pub fn parse(text: &str) -> Lyrics {
    let mut plain = Vec::new();
    let mut synced = Vec::new();

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let (times, residual) = split_tags(line);
        let residual = residual.trim();
        if residual.is_empty() || residual == "//" {
            continue;
        }

        plain.push(residual.to_owned());
        synced.extend(times.into_iter().map(|time| LyricLine {
            time,
            text: residual.to_owned(),
        }));
    }

    // stable, so same-time lines keep their encounter order
    synced.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(Ordering::Equal));

    Lyrics {
        plain: (!plain.is_empty()).then(|| plain.join("\n")),
        synced: (!synced.is_empty()).then_some(synced),
    }
}

/// Whether any line of the text carries a parseable timestamp tag
///
/// Used to decide whether free-form comment fields are actually
/// misplaced lyrics.
///
/// # Example
///
/// ```
/// use tag_codec::lrc;
///
/// assert!(lrc::has_timestamp("[00:12.34]line"));
/// assert!(!lrc::has_timestamp("just a comment"));
/// assert!(!lrc::has_timestamp("[ar:Some Artist]"));
/// ```
pub fn has_timestamp(text: &str) -> bool {
    text.lines().any(|line| !split_tags(line.trim()).0.is_empty())
}

/// Splits a line into its timestamp tags and residual text
///
/// Scans left to right in one pass.  A `[` that does not open a
/// well-formed timestamp stays in the residual text.
fn split_tags(line: &str) -> (Vec<f64>, String) {
    let mut times = Vec::new();
    let mut residual = String::new();
    let mut rest = line;

    while let Some(open) = rest.find('[') {
        residual.push_str(&rest[..open]);
        let tag = &rest[open..];

        match parse_tag(tag) {
            Some((consumed, seconds)) => {
                times.push(seconds);
                rest = &tag[consumed..];
            }
            None => {
                residual.push('[');
                rest = &tag[1..];
            }
        }
    }

    residual.push_str(rest);
    (times, residual)
}

/// Parses one `[..]` timestamp at the start of `tag`
///
/// Returns the number of bytes consumed (through the closing bracket)
/// and the time in seconds.  `[hh:mm:ss]` is told apart from
/// `[mm:ss.frac]` by its second `:` group; fractional digits are
/// right-padded to milliseconds, so `.5` is 500ms and `.12` is 120ms.
fn parse_tag(tag: &str) -> Option<(usize, f64)> {
    let inner = tag.strip_prefix('[')?;

    let (first, rest) = digits(inner, 3)?;
    let (second, rest) = digits(rest.strip_prefix(':')?, 2)?;

    if let Some(rest) = rest.strip_prefix(']') {
        let seconds = f64::from(first * 60 + second);
        Some((tag.len() - rest.len(), seconds))
    } else if let Some(frac) = rest.strip_prefix('.') {
        let (millis, rest) = fraction(frac)?;
        let rest = rest.strip_prefix(']')?;
        let seconds = f64::from(first * 60 + second) + f64::from(millis) / 1000.0;
        Some((tag.len() - rest.len(), seconds))
    } else if let Some(third) = rest.strip_prefix(':') {
        let (third, rest) = digits(third, 2)?;
        let rest = rest.strip_prefix(']')?;
        let seconds = f64::from(first * 3600 + second * 60 + third);
        Some((tag.len() - rest.len(), seconds))
    } else {
        None
    }
}

/// Takes 1 to `max` leading ASCII digits as a number
fn digits(s: &str, max: usize) -> Option<(u32, &str)> {
    let len = s
        .bytes()
        .take(max)
        .take_while(|b| b.is_ascii_digit())
        .count();

    match len {
        0 => None,
        _ => Some((s[..len].parse().ok()?, &s[len..])),
    }
}

/// Takes 1 to 3 fractional digits as milliseconds
fn fraction(s: &str) -> Option<(u32, &str)> {
    let (value, rest) = digits(s, 3)?;

    let millis = match s.len() - rest.len() {
        1 => value * 100,
        2 => value * 10,
        _ => value,
    };

    Some((millis, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn times(text: &str) -> Vec<f64> {
        parse(text)
            .synced
            .map(|lines| lines.into_iter().map(|l| l.time).collect())
            .unwrap_or_default()
    }

    #[test]
    fn parses_basic_line() {
        let lyrics = parse("[00:12.34]hello");
        assert_eq!(lyrics.plain.as_deref(), Some("hello"));
        let synced = lyrics.synced.unwrap();
        assert_eq!(synced.len(), 1);
        assert_eq!(synced[0].time, 12.34);
        assert_eq!(synced[0].text, "hello");
    }

    #[test]
    fn multiple_tags_share_text_and_sort() {
        let lyrics = parse("[00:10.00][00:05.00]x");
        let synced = lyrics.synced.unwrap();
        assert_eq!(synced.len(), 2);
        assert_eq!((synced[0].time, synced[0].text.as_str()), (5.0, "x"));
        assert_eq!((synced[1].time, synced[1].text.as_str()), (10.0, "x"));
    }

    #[test]
    fn sort_is_stable_for_ties() {
        let lyrics = parse("[00:05.00]first\n[00:05.00]second");
        let synced = lyrics.synced.unwrap();
        assert_eq!(synced[0].text, "first");
        assert_eq!(synced[1].text, "second");
    }

    #[test]
    fn placeholder_and_empty_lines_dropped() {
        let lyrics = parse("[00:01.00]//\n[00:02.00]\n\n   ");
        assert_eq!(lyrics.plain, None);
        assert_eq!(lyrics.synced, None);
    }

    #[test]
    fn untimed_lines_are_plain_only() {
        let lyrics = parse("first\n[00:03.00]second");
        assert_eq!(lyrics.plain.as_deref(), Some("first\nsecond"));
        assert_eq!(lyrics.synced.unwrap().len(), 1);
    }

    #[test]
    fn plain_keeps_line_order_not_time_order() {
        let lyrics = parse("[00:30.00]late\n[00:10.00]early");
        assert_eq!(lyrics.plain.as_deref(), Some("late\nearly"));
        assert_eq!(times("[00:30.00]late\n[00:10.00]early"), vec![10.0, 30.0]);
    }

    #[test]
    fn fraction_digits_pad_to_milliseconds() {
        assert_eq!(times("[00:01.5]a"), vec![1.5]);
        assert_eq!(times("[00:01.12]a"), vec![1.12]);
        assert_eq!(times("[00:01.120]a"), vec![1.12]);
        assert_eq!(times("[00:01.123]a"), vec![1.123]);
    }

    #[test]
    fn hours_form() {
        assert_eq!(times("[01:02:03]a"), vec![3723.0]);
    }

    #[test]
    fn bare_minutes_seconds_form() {
        assert_eq!(times("[02:30]a"), vec![150.0]);
    }

    #[test]
    fn metadata_tags_stay_in_text() {
        let lyrics = parse("[ar:Somebody]");
        assert_eq!(lyrics.plain.as_deref(), Some("[ar:Somebody]"));
        assert_eq!(lyrics.synced, None);
    }

    #[test]
    fn malformed_tags_stay_in_text() {
        let lyrics = parse("[99]broken [00:xx.00]also");
        assert_eq!(lyrics.synced, None);
        assert_eq!(lyrics.plain.as_deref(), Some("[99]broken [00:xx.00]also"));
    }

    #[test]
    fn tag_after_text_still_counts() {
        let lyrics = parse("before [00:09.00] after");
        let synced = lyrics.synced.unwrap();
        assert_eq!(synced[0].time, 9.0);
        assert_eq!(synced[0].text, "before  after");
    }

    #[test]
    fn crlf_input() {
        let lyrics = parse("[00:01.00]one\r\n[00:02.00]two\r\n");
        assert_eq!(lyrics.plain.as_deref(), Some("one\ntwo"));
        assert_eq!(lyrics.synced.unwrap().len(), 2);
    }
}
