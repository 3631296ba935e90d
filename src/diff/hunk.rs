use super::ParseError;
use nom::{
    IResult, Parser,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{opt, rest},
    sequence::preceded,
};
use serde::Serialize;
use std::fmt;

/// Which side(s) of the diff a line belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Context,
    Added,
    Removed,
}

impl LineKind {
    /// Marker character used in unified diff text
    pub fn marker(self) -> char {
        match self {
            LineKind::Context => ' ',
            LineKind::Added => '+',
            LineKind::Removed => '-',
        }
    }
}

/// A single content line of a hunk with reconstructed line numbers.
///
/// `old_num` is `None` for added lines, `new_num` is `None` for removed lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub kind: LineKind,
    pub content: String,
    pub old_num: Option<u32>,
    pub new_num: Option<u32>,
}

/// A single hunk from a unified diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// Trailing context after the closing `@@`, usually the enclosing function
    pub header: Option<String>,
    pub lines: Vec<Line>,
}

/// Raw fields captured from a hunk header before numeric conversion
struct HeaderFields<'a> {
    old: (&'a str, Option<&'a str>),
    new: (&'a str, Option<&'a str>),
    trailing: &'a str,
}

/// `start` optionally followed by `,count`
fn range(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    (digit1, opt(preceded(char(','), digit1))).parse(input)
}

/// `@@ -old[,count] +new[,count] @@ trailing`
fn header_fields(input: &str) -> IResult<&str, HeaderFields<'_>> {
    let (input, (_, old, _, new, _, trailing)) =
        (tag("@@ -"), range, tag(" +"), range, tag(" @@"), rest).parse(input)?;
    Ok((input, HeaderFields { old, new, trailing }))
}

impl Hunk {
    /// Parse a hunk header line into an empty hunk.
    ///
    /// Returns `Ok(None)` when the line is not a hunk header at all. A line that has
    /// the header shape but whose numbers do not fit in a `u32` is an error.
    /// A missing count defaults to 1.
    pub fn from_header(line: &str) -> Result<Option<Self>, ParseError> {
        let Ok((_, fields)) = header_fields(line) else {
            return Ok(None);
        };

        let number = |digits: &str| {
            digits
                .parse::<u32>()
                .map_err(|_| ParseError::MalformedHunkHeader {
                    line: line.to_string(),
                })
        };
        let count = |digits: Option<&str>| digits.map_or(Ok(1), number);

        let header = fields.trailing.trim();

        Ok(Some(Hunk {
            old_start: number(fields.old.0)?,
            old_count: count(fields.old.1)?,
            new_start: number(fields.new.0)?,
            new_count: count(fields.new.1)?,
            header: (!header.is_empty()).then(|| header.to_string()),
            lines: Vec::new(),
        }))
    }

    /// Number of added lines
    pub fn add_count(&self) -> usize {
        self.count_kind(LineKind::Added)
    }

    /// Number of removed lines
    pub fn remove_count(&self) -> usize {
        self.count_kind(LineKind::Removed)
    }

    fn count_kind(&self, kind: LineKind) -> usize {
        self.lines.iter().filter(|line| line.kind == kind).count()
    }

    /// Inclusive line span the hunk covers, on the new side unless the hunk
    /// has no new-side lines (a pure deletion), in which case the old side.
    pub fn span(&self) -> (u32, u32) {
        let (start, count) = if self.new_count == 0 {
            (self.old_start, self.old_count)
        } else {
            (self.new_start, self.new_count)
        };
        (start, start.saturating_add(count.saturating_sub(1)))
    }
}

/// Accumulates content lines for an open hunk, assigning line numbers from
/// two running counters seeded by the header.
pub(super) struct HunkBuilder {
    hunk: Hunk,
    old_line: u32,
    new_line: u32,
}

impl HunkBuilder {
    pub(super) fn new(hunk: Hunk) -> Self {
        Self {
            old_line: hunk.old_start,
            new_line: hunk.new_start,
            hunk,
        }
    }

    /// Classify one line of hunk body. Lines that are not content (such as
    /// `\ No newline at end of file`) are skipped without touching the counters.
    pub(super) fn push(&mut self, line: &str) {
        let (kind, content) = if let Some(content) = line.strip_prefix('+') {
            (LineKind::Added, content)
        } else if let Some(content) = line.strip_prefix('-') {
            (LineKind::Removed, content)
        } else if let Some(content) = line.strip_prefix(' ') {
            (LineKind::Context, content)
        } else if line.is_empty() {
            (LineKind::Context, "")
        } else {
            return;
        };

        let old_num = (kind != LineKind::Added).then_some(self.old_line);
        let new_num = (kind != LineKind::Removed).then_some(self.new_line);
        if old_num.is_some() {
            self.old_line = self.old_line.saturating_add(1);
        }
        if new_num.is_some() {
            self.new_line = self.new_line.saturating_add(1);
        }

        self.hunk.lines.push(Line {
            kind,
            content: content.to_string(),
            old_num,
            new_num,
        });
    }

    pub(super) fn finish(self) -> Hunk {
        self.hunk
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}{}", self.kind.marker(), self.content)
    }
}

impl fmt::Display for Hunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@@ -{},{} +{},{} @@",
            self.old_start, self.old_count, self.new_start, self.new_count
        )?;
        if let Some(header) = &self.header {
            write!(f, " {}", header)?;
        }
        writeln!(f)?;

        for line in &self.lines {
            write!(f, "{}", line)?;
        }

        Ok(())
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_kind() -> impl Strategy<Value = LineKind> {
        prop_oneof![
            Just(LineKind::Context),
            Just(LineKind::Added),
            Just(LineKind::Removed),
        ]
    }

    fn arb_body() -> impl Strategy<Value = Vec<(LineKind, String)>> {
        prop::collection::vec((arb_kind(), "[a-z ]{0,12}"), 0..40)
    }

    proptest! {
        /// Numbers start at the header values, increase by one per touched side,
        /// and the side counts match what a consistent header would declare.
        #[test]
        fn reconstructed_numbers_are_consistent(
            old_start in 1u32..5000,
            new_start in 1u32..5000,
            body in arb_body(),
        ) {
            let old_count = body.iter().filter(|(k, _)| *k != LineKind::Added).count() as u32;
            let new_count = body.iter().filter(|(k, _)| *k != LineKind::Removed).count() as u32;
            let header = format!("@@ -{old_start},{old_count} +{new_start},{new_count} @@");

            let mut builder = HunkBuilder::new(Hunk::from_header(&header).unwrap().unwrap());
            for (kind, content) in &body {
                builder.push(&format!("{}{}", kind.marker(), content));
            }
            let hunk = builder.finish();

            prop_assert_eq!(hunk.lines.len(), body.len());

            let old: Vec<u32> = hunk.lines.iter().filter_map(|l| l.old_num).collect();
            let new: Vec<u32> = hunk.lines.iter().filter_map(|l| l.new_num).collect();
            prop_assert_eq!(old.len() as u32, hunk.old_count);
            prop_assert_eq!(new.len() as u32, hunk.new_count);
            prop_assert_eq!(old, (old_start..old_start + old_count).collect::<Vec<_>>());
            prop_assert_eq!(new, (new_start..new_start + new_count).collect::<Vec<_>>());
        }
    }
}
