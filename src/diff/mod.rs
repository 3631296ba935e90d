//! Unified diff model and parser.
//!
//! [`Diff::parse`] walks the text once, line by line. A `diff --git` header opens
//! a [`FileChange`], extended header lines set its flags and paths, and each `@@`
//! header opens a [`Hunk`] whose body lines get their old/new line numbers from
//! counters seeded by the header. Line numbers are never read from the body.
//!
//! Lines that match nothing are skipped. The only failure is a hunk header whose
//! numbers do not fit in a `u32`.

pub mod file;
pub mod hunk;
pub mod language;

pub use file::FileChange;
pub use hunk::{Hunk, Line, LineKind};

use error_set::error_set;
use hunk::HunkBuilder;
use serde::Serialize;
use std::fmt;

error_set! {
    /// Errors from parsing unified diff text
    ParseError := {
        /// Line has hunk-header shape but a field is not a valid line number
        #[display("Malformed hunk header '{line}'")]
        MalformedHunkHeader { line: String },
    }
}

/// A complete parsed diff, files in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub files: Vec<FileChange>,
}

impl Diff {
    /// Parse unified diff text (as produced by `git diff`) into a [`Diff`].
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedHunkHeader`] if a hunk header carries a
    /// number that does not fit in a `u32`.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut parser = DiffParser::default();
        for line in text.lines() {
            parser.feed(line)?;
        }
        Ok(parser.finish())
    }

    /// Total number of hunks across all files
    pub fn total_hunks(&self) -> usize {
        self.files.iter().map(|file| file.hunks.len()).sum()
    }

    /// Look up a hunk by its (file, hunk) position
    pub fn hunk(&self, file_index: usize, hunk_index: usize) -> Option<(&FileChange, &Hunk)> {
        let file = self.files.get(file_index)?;
        Some((file, file.hunks.get(hunk_index)?))
    }
}

/// Parser state. With no open file the parser is between files, with an open
/// file but no open hunk it is reading extended headers, otherwise it is
/// inside a hunk body.
#[derive(Default)]
struct DiffParser {
    files: Vec<FileChange>,
    file: Option<FileChange>,
    hunk: Option<HunkBuilder>,
}

impl DiffParser {
    fn feed(&mut self, line: &str) -> Result<(), ParseError> {
        if let Some(file) = FileChange::from_header(line) {
            self.close_file();
            self.file = Some(file);
            return Ok(());
        }

        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        if let Some(hunk) = Hunk::from_header(line)? {
            if let Some(open) = self.hunk.take() {
                file.hunks.push(open.finish());
            }
            self.hunk = Some(HunkBuilder::new(hunk));
            return Ok(());
        }

        match self.hunk.as_mut() {
            Some(builder) => builder.push(line),
            None => {
                if !file.apply_meta(line) {
                    log::debug!("skipping unrecognized header line '{line}'");
                }
            }
        }

        Ok(())
    }

    fn close_file(&mut self) {
        if let Some(mut file) = self.file.take() {
            if let Some(open) = self.hunk.take() {
                file.hunks.push(open.finish());
            }
            self.files.push(file);
        }
    }

    fn finish(mut self) -> Diff {
        self.close_file();
        Diff { files: self.files }
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            write!(f, "{}", file)?;
        }
        Ok(())
    }
}
