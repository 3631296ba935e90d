//! Compact, index-addressed summary of a [`Diff`] used in analyzer prompts.
//!
//! The catalog carries only metadata (paths, spans, counts, headers), never
//! line content. Indices match positions in the originating diff so analyzer
//! responses can refer back to files and hunks by number.

use crate::diff::Diff;
use serde::Serialize;
use std::fmt;

/// Summary of one hunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HunkSummary {
    pub index: usize,
    pub start_line: u32,
    /// Inclusive
    pub end_line: u32,
    pub header: Option<String>,
    pub add_count: usize,
    pub remove_count: usize,
}

/// Summary of one file and its hunks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub index: usize,
    pub path: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub hunks: Vec<HunkSummary>,
}

/// Read-only projection of a diff
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub files: Vec<FileSummary>,
    pub total_hunks: usize,
}

impl Catalog {
    /// Build the catalog for a diff
    pub fn build(diff: &Diff) -> Self {
        let files: Vec<FileSummary> = diff
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| FileSummary {
                index,
                path: file.display_path().to_string(),
                is_new: file.is_new,
                is_deleted: file.is_deleted,
                hunks: file
                    .hunks
                    .iter()
                    .enumerate()
                    .map(|(index, hunk)| {
                        let (start_line, end_line) = hunk.span();
                        HunkSummary {
                            index,
                            start_line,
                            end_line,
                            header: hunk.header.clone(),
                            add_count: hunk.add_count(),
                            remove_count: hunk.remove_count(),
                        }
                    })
                    .collect(),
            })
            .collect();

        let total_hunks = files.iter().map(|file| file.hunks.len()).sum();

        Catalog { files, total_hunks }
    }
}

impl fmt::Display for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for file in &self.files {
            let status = if file.is_new {
                " (new file)"
            } else if file.is_deleted {
                " (deleted)"
            } else {
                ""
            };
            writeln!(f, "File[{}]: {}{}", file.index, file.path, status)?;

            for hunk in &file.hunks {
                write!(
                    f,
                    "  Hunk[{}]: lines {}-{} (+{}/-{})",
                    hunk.index, hunk.start_line, hunk.end_line, hunk.add_count, hunk.remove_count
                )?;
                if let Some(header) = &hunk.header {
                    write!(f, " // {}", header)?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
