//! Text and JSON output for grouped hunks.
//!
//! Renderers only read groups. Hunks are resolved against the [`Diff`] the
//! groups were built from; references it does not contain are skipped.

use crate::diff::{Diff, FileChange, Hunk};
use crate::grouper::SemanticGroup;
use serde::Serialize;

/// Presentation switches for [`plain`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Prefix each line with its old and new line numbers
    pub line_numbers: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { line_numbers: true }
    }
}

/// Render groups as plain text.
///
/// Each group is a `# title` line, its description, then its hunks under the
/// file path they belong to. Groups are separated by a `---` line.
///
/// # Example output
/// ```text
/// # Bump b
///
/// Changes b to 3.
///
/// src/app.rs
/// @@ -3,2 +3,2 @@
///    3    3  let a = 1;
///    4      -let b = 2;
///         4 +let b = 3;
/// ```
pub fn plain(diff: &Diff, groups: &[SemanticGroup], options: RenderOptions) -> String {
    groups
        .iter()
        .map(|group| plain_group(diff, group, options))
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

fn plain_group(diff: &Diff, group: &SemanticGroup, options: RenderOptions) -> String {
    let mut result = format!("# {}\n\n", group.title);
    if !group.description.is_empty() {
        result.push_str(&group.description);
        result.push_str("\n\n");
    }

    let hunks: Vec<String> = group
        .resolve(diff)
        .map(|(file, hunk)| plain_hunk(file, hunk, options))
        .collect();
    result.push_str(&hunks.join("\n"));
    result
}

fn plain_hunk(file: &FileChange, hunk: &Hunk, options: RenderOptions) -> String {
    let mut result = if file.is_renamed {
        format!("{} -> {}\n", file.old_path, file.new_path)
    } else {
        format!("{}\n", file.display_path())
    };

    result.push_str(&format!(
        "@@ -{},{} +{},{} @@",
        hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
    ));
    if let Some(header) = &hunk.header {
        result.push(' ');
        result.push_str(header);
    }
    result.push('\n');

    for line in &hunk.lines {
        if options.line_numbers {
            result.push_str(&format!(
                "{:>4} {:>4} ",
                number(line.old_num),
                number(line.new_num)
            ));
        }
        result.push(line.kind.marker());
        result.push_str(&line.content);
        result.push('\n');
    }

    result
}

fn number(value: Option<u32>) -> String {
    value.map(|n| n.to_string()).unwrap_or_default()
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    groups: Vec<JsonGroup<'a>>,
}

#[derive(Serialize)]
struct JsonGroup<'a> {
    title: &'a str,
    description: &'a str,
    hunks: Vec<JsonHunk<'a>>,
}

#[derive(Serialize)]
struct JsonHunk<'a> {
    file_index: usize,
    hunk_index: usize,
    path: &'a str,
    old_path: &'a str,
    new_path: &'a str,
    language: &'a str,
    #[serde(flatten)]
    hunk: &'a Hunk,
}

/// Render groups as pretty-printed JSON with paths and lines resolved.
///
/// # Errors
///
/// Only if serialization itself fails.
pub fn json(diff: &Diff, groups: &[SemanticGroup]) -> Result<String, serde_json::Error> {
    let output = JsonOutput {
        groups: groups
            .iter()
            .map(|group| JsonGroup {
                title: &group.title,
                description: &group.description,
                hunks: group
                    .hunks
                    .iter()
                    .filter_map(|r| {
                        let (file, hunk) = diff.hunk(r.file_index, r.hunk_index)?;
                        Some(JsonHunk {
                            file_index: r.file_index,
                            hunk_index: r.hunk_index,
                            path: file.display_path(),
                            old_path: &file.old_path,
                            new_path: &file.new_path,
                            language: file.language,
                            hunk,
                        })
                    })
                    .collect(),
            })
            .collect(),
    };

    serde_json::to_string_pretty(&output)
}
