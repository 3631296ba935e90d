//! Prompt text sent to the analyzer.
//!
//! The cache keys structured requests by a hash of [`analysis_prompt`], so any
//! change to this text invalidates earlier entries.

use crate::catalog::Catalog;

/// Upper bound on groups to suggest; guidance only, never enforced on the response
pub fn max_groups(file_count: usize) -> usize {
    (file_count + 1).min(4)
}

/// Structured grouping request: catalog, raw diff, and the response contract
pub fn analysis_prompt(catalog: &Catalog, raw_diff: &str) -> String {
    format!(
        r#"# Diff Catalog

{catalog}
# Diff Content

{raw_diff}

# Instructions

Group these hunks into logical changes. Return ONLY valid JSON.

RULES:
- Create AT MOST {max} groups (fewer is better, 1-2 is ideal)
- Hunks from the same file should be in the same group unless they do completely different things
- Each hunk must appear in EXACTLY ONE group (no duplicates)
- You MUST specify explicit hunk_indices for every file - never omit them
- Title should be imperative mood, <60 chars

JSON format:
{{
  "groups": [
    {{
      "title": "Add user authentication",
      "description": "One sentence explaining what and why",
      "file_indices": [0, 1],
      "hunk_indices": [[0, 1], [0]]
    }}
  ]
}}

file_indices: which files (by index)
hunk_indices: REQUIRED - for each file in file_indices, list its hunk indices

Return ONLY JSON, no markdown fences."#,
        max = max_groups(catalog.files.len()),
    )
}

/// Single-change description request
pub fn description_prompt(raw_diff: &str) -> String {
    format!(
        r#"Describe this code change in 1-2 sentences. Be specific about what changed and why it matters.

DIFF:
{raw_diff}

Return only the description, no formatting."#
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::diff::Diff;

    #[test]
    fn group_guidance_is_capped() {
        assert_eq!(max_groups(0), 1);
        assert_eq!(max_groups(1), 2);
        assert_eq!(max_groups(3), 4);
        assert_eq!(max_groups(12), 4);
    }

    #[test]
    fn analysis_prompt_embeds_catalog_and_diff() {
        let text = "diff --git a/a.rs b/a.rs\n@@ -1 +1 @@\n-x\n+y\ndiff --git a/b.rs b/b.rs\n@@ -1 +1 @@\n-p\n+q\n";
        let diff = Diff::parse(text).unwrap();
        let prompt = analysis_prompt(&Catalog::build(&diff), text);

        assert!(prompt.contains("File[0]: a.rs\n  Hunk[0]: lines 1-1 (+1/-1)"));
        assert!(prompt.contains("File[1]: b.rs"));
        assert!(prompt.contains(text));
        assert!(prompt.contains("AT MOST 3 groups"));
        assert!(prompt.contains("\"hunk_indices\": [[0, 1], [0]]"));
    }

    #[test]
    fn description_prompt_embeds_diff() {
        let prompt = description_prompt("+added line");
        assert!(prompt.starts_with("Describe this code change"));
        assert!(prompt.contains("DIFF:\n+added line\n"));
    }
}
