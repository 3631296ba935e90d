//! Boundary to the external semantic analyzer.
//!
//! The analyzer is untrusted: its output is free text that may or may not be
//! the JSON shape in [`Analysis`]. Every failure mode (spawn, timeout, exit
//! status, unparseable output) is an [`AnalyzerError`] value for the caller to
//! recover from.

mod claude;
pub mod prompt;

pub use claude::ClaudeCli;

use error_set::error_set;
use serde::{Deserialize, Serialize};

error_set! {
    /// Errors from calling the analyzer or reading its response
    AnalyzerError := {
        #[display("Failed to spawn analyzer: {message}")]
        SpawnFailed { message: String },
        #[display("Failed to write prompt to analyzer: {message}")]
        StdinFailed { message: String },
        #[display("Failed waiting for analyzer: {message}")]
        WaitFailed { message: String },
        #[display("Analyzer timed out after {seconds}s")]
        TimedOut { seconds: u64 },
        #[display("Analyzer exited with status {code}: {stderr}")]
        ExitStatus { code: String, stderr: String },
        #[display("Analyzer response is not valid JSON: {message}")]
        InvalidResponse { message: String },
        #[display("Analyzer returned an empty response")]
        EmptyResponse,
        #[display("Analyzer disabled")]
        Disabled,
    }
}

/// A group as proposed by the analyzer, before validation.
///
/// Indices are signed so that negative values still decode and can be
/// discarded as out of range. `hunk_indices[i]` lists hunks of
/// `file_indices[i]`; a missing or `null` entry means every hunk of that file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedGroup {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub file_indices: Vec<i64>,
    #[serde(default)]
    pub hunk_indices: Vec<Option<Vec<i64>>>,
}

/// Structured grouping response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub groups: Vec<ProposedGroup>,
}

/// The two requests the grouping pipeline makes of an analyzer
pub trait Analyzer {
    /// Ask for a structured grouping of the hunks described in `prompt`.
    ///
    /// # Errors
    ///
    /// Any transport failure or unparseable response.
    fn propose_groups(&self, prompt: &str) -> Result<Analysis, AnalyzerError>;

    /// Ask for a short prose description of a single change.
    ///
    /// # Errors
    ///
    /// Any transport failure or an empty response.
    fn describe_change(&self, prompt: &str) -> Result<String, AnalyzerError>;
}

impl<A: Analyzer + ?Sized> Analyzer for &A {
    fn propose_groups(&self, prompt: &str) -> Result<Analysis, AnalyzerError> {
        (**self).propose_groups(prompt)
    }

    fn describe_change(&self, prompt: &str) -> Result<String, AnalyzerError> {
        (**self).describe_change(prompt)
    }
}

impl<A: Analyzer + ?Sized> Analyzer for Box<A> {
    fn propose_groups(&self, prompt: &str) -> Result<Analysis, AnalyzerError> {
        (**self).propose_groups(prompt)
    }

    fn describe_change(&self, prompt: &str) -> Result<String, AnalyzerError> {
        (**self).describe_change(prompt)
    }
}

/// Analyzer that always fails, leaving grouping fully deterministic
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnalyzer;

impl Analyzer for NoAnalyzer {
    fn propose_groups(&self, _prompt: &str) -> Result<Analysis, AnalyzerError> {
        Err(AnalyzerError::Disabled)
    }

    fn describe_change(&self, _prompt: &str) -> Result<String, AnalyzerError> {
        Err(AnalyzerError::Disabled)
    }
}

/// Decode a structured response, tolerating a surrounding markdown code fence.
///
/// # Errors
///
/// Returns [`AnalyzerError::InvalidResponse`] if the remaining text is not an
/// [`Analysis`] JSON object.
pub fn parse_analysis_response(response: &str) -> Result<Analysis, AnalyzerError> {
    let body = strip_code_fence(response);
    serde_json::from_str(body).map_err(|e| AnalyzerError::InvalidResponse {
        message: e.to_string(),
    })
}

fn strip_code_fence(response: &str) -> &str {
    let body = response.trim();
    let body = body
        .strip_prefix("```json")
        .or_else(|| body.strip_prefix("```"))
        .unwrap_or(body);
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use similar_asserts::assert_eq;

    #[test]
    fn parse_plain_json() {
        let analysis = parse_analysis_response(
            r#"{"groups":[{"title":"Add auth","description":"Adds login","file_indices":[0,1],"hunk_indices":[[0,1],[0]]}]}"#,
        )
        .unwrap();
        assert_eq!(
            analysis.groups,
            vec![ProposedGroup {
                title: "Add auth".to_string(),
                description: "Adds login".to_string(),
                file_indices: vec![0, 1],
                hunk_indices: vec![Some(vec![0, 1]), Some(vec![0])],
            }]
        );
    }

    #[test]
    fn parse_fenced_json() {
        let response = "```json\n{\"groups\": []}\n```\n";
        assert_eq!(parse_analysis_response(response).unwrap(), Analysis::default());

        let response = "  ```\n{\"groups\": []}\n```";
        assert_eq!(parse_analysis_response(response).unwrap(), Analysis::default());
    }

    #[test]
    fn parse_tolerates_missing_and_null_fields() {
        let analysis = parse_analysis_response(
            r#"{"groups":[{"file_indices":[2,-1],"hunk_indices":[null]}]}"#,
        )
        .unwrap();
        let group = &analysis.groups[0];
        assert_eq!(group.title, "");
        assert_eq!(group.file_indices, vec![2, -1]);
        assert_eq!(group.hunk_indices, vec![None]);
    }

    #[test]
    fn prose_is_invalid() {
        let result = parse_analysis_response("These changes refactor the parser.");
        assert!(matches!(result, Err(AnalyzerError::InvalidResponse { .. })));
    }

    #[test]
    fn object_without_groups_is_invalid() {
        let result = parse_analysis_response("{}");
        assert!(matches!(result, Err(AnalyzerError::InvalidResponse { .. })));
    }

    #[test]
    fn no_analyzer_always_fails() {
        assert!(matches!(
            NoAnalyzer.propose_groups("x"),
            Err(AnalyzerError::Disabled)
        ));
        assert!(matches!(
            NoAnalyzer.describe_change("x"),
            Err(AnalyzerError::Disabled)
        ));
    }
}
