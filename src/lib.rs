use error_set::error_set;
use std::process::Command;

pub mod analyzer;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod diff;
pub mod grouper;
pub mod render;

pub use analyzer::{Analysis, Analyzer, AnalyzerError, ClaudeCli, NoAnalyzer, ProposedGroup};
pub use cache::{CacheError, ResultCache};
pub use catalog::Catalog;
pub use config::{Config, ConfigError};
pub use diff::{Diff, FileChange, Hunk, Line, LineKind, ParseError};
pub use grouper::{Grouper, HunkRef, SemanticGroup};

error_set! {
    /// Top-level error for hnk operations
    HnkError := {
        #[display("Not a git repository: {path}")]
        NotARepository { path: String },
        #[display("Invalid ref: {reference}")]
        InvalidRef { reference: String },
        ParseError(ParseError),
    } || GitCommandError

    /// Errors from git command execution
    GitCommandError := {
        #[display("Failed to run git: {message}")]
        DiffFailed { message: String },
        #[display("git diff failed: {stderr}")]
        DiffExitError { stderr: String },
        #[display("Invalid UTF-8 in git diff output: {message}")]
        InvalidUtf8 { message: String },
    }
}

/// Which changes to diff
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DiffSource {
    /// Unstaged changes in the working tree
    #[default]
    WorkingTree,
    /// Changes staged in the index
    Staged,
    /// Working tree against a ref
    AgainstRef(String),
    /// Between two refs
    Range { from: String, to: String },
    /// Changes introduced by a single commit
    Commit(String),
}

/// Main interface for reading diffs from a repository
pub struct Hnk<'a> {
    repo_path: &'a str,
}

impl<'a> Hnk<'a> {
    /// Create a new Hnk for the given repository path
    pub fn new(repo_path: &'a str) -> Self {
        Self { repo_path }
    }

    /// Whether the path is inside a git work tree or git directory
    pub fn is_repo(&self) -> bool {
        self.git_succeeds(&["rev-parse", "--git-dir"])
    }

    /// Whether `reference` names a commit
    pub fn is_valid_ref(&self, reference: &str) -> bool {
        let commit = format!("{reference}^{{commit}}");
        self.git_succeeds(&["rev-parse", "--verify", "--quiet", &commit])
    }

    /// Raw unified diff text with three lines of context, limited to `paths` if any
    ///
    /// # Examples
    /// ```no_run
    /// # use hnk::{DiffSource, Hnk};
    /// let hnk = Hnk::new(".");
    /// let text = hnk.raw_diff(&DiffSource::Staged, &[]).unwrap();
    /// let text = hnk.raw_diff(&DiffSource::Commit("HEAD".to_string()), &["src".to_string()]).unwrap();
    /// ```
    pub fn raw_diff(
        &self,
        source: &DiffSource,
        paths: &[String],
    ) -> Result<String, GitCommandError> {
        let mut args = vec!["-C", self.repo_path];

        match source {
            DiffSource::Commit(commit) => {
                args.extend([
                    "show",
                    "--format=",
                    "--no-ext-diff",
                    "--no-color",
                    "-U3",
                    commit.as_str(),
                ]);
            }
            DiffSource::WorkingTree => args.extend(["diff", "--no-ext-diff", "--no-color", "-U3"]),
            DiffSource::Staged => {
                args.extend(["diff", "--cached", "--no-ext-diff", "--no-color", "-U3"]);
            }
            DiffSource::AgainstRef(reference) => {
                args.extend(["diff", "--no-ext-diff", "--no-color", "-U3", reference.as_str()]);
            }
            DiffSource::Range { from, to } => {
                args.extend([
                    "diff",
                    "--no-ext-diff",
                    "--no-color",
                    "-U3",
                    from.as_str(),
                    to.as_str(),
                ]);
            }
        }

        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(|s| s.as_str()));
        }

        log::debug!("git {}", args.join(" "));

        let output =
            Command::new("git")
                .args(&args)
                .output()
                .map_err(|e| GitCommandError::DiffFailed {
                    message: e.to_string(),
                })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GitCommandError::DiffExitError {
                stderr: stderr.trim().to_string(),
            });
        }

        String::from_utf8(output.stdout).map_err(|e| GitCommandError::InvalidUtf8 {
            message: e.to_string(),
        })
    }

    /// Validate the repository and any single ref, then read and parse the diff
    pub fn load_diff(&self, source: &DiffSource, paths: &[String]) -> Result<Diff, HnkError> {
        if !self.is_repo() {
            return Err(HnkError::NotARepository {
                path: self.repo_path.to_string(),
            });
        }

        if let DiffSource::AgainstRef(reference) | DiffSource::Commit(reference) = source {
            if !self.is_valid_ref(reference) {
                return Err(HnkError::InvalidRef {
                    reference: reference.clone(),
                });
            }
        }

        Ok(Diff::parse(&self.raw_diff(source, paths)?)?)
    }

    fn git_succeeds(&self, args: &[&str]) -> bool {
        Command::new("git")
            .args(["-C", self.repo_path])
            .args(args)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
}
