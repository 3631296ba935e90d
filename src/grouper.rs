//! Groups the hunks of a [`Diff`] into logical changes.
//!
//! The analyzer proposes groups; reconciliation then enforces that every hunk
//! lands in exactly one group. Proposals are taken in response order and the
//! first group to claim a hunk keeps it. Anything the analyzer leaves out, or
//! everything when the analyzer fails, is swept into single-hunk groups in
//! file/hunk order with deterministic titles.
//!
//! Analyzer responses are memoized in an optional [`ResultCache`], keyed by the
//! exact request text.

use crate::analyzer::{Analysis, Analyzer, AnalyzerError, prompt};
use crate::cache::{ResultCache, hash_key};
use crate::catalog::Catalog;
use crate::diff::{Diff, FileChange, Hunk};
use serde::Serialize;
use std::collections::HashSet;

/// Position of a hunk within a [`Diff`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HunkRef {
    pub file_index: usize,
    pub hunk_index: usize,
}

impl HunkRef {
    pub fn new(file_index: usize, hunk_index: usize) -> Self {
        Self {
            file_index,
            hunk_index,
        }
    }
}

/// A logical change: a title, a description, and the hunks that make it up.
///
/// Hunks are referenced by position, so the originating [`Diff`] must outlive
/// any use of the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SemanticGroup {
    pub title: String,
    pub description: String,
    pub hunks: Vec<HunkRef>,
}

impl SemanticGroup {
    /// The referenced files and hunks, skipping references `diff` does not contain
    pub fn resolve<'d>(&self, diff: &'d Diff) -> impl Iterator<Item = (&'d FileChange, &'d Hunk)> {
        self.hunks
            .iter()
            .filter_map(move |r| diff.hunk(r.file_index, r.hunk_index))
    }
}

/// Deterministic title for a single hunk.
///
/// Precedence: rename, addition, deletion, hunk context header, plain modification.
pub fn title_for(file: &FileChange, hunk: &Hunk) -> String {
    if file.is_renamed {
        format!("Rename {} to {}", file.old_path, file.new_path)
    } else if file.is_new {
        format!("Add {}", file.display_path())
    } else if file.is_deleted {
        format!("Remove {}", file.display_path())
    } else if let Some(header) = &hunk.header {
        format!("Update {} in {}", header, file.display_path())
    } else {
        format!("Modify {}", file.display_path())
    }
}

/// Reconciliation engine. Stateless across calls apart from the cache.
pub struct Grouper<A> {
    analyzer: A,
    cache: Option<ResultCache>,
}

impl<A: Analyzer> Grouper<A> {
    pub fn new(analyzer: A) -> Self {
        Self {
            analyzer,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    pub fn into_cache(self) -> Option<ResultCache> {
        self.cache
    }

    /// Group every hunk of `diff`. Never fails: analyzer problems fall back to
    /// one group per hunk. Each hunk appears in exactly one returned group.
    pub fn group_diff(&mut self, diff: &Diff) -> Vec<SemanticGroup> {
        let total_hunks = diff.total_hunks();
        if total_hunks == 0 {
            return Vec::new();
        }

        if total_hunks == 1 && diff.files.len() == 1 {
            return self.single_hunk_group(diff);
        }

        let raw_diff = diff.to_string();
        let catalog = Catalog::build(diff);
        let request = prompt::analysis_prompt(&catalog, &raw_diff);

        let analysis = self.propose(&request);
        let leftover_description: fn(&FileChange, &Hunk) -> String = if analysis.is_some() {
            additional_description
        } else {
            fallback_description
        };

        let mut visited = HashSet::new();
        let mut groups = analysis
            .map(|analysis| reconcile(diff, &analysis, &mut visited))
            .unwrap_or_default();
        groups.extend(sweep(diff, &visited, leftover_description));
        groups
    }

    fn single_hunk_group(&mut self, diff: &Diff) -> Vec<SemanticGroup> {
        let Some((file, hunk)) = diff.hunk(0, 0) else {
            return Vec::new();
        };

        let description = self
            .describe(&diff.to_string())
            .unwrap_or_else(|| format!("Changes to {}", file.display_path()));

        vec![SemanticGroup {
            title: title_for(file, hunk),
            description,
            hunks: vec![HunkRef::new(0, 0)],
        }]
    }

    /// Structured grouping, cache first
    fn propose(&mut self, request: &str) -> Option<Analysis> {
        let key = hash_key(request);
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            match serde_json::from_str::<Analysis>(cached) {
                Ok(analysis) => {
                    log::debug!("analysis cache hit {key}");
                    return Some(analysis);
                }
                Err(err) => log::warn!("ignoring unreadable cached analysis {key}: {err}"),
            }
        }

        match self.analyzer.propose_groups(request) {
            Ok(analysis) => {
                if let Some(cache) = self.cache.as_mut() {
                    match serde_json::to_string(&analysis) {
                        Ok(serialized) => cache.set(key, serialized),
                        Err(err) => log::warn!("not caching analysis: {err}"),
                    }
                }
                Some(analysis)
            }
            Err(err) => {
                report_failure(&err);
                None
            }
        }
    }

    /// Prose description of a single change, cache first. Keyed by the raw diff.
    fn describe(&mut self, raw_diff: &str) -> Option<String> {
        let key = hash_key(raw_diff);
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(&key)) {
            log::debug!("description cache hit {key}");
            return Some(cached.to_string());
        }

        match self
            .analyzer
            .describe_change(&prompt::description_prompt(raw_diff))
        {
            Ok(description) => {
                if let Some(cache) = self.cache.as_mut() {
                    cache.set(key, description.clone());
                }
                Some(description)
            }
            Err(err) => {
                report_failure(&err);
                None
            }
        }
    }
}

fn report_failure(err: &AnalyzerError) {
    if matches!(err, AnalyzerError::Disabled) {
        log::debug!("analyzer disabled, using fallback grouping");
    } else {
        log::warn!("analyzer failed, using fallback grouping: {err}");
    }
}

/// Turn proposed groups into validated ones, marking claimed hunks in `visited`.
///
/// Out-of-range and already-claimed references are dropped. Groups left with
/// no references are discarded.
fn reconcile(
    diff: &Diff,
    analysis: &Analysis,
    visited: &mut HashSet<HunkRef>,
) -> Vec<SemanticGroup> {
    let mut groups = Vec::new();

    for proposed in &analysis.groups {
        let mut hunks = Vec::new();

        for (position, &file_index) in proposed.file_indices.iter().enumerate() {
            let Some(file_index) = in_range(file_index, diff.files.len()) else {
                continue;
            };
            let hunk_count = diff.files[file_index].hunks.len();

            let claimed: Vec<usize> = match proposed.hunk_indices.get(position) {
                Some(Some(indices)) => indices
                    .iter()
                    .filter_map(|&index| in_range(index, hunk_count))
                    .collect(),
                _ => (0..hunk_count).collect(),
            };

            for hunk_index in claimed {
                let hunk_ref = HunkRef::new(file_index, hunk_index);
                if visited.insert(hunk_ref) {
                    hunks.push(hunk_ref);
                }
            }
        }

        let Some(&first) = hunks.first() else {
            log::debug!("dropping proposed group '{}' with no usable hunks", proposed.title);
            continue;
        };

        let title = if proposed.title.trim().is_empty() {
            let file = &diff.files[first.file_index];
            title_for(file, &file.hunks[first.hunk_index])
        } else {
            proposed.title.clone()
        };

        groups.push(SemanticGroup {
            title,
            description: proposed.description.clone(),
            hunks,
        });
    }

    groups
}

/// One group per hunk not yet in `visited`, in file then hunk order
fn sweep(
    diff: &Diff,
    visited: &HashSet<HunkRef>,
    describe: fn(&FileChange, &Hunk) -> String,
) -> Vec<SemanticGroup> {
    diff.files
        .iter()
        .enumerate()
        .flat_map(|(file_index, file)| {
            file.hunks
                .iter()
                .enumerate()
                .map(move |(hunk_index, hunk)| (HunkRef::new(file_index, hunk_index), file, hunk))
        })
        .filter(|(hunk_ref, _, _)| !visited.contains(hunk_ref))
        .map(|(hunk_ref, file, hunk)| SemanticGroup {
            title: title_for(file, hunk),
            description: describe(file, hunk),
            hunks: vec![hunk_ref],
        })
        .collect()
}

fn in_range(index: i64, len: usize) -> Option<usize> {
    usize::try_from(index).ok().filter(|&index| index < len)
}

/// Description when the analyzer produced nothing usable
fn fallback_description(file: &FileChange, hunk: &Hunk) -> String {
    format!(
        "Changes to {} around line {}",
        file.display_path(),
        hunk.span().0
    )
}

/// Description for hunks a successful analysis left out
fn additional_description(file: &FileChange, _hunk: &Hunk) -> String {
    format!("Additional changes to {}", file.display_path())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::analyzer::parse_analysis_response;
    use similar_asserts::assert_eq;
    use std::cell::Cell;

    /// Canned analyzer that counts its calls
    struct Fake {
        groups: Option<&'static str>,
        description: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl Fake {
        fn failing() -> Self {
            Self::new(None, None)
        }

        fn new(groups: Option<&'static str>, description: Option<&'static str>) -> Self {
            Self {
                groups,
                description,
                calls: Cell::new(0),
            }
        }
    }

    impl Analyzer for Fake {
        fn propose_groups(&self, _prompt: &str) -> Result<Analysis, AnalyzerError> {
            self.calls.set(self.calls.get() + 1);
            match self.groups {
                Some(response) => parse_analysis_response(response),
                None => Err(AnalyzerError::TimedOut { seconds: 120 }),
            }
        }

        fn describe_change(&self, _prompt: &str) -> Result<String, AnalyzerError> {
            self.calls.set(self.calls.get() + 1);
            self.description
                .map(str::to_string)
                .ok_or(AnalyzerError::EmptyResponse)
        }
    }

    /// Diff with `shape[i]` one-line replacement hunks in file `f{i}.rs`
    fn shaped_diff(shape: &[usize]) -> Diff {
        let mut text = String::new();
        for (file, &hunks) in shape.iter().enumerate() {
            text.push_str(&format!(
                "diff --git a/f{file}.rs b/f{file}.rs\n--- a/f{file}.rs\n+++ b/f{file}.rs\n"
            ));
            for hunk in 0..hunks {
                let line = hunk * 10 + 1;
                text.push_str(&format!("@@ -{line} +{line} @@\n-old {hunk}\n+new {hunk}\n"));
            }
        }
        Diff::parse(&text).unwrap()
    }

    fn refs(groups: &[SemanticGroup]) -> Vec<Vec<(usize, usize)>> {
        groups
            .iter()
            .map(|g| g.hunks.iter().map(|r| (r.file_index, r.hunk_index)).collect())
            .collect()
    }

    #[test]
    fn no_hunks_no_groups() {
        let diff = Diff::parse(
            "diff --git a/a.txt b/b.txt\nsimilarity index 100%\nrename from a.txt\nrename to b.txt\n",
        )
        .unwrap();
        let fake = Fake::new(Some(r#"{"groups":[]}"#), Some("desc"));
        let mut grouper = Grouper::new(&fake);

        assert!(grouper.group_diff(&diff).is_empty());
        assert_eq!(fake.calls.get(), 0);
    }

    #[test]
    fn single_added_file() {
        let diff = Diff::parse(
            "diff --git a/foo.go b/foo.go\nnew file mode 100644\n--- /dev/null\n+++ b/foo.go\n@@ -0,0 +1,2 @@\n+package foo\n+\n",
        )
        .unwrap();
        let fake = Fake::new(None, Some("Introduces the foo package."));
        let groups = Grouper::new(&fake).group_diff(&diff);

        assert_eq!(
            groups,
            vec![SemanticGroup {
                title: "Add foo.go".to_string(),
                description: "Introduces the foo package.".to_string(),
                hunks: vec![HunkRef::new(0, 0)],
            }]
        );
    }

    #[test]
    fn single_hunk_fallback_description() {
        let diff = Diff::parse(
            "diff --git a/src/lib.rs b/src/lib.rs\n--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -4,1 +4,1 @@ fn parse()\n-a\n+b\n",
        )
        .unwrap();
        let groups = Grouper::new(Fake::failing()).group_diff(&diff);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].title, "Update fn parse() in src/lib.rs");
        assert_eq!(groups[0].description, "Changes to src/lib.rs");
    }

    #[test]
    fn title_precedence() {
        let diff = Diff::parse(
            "diff --git a/old.rs b/new.rs\nsimilarity index 90%\nrename from old.rs\nrename to new.rs\n--- a/old.rs\n+++ b/new.rs\n@@ -1 +1 @@ mod x\n-a\n+b\n",
        )
        .unwrap();
        let (file, hunk) = diff.hunk(0, 0).unwrap();
        assert_eq!(title_for(file, hunk), "Rename old.rs to new.rs");

        let mut file = file.clone();
        file.is_renamed = false;
        file.is_deleted = true;
        assert_eq!(title_for(&file, hunk), "Remove old.rs");

        file.is_new = true;
        assert_eq!(title_for(&file, hunk), "Add old.rs");

        file.is_new = false;
        file.is_deleted = false;
        assert_eq!(title_for(&file, hunk), "Update mod x in new.rs");

        let mut hunk = hunk.clone();
        hunk.header = None;
        assert_eq!(title_for(&file, &hunk), "Modify new.rs");
    }

    #[test]
    fn malformed_response_falls_back_per_hunk() {
        let diff = shaped_diff(&[2, 1]);
        let fake = Fake::new(Some("Here is how I would group these changes."), None);
        let groups = Grouper::new(&fake).group_diff(&diff);

        assert_eq!(refs(&groups), vec![vec![(0, 0)], vec![(0, 1)], vec![(1, 0)]]);
        assert_eq!(groups[0].title, "Modify f0.rs");
        assert_eq!(groups[0].description, "Changes to f0.rs around line 1");
        assert_eq!(groups[1].description, "Changes to f0.rs around line 11");
        assert_eq!(groups[2].title, "Modify f1.rs");
    }

    #[test]
    fn first_claim_wins() {
        let diff = shaped_diff(&[1, 1]);
        let fake = Fake::new(
            Some(
                r#"{"groups":[
                    {"title":"First","description":"one","file_indices":[0],"hunk_indices":[[0]]},
                    {"title":"Second","description":"two","file_indices":[0],"hunk_indices":[[0]]},
                    {"title":"Third","description":"three","file_indices":[0,1],"hunk_indices":[[0],[0]]}
                ]}"#,
            ),
            None,
        );
        let groups = Grouper::new(&fake).group_diff(&diff);

        assert_eq!(
            groups.iter().map(|g| g.title.as_str()).collect::<Vec<_>>(),
            vec!["First", "Third"]
        );
        assert_eq!(refs(&groups), vec![vec![(0, 0)], vec![(1, 0)]]);
    }

    #[test]
    fn out_of_range_references_are_dropped() {
        let diff = shaped_diff(&[2, 1]);
        let fake = Fake::new(
            Some(
                r#"{"groups":[
                    {"title":"Ghost","description":"","file_indices":[7,-1],"hunk_indices":[[0],[0]]},
                    {"title":"Partial","description":"p","file_indices":[0],"hunk_indices":[[1,5,-3]]}
                ]}"#,
            ),
            None,
        );
        let groups = Grouper::new(&fake).group_diff(&diff);

        assert_eq!(refs(&groups), vec![vec![(0, 1)], vec![(0, 0)], vec![(1, 0)]]);
        assert_eq!(groups[0].title, "Partial");
        assert_eq!(groups[1].description, "Additional changes to f0.rs");
        assert_eq!(groups[2].description, "Additional changes to f1.rs");
    }

    #[test]
    fn missing_or_null_hunk_list_means_all_hunks() {
        let diff = shaped_diff(&[2, 3]);
        let fake = Fake::new(
            Some(
                r#"{"groups":[
                    {"title":"Both","description":"b","file_indices":[1,0],"hunk_indices":[null]}
                ]}"#,
            ),
            None,
        );
        let groups = Grouper::new(&fake).group_diff(&diff);

        assert_eq!(
            refs(&groups),
            vec![vec![(1, 0), (1, 1), (1, 2), (0, 0), (0, 1)]]
        );
    }

    #[test]
    fn empty_title_gets_generated_one() {
        let diff = shaped_diff(&[1, 1]);
        let fake = Fake::new(
            Some(r#"{"groups":[{"file_indices":[1],"hunk_indices":[[0]]}]}"#),
            None,
        );
        let groups = Grouper::new(&fake).group_diff(&diff);
        assert_eq!(groups[0].title, "Modify f1.rs");
        assert_eq!(groups[0].description, "");
    }

    #[test]
    fn excess_groups_are_kept() {
        let diff = shaped_diff(&[6]);
        let fake = Fake::new(
            Some(
                r#"{"groups":[
                    {"title":"a","file_indices":[0],"hunk_indices":[[0]]},
                    {"title":"b","file_indices":[0],"hunk_indices":[[1]]},
                    {"title":"c","file_indices":[0],"hunk_indices":[[2]]},
                    {"title":"d","file_indices":[0],"hunk_indices":[[3]]},
                    {"title":"e","file_indices":[0],"hunk_indices":[[4,5]]}
                ]}"#,
            ),
            None,
        );
        let groups = Grouper::new(&fake).group_diff(&diff);
        assert_eq!(groups.len(), 5);
    }

    #[test]
    fn fallback_is_deterministic() {
        let diff = shaped_diff(&[3, 2, 1]);
        let first = Grouper::new(Fake::failing()).group_diff(&diff);
        let second = Grouper::new(Fake::failing()).group_diff(&diff);
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn structured_response_is_cached() {
        let diff = shaped_diff(&[1, 1]);
        let fake = Fake::new(
            Some(r#"{"groups":[{"title":"All","description":"d","file_indices":[0,1]}]}"#),
            None,
        );
        let mut grouper = Grouper::new(&fake).with_cache(ResultCache::in_memory(0));

        let first = grouper.group_diff(&diff);
        let second = grouper.group_diff(&diff);
        assert_eq!(first, second);
        assert_eq!(fake.calls.get(), 1);

        let cache = grouper.cache().unwrap();
        assert_eq!(cache.len(), 1);
        let stored: Analysis = serde_json::from_str(&cache.entries()[0].value).unwrap();
        assert_eq!(stored.groups[0].title, "All");

        grouper.group_diff(&shaped_diff(&[1, 2]));
        assert_eq!(fake.calls.get(), 2);
    }

    #[test]
    fn unreadable_cached_analysis_is_replaced() {
        let diff = shaped_diff(&[1, 1]);
        let key = hash_key(&prompt::analysis_prompt(
            &Catalog::build(&diff),
            &diff.to_string(),
        ));
        let mut cache = ResultCache::in_memory(0);
        cache.set(key.clone(), "not json");

        let fake = Fake::new(
            Some(r#"{"groups":[{"title":"All","description":"d","file_indices":[0,1]}]}"#),
            None,
        );
        let mut grouper = Grouper::new(&fake).with_cache(cache);

        let groups = grouper.group_diff(&diff);
        assert_eq!(fake.calls.get(), 1);
        assert_eq!(groups[0].title, "All");

        let cache = grouper.into_cache().unwrap();
        assert_eq!(cache.len(), 1);
        let stored: Analysis = serde_json::from_str(cache.get(&key).unwrap()).unwrap();
        assert_eq!(stored.groups[0].title, "All");
    }

    #[test]
    fn description_is_cached_by_raw_diff() {
        let diff = shaped_diff(&[1]);
        let fake = Fake::new(None, Some("Swaps old for new."));
        let mut grouper = Grouper::new(&fake).with_cache(ResultCache::in_memory(0));

        grouper.group_diff(&diff);
        let again = grouper.group_diff(&diff);
        assert_eq!(again[0].description, "Swaps old for new.");
        assert_eq!(fake.calls.get(), 1);

        let cache = grouper.into_cache().unwrap();
        assert_eq!(cache.get(&hash_key(&diff.to_string())), Some("Swaps old for new."));
    }

    #[test]
    fn failures_are_not_cached() {
        let diff = shaped_diff(&[1, 1]);
        let fake = Fake::failing();
        let mut grouper = Grouper::new(&fake).with_cache(ResultCache::in_memory(0));

        grouper.group_diff(&diff);
        grouper.group_diff(&diff);
        assert_eq!(fake.calls.get(), 2);
        assert!(grouper.cache().unwrap().is_empty());
    }

    #[test]
    fn resolve_follows_references() {
        let diff = shaped_diff(&[1, 2]);
        let group = SemanticGroup {
            title: String::new(),
            description: String::new(),
            hunks: vec![HunkRef::new(1, 1), HunkRef::new(9, 9)],
        };
        let resolved: Vec<_> = group.resolve(&diff).collect();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].0.new_path, "f1.rs");
        assert_eq!(resolved[0].1.new_start, 11);
    }
}
