//! In-memory index of analyzed repositories with ranked search.
//!
//! One entry per repository path; re-analysis replaces the entry while
//! keeping its original id. Search scores each matching field with a
//! fixed weight and returns results ordered by descending score, with
//! ties broken by the most recently analyzed repository.

mod languages;

pub use languages::languages_for_extension;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

/// Per-field score weights. Language matches outrank framework matches,
/// which outrank tags and free text.
pub mod weights {
    pub const LANGUAGE: f64 = 10.0;
    pub const FRAMEWORK: f64 = 8.0;
    /// Credit per matched file-type extension.
    pub const FILE_TYPE: f64 = 6.0;
    pub const TAG: f64 = 5.0;
    pub const TEXT: f64 = 3.0;
}

/// Summary of one analyzed repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedRepository {
    /// Assigned on first insert, stable across re-analysis.
    pub id: Uuid,
    pub name: String,
    pub path: PathBuf,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub tags: Vec<String>,
    pub summary: String,
    pub last_analyzed: DateTime<Utc>,
    pub size_bytes: u64,
    pub complexity: f64,
}

/// Structured search query. Empty fields do not constrain the search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    /// File extensions, with or without the leading dot (".jsx", "rs").
    #[serde(default)]
    pub file_types: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl SearchQuery {
    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
            && self.frameworks.is_empty()
            && self.file_types.is_empty()
            && self.tags.is_empty()
            && self.text.as_deref().map_or(true, str::is_empty)
    }
}

/// One matched field contributing to a result's score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub field: String,
    pub value: String,
    pub score: f64,
}

/// A scored search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub repository: IndexedRepository,
    pub score: f64,
    pub matches: Vec<SearchMatch>,
}

/// Thread-safe repository index keyed by path.
#[derive(Default)]
pub struct RepositoryIndex {
    repos: RwLock<HashMap<PathBuf, IndexedRepository>>,
}

impl RepositoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `repo.path`. A replaced entry
    /// keeps its originally assigned id.
    pub fn upsert(&self, mut repo: IndexedRepository) {
        let mut repos = self.repos.write().expect("index lock poisoned");
        if let Some(existing) = repos.get(&repo.path) {
            repo.id = existing.id;
        }
        repos.insert(repo.path.clone(), repo);
    }

    pub fn get(&self, path: &Path) -> Option<IndexedRepository> {
        self.repos
            .read()
            .expect("index lock poisoned")
            .get(path)
            .cloned()
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.repos
            .write()
            .expect("index lock poisoned")
            .remove(path)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.repos.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All entries, in arbitrary order.
    pub fn all(&self) -> Vec<IndexedRepository> {
        self.repos
            .read()
            .expect("index lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Ranked search. An empty query or a query nothing matches returns
    /// an empty list, never an error.
    pub fn search(&self, query: &SearchQuery) -> Vec<SearchResult> {
        if query.is_empty() {
            return Vec::new();
        }
        let repos = self.repos.read().expect("index lock poisoned");
        let mut results: Vec<SearchResult> = repos
            .values()
            .filter_map(|repo| score_repository(repo, query))
            .collect();
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.repository.last_analyzed.cmp(&a.repository.last_analyzed))
        });
        results
    }
}

fn contains_ignore_case(haystack: &[String], needle: &str) -> bool {
    haystack.iter().any(|h| h.eq_ignore_ascii_case(needle))
}

fn score_repository(repo: &IndexedRepository, query: &SearchQuery) -> Option<SearchResult> {
    let mut matches = Vec::new();

    for lang in &query.languages {
        if contains_ignore_case(&repo.languages, lang) {
            matches.push(SearchMatch {
                field: "language".into(),
                value: lang.clone(),
                score: weights::LANGUAGE,
            });
        }
    }

    for framework in &query.frameworks {
        if contains_ignore_case(&repo.frameworks, framework) {
            matches.push(SearchMatch {
                field: "framework".into(),
                value: framework.clone(),
                score: weights::FRAMEWORK,
            });
        }
    }

    // Each requested extension maps to the language(s) known to produce
    // it; every extension whose languages intersect the repository's
    // accumulates into a single aggregate match entry.
    let mut matched_extensions = Vec::new();
    for ext in &query.file_types {
        let produced_by = languages_for_extension(ext);
        if produced_by
            .iter()
            .any(|lang| contains_ignore_case(&repo.languages, lang))
        {
            matched_extensions.push(ext.clone());
        }
    }
    if !matched_extensions.is_empty() {
        matches.push(SearchMatch {
            field: "file_types".into(),
            score: weights::FILE_TYPE * matched_extensions.len() as f64,
            value: matched_extensions.join(","),
        });
    }

    for tag in &query.tags {
        if contains_ignore_case(&repo.tags, tag) {
            matches.push(SearchMatch {
                field: "tag".into(),
                value: tag.clone(),
                score: weights::TAG,
            });
        }
    }

    if let Some(text) = query.text.as_deref().filter(|t| !t.is_empty()) {
        let needle = text.to_ascii_lowercase();
        if repo.name.to_ascii_lowercase().contains(&needle) {
            matches.push(SearchMatch {
                field: "name".into(),
                value: repo.name.clone(),
                score: weights::TEXT,
            });
        }
        if repo.summary.to_ascii_lowercase().contains(&needle) {
            matches.push(SearchMatch {
                field: "summary".into(),
                value: text.to_string(),
                score: weights::TEXT,
            });
        }
    }

    if matches.is_empty() {
        return None;
    }
    let score = matches.iter().map(|m| m.score).sum();
    Some(SearchResult {
        repository: repo.clone(),
        score,
        matches,
    })
}
