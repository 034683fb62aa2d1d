//! Default repository analysis executor.
//!
//! The pipeline treats the analysis function as opaque; this module is
//! the batteries-included implementation: walk the tree, map extensions
//! to languages, detect frameworks from manifests, and derive a simple
//! complexity figure. Anything matching the pipeline's executor signature
//! can replace it.

mod frameworks;

pub use frameworks::detect_frameworks;

use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{PipelineError, Result};
use crate::index::{languages_for_extension, IndexedRepository};

/// Directories never worth descending into.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "target",
    "dist",
    "build",
    "__pycache__",
    ".git",
];

/// Caller-tunable analysis options. Part of the request fingerprint, so
/// two requests with different options are distinct computations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOptions {
    /// Descend at most this many directory levels.
    #[serde(default)]
    pub max_depth: Option<usize>,
    /// Also scan dot-directories.
    #[serde(default)]
    pub include_hidden: bool,
    /// Glob patterns excluded from the scan.
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Read manifests for framework detection.
    #[serde(default = "default_true")]
    pub detect_frameworks: bool,
    /// Free-form tags attached to the indexed summary.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_depth: None,
            include_hidden: false,
            exclude: Vec::new(),
            detect_frameworks: true,
            tags: Vec::new(),
        }
    }
}

/// Per-language tally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageStat {
    pub language: String,
    pub files: usize,
    pub lines: usize,
}

/// The finished analysis report for one repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryAnalysis {
    pub path: PathBuf,
    pub name: String,
    /// Sorted by line count, largest first.
    pub languages: Vec<LanguageStat>,
    pub frameworks: Vec<String>,
    pub total_files: usize,
    pub total_lines: usize,
    pub size_bytes: u64,
    /// 0-10 scale derived from average file length.
    pub complexity: f64,
    pub summary: String,
    pub analyzed_at: DateTime<Utc>,
}

impl RepositoryAnalysis {
    /// Build the index summary for this report.
    pub fn to_indexed(&self, tags: Vec<String>) -> IndexedRepository {
        IndexedRepository {
            id: Uuid::new_v4(),
            name: self.name.clone(),
            path: self.path.clone(),
            languages: self.languages.iter().map(|l| l.language.clone()).collect(),
            frameworks: self.frameworks.clone(),
            tags,
            summary: self.summary.clone(),
            last_analyzed: self.analyzed_at,
            size_bytes: self.size_bytes,
            complexity: self.complexity,
        }
    }
}

/// Analyze the repository at `path`.
///
/// The walk is filesystem-bound, so it runs on the blocking pool.
pub async fn analyze_repository(
    path: PathBuf,
    options: AnalysisOptions,
) -> Result<RepositoryAnalysis> {
    tokio::task::spawn_blocking(move || scan(&path, &options))
        .await
        .map_err(|err| PipelineError::Internal(format!("analysis task failed: {err}")))?
}

fn build_excludes(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|err| {
            PipelineError::Validation(format!("invalid exclude pattern {pattern:?}: {err}"))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|err| PipelineError::Internal(err.to_string()))
}

fn scan(root: &Path, options: &AnalysisOptions) -> Result<RepositoryAnalysis> {
    let excludes = build_excludes(&options.exclude)?;
    let include_hidden = options.include_hidden;

    let mut walker = WalkDir::new(root).follow_links(false);
    if let Some(depth) = options.max_depth {
        walker = walker.max_depth(depth);
    }

    let mut files = Vec::new();
    for entry in walker.into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        if e.file_type().is_dir() {
            if !include_hidden && name.starts_with('.') && e.depth() > 0 {
                return false;
            }
            if SKIPPED_DIRS.contains(&name.as_ref()) {
                return false;
            }
        }
        true
    }) {
        let entry = entry.map_err(|err| PipelineError::Internal(err.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if excludes.is_match(rel) {
            continue;
        }
        files.push(entry.into_path());
    }

    // Tally lines in parallel; files we cannot read or that carry an
    // unknown extension only count toward the byte total.
    let tallies: Vec<(Option<&'static str>, usize, u64)> = files
        .par_iter()
        .map(|file| {
            let size = std::fs::metadata(file).map(|m| m.len()).unwrap_or(0);
            let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
            let language = languages_for_extension(ext).first().copied();
            let lines = match language {
                Some(_) => std::fs::read_to_string(file)
                    .map(|content| content.lines().count())
                    .unwrap_or(0),
                None => 0,
            };
            (language, lines, size)
        })
        .collect();

    let mut by_language: HashMap<&'static str, (usize, usize)> = HashMap::new();
    let mut size_bytes = 0u64;
    let mut source_files = 0usize;
    let mut total_lines = 0usize;
    for (language, lines, size) in tallies {
        size_bytes += size;
        if let Some(language) = language {
            let slot = by_language.entry(language).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += lines;
            source_files += 1;
            total_lines += lines;
        }
    }

    let mut languages: Vec<LanguageStat> = by_language
        .into_iter()
        .map(|(language, (files, lines))| LanguageStat {
            language: language.to_string(),
            files,
            lines,
        })
        .collect();
    languages.sort_by(|a, b| b.lines.cmp(&a.lines).then_with(|| a.language.cmp(&b.language)));

    let frameworks = if options.detect_frameworks {
        detect_frameworks(root)
    } else {
        Vec::new()
    };

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());

    let complexity = complexity_score(source_files, total_lines, languages.len());
    let summary = summarize(&name, source_files, total_lines, &languages, &frameworks);

    Ok(RepositoryAnalysis {
        path: root.to_path_buf(),
        name,
        languages,
        frameworks,
        total_files: source_files,
        total_lines,
        size_bytes,
        complexity,
        summary,
        analyzed_at: Utc::now(),
    })
}

/// Average file length normalized onto a 0-10 scale, nudged upward for
/// polyglot repositories.
fn complexity_score(files: usize, lines: usize, language_count: usize) -> f64 {
    if files == 0 {
        return 0.0;
    }
    let avg_lines = lines as f64 / files as f64;
    let base = (avg_lines / 40.0).min(8.0);
    let spread = (language_count.saturating_sub(1) as f64 * 0.5).min(2.0);
    ((base + spread) * 10.0).round() / 10.0
}

fn summarize(
    name: &str,
    files: usize,
    lines: usize,
    languages: &[LanguageStat],
    frameworks: &[String],
) -> String {
    let language_list = if languages.is_empty() {
        "no recognized source files".to_string()
    } else {
        languages
            .iter()
            .take(3)
            .map(|l| l.language.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut summary = format!("{name}: {files} source files, {lines} lines ({language_list})");
    if !frameworks.is_empty() {
        summary.push_str(&format!("; frameworks: {}", frameworks.join(", ")));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_analyze_counts_languages() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/app.js", "const a = 1;\nconst b = 2;\n");
        write(temp.path(), "src/util.ts", "export const x = 1;\n");
        write(temp.path(), "README.md", "# readme\n");

        let report = analyze_repository(temp.path().to_path_buf(), AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_files, 2);
        assert_eq!(report.total_lines, 3);
        let langs: Vec<&str> = report
            .languages
            .iter()
            .map(|l| l.language.as_str())
            .collect();
        assert_eq!(langs, vec!["JavaScript", "TypeScript"]);
        assert!(report.summary.contains("2 source files"));
    }

    #[tokio::test]
    async fn test_analyze_skips_dependency_dirs_and_hidden() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "main.py", "print('hi')\n");
        write(temp.path(), "node_modules/pkg/index.js", "x\n");
        write(temp.path(), ".cache/blob.js", "x\n");

        let report = analyze_repository(temp.path().to_path_buf(), AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_files, 1);
        assert_eq!(report.languages[0].language, "Python");
    }

    #[tokio::test]
    async fn test_analyze_applies_excludes() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "src/app.rs", "fn main() {}\n");
        write(temp.path(), "src/generated.rs", "// generated\n");

        let options = AnalysisOptions {
            exclude: vec!["**/generated.rs".into()],
            ..AnalysisOptions::default()
        };
        let report = analyze_repository(temp.path().to_path_buf(), options)
            .await
            .unwrap();

        assert_eq!(report.total_files, 1);
    }

    #[tokio::test]
    async fn test_invalid_exclude_pattern_is_a_validation_error() {
        let temp = TempDir::new().unwrap();
        let options = AnalysisOptions {
            exclude: vec!["[".into()],
            ..AnalysisOptions::default()
        };
        let err = analyze_repository(temp.path().to_path_buf(), options)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[tokio::test]
    async fn test_empty_repository_scores_zero() {
        let temp = TempDir::new().unwrap();
        let report = analyze_repository(temp.path().to_path_buf(), AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.total_files, 0);
        assert_eq!(report.complexity, 0.0);
        assert!(report.languages.is_empty());
    }

    #[tokio::test]
    async fn test_framework_detection_feeds_report() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "package.json",
            r#"{"dependencies": {"react": "18.0.0"}}"#,
        );
        write(temp.path(), "index.jsx", "export default () => null;\n");

        let report = analyze_repository(temp.path().to_path_buf(), AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(report.frameworks, vec!["React"]);
        assert!(report.summary.contains("React"));
    }

    #[test]
    fn test_complexity_scales_with_file_length() {
        let short = complexity_score(10, 200, 1);
        let long = complexity_score(10, 4000, 1);
        assert!(long > short);
        // Polyglot bump
        assert!(complexity_score(10, 200, 4) > complexity_score(10, 200, 1));
    }
}
