//! Output formatting for analysis results.
//!
//! Two formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: structured output for programmatic consumption

use colored::*;
use serde::{Deserialize, Serialize};

use crate::analyze::RepositoryAnalysis;
use crate::error::PipelineError;
use crate::index::SearchResult;

/// Top-level JSON report.
#[derive(Serialize, Deserialize)]
pub struct JsonReport {
    pub version: String,
    pub analyzed: usize,
    pub failed: usize,
    pub reports: Vec<RepositoryAnalysis>,
    pub failures: Vec<JsonFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<Vec<SearchResult>>,
}

/// One failed request.
#[derive(Serialize, Deserialize)]
pub struct JsonFailure {
    pub path: String,
    pub code: String,
    pub message: String,
}

impl JsonReport {
    pub fn new(
        reports: Vec<RepositoryAnalysis>,
        failures: Vec<(String, PipelineError)>,
        search: Option<Vec<SearchResult>>,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            analyzed: reports.len(),
            failed: failures.len(),
            reports,
            failures: failures
                .into_iter()
                .map(|(path, error)| JsonFailure {
                    path,
                    code: error.code().to_string(),
                    message: error.to_string(),
                })
                .collect(),
            search,
        }
    }
}

/// Write results in JSON format.
pub fn write_json(report: &JsonReport) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    println!("{}", json);
    Ok(())
}

/// Write results in pretty (human-readable) format.
pub fn write_pretty(
    reports: &[RepositoryAnalysis],
    failures: &[(String, PipelineError)],
    search: Option<&[SearchResult]>,
) {
    // Header
    println!();
    print!("  ");
    print!("{}", "repolens".cyan().bold());
    println!(" v{}", env!("CARGO_PKG_VERSION"));
    println!();

    for report in reports {
        write_report(report);
        println!();
    }

    if !failures.is_empty() {
        println!("  {}", "Failures".red().bold());
        for (path, error) in failures {
            println!(
                "    {} {}  {}",
                "✗".red(),
                path,
                format!("[{}] {}", error.code(), error).dimmed()
            );
        }
        println!();
    }

    if let Some(results) = search {
        write_search_results(results);
        println!();
    }

    // Final status line
    if failures.is_empty() {
        println!("  {} {} repositories analyzed", "✓".green(), reports.len());
    } else {
        println!(
            "  {} {} analyzed, {} failed",
            "✗".red(),
            reports.len(),
            failures.len()
        );
    }
    println!();
}

fn write_report(report: &RepositoryAnalysis) {
    println!("  {}", report.name.bold());
    println!("    {}{}", "Path: ".dimmed(), report.path.display());
    print!(
        "    {}{} files, {} lines  ",
        "Size: ".dimmed(),
        report.total_files,
        report.total_lines
    );
    print!("{}", "Complexity: ".dimmed());
    write_colored_complexity(report.complexity);
    println!();

    if !report.languages.is_empty() {
        let langs: Vec<String> = report
            .languages
            .iter()
            .map(|l| format!("{} ({})", l.language, l.files))
            .collect();
        println!("    {}{}", "Languages: ".dimmed(), langs.join(", "));
    }
    if !report.frameworks.is_empty() {
        println!(
            "    {}{}",
            "Frameworks: ".dimmed(),
            report.frameworks.join(", ")
        );
    }
}

fn write_colored_complexity(complexity: f64) {
    let rendered = format!("{complexity:.1}");
    match complexity {
        c if c <= 2.0 => print!("{}", rendered.green()),
        c if c <= 5.0 => print!("{}", rendered.yellow()),
        _ => print!("{}", rendered.red()),
    }
}

fn write_search_results(results: &[SearchResult]) {
    println!("  {}", "Search results".bold());
    if results.is_empty() {
        println!("    {}", "no matches".dimmed());
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        let fields: Vec<String> = result
            .matches
            .iter()
            .map(|m| format!("{}={}", m.field, m.value))
            .collect();
        println!(
            "    {}. {}  {}  {}",
            rank + 1,
            result.repository.name,
            format!("score {:.0}", result.score).cyan(),
            fields.join(" ").dimmed()
        );
    }
}
