//! Repolens - concurrent repository analysis pipeline.
//!
//! Repolens turns a raw path-plus-options request into a single,
//! deduplicated, bounded-concurrency, cached analysis, with secure path
//! validation up front and a queryable in-memory index of completed
//! results behind it.
//!
//! # Architecture
//!
//! A request flows leaf-first through the components:
//!
//! - `validate`: path normalization and security checks
//! - `fingerprint`: canonical request identity shared by cache and dedup
//! - `cache`: generic TTL + LRU store for finished analyses
//! - `dedup`: single-flight coalescing of identical in-flight requests
//! - `queue`: bounded-concurrency executor with lifecycle events
//! - `index`: ranked search over analyzed-repository summaries
//! - `analyze`: the built-in analysis executor (pluggable)
//! - `pipeline`: wires the above together
//! - `report`: output formatting (pretty, JSON)
//!
//! For a given fingerprint, at most one execution of the analysis
//! function is ever in flight; the cache and the deduplicator together
//! enforce that guarantee.

pub mod analyze;
pub mod cache;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod fingerprint;
pub mod index;
pub mod pipeline;
pub mod queue;
pub mod report;
pub mod validate;

pub use analyze::{analyze_repository, AnalysisOptions, RepositoryAnalysis};
pub use cache::{CacheConfig, CacheStats, DisposalCause, TtlCache};
pub use config::PipelineConfig;
pub use dedup::{DedupStats, Deduplicator};
pub use error::{PipelineError, Result};
pub use index::{IndexedRepository, RepositoryIndex, SearchMatch, SearchQuery, SearchResult};
pub use pipeline::{AnalysisExecutor, AnalysisPipeline};
pub use queue::{QueueConfig, QueueEvent, QueueProgress, Task, TaskQueue, TaskStatus};
pub use validate::{PathValidator, ValidationCode, ValidationOptions, ValidationResult};
