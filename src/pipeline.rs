//! The concurrent analysis request pipeline.
//!
//! Wires the components together: a request is validated, fingerprinted,
//! answered from the cache when possible, otherwise coalesced with any
//! identical in-flight request and executed on the bounded queue. A
//! finished analysis is cached and its summary upserted into the index.
//!
//! Everything is explicitly constructed and torn down with [`AnalysisPipeline::close`];
//! there are no process-wide singletons or free-running timers.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analyze::{analyze_repository, AnalysisOptions, RepositoryAnalysis};
use crate::cache::{CacheConfig, CacheStats, TtlCache};
use crate::config::PipelineConfig;
use crate::dedup::{DedupStats, Deduplicator};
use crate::error::{PipelineError, Result};
use crate::fingerprint::{canonicalize, request_fingerprint};
use crate::index::{RepositoryIndex, SearchQuery, SearchResult};
use crate::queue::{Processor, QueueConfig, QueueEvent, QueueProgress, TaskQueue};
use crate::validate::{PathValidator, ValidationCode, ValidationOptions};

/// The opaque analysis function the pipeline drives.
pub type AnalysisExecutor =
    Arc<dyn Fn(PathBuf, AnalysisOptions) -> BoxFuture<'static, Result<RepositoryAnalysis>> + Send + Sync>;

/// One unit of queued work.
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub path: PathBuf,
    pub options: AnalysisOptions,
}

/// Cache/dedup key for a request. The normalized path is embedded in
/// clear text so pattern invalidation can target one repository.
fn request_key(path: &Path, options: &AnalysisOptions) -> String {
    format!(
        "analysis:{}:{}",
        path.display(),
        request_fingerprint(&path.to_string_lossy(), options)
    )
}

/// Coordinates validation, deduplication, caching, bounded execution,
/// and indexing for analysis requests.
pub struct AnalysisPipeline {
    validator: PathValidator,
    validation_options: ValidationOptions,
    cache: Arc<TtlCache<RepositoryAnalysis>>,
    /// Short-TTL memo of search results, dropped wholesale whenever a new
    /// analysis lands in the index.
    search_cache: Arc<TtlCache<Vec<SearchResult>>>,
    dedup: Deduplicator<RepositoryAnalysis>,
    queue: TaskQueue<AnalysisRequest, RepositoryAnalysis>,
    index: Arc<RepositoryIndex>,
}

impl AnalysisPipeline {
    /// Build a pipeline around an arbitrary executor.
    ///
    /// Must be called inside a tokio runtime (the deduplicator starts its
    /// sweep task here).
    pub fn new(executor: AnalysisExecutor, config: &PipelineConfig) -> Self {
        let processor: Processor<AnalysisRequest, RepositoryAnalysis> = {
            let executor = Arc::clone(&executor);
            Arc::new(move |request: AnalysisRequest| executor(request.path, request.options))
        };
        let queue = TaskQueue::new(
            processor,
            QueueConfig {
                concurrency: config.concurrency,
                timeout: config.task_timeout(),
                ..QueueConfig::default()
            },
        );

        Self {
            validator: PathValidator::new(),
            validation_options: config.validation_options(),
            cache: Arc::new(TtlCache::new(config.cache_config())),
            search_cache: Arc::new(TtlCache::new(CacheConfig {
                max_entries: 128,
                default_ttl: config.search_cache_ttl(),
                refresh_on_get: true,
            })),
            dedup: Deduplicator::new(config.dedup_max_age(), config.dedup_sweep_interval()),
            queue,
            index: Arc::new(RepositoryIndex::new()),
        }
    }

    /// Build a pipeline around the built-in filesystem analyzer.
    pub fn with_default_executor(config: &PipelineConfig) -> Self {
        let executor: AnalysisExecutor =
            Arc::new(|path, options| analyze_repository(path, options).boxed());
        Self::new(executor, config)
    }

    /// Analyze `raw_path`, reusing a cached or in-flight identical
    /// request when one exists.
    pub async fn analyze(
        &self,
        raw_path: &str,
        options: AnalysisOptions,
    ) -> Result<RepositoryAnalysis> {
        self.analyze_with_cancel(raw_path, options, &CancellationToken::new())
            .await
    }

    /// As [`analyze`](Self::analyze), honoring an abort signal during
    /// validation.
    pub async fn analyze_with_cancel(
        &self,
        raw_path: &str,
        options: AnalysisOptions,
        cancel: &CancellationToken,
    ) -> Result<RepositoryAnalysis> {
        let validation = self
            .validator
            .validate_with_cancel(raw_path, &self.validation_options, cancel)
            .await;
        if !validation.is_valid {
            if validation.error_code() == Some(ValidationCode::OperationCancelled) {
                return Err(PipelineError::Cancelled);
            }
            let detail = validation
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.code.as_str(), e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::Validation(detail));
        }
        let normalized = validation
            .normalized_path
            .ok_or_else(|| PipelineError::Internal("valid result without a path".into()))?;

        let key = request_key(&normalized, &options);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        let queue = self.queue.clone();
        let cache = Arc::clone(&self.cache);
        let search_cache = Arc::clone(&self.search_cache);
        let index = Arc::clone(&self.index);
        let flight_key = key.clone();
        let tags = options.tags.clone();
        let request = AnalysisRequest {
            path: normalized,
            options,
        };

        self.dedup
            .coalesce(&key, move || {
                async move {
                    // A request that queued behind an identical one may
                    // find the result cached by the time it starts.
                    if let Some(hit) = cache.get(&flight_key) {
                        return Ok(hit);
                    }
                    let task_id = Uuid::new_v4().to_string();
                    queue.add_task(&task_id, request);
                    let report = queue.wait_for(&task_id).await?;
                    cache.set(&flight_key, report.clone());
                    index.upsert(report.to_indexed(tags));
                    // Memoized searches are stale once the index changes
                    search_cache.clear();
                    Ok(report)
                }
                .boxed()
            })
            .await
    }

    /// Ranked search over completed analyses. Results are memoized with
    /// a short TTL until the next analysis lands.
    pub fn search(&self, query: &SearchQuery) -> Vec<SearchResult> {
        let key = format!("search:{}", canonicalize(query));
        if let Some(hit) = self.search_cache.get(&key) {
            return hit;
        }
        let results = self.index.search(query);
        self.search_cache.set(&key, results.clone());
        results
    }

    /// Subscribe to task lifecycle events (progress bars, UIs).
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    /// Drop every cached analysis derived from `path`.
    pub fn invalidate_path(&self, path: &Path) -> usize {
        let pattern = format!("^analysis:{}:", regex::escape(&path.display().to_string()));
        match regex::Regex::new(&pattern) {
            Ok(regex) => self.cache.invalidate_matching(&regex),
            Err(_) => 0,
        }
    }

    pub fn progress(&self) -> QueueProgress {
        self.queue.progress()
    }

    pub fn index(&self) -> &RepositoryIndex {
        &self.index
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn dedup_stats(&self) -> DedupStats {
        self.dedup.stats()
    }

    /// Tear down background work (the dedup sweep and any in-flight
    /// executions). The pipeline is unusable afterwards.
    pub fn close(&self) {
        self.dedup.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn counting_executor(calls: Arc<AtomicUsize>) -> AnalysisExecutor {
        Arc::new(move |path, _options| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok(RepositoryAnalysis {
                    name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    path,
                    languages: Vec::new(),
                    frameworks: Vec::new(),
                    total_files: 1,
                    total_lines: 10,
                    size_bytes: 100,
                    complexity: 1.0,
                    summary: "stub".into(),
                    analyzed_at: chrono::Utc::now(),
                })
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_invalid_path_is_rejected_before_execution() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline =
            AnalysisPipeline::new(counting_executor(Arc::clone(&calls)), &PipelineConfig::default());

        let err = pipeline
            .analyze("", AnalysisOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
        assert!(err.to_string().contains("EMPTY_PATH"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        pipeline.close();
    }

    #[tokio::test]
    async fn test_repeat_request_is_served_from_cache() {
        let temp = TempDir::new().unwrap();
        let raw = temp.path().to_string_lossy().into_owned();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline =
            AnalysisPipeline::new(counting_executor(Arc::clone(&calls)), &PipelineConfig::default());

        let first = pipeline
            .analyze(&raw, AnalysisOptions::default())
            .await
            .unwrap();
        let second = pipeline
            .analyze(&raw, AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(first.summary, second.summary);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.index().len(), 1);

        pipeline.close();
    }

    #[tokio::test]
    async fn test_different_options_are_distinct_requests() {
        let temp = TempDir::new().unwrap();
        let raw = temp.path().to_string_lossy().into_owned();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline =
            AnalysisPipeline::new(counting_executor(Arc::clone(&calls)), &PipelineConfig::default());

        pipeline
            .analyze(&raw, AnalysisOptions::default())
            .await
            .unwrap();
        pipeline
            .analyze(
                &raw,
                AnalysisOptions {
                    include_hidden: true,
                    ..AnalysisOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);

        pipeline.close();
    }

    #[tokio::test]
    async fn test_invalidate_path_forces_reanalysis() {
        let temp = TempDir::new().unwrap();
        let raw = temp.path().to_string_lossy().into_owned();
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline =
            AnalysisPipeline::new(counting_executor(Arc::clone(&calls)), &PipelineConfig::default());

        pipeline
            .analyze(&raw, AnalysisOptions::default())
            .await
            .unwrap();
        let report = pipeline
            .analyze(&raw, AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(pipeline.invalidate_path(&report.path), 1);
        pipeline
            .analyze(&raw, AnalysisOptions::default())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        pipeline.close();
    }
}
