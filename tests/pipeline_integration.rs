//! End-to-end tests for the analysis pipeline.

use futures::FutureExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use repolens::pipeline::AnalysisExecutor;
use repolens::{
    AnalysisOptions, AnalysisPipeline, PipelineConfig, PipelineError, QueueEvent,
    RepositoryAnalysis,
};

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// A small JavaScript repository with a React dependency.
fn fixture_repo() -> TempDir {
    let temp = TempDir::new().unwrap();
    write(
        temp.path(),
        "package.json",
        r#"{"name": "webapp", "dependencies": {"react": "^18.0.0"}}"#,
    );
    write(temp.path(), "src/App.jsx", "export const App = () => null;\n");
    write(temp.path(), "src/index.js", "console.log('boot');\nmain();\n");
    write(temp.path(), "src/types.ts", "export type Id = string;\n");
    temp
}

fn stub_report(path: &Path) -> RepositoryAnalysis {
    RepositoryAnalysis {
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        path: path.to_path_buf(),
        languages: Vec::new(),
        frameworks: Vec::new(),
        total_files: 0,
        total_lines: 0,
        size_bytes: 0,
        complexity: 0.0,
        summary: "stub".into(),
        analyzed_at: chrono::Utc::now(),
    }
}

#[tokio::test]
async fn test_default_executor_end_to_end() {
    let repo = fixture_repo();
    let raw = repo.path().to_string_lossy().into_owned();
    let pipeline = AnalysisPipeline::with_default_executor(&PipelineConfig::default());

    let report = pipeline
        .analyze(&raw, AnalysisOptions::default())
        .await
        .unwrap();

    assert_eq!(report.total_files, 3);
    let languages: Vec<&str> = report
        .languages
        .iter()
        .map(|l| l.language.as_str())
        .collect();
    assert!(languages.contains(&"JavaScript"));
    assert!(languages.contains(&"TypeScript"));
    assert_eq!(report.frameworks, vec!["React"]);

    // The completed analysis is searchable
    let results = pipeline.search(&repolens::SearchQuery {
        file_types: vec![".jsx".into()],
        ..repolens::SearchQuery::default()
    });
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].repository.name, report.name);

    pipeline.close();
}

#[tokio::test]
async fn test_concurrent_identical_requests_execute_once() {
    let repo = fixture_repo();
    let raw = repo.path().to_string_lossy().into_owned();

    let calls = Arc::new(AtomicUsize::new(0));
    let executor: AnalysisExecutor = {
        let calls = Arc::clone(&calls);
        Arc::new(move |path, _options| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(stub_report(&path))
            }
            .boxed()
        })
    };
    let pipeline = Arc::new(AnalysisPipeline::new(executor, &PipelineConfig::default()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pipeline = Arc::clone(&pipeline);
        let raw = raw.clone();
        handles.push(tokio::spawn(async move {
            pipeline.analyze(&raw, AnalysisOptions::default()).await
        }));
    }

    let mut summaries = Vec::new();
    for handle in handles {
        summaries.push(handle.await.unwrap().unwrap().summary);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(summaries.iter().all(|s| s == "stub"));

    pipeline.close();
}

#[tokio::test]
async fn test_event_stream_covers_task_lifecycle() {
    let repo = fixture_repo();
    let raw = repo.path().to_string_lossy().into_owned();
    let pipeline = AnalysisPipeline::with_default_executor(&PipelineConfig::default());

    let mut events = pipeline.subscribe();
    pipeline
        .analyze(&raw, AnalysisOptions::default())
        .await
        .unwrap();

    let mut saw_added = false;
    let mut saw_started = false;
    let mut saw_completed = false;
    let mut saw_progress = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("event stream stalled")
            .expect("event channel closed");
        match event {
            QueueEvent::TaskAdded { .. } => saw_added = true,
            QueueEvent::TaskStarted { .. } => saw_started = true,
            QueueEvent::TaskCompleted { .. } => saw_completed = true,
            QueueEvent::Progress(progress) => {
                saw_progress = true;
                assert_eq!(progress.percent, 100);
            }
            QueueEvent::Drained => break,
            QueueEvent::TaskFailed { error, .. } => panic!("unexpected failure: {error}"),
        }
    }

    assert!(saw_added && saw_started && saw_completed && saw_progress);

    pipeline.close();
}

#[tokio::test]
async fn test_executor_failure_is_not_cached() {
    let repo = fixture_repo();
    let raw = repo.path().to_string_lossy().into_owned();

    let calls = Arc::new(AtomicUsize::new(0));
    let executor: AnalysisExecutor = {
        let calls = Arc::clone(&calls);
        Arc::new(move |_path, _options| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Execution("parse failure".into()))
            }
            .boxed()
        })
    };
    let pipeline = AnalysisPipeline::new(executor, &PipelineConfig::default());

    let err = pipeline
        .analyze(&raw, AnalysisOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "EXECUTION_FAILURE");
    assert!(pipeline.index().is_empty());

    // Failures are not memoized; a retry executes again
    let _ = pipeline.analyze(&raw, AnalysisOptions::default()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    pipeline.close();
}

#[tokio::test]
async fn test_validation_failure_carries_stable_code() {
    let pipeline = AnalysisPipeline::with_default_executor(&PipelineConfig::default());

    let err = pipeline
        .analyze("", AnalysisOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION");
    assert!(err.to_string().contains("EMPTY_PATH"));

    let missing = pipeline
        .analyze("/definitely/not/a/real/path/xyz", AnalysisOptions::default())
        .await
        .unwrap_err();
    assert_eq!(missing.code(), "VALIDATION");
    assert!(missing.to_string().contains("NOT_FOUND"));

    pipeline.close();
}
