//! Bounded-concurrency task execution.
//!
//! Tasks are started FIFO, at most `concurrency` run simultaneously, and
//! each settlement immediately pumps the next pending task into the freed
//! slot, so the bound stays saturated without a polling loop. Failures are
//! isolated per task and never abort siblings or the queue.

mod events;
mod task;

pub use events::{QueueEvent, QueueProgress};
pub use task::{Task, TaskStatus};

use futures::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::error::{PipelineError, Result};

/// The work function invoked for each task.
pub type Processor<T, R> = Arc<dyn Fn(T) -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Hard upper bound on simultaneously running tasks.
    pub concurrency: usize,
    /// Per-task budget. On expiry the processor future is dropped
    /// (cancelled) and the task fails with a timeout error.
    pub timeout: Option<Duration>,
    /// Broadcast buffer for lifecycle events.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: None,
            event_capacity: 256,
        }
    }
}

struct QueueState<T, R> {
    tasks: HashMap<String, Task<T, R>>,
    pending: VecDeque<String>,
    running: usize,
}

struct QueueInner<T, R> {
    state: Mutex<QueueState<T, R>>,
    processor: Processor<T, R>,
    concurrency: usize,
    timeout: Option<Duration>,
    events: broadcast::Sender<QueueEvent>,
}

/// Executes submitted work with bounded concurrency and optional timeout.
///
/// Cloning is cheap and shares the same queue.
pub struct TaskQueue<T, R> {
    inner: Arc<QueueInner<T, R>>,
}

impl<T, R> Clone for TaskQueue<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, R> TaskQueue<T, R>
where
    T: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    /// Create a queue that runs `processor` for each submitted task.
    pub fn new(processor: Processor<T, R>, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    tasks: HashMap::new(),
                    pending: VecDeque::new(),
                    running: 0,
                }),
                processor,
                concurrency: config.concurrency.max(1),
                timeout: config.timeout,
                events,
            }),
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Append a task and trigger processing. Never blocks; the pending
    /// list is unbounded, so externally driven submission rates are the
    /// caller's concern.
    ///
    /// Submitting an id that already exists is a no-op returning the
    /// existing record.
    pub fn add_task(&self, id: &str, input: T) -> Task<T, R> {
        let snapshot = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            if let Some(existing) = state.tasks.get(id) {
                return existing.clone();
            }
            let task = Task::new(id.to_string(), input);
            let snapshot = task.clone();
            state.tasks.insert(id.to_string(), task);
            state.pending.push_back(id.to_string());
            snapshot
        };
        self.emit(QueueEvent::TaskAdded {
            id: snapshot.id.clone(),
        });
        self.pump();
        snapshot
    }

    /// Snapshot of a task record.
    pub fn get_task(&self, id: &str) -> Option<Task<T, R>> {
        let state = self.inner.state.lock().expect("queue lock poisoned");
        state.tasks.get(id).cloned()
    }

    /// Progress derived from current task states.
    pub fn progress(&self) -> QueueProgress {
        let state = self.inner.state.lock().expect("queue lock poisoned");
        Self::progress_locked(&state)
    }

    fn progress_locked(state: &QueueState<T, R>) -> QueueProgress {
        let mut progress = QueueProgress {
            total: state.tasks.len(),
            ..QueueProgress::default()
        };
        for task in state.tasks.values() {
            match task.status {
                TaskStatus::Pending => progress.pending += 1,
                TaskStatus::Running => progress.running += 1,
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed => progress.failed += 1,
            }
        }
        if progress.total > 0 {
            let done = (progress.completed + progress.failed) as f64;
            progress.percent = ((100.0 * done / progress.total as f64).round()) as u8;
        }
        progress
    }

    /// Await a task's terminal state and return its result.
    pub async fn wait_for(&self, id: &str) -> Result<R> {
        let mut rx = self.subscribe();
        // The subscription is registered before this check, so a
        // settlement between the two cannot be missed.
        if let Some(result) = self.terminal_result(id) {
            return result;
        }
        loop {
            match rx.recv().await {
                Ok(QueueEvent::TaskCompleted { id: done })
                | Ok(QueueEvent::TaskFailed { id: done, .. })
                    if done == id =>
                {
                    return self.terminal_result(id).unwrap_or_else(|| {
                        Err(PipelineError::Internal("task record missing".into()))
                    });
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "queue event receiver lagged");
                    if let Some(result) = self.terminal_result(id) {
                        return result;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return self
                        .terminal_result(id)
                        .unwrap_or(Err(PipelineError::Cancelled));
                }
            }
        }
    }

    fn terminal_result(&self, id: &str) -> Option<Result<R>> {
        let state = self.inner.state.lock().expect("queue lock poisoned");
        let task = state.tasks.get(id)?;
        match task.status {
            TaskStatus::Completed => Some(task.result.clone().ok_or_else(|| {
                PipelineError::Internal("completed task has no result".into())
            })),
            TaskStatus::Failed => Some(Err(task
                .error
                .clone()
                .unwrap_or_else(|| PipelineError::Internal("failed task has no error".into())))),
            _ => None,
        }
    }

    fn emit(&self, event: QueueEvent) {
        // Ignore send errors - they occur when there are no subscribers
        let _ = self.inner.events.send(event);
    }

    /// Start pending tasks until the concurrency bound is reached.
    fn pump(&self) {
        loop {
            let (id, input) = {
                let mut state = self.inner.state.lock().expect("queue lock poisoned");
                if state.running >= self.inner.concurrency {
                    return;
                }
                let Some(id) = state.pending.pop_front() else {
                    return;
                };
                let task = state
                    .tasks
                    .get_mut(&id)
                    .expect("pending id without a task record");
                task.status = TaskStatus::Running;
                task.started_at = Some(Instant::now());
                let input = task.input.clone();
                state.running += 1;
                (id, input)
            };

            self.emit(QueueEvent::TaskStarted { id: id.clone() });

            let queue = self.clone();
            tokio::spawn(async move {
                queue.run_one(id, input).await;
            });
        }
    }

    async fn run_one(&self, id: String, input: T) {
        // The processor runs as its own task so that a panic inside it is
        // contained as a JoinError instead of wedging this slot.
        let mut handle = tokio::spawn((self.inner.processor)(input));
        let outcome: Result<R> = match self.inner.timeout {
            Some(budget) => match tokio::time::timeout(budget, &mut handle).await {
                Ok(joined) => flatten_join(joined),
                Err(_) => {
                    // Abort rather than detach: the timed-out work stops
                    // instead of running on after its waiter gave up.
                    handle.abort();
                    Err(PipelineError::Timeout(budget))
                }
            },
            None => flatten_join(handle.await),
        };

        let (event, progress, drained) = {
            let mut state = self.inner.state.lock().expect("queue lock poisoned");
            let task = state
                .tasks
                .get_mut(&id)
                .expect("running id without a task record");
            task.finished_at = Some(Instant::now());
            let event = match outcome {
                Ok(result) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                    QueueEvent::TaskCompleted { id: id.clone() }
                }
                Err(error) => {
                    task.status = TaskStatus::Failed;
                    task.error = Some(error.clone());
                    QueueEvent::TaskFailed {
                        id: id.clone(),
                        error,
                    }
                }
            };
            state.running -= 1;
            let progress = Self::progress_locked(&state);
            let drained = state.pending.is_empty() && state.running == 0;
            (event, progress, drained)
        };

        self.emit(event);
        self.emit(QueueEvent::Progress(progress));
        if drained {
            self.emit(QueueEvent::Drained);
        }

        // Reuse the freed slot immediately
        self.pump();
    }
}

fn flatten_join<R>(joined: std::result::Result<Result<R>, tokio::task::JoinError>) -> Result<R> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(PipelineError::Internal("processor panicked".into())),
        Err(_) => Err(PipelineError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sleepy_processor(
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        delay: Duration,
    ) -> Processor<u32, u32> {
        Arc::new(move |n: u32| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(delay).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(n * 2)
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let queue = TaskQueue::new(
            sleepy_processor(Arc::clone(&running), Arc::clone(&peak), Duration::from_millis(30)),
            QueueConfig {
                concurrency: 2,
                ..QueueConfig::default()
            },
        );

        let mut rx = queue.subscribe();
        for i in 0..6 {
            queue.add_task(&format!("t{i}"), i);
        }

        // Wait for the queue to drain
        let mut drained_count = 0;
        while drained_count == 0 {
            match rx.recv().await.unwrap() {
                QueueEvent::Drained => drained_count += 1,
                _ => {}
            }
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        let progress = queue.progress();
        assert_eq!(progress.completed, 6);
        assert_eq!(progress.percent, 100);

        // No further Drained events arrive
        let extra = tokio::time::timeout(Duration::from_millis(60), async {
            loop {
                if let QueueEvent::Drained = rx.recv().await.unwrap() {
                    return;
                }
            }
        })
        .await;
        assert!(extra.is_err(), "queue emitted Drained more than once");
    }

    #[tokio::test]
    async fn test_serial_queue_completes_in_submission_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let processor: Processor<u32, u32> = {
            let order = Arc::clone(&order);
            Arc::new(move |n: u32| {
                let order = Arc::clone(&order);
                async move {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    order.lock().unwrap().push(n);
                    Ok(n)
                }
                .boxed()
            })
        };
        let queue = TaskQueue::new(
            processor,
            QueueConfig {
                concurrency: 1,
                ..QueueConfig::default()
            },
        );

        for i in 0..5 {
            queue.add_task(&format!("t{i}"), i);
        }
        for i in 0..5 {
            queue.wait_for(&format!("t{i}")).await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_timeout_fails_the_task() {
        let processor: Processor<u32, u32> = Arc::new(|_| {
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(0)
            }
            .boxed()
        });
        let queue = TaskQueue::new(
            processor,
            QueueConfig {
                concurrency: 1,
                timeout: Some(Duration::from_millis(40)),
                ..QueueConfig::default()
            },
        );

        queue.add_task("slow", 1);
        let started = Instant::now();
        let err = queue.wait_for("slow").await.unwrap_err();

        assert_eq!(err, PipelineError::Timeout(Duration::from_millis(40)));
        assert!(started.elapsed() < Duration::from_millis(500));

        let task = queue.get_task("slow").unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let processor: Processor<u32, u32> = Arc::new(|n: u32| {
            async move {
                if n == 2 {
                    Err(PipelineError::Execution("task 2 exploded".into()))
                } else {
                    Ok(n)
                }
            }
            .boxed()
        });
        let queue = TaskQueue::new(processor, QueueConfig::default());

        for i in 0..4 {
            queue.add_task(&format!("t{i}"), i);
        }

        assert_eq!(queue.wait_for("t0").await.unwrap(), 0);
        assert!(queue.wait_for("t2").await.is_err());
        assert_eq!(queue.wait_for("t3").await.unwrap(), 3);

        let progress = queue.progress();
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.failed, 1);
    }

    #[tokio::test]
    async fn test_panicking_processor_fails_its_task() {
        let processor: Processor<u32, u32> = Arc::new(|n: u32| {
            async move {
                if n == 1 {
                    panic!("boom");
                }
                Ok(n)
            }
            .boxed()
        });
        let queue = TaskQueue::new(processor, QueueConfig::default());

        queue.add_task("bad", 1);
        queue.add_task("good", 2);

        let err = queue.wait_for("bad").await.unwrap_err();
        assert_eq!(err.code(), "INTERNAL");
        assert_eq!(queue.wait_for("good").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_id_is_idempotent() {
        let processor: Processor<u32, u32> = Arc::new(|n: u32| async move { Ok(n) }.boxed());
        let queue = TaskQueue::new(processor, QueueConfig::default());

        queue.add_task("t", 1);
        let dup = queue.add_task("t", 99);
        assert_eq!(dup.input, 1);

        assert_eq!(queue.wait_for("t").await.unwrap(), 1);
        assert_eq!(queue.progress().total, 1);
    }

    #[tokio::test]
    async fn test_progress_empty_queue() {
        let processor: Processor<u32, u32> = Arc::new(|n: u32| async move { Ok(n) }.boxed());
        let queue = TaskQueue::new(processor, QueueConfig::default());

        let progress = queue.progress();
        assert_eq!(progress.total, 0);
        assert_eq!(progress.percent, 0);
    }
}
