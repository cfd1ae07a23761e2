use async_trait::async_trait;
use jobs::stubs::InMemoryJobStore;
use chrono::{DateTime, Utc};
use jobs::{Backoff, CompleteResult, Job, JobFilter, JobId, JobRunner, JobSpec, JobState, JobStore, JobTx, QueueConfig,
           RunnerConfig, SequenceOpts, Worker, Workers};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> RunnerConfig {
  RunnerConfig { queues: vec![QueueConfig::new("default", 4)],
                 poll_interval: Duration::from_millis(10),
                 backoff: Backoff::Immediate }
}

/// Falla las primeras `failures` ejecuciones y luego termina bien.
struct Flaky {
  failures: usize,
  calls: AtomicUsize,
}

#[async_trait]
impl Worker for Flaky {
  fn kind(&self) -> &'static str {
    "flaky"
  }

  async fn work(&self, _job: &Job) -> anyhow::Result<()> {
    let n = self.calls.fetch_add(1, Ordering::SeqCst);
    if n < self.failures {
      anyhow::bail!("fallo {}", n + 1);
    }
    Ok(())
  }
}

struct Recorder {
  kind: &'static str,
  seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Worker for Recorder {
  fn kind(&self) -> &'static str {
    self.kind
  }

  async fn work(&self, job: &Job) -> anyhow::Result<()> {
    self.seen.lock().unwrap().push(job.kind.clone());
    Ok(())
  }
}

struct Sleepy;

#[async_trait]
impl Worker for Sleepy {
  fn kind(&self) -> &'static str {
    "sleepy"
  }

  async fn work(&self, _job: &Job) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_secs(30)).await;
    Ok(())
  }
}

/// Almacén cuya confirmación de trabajos bloquea el hilo, como una escritura
/// SQLite esperando el lock.
struct SlowCompleteStore {
  inner: InMemoryJobStore,
  delay: Duration,
}

impl JobStore for SlowCompleteStore {
  fn begin(&self) -> jobs::Result<Box<dyn JobTx + '_>> {
    self.inner.begin()
  }

  fn list(&self, filter: &JobFilter) -> jobs::Result<Vec<Job>> {
    self.inner.list(filter)
  }

  fn get(&self, id: JobId) -> jobs::Result<Job> {
    self.inner.get(id)
  }

  fn claim(&self, queue: &str, limit: usize) -> jobs::Result<Vec<Job>> {
    self.inner.claim(queue, limit)
  }

  fn fail(&self, id: JobId, error: &str, retry_at: DateTime<Utc>) -> jobs::Result<Job> {
    self.inner.fail(id, error, retry_at)
  }

  fn cancel(&self, id: JobId) -> jobs::Result<Job> {
    self.inner.cancel(id)
  }

  fn complete(&self, id: JobId) -> jobs::Result<CompleteResult> {
    std::thread::sleep(self.delay);
    self.inner.complete(id)
  }
}

#[tokio::test]
async fn retries_then_completes() {
  let store = Arc::new(InMemoryJobStore::new());
  let id = store.insert_many(vec![JobSpec::new("flaky", json!({}))]).unwrap()[0].job.id;
  let mut workers = Workers::new();
  workers.register(Flaky { failures: 2, calls: AtomicUsize::new(0) }).unwrap();

  let runner = JobRunner::new(store.clone(), workers, config());
  let stats = runner.run_until_idle().await.expect("run");
  assert_eq!(stats.retried, 2);
  assert_eq!(stats.completed, 1);

  let job = store.get(id).unwrap();
  assert_eq!(job.state, JobState::Completed);
  assert_eq!(job.attempt, 3);
  assert_eq!(job.errors.len(), 2);
}

#[tokio::test]
async fn discards_after_max_attempts() {
  let store = Arc::new(InMemoryJobStore::new());
  let mut spec = JobSpec::new("flaky", json!({}));
  spec.max_attempts = 3;
  let id = store.insert_many(vec![spec]).unwrap()[0].job.id;
  let mut workers = Workers::new();
  workers.register(Flaky { failures: 10, calls: AtomicUsize::new(0) }).unwrap();

  let stats = JobRunner::new(store.clone(), workers, config()).run_until_idle().await.unwrap();
  assert_eq!(stats.discarded, 1);
  let job = store.get(id).unwrap();
  assert_eq!(job.state, JobState::Discarded);
  assert_eq!(job.distinct_errors(), vec!["fallo 1", "fallo 2", "fallo 3"]);
}

#[tokio::test]
async fn missing_worker_is_recorded_as_failure() {
  let store = Arc::new(InMemoryJobStore::new());
  let mut spec = JobSpec::new("unknown", json!({}));
  spec.max_attempts = 1;
  let id = store.insert_many(vec![spec]).unwrap()[0].job.id;

  JobRunner::new(store.clone(), Workers::new(), config()).run_until_idle().await.unwrap();
  let job = store.get(id).unwrap();
  assert_eq!(job.state, JobState::Discarded);
  assert!(job.errors[0].error.contains("unknown"));
}

#[tokio::test]
async fn timeout_counts_as_failed_attempt() {
  let store = Arc::new(InMemoryJobStore::new());
  let mut spec = JobSpec::new("sleepy", json!({}));
  spec.max_attempts = 1;
  spec.timeout_secs = 1;
  let id = store.insert_many(vec![spec]).unwrap()[0].job.id;
  let mut workers = Workers::new();
  workers.register(Sleepy).unwrap();

  JobRunner::new(store.clone(), workers, config()).run_until_idle().await.unwrap();
  let job = store.get(id).unwrap();
  assert_eq!(job.state, JobState::Discarded);
  assert!(job.errors[0].error.contains("tiempo"));
}

#[tokio::test]
async fn sequenced_jobs_run_in_order() {
  let store = Arc::new(InMemoryJobStore::new());
  let seen = Arc::new(Mutex::new(Vec::new()));
  let specs = ["one", "two", "three"].iter()
                                     .map(|k| {
                                       let mut s = JobSpec::new(*k, json!({"subject": "s1"}));
                                       s.sequence = Some(SequenceOpts::by_fields(&["subject"]).exclude_kind());
                                       s
                                     })
                                     .collect();
  store.insert_many(specs).unwrap();

  let mut workers = Workers::new();
  for kind in ["one", "two", "three"] {
    workers.register(Recorder { kind, seen: seen.clone() }).unwrap();
  }
  let stats = JobRunner::new(store.clone(), workers, config()).run_until_idle().await.unwrap();
  assert_eq!(stats.completed, 3);
  assert_eq!(*seen.lock().unwrap(), vec!["one", "two", "three"]);
  assert!(store.list(&JobFilter::new().states(&JobState::IN_FLIGHT)).unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_worker_registration_fails() {
  let mut workers = Workers::new();
  workers.register(Sleepy).unwrap();
  assert!(workers.register(Sleepy).is_err());
  assert_eq!(workers.kinds(), vec!["sleepy"]);
}

#[tokio::test]
async fn run_stops_on_shutdown_signal() {
  let store = Arc::new(InMemoryJobStore::new());
  let id = store.insert_many(vec![JobSpec::new("flaky", json!({}))]).unwrap()[0].job.id;
  let mut workers = Workers::new();
  workers.register(Flaky { failures: 0, calls: AtomicUsize::new(0) }).unwrap();
  let runner = Arc::new(JobRunner::new(store.clone(), workers, config()));

  let (tx, rx) = tokio::sync::watch::channel(false);
  let handle = {
    let runner = runner.clone();
    tokio::spawn(async move { runner.run(rx).await })
  };
  for _ in 0..100 {
    if store.get(id).unwrap().state == JobState::Completed {
      break;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  tx.send(true).unwrap();
  handle.await.unwrap().unwrap();
  assert_eq!(store.get(id).unwrap().state, JobState::Completed);
}

#[tokio::test]
async fn blocking_store_calls_do_not_serialize_the_runtime() {
  let store = Arc::new(SlowCompleteStore { inner: InMemoryJobStore::new(),
                                           delay: Duration::from_millis(300) });
  let specs = (0..4).map(|i| JobSpec::new("slow", json!({"n": i}))).collect();
  store.insert_many(specs).unwrap();
  let seen = Arc::new(Mutex::new(Vec::new()));
  let mut workers = Workers::new();
  workers.register(Recorder { kind: "slow", seen: seen.clone() }).unwrap();

  let started = std::time::Instant::now();
  let stats = JobRunner::new(store.clone(), workers, config()).run_until_idle().await.unwrap();
  assert_eq!(stats.completed, 4);
  // four sequential completions would take at least 1.2s on this single-threaded runtime
  assert!(started.elapsed() < Duration::from_millis(900), "elapsed {:?}", started.elapsed());
  assert_eq!(seen.lock().unwrap().len(), 4);
}
