// Archivo: engine.rs
// Propósito: `JobRunner`, el bucle que reclama trabajos por cola y los
// despacha a los workers registrados.
//
// Cada cola tiene un semáforo con `max_workers` permisos: nunca hay más
// trabajos en ejecución que permisos. Los reintentos, descartes y timeouts
// se resuelven aquí; los workers sólo ejecutan y completan.
use crate::domain::{Job, JobState, DEFAULT_QUEUE};
use crate::errors::{JobError, Result};
use crate::repository::{run_blocking, JobStore};
use crate::worker::Workers;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

/// Configuración de una cola.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: String,
    pub max_workers: usize,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        Self { name: name.into(), max_workers }
    }
}

/// Espera entre reintentos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `attempt^4` segundos.
    Polynomial,
    Fixed(Duration),
    /// Reintento inmediato (pruebas).
    Immediate,
}

impl Backoff {
    pub fn delay(&self, attempt: i32) -> Duration {
        match self {
            Backoff::Polynomial => Duration::from_secs((attempt.max(1) as u64).pow(4)),
            Backoff::Fixed(d) => *d,
            Backoff::Immediate => Duration::ZERO,
        }
    }
}

/// Configuración del runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub queues: Vec<QueueConfig>,
    pub poll_interval: Duration,
    pub backoff: Backoff,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { queues: vec![QueueConfig::new(DEFAULT_QUEUE, 10)],
               poll_interval: Duration::from_millis(200),
               backoff: Backoff::Polynomial }
    }
}

/// Resultado de una ejecución.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Retried,
    Discarded,
    /// El trabajo terminó por otra vía (por ejemplo cancelado) mientras corría.
    Skipped,
}

/// Contadores acumulados por `run_until_idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub completed: usize,
    pub retried: usize,
    pub discarded: usize,
    pub skipped: usize,
}

impl RunStats {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Discarded => self.discarded += 1,
            Outcome::Skipped => self.skipped += 1,
        }
    }
}

/// Motor de ejecución de trabajos.
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    workers: Arc<Workers>,
    config: RunnerConfig,
    permits: HashMap<String, Arc<Semaphore>>,
}

impl JobRunner {
    pub fn new(store: Arc<dyn JobStore>, workers: Workers, config: RunnerConfig) -> Self {
        let permits = config.queues
                            .iter()
                            .map(|q| (q.name.clone(), Arc::new(Semaphore::new(q.max_workers.max(1)))))
                            .collect();
        Self { store,
               workers: Arc::new(workers),
               config,
               permits }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Reclama trabajo en cada cola hasta llenar sus permisos libres y lanza
    /// una tarea por trabajo. Devuelve cuántos trabajos se lanzaron.
    async fn dispatch_once(&self, tasks: &mut JoinSet<Outcome>) -> Result<usize> {
        let mut dispatched = 0;
        for queue in &self.config.queues {
            let Some(sem) = self.permits.get(&queue.name) else {
                continue;
            };
            let free = sem.available_permits();
            if free == 0 {
                continue;
            }
            let name = queue.name.clone();
            let claimed = run_blocking(&self.store, move |store| store.claim(&name, free)).await?;
            for job in claimed {
                let permit = sem.clone()
                                .try_acquire_owned()
                                .map_err(|e| JobError::Internal(format!("semáforo de la cola {}: {}", queue.name, e)))?;
                log::debug!("despachando trabajo {} ({}) en la cola {}, intento {}",
                            job.id, job.kind, job.queue, job.attempt);
                tasks.spawn(execute(self.store.clone(),
                                    self.workers.clone(),
                                    self.config.backoff,
                                    job,
                                    permit));
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Ejecuta hasta que no quede trabajo ejecutable ahora mismo en las colas
    /// configuradas. Los reintentos programados en el futuro quedan
    /// pendientes.
    pub async fn run_until_idle(&self) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let mut tasks = JoinSet::new();
        loop {
            let dispatched = self.dispatch_once(&mut tasks).await?;
            if dispatched == 0 && tasks.is_empty() {
                break;
            }
            if let Some(joined) = tasks.join_next().await {
                stats.record(joined.map_err(|e| JobError::Internal(format!("tarea de trabajo: {}", e)))?);
            }
        }
        Ok(stats)
    }

    /// Bucle principal: sondea cada `poll_interval` hasta que `shutdown`
    /// cambie a `true`, y luego espera a los trabajos en curso.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut tasks: JoinSet<Outcome> = JoinSet::new();
        log::info!("runner arrancado con colas {:?}",
                   self.config.queues.iter().map(|q| (&q.name, q.max_workers)).collect::<Vec<_>>());
        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.dispatch_once(&mut tasks).await {
                log::error!("error reclamando trabajos: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        log::error!("tarea de trabajo abortada: {}", e);
                    }
                }
            }
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log::error!("tarea de trabajo abortada: {}", e);
            }
        }
        log::info!("runner detenido");
        Ok(())
    }
}

/// Ejecuta un trabajo reclamado y registra su resultado en el almacén.
async fn execute(store: Arc<dyn JobStore>,
                 workers: Arc<Workers>,
                 backoff: Backoff,
                 job: Job,
                 _permit: OwnedSemaphorePermit)
                 -> Outcome {
    let Some(worker) = workers.get(&job.kind) else {
        let error = format!("no hay worker registrado para {}", job.kind);
        return record_failure(&store, &job, error, backoff).await;
    };
    let timeout = Duration::from_secs(job.timeout_secs.max(1) as u64);
    let job_for_worker = job.clone();
    let handle = tokio::spawn(async move { worker.work(&job_for_worker).await });
    let abort = handle.abort_handle();
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(Ok(()))) => finish(&store, &job).await,
        Ok(Ok(Err(e))) => record_failure(&store, &job, format!("{:#}", e), backoff).await,
        Ok(Err(join_err)) => record_failure(&store, &job, format!("worker abortado: {}", join_err), backoff).await,
        Err(_) => {
            abort.abort();
            let error = format!("tiempo de ejecución agotado tras {}s", timeout.as_secs());
            record_failure(&store, &job, error, backoff).await
        }
    }
}

/// Asegura que un trabajo cuyo worker terminó bien quede completado. Si el
/// worker ya lo completó en su transacción la llamada no cambia nada.
async fn finish(store: &Arc<dyn JobStore>, job: &Job) -> Outcome {
    let id = job.id;
    match run_blocking(store, move |store| store.complete(id)).await {
        Ok(res) => {
            if res.changed {
                log::debug!("trabajo {} ({}) completado por el runner", job.id, job.kind);
            }
            log::info!("trabajo {} ({}) completado", job.id, job.kind);
            Outcome::Completed
        }
        Err(e) => {
            log::warn!("trabajo {} ({}) terminó pero no pudo completarse: {}", job.id, job.kind, e);
            Outcome::Skipped
        }
    }
}

async fn record_failure(store: &Arc<dyn JobStore>, job: &Job, error: String, backoff: Backoff) -> Outcome {
    let delay = chrono::Duration::from_std(backoff.delay(job.attempt)).unwrap_or_else(|_| chrono::Duration::zero());
    let retry_at = Utc::now() + delay;
    let id = job.id;
    let recorded = error.clone();
    match run_blocking(store, move |store| store.fail(id, &recorded, retry_at)).await {
        Ok(updated) => match updated.state {
            JobState::Discarded => {
                log::error!("trabajo {} ({}) descartado tras {} intentos: {}",
                            job.id, job.kind, updated.attempt, error);
                Outcome::Discarded
            }
            JobState::Retryable => {
                log::warn!("trabajo {} ({}) falló en el intento {}/{}, reintento en {:?}: {}",
                           job.id,
                           job.kind,
                           updated.attempt,
                           updated.max_attempts,
                           backoff.delay(job.attempt),
                           error);
                Outcome::Retried
            }
            _ => Outcome::Skipped,
        },
        Err(e) => {
            log::error!("no se pudo registrar el fallo del trabajo {}: {}", job.id, e);
            Outcome::Skipped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polynomial_backoff_grows_with_attempts() {
        assert_eq!(Backoff::Polynomial.delay(1), Duration::from_secs(1));
        assert_eq!(Backoff::Polynomial.delay(2), Duration::from_secs(16));
        assert_eq!(Backoff::Polynomial.delay(3), Duration::from_secs(81));
        assert_eq!(Backoff::Immediate.delay(4), Duration::ZERO);
    }
}
