// Archivo: config.rs
// Propósito: configuración de la capa de workflows cargada desde el entorno
// (con `.env` opcional vía dotenvy).
use crate::args::{QUEUE_RESYNC, QUEUE_WORKSTATION};
use crate::errors::{WorkflowError, WorkflowResult};
use jobs::{Backoff, QueueConfig, RunnerConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE, DEFAULT_TIMEOUT_SECS};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
  /// Ruta SQLite del almacén; `None` usa el almacén en memoria.
  pub database_url: Option<String>,
  pub default_workers: usize,
  pub workstation_workers: usize,
  /// La cola de resync corre con un solo worker salvo que se indique otra
  /// cosa: la API externa no admite resyncs simultáneos.
  pub resync_workers: usize,
  pub poll_interval: Duration,
  pub max_attempts: i32,
  pub timeout_secs: i64,
  /// Consulta de estado en paralelo (rayon) en vez de secuencial.
  pub parallel_status: bool,
}

impl Default for WorkflowConfig {
  fn default() -> Self {
    Self { database_url: None,
           default_workers: 10,
           workstation_workers: 10,
           resync_workers: 1,
           poll_interval: Duration::from_millis(200),
           max_attempts: DEFAULT_MAX_ATTEMPTS,
           timeout_secs: DEFAULT_TIMEOUT_SECS,
           parallel_status: false }
  }
}

fn env_or<T: FromStr>(key: &str, default: T) -> WorkflowResult<T> {
  match std::env::var(key) {
    Ok(raw) if !raw.trim().is_empty() => raw.trim()
                                            .parse::<T>()
                                            .map_err(|_| WorkflowError::validation("config", format!("{} inválido: {}", key, raw))),
    _ => Ok(default),
  }
}

impl WorkflowConfig {
  /// Lee la configuración de las variables de entorno:
  /// `JOBS_DB_URL`/`DATABASE_URL`, `JOBS_DEFAULT_WORKERS`,
  /// `JOBS_WORKSTATION_WORKERS`, `JOBS_RESYNC_WORKERS`,
  /// `JOBS_POLL_INTERVAL_MS`, `JOBS_MAX_ATTEMPTS`, `JOBS_TIMEOUT_SECS` y
  /// `JOBS_PARALLEL_STATUS`.
  pub fn from_env() -> WorkflowResult<Self> {
    dotenvy::dotenv().ok();
    let d = Self::default();
    let database_url = std::env::var("JOBS_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                                   .ok()
                                                   .filter(|u| !u.trim().is_empty());
    let cfg = Self { database_url,
                     default_workers: env_or("JOBS_DEFAULT_WORKERS", d.default_workers)?,
                     workstation_workers: env_or("JOBS_WORKSTATION_WORKERS", d.workstation_workers)?,
                     resync_workers: env_or("JOBS_RESYNC_WORKERS", d.resync_workers)?,
                     poll_interval: Duration::from_millis(env_or("JOBS_POLL_INTERVAL_MS", 200u64)?),
                     max_attempts: env_or("JOBS_MAX_ATTEMPTS", d.max_attempts)?,
                     timeout_secs: env_or("JOBS_TIMEOUT_SECS", d.timeout_secs)?,
                     parallel_status: env_or("JOBS_PARALLEL_STATUS", d.parallel_status)? };
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn validate(&self) -> WorkflowResult<()> {
    if self.max_attempts < 1 {
      return Err(WorkflowError::validation("config", "JOBS_MAX_ATTEMPTS debe ser al menos 1"));
    }
    if self.timeout_secs < 1 {
      return Err(WorkflowError::validation("config", "JOBS_TIMEOUT_SECS debe ser al menos 1"));
    }
    if self.default_workers == 0 || self.workstation_workers == 0 || self.resync_workers == 0 {
      return Err(WorkflowError::validation("config", "cada cola necesita al menos un worker"));
    }
    Ok(())
  }

  /// Colas y límites de concurrencia para el `JobRunner`.
  pub fn runner_config(&self) -> RunnerConfig {
    RunnerConfig { queues: vec![QueueConfig::new(DEFAULT_QUEUE, self.default_workers),
                                QueueConfig::new(QUEUE_WORKSTATION, self.workstation_workers),
                                QueueConfig::new(QUEUE_RESYNC, self.resync_workers)],
                   poll_interval: self.poll_interval,
                   backoff: Backoff::Polynomial }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_cap_resync_queue_at_one() {
    let cfg = WorkflowConfig::default();
    let runner = cfg.runner_config();
    let resync = runner.queues.iter().find(|q| q.name == QUEUE_RESYNC).unwrap();
    assert_eq!(resync.max_workers, 1);
    assert_eq!(runner.queues.len(), 3);
    assert!(cfg.validate().is_ok());
  }

  #[test]
  fn zero_attempts_is_rejected() {
    let cfg = WorkflowConfig { max_attempts: 0, ..WorkflowConfig::default() };
    assert!(matches!(cfg.validate(), Err(WorkflowError::Validation { .. })));
  }
}
