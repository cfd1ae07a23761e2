// Archivo: stubs.rs
// Propósito: implementación en memoria del almacén de trabajos para pruebas
// y wiring rápido.
//
// No es durable. Las transacciones toman el lock del estado completo y
// guardan una copia para poder deshacer, así que son serializables.
use crate::domain::{AttemptError, CompleteResult, Job, JobFilter, JobHandle, JobId, JobSpec, JobState};
use crate::errors::{JobError, Result};
use crate::keys;
use crate::repository::{JobStore, JobTx};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
struct State {
    /// Trabajos indexados por id (orden ascendente de inserción).
    jobs: BTreeMap<JobId, Job>,
}

/// Almacén de trabajos en memoria.
pub struct InMemoryJobStore {
    state: Mutex<State>,
    /// Los ids no se reutilizan tras un rollback, igual que una secuencia SQL.
    next_id: AtomicI64,
    /// Índice (dentro del próximo lote) cuya inserción debe fallar.
    fail_insert_at: Mutex<Option<usize>>,
}

impl InMemoryJobStore {
    /// Crea un almacén vacío.
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()),
               next_id: AtomicI64::new(1),
               fail_insert_at: Mutex::new(None) }
    }

    /// Hace que el próximo `insert_many` falle al llegar al spec `index`
    /// (0-based), después de haber insertado los anteriores dentro de la
    /// transacción. Sirve para comprobar la atomicidad de los lotes.
    pub fn fail_next_insert_at(&self, index: usize) {
        *self.fail_insert_at.lock().unwrap_or_else(|e| e.into_inner()) = Some(index);
    }

    /// Copia de todos los trabajos en orden de id ascendente.
    pub fn dump_for_debug(&self) -> Result<Vec<Job>> {
        Ok(self.lock()?.jobs.values().cloned().collect())
    }

    /// Inserta un trabajo sin comprobar colisiones ni validar. Calcula sus
    /// claves como una inserción normal. Sólo para preparar escenarios de
    /// prueba que violan invariantes.
    pub fn force_insert(&self, spec: JobSpec) -> Result<Job> {
        let unique_key = keys::unique_key(&spec);
        let sequence_key = keys::sequence_key(&spec)?;
        let mut st = self.lock()?;
        let job = self.build_job(spec, unique_key, sequence_key, Utc::now());
        st.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    /// Helper para mapear `Mutex::lock()` en un `Result` con
    /// `JobError::Database`.
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|e| JobError::Database(format!("mutex poisoned: {:?}", e)))
    }

    fn build_job(&self,
                 spec: JobSpec,
                 unique_key: Option<String>,
                 sequence_key: Option<String>,
                 now: DateTime<Utc>)
                 -> Job {
        let (state, scheduled_at) = match spec.scheduled_at {
            Some(at) if at > now => (JobState::Scheduled, at),
            _ => (JobState::Available, now),
        };
        let (sequence_concurrent, sequence_continue_on_discard) = spec.sequence
                                                                      .as_ref()
                                                                      .map(|s| (s.concurrent_same_kind,
                                                                                s.continue_on_discard))
                                                                      .unwrap_or((false, false));
        Job { id: self.next_id.fetch_add(1, Ordering::SeqCst),
              kind: spec.kind,
              queue: spec.queue,
              args: spec.args,
              metadata: spec.metadata,
              state,
              attempt: 0,
              max_attempts: spec.max_attempts,
              errors: Vec::new(),
              created_at: now,
              scheduled_at,
              attempted_at: None,
              finalized_at: None,
              timeout_secs: spec.timeout_secs,
              unique_key,
              sequence_key,
              sequence_concurrent,
              sequence_continue_on_discard }
    }

    fn insert_into(&self, st: &mut State, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
        let fail_at = self.fail_insert_at.lock().unwrap_or_else(|e| e.into_inner()).take();
        let now = Utc::now();
        let mut out = Vec::with_capacity(specs.len());
        for (idx, spec) in specs.into_iter().enumerate() {
            if fail_at == Some(idx) {
                return Err(JobError::Database(format!("fallo inyectado insertando {} (posición {})", spec.kind, idx)));
            }
            spec.validate()?;
            let sequence_key = keys::sequence_key(&spec)?;
            let unique_key = keys::unique_key(&spec);
            if let (Some(key), Some(opts)) = (unique_key.as_deref(), spec.unique.as_ref()) {
                let existing = st.jobs
                                 .values()
                                 .rev()
                                 .find(|j| keys::collides(j, key, opts, now));
                if let Some(existing) = existing {
                    out.push(JobHandle { job: existing.clone(), duplicate: true });
                    continue;
                }
            }
            let job = self.build_job(spec, unique_key, sequence_key, now);
            st.jobs.insert(job.id, job.clone());
            out.push(JobHandle { job, duplicate: false });
        }
        Ok(out)
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

fn complete_in(st: &mut State, id: JobId, now: DateTime<Utc>) -> Result<CompleteResult> {
    let job = st.jobs
                .get_mut(&id)
                .ok_or_else(|| JobError::NotFound(format!("trabajo {}", id)))?;
    match job.state {
        JobState::Completed => Ok(CompleteResult { job: job.clone(), changed: false }),
        JobState::Discarded | JobState::Cancelled => {
            Err(JobError::Internal(format!("no se puede completar el trabajo {} en estado {}", id, job.state)))
        }
        _ => {
            job.state = JobState::Completed;
            job.finalized_at = Some(now);
            Ok(CompleteResult { job: job.clone(), changed: true })
        }
    }
}

/// Cancela los pendientes posteriores de la secuencia de `failed`.
fn halt_sequence(st: &mut State, failed: &Job, now: DateTime<Utc>) {
    let halted = keys::halted_by(failed, st.jobs.values());
    for id in halted {
        if let Some(j) = st.jobs.get_mut(&id) {
            log::warn!("cancelando trabajo {} ({}): la secuencia se detuvo tras el trabajo {}",
                       j.id, j.kind, failed.id);
            j.state = JobState::Cancelled;
            j.finalized_at = Some(now);
        }
    }
}

/// Transacción del almacén en memoria: mantiene el lock y una copia del
/// estado previo para el rollback.
pub struct InMemoryTx<'a> {
    store: &'a InMemoryJobStore,
    guard: MutexGuard<'a, State>,
    backup: Option<State>,
}

impl JobTx for InMemoryTx<'_> {
    fn insert_many(&mut self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
        let store = self.store;
        store.insert_into(&mut self.guard, specs)
    }

    fn complete(&mut self, id: JobId) -> Result<CompleteResult> {
        complete_in(&mut self.guard, id, Utc::now())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.backup = None;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        if let Some(prev) = self.backup.take() {
            *self.guard = prev;
        }
        Ok(())
    }
}

impl Drop for InMemoryTx<'_> {
    fn drop(&mut self) {
        if let Some(prev) = self.backup.take() {
            *self.guard = prev;
        }
    }
}

impl JobStore for InMemoryJobStore {
    fn begin(&self) -> Result<Box<dyn JobTx + '_>> {
        let guard = self.lock()?;
        let backup = Some(guard.clone());
        Ok(Box::new(InMemoryTx { store: self, guard, backup }))
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let st = self.lock()?;
        let matching = st.jobs.values().rev().filter(|j| filter.matches(j)).cloned();
        Ok(match filter.limit {
            Some(n) => matching.take(n).collect(),
            None => matching.collect(),
        })
    }

    fn get(&self, id: JobId) -> Result<Job> {
        let st = self.lock()?;
        st.jobs
          .get(&id)
          .cloned()
          .ok_or_else(|| JobError::NotFound(format!("trabajo {}", id)))
    }

    fn claim(&self, queue: &str, limit: usize) -> Result<Vec<Job>> {
        let now = Utc::now();
        let mut st = self.lock()?;
        let candidates: Vec<JobId> = st.jobs
                                       .values()
                                       .filter(|j| j.queue == queue && j.state.is_claimable() && j.scheduled_at <= now)
                                       .map(|j| j.id)
                                       .collect();
        let mut claimed = Vec::new();
        for id in candidates {
            if claimed.len() >= limit {
                break;
            }
            let allowed = match st.jobs.get(&id) {
                Some(job) => keys::sequence_allows(job, st.jobs.values()),
                None => false,
            };
            if !allowed {
                continue;
            }
            if let Some(job) = st.jobs.get_mut(&id) {
                job.state = JobState::Running;
                job.attempt += 1;
                job.attempted_at = Some(now);
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    fn fail(&self, id: JobId, error: &str, retry_at: DateTime<Utc>) -> Result<Job> {
        let now = Utc::now();
        let mut st = self.lock()?;
        let job = st.jobs
                    .get_mut(&id)
                    .ok_or_else(|| JobError::NotFound(format!("trabajo {}", id)))?;
        if job.state.is_terminal() {
            return Ok(job.clone());
        }
        job.errors.push(AttemptError { attempt: job.attempt, at: now, error: error.to_string() });
        if job.attempt >= job.max_attempts {
            job.state = JobState::Discarded;
            job.finalized_at = Some(now);
        } else {
            job.state = JobState::Retryable;
            job.scheduled_at = retry_at;
        }
        let updated = job.clone();
        halt_sequence(&mut st, &updated, now);
        Ok(updated)
    }

    fn cancel(&self, id: JobId) -> Result<Job> {
        let now = Utc::now();
        let mut st = self.lock()?;
        let job = st.jobs
                    .get_mut(&id)
                    .ok_or_else(|| JobError::NotFound(format!("trabajo {}", id)))?;
        if job.state.is_terminal() {
            return Ok(job.clone());
        }
        job.state = JobState::Cancelled;
        job.finalized_at = Some(now);
        let updated = job.clone();
        halt_sequence(&mut st, &updated, now);
        Ok(updated)
    }
}
