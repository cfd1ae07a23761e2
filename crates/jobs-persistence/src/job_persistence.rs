// Archivo: job_persistence.rs
// Propósito: implementación Diesel (SQLite) de `JobStore`/`JobTx`.
//
// Cada escritura corre dentro de `BEGIN IMMEDIATE`, de modo que los escritores
// se serializan en SQLite y la deduplicación por clave única y el reclamo de
// trabajos secuenciados ven un estado consistente. Las reglas de unicidad y
// secuencia vienen de `jobs::keys`, igual que en el almacén en memoria.
use crate::schema::jobs;
use chrono::{DateTime, Utc};
use diesel::connection::{AnsiTransactionManager, SimpleConnection, TransactionManager};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use ::jobs::{keys, AttemptError, CompleteResult, Job, JobError, JobFilter, JobHandle, JobId, JobSpec, JobState, JobStore,
           JobTx, Metadata, Result};
use std::collections::BTreeMap;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

diesel::define_sql_function! {
  fn last_insert_rowid() -> diesel::sql_types::BigInt;
}

diesel::define_sql_function! {
  fn json_extract(doc: diesel::sql_types::Text, path: diesel::sql_types::Text) -> diesel::sql_types::Nullable<diesel::sql_types::Text>;
}

/// Ruta JSON de una clave de metadata, entre comillas para admitir puntos.
fn metadata_path(key: &str) -> String {
  format!("$.\"{}\"", key.replace('"', "\\\""))
}

/// Pragmas aplicados a cada conexión nueva del pool.
#[derive(Debug, Clone, Copy)]
struct SqlitePragmas {
  busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
    conn.batch_execute(&format!("PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;",
                                self.busy_timeout_ms))
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

fn db_err(e: DieselError) -> JobError {
  JobError::Database(format!("db: {}", e))
}

fn to_ts(at: DateTime<Utc>) -> i64 {
  at.timestamp_micros()
}

fn from_ts(ts: i64) -> Result<DateTime<Utc>> {
  DateTime::<Utc>::from_timestamp_micros(ts).ok_or_else(|| JobError::Database(format!("marca de tiempo inválida: {}", ts)))
}

fn state_names(states: &[JobState]) -> Vec<&'static str> {
  states.iter().map(|s| s.as_str()).collect()
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
struct JobRow {
  id: i64,
  kind: String,
  queue: String,
  args: String,
  metadata: String,
  state: String,
  attempt: i32,
  max_attempts: i32,
  errors: String,
  created_at_ts: i64,
  scheduled_at_ts: i64,
  attempted_at_ts: Option<i64>,
  finalized_at_ts: Option<i64>,
  timeout_secs: i64,
  unique_key: Option<String>,
  sequence_key: Option<String>,
  sequence_concurrent: bool,
  sequence_continue_on_discard: bool,
}

impl JobRow {
  fn into_job(self) -> Result<Job> {
    let metadata: Metadata = serde_json::from_str(&self.metadata)?;
    let errors: Vec<AttemptError> = serde_json::from_str(&self.errors)?;
    Ok(Job { id: self.id,
             kind: self.kind,
             queue: self.queue,
             args: serde_json::from_str(&self.args)?,
             metadata,
             state: self.state.parse()?,
             attempt: self.attempt,
             max_attempts: self.max_attempts,
             errors,
             created_at: from_ts(self.created_at_ts)?,
             scheduled_at: from_ts(self.scheduled_at_ts)?,
             attempted_at: self.attempted_at_ts.map(from_ts).transpose()?,
             finalized_at: self.finalized_at_ts.map(from_ts).transpose()?,
             timeout_secs: self.timeout_secs,
             unique_key: self.unique_key,
             sequence_key: self.sequence_key,
             sequence_concurrent: self.sequence_concurrent,
             sequence_continue_on_discard: self.sequence_continue_on_discard })
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = jobs)]
struct NewJobRow {
  kind: String,
  queue: String,
  args: String,
  metadata: String,
  state: String,
  attempt: i32,
  max_attempts: i32,
  errors: String,
  created_at_ts: i64,
  scheduled_at_ts: i64,
  timeout_secs: i64,
  unique_key: Option<String>,
  sequence_key: Option<String>,
  sequence_concurrent: bool,
  sequence_continue_on_discard: bool,
}

impl NewJobRow {
  fn from_spec(spec: JobSpec,
               unique_key: Option<String>,
               sequence_key: Option<String>,
               now: DateTime<Utc>)
               -> Result<Self> {
    let (state, scheduled_at) = match spec.scheduled_at {
      Some(at) if at > now => (JobState::Scheduled, at),
      _ => (JobState::Available, now),
    };
    let (concurrent, continue_on_discard) =
      spec.sequence.as_ref().map(|s| (s.concurrent_same_kind, s.continue_on_discard)).unwrap_or((false, false));
    Ok(NewJobRow { kind: spec.kind,
                   queue: spec.queue,
                   args: serde_json::to_string(&spec.args)?,
                   metadata: serde_json::to_string(&spec.metadata)?,
                   state: state.as_str().to_string(),
                   attempt: 0,
                   max_attempts: spec.max_attempts,
                   errors: "[]".to_string(),
                   created_at_ts: to_ts(now),
                   scheduled_at_ts: to_ts(scheduled_at),
                   timeout_secs: spec.timeout_secs,
                   unique_key,
                   sequence_key,
                   sequence_concurrent: concurrent,
                   sequence_continue_on_discard: continue_on_discard })
  }
}

fn load_job(conn: &mut SqliteConnection, id: JobId) -> Result<Job> {
  let row = jobs::table.find(id)
                       .select(JobRow::as_select())
                       .first::<JobRow>(conn)
                       .optional()
                       .map_err(db_err)?
                       .ok_or_else(|| JobError::NotFound(format!("trabajo {}", id)))?;
  row.into_job()
}

fn rows_into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
  rows.into_iter().map(JobRow::into_job).collect()
}

fn insert_specs(conn: &mut SqliteConnection, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
  let now = Utc::now();
  let mut out = Vec::with_capacity(specs.len());
  for spec in specs {
    spec.validate()?;
    let sequence_key = keys::sequence_key(&spec)?;
    let unique_key = keys::unique_key(&spec);
    if let (Some(key), Some(opts)) = (unique_key.as_deref(), spec.unique.as_ref()) {
      let mut query = jobs::table.select(JobRow::as_select())
                                 .filter(jobs::unique_key.eq(key.to_string()))
                                 .filter(jobs::state.eq_any(state_names(&opts.by_state)))
                                 .order(jobs::id.desc())
                                 .into_boxed();
      if let Some(period) = opts.by_period {
        query = query.filter(jobs::created_at_ts.ge(to_ts(now - period)));
      }
      if let Some(row) = query.first::<JobRow>(conn).optional().map_err(db_err)? {
        let existing = row.into_job()?;
        log::debug!("inserción de {} colisiona con el trabajo {} en estado {}",
                    spec.kind, existing.id, existing.state);
        out.push(JobHandle { job: existing, duplicate: true });
        continue;
      }
    }
    let row = NewJobRow::from_spec(spec, unique_key, sequence_key, now)?;
    diesel::insert_into(jobs::table).values(&row).execute(conn).map_err(db_err)?;
    let id = diesel::select(last_insert_rowid()).get_result::<i64>(conn).map_err(db_err)?;
    out.push(JobHandle { job: load_job(conn, id)?, duplicate: false });
  }
  Ok(out)
}

fn complete_in(conn: &mut SqliteConnection, id: JobId, now: DateTime<Utc>) -> Result<CompleteResult> {
  let mut job = load_job(conn, id)?;
  match job.state {
    JobState::Completed => Ok(CompleteResult { job, changed: false }),
    JobState::Discarded | JobState::Cancelled => {
      Err(JobError::Internal(format!("no se puede completar el trabajo {} en estado {}", id, job.state)))
    }
    _ => {
      diesel::update(jobs::table.find(id)).set((jobs::state.eq(JobState::Completed.as_str()),
                                                jobs::finalized_at_ts.eq(Some(to_ts(now)))))
                                          .execute(conn)
                                          .map_err(db_err)?;
      job.state = JobState::Completed;
      job.finalized_at = Some(now);
      Ok(CompleteResult { job, changed: true })
    }
  }
}

/// Cancela los pendientes posteriores de la secuencia de `failed`.
fn halt_sequence(conn: &mut SqliteConnection, failed: &Job, now: DateTime<Utc>) -> Result<()> {
  let Some(key) = failed.sequence_key.as_deref() else {
    return Ok(());
  };
  let peers = rows_into_jobs(jobs::table.select(JobRow::as_select())
                                        .filter(jobs::sequence_key.eq(key.to_string()))
                                        .filter(jobs::id.gt(failed.id))
                                        .load::<JobRow>(conn)
                                        .map_err(db_err)?)?;
  let halted = keys::halted_by(failed, &peers);
  if halted.is_empty() {
    return Ok(());
  }
  log::warn!("cancelando trabajos {:?}: la secuencia se detuvo tras el trabajo {} ({})",
             halted, failed.id, failed.kind);
  diesel::update(jobs::table.filter(jobs::id.eq_any(halted))).set((jobs::state.eq(JobState::Cancelled.as_str()),
                                                                   jobs::finalized_at_ts.eq(Some(to_ts(now)))))
                                                             .execute(conn)
                                                             .map_err(db_err)?;
  Ok(())
}

fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
  AnsiTransactionManager::begin_transaction_sql(conn, "BEGIN IMMEDIATE").map_err(db_err)
}

/// Repo Diesel que implementa `JobStore` sobre SQLite.
#[derive(Clone)]
pub struct DieselJobStore {
  pool: DbPool,
}

impl DieselJobStore {
  /// Abre (o crea) la base SQLite en `database_url` y aplica las migraciones
  /// pendientes.
  pub fn new_sqlite(database_url: &str) -> Result<Self> {
    Self::new_sqlite_with(database_url, 4, 5_000)
  }

  pub fn new_sqlite_with(database_url: &str, max_connections: u32, busy_timeout_ms: u32) -> Result<Self> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder().max_size(max_connections.max(1))
                              .connection_customizer(Box::new(SqlitePragmas { busy_timeout_ms }))
                              .build(manager)
                              .map_err(|e| JobError::Database(format!("pool: {}", e)))?;
    let store = DieselJobStore { pool };
    let mut conn = store.conn()?;
    let applied = conn.run_pending_migrations(MIGRATIONS)
                      .map_err(|e| JobError::Database(format!("migraciones: {}", e)))?;
    if !applied.is_empty() {
      log::info!("aplicadas {} migraciones en {}", applied.len(), database_url);
    }
    Ok(store)
  }

  fn conn_raw(&self) -> std::result::Result<DbConn, r2d2::Error> {
    self.pool.get()
  }

  fn conn(&self) -> Result<DbConn> {
    self.conn_raw().map_err(|e| JobError::Database(format!("pool: {}", e)))
  }

  /// Ejecuta `f` dentro de una transacción de escritura.
  fn write<T>(&self, f: impl FnOnce(&mut SqliteConnection) -> Result<T>) -> Result<T> {
    let mut tx = DieselTx::open(self.conn()?)?;
    let out = f(&mut *tx.conn)?;
    tx.finish(true)?;
    Ok(out)
  }
}

/// Transacción Diesel: conexión del pool con un `BEGIN IMMEDIATE` abierto.
/// Si se suelta sin `commit` se deshace.
pub struct DieselTx {
  conn: DbConn,
  open: bool,
}

impl DieselTx {
  fn open(mut conn: DbConn) -> Result<Self> {
    begin_immediate(&mut *conn)?;
    Ok(DieselTx { conn, open: true })
  }

  fn finish(&mut self, commit: bool) -> Result<()> {
    if !self.open {
      return Ok(());
    }
    self.open = false;
    let res = if commit {
      AnsiTransactionManager::commit_transaction(&mut *self.conn)
    } else {
      AnsiTransactionManager::rollback_transaction(&mut *self.conn)
    };
    res.map_err(db_err)
  }
}

impl JobTx for DieselTx {
  fn insert_many(&mut self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
    insert_specs(&mut *self.conn, specs)
  }

  fn complete(&mut self, id: JobId) -> Result<CompleteResult> {
    complete_in(&mut *self.conn, id, Utc::now())
  }

  fn commit(mut self: Box<Self>) -> Result<()> {
    self.finish(true)
  }

  fn rollback(mut self: Box<Self>) -> Result<()> {
    self.finish(false)
  }
}

impl Drop for DieselTx {
  fn drop(&mut self) {
    if let Err(e) = self.finish(false) {
      log::error!("rollback de transacción fallido: {}", e);
    }
  }
}

impl JobStore for DieselJobStore {
  fn begin(&self) -> Result<Box<dyn JobTx + '_>> {
    Ok(Box::new(DieselTx::open(self.conn()?)?))
  }

  fn list(&self, filter: &JobFilter) -> Result<Vec<Job>> {
    let mut conn = self.conn()?;
    let mut query = jobs::table.select(JobRow::as_select()).order(jobs::id.desc()).into_boxed();
    if let Some(queue) = &filter.queue {
      query = query.filter(jobs::queue.eq(queue.clone()));
    }
    if !filter.kinds.is_empty() {
      query = query.filter(jobs::kind.eq_any(filter.kinds.clone()));
    }
    if !filter.states.is_empty() {
      query = query.filter(jobs::state.eq_any(state_names(&filter.states)));
    }
    for (key, value) in &filter.metadata {
      query = query.filter(json_extract(jobs::metadata, metadata_path(key)).eq(value.clone()));
    }
    if let Some(n) = filter.limit {
      query = query.limit(n as i64);
    }
    rows_into_jobs(query.load::<JobRow>(&mut conn).map_err(db_err)?)
  }

  fn get(&self, id: JobId) -> Result<Job> {
    let mut conn = self.conn()?;
    load_job(&mut *conn, id)
  }

  fn claim(&self, queue: &str, limit: usize) -> Result<Vec<Job>> {
    if limit == 0 {
      return Ok(Vec::new());
    }
    self.write(|conn| {
          let now = Utc::now();
          let claimable = [JobState::Available, JobState::Scheduled, JobState::Retryable];
          let candidates = rows_into_jobs(jobs::table.select(JobRow::as_select())
                                                     .filter(jobs::queue.eq(queue.to_string()))
                                                     .filter(jobs::state.eq_any(state_names(&claimable)))
                                                     .filter(jobs::scheduled_at_ts.le(to_ts(now)))
                                                     .order(jobs::id.asc())
                                                     .load::<JobRow>(conn)
                                                     .map_err(db_err)?)?;
          let mut seq_keys: Vec<String> = candidates.iter().filter_map(|j| j.sequence_key.clone()).collect();
          seq_keys.sort();
          seq_keys.dedup();
          let mut peers: BTreeMap<JobId, Job> = BTreeMap::new();
          if !seq_keys.is_empty() {
            let rows = jobs::table.select(JobRow::as_select())
                                  .filter(jobs::sequence_key.eq_any(seq_keys))
                                  .filter(jobs::state.eq_any(state_names(&JobState::IN_FLIGHT)))
                                  .load::<JobRow>(conn)
                                  .map_err(db_err)?;
            for job in rows_into_jobs(rows)? {
              peers.insert(job.id, job);
            }
          }
          let mut claimed = Vec::new();
          for mut job in candidates {
            if claimed.len() >= limit {
              break;
            }
            if !keys::sequence_allows(&job, peers.values()) {
              continue;
            }
            job.state = JobState::Running;
            job.attempt += 1;
            job.attempted_at = Some(now);
            diesel::update(jobs::table.find(job.id)).set((jobs::state.eq(JobState::Running.as_str()),
                                                          jobs::attempt.eq(job.attempt),
                                                          jobs::attempted_at_ts.eq(Some(to_ts(now)))))
                                                    .execute(conn)
                                                    .map_err(db_err)?;
            if job.sequence_key.is_some() {
              peers.insert(job.id, job.clone());
            }
            claimed.push(job);
          }
          Ok(claimed)
        })
  }

  fn fail(&self, id: JobId, error: &str, retry_at: DateTime<Utc>) -> Result<Job> {
    self.write(|conn| {
          let now = Utc::now();
          let mut job = load_job(conn, id)?;
          if job.state.is_terminal() {
            return Ok(job);
          }
          job.errors.push(AttemptError { attempt: job.attempt, at: now, error: error.to_string() });
          if job.attempt >= job.max_attempts {
            job.state = JobState::Discarded;
            job.finalized_at = Some(now);
          } else {
            job.state = JobState::Retryable;
            job.scheduled_at = retry_at;
          }
          diesel::update(jobs::table.find(id)).set((jobs::state.eq(job.state.as_str()),
                                                    jobs::errors.eq(serde_json::to_string(&job.errors)?),
                                                    jobs::scheduled_at_ts.eq(to_ts(job.scheduled_at)),
                                                    jobs::finalized_at_ts.eq(job.finalized_at.map(to_ts))))
                                              .execute(conn)
                                              .map_err(db_err)?;
          halt_sequence(conn, &job, now)?;
          Ok(job)
        })
  }

  fn cancel(&self, id: JobId) -> Result<Job> {
    self.write(|conn| {
          let now = Utc::now();
          let mut job = load_job(conn, id)?;
          if job.state.is_terminal() {
            return Ok(job);
          }
          job.state = JobState::Cancelled;
          job.finalized_at = Some(now);
          diesel::update(jobs::table.find(id)).set((jobs::state.eq(JobState::Cancelled.as_str()),
                                                    jobs::finalized_at_ts.eq(Some(to_ts(now)))))
                                              .execute(conn)
                                              .map_err(db_err)?;
          halt_sequence(conn, &job, now)?;
          Ok(job)
        })
  }
}

/// Crear el repo desde las variables de entorno (`JOBS_DB_URL` o
/// `DATABASE_URL`). Carga `.env` si existe.
pub fn new_from_env() -> Result<DieselJobStore> {
  dotenvy::dotenv().ok();
  let url = std::env::var("JOBS_DB_URL").or_else(|_| std::env::var("DATABASE_URL"))
                                        .map_err(|_| JobError::Database("JOBS_DB_URL / DATABASE_URL no definido".into()))?;
  let lower = url.to_lowercase();
  if lower.starts_with("postgres") || lower.starts_with("mysql") {
    return Err(JobError::Database(format!("jobs-persistence sólo soporta SQLite; URL no soportada: {}", url)));
  }
  let path = url.strip_prefix("sqlite://").unwrap_or(&url);
  DieselJobStore::new_sqlite(path)
}
