// Archivo: domain.rs
// Propósito: tipos del dominio de trabajos durables: `Job`, su ciclo de vida
// (`JobState`), la especificación de inserción (`JobSpec`) y el filtro de
// listado (`JobFilter`).
use crate::errors::{JobError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Identificador asignado por el almacén al insertar. Crece de forma
/// monótona.
pub type JobId = i64;

/// Mapa plano clave/valor adjunto a cada trabajo. Sólo se usa para filtrar
/// listados; la ejecución nunca lo lee.
pub type Metadata = BTreeMap<String, String>;

/// Cola por defecto.
pub const DEFAULT_QUEUE: &str = "default";
/// Número máximo de intentos por defecto.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
/// Tiempo máximo de ejecución por defecto (5 minutos).
pub const DEFAULT_TIMEOUT_SECS: i64 = 300;

/// Estado del ciclo de vida de un trabajo.
///
/// `available`/`scheduled` → `running` → `completed`; ante un fallo
/// `retryable` hasta agotar intentos y luego `discarded`. `cancelled` es
/// terminal y puede alcanzarse desde cualquier estado no terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Available,
    Scheduled,
    Running,
    Retryable,
    Completed,
    Discarded,
    Cancelled,
}

impl JobState {
    /// Todos los estados, útil para consultas de historial.
    pub const ALL: [JobState; 7] = [JobState::Available,
                                     JobState::Scheduled,
                                     JobState::Running,
                                     JobState::Retryable,
                                     JobState::Completed,
                                     JobState::Discarded,
                                     JobState::Cancelled];

    /// Estados "en vuelo": el trabajo todavía puede ejecutarse.
    pub const IN_FLIGHT: [JobState; 4] = [JobState::Available,
                                          JobState::Scheduled,
                                          JobState::Running,
                                          JobState::Retryable];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Discarded | JobState::Cancelled)
    }

    /// Estados que el dispatcher puede reclamar cuando `scheduled_at` ya pasó.
    pub fn is_claimable(self) -> bool {
        matches!(self, JobState::Available | JobState::Scheduled | JobState::Retryable)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Available => "available",
            JobState::Scheduled => "scheduled",
            JobState::Running => "running",
            JobState::Retryable => "retryable",
            JobState::Completed => "completed",
            JobState::Discarded => "discarded",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self> {
        JobState::ALL.iter()
                     .copied()
                     .find(|st| st.as_str() == s)
                     .ok_or_else(|| JobError::Internal(format!("estado de trabajo desconocido: {}", s)))
    }
}

/// Error registrado en un intento fallido.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptError {
    pub attempt: i32,
    pub at: DateTime<Utc>,
    pub error: String,
}

/// Unidad de trabajo durable tal como la guarda el almacén.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: String,
    pub queue: String,
    /// Argumentos serializados; contienen la clave de correlación.
    pub args: JsonValue,
    pub metadata: Metadata,
    pub state: JobState,
    pub attempt: i32,
    pub max_attempts: i32,
    pub errors: Vec<AttemptError>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub attempted_at: Option<DateTime<Utc>>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub timeout_secs: i64,
    pub unique_key: Option<String>,
    pub sequence_key: Option<String>,
    /// Trabajos consecutivos del mismo `kind` en la secuencia pueden correr a
    /// la vez.
    pub sequence_concurrent: bool,
    /// Si es `false`, un descarte cancela el resto pendiente de la secuencia.
    pub sequence_continue_on_discard: bool,
}

impl Job {
    /// Mensajes de error de todos los intentos, sin duplicados y en orden de
    /// aparición.
    pub fn distinct_errors(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for e in &self.errors {
            if !out.contains(&e.error) {
                out.push(e.error.clone());
            }
        }
        out
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(|s| s.as_str())
    }
}

/// Unicidad por argumentos dentro de una ventana temporal.
///
/// Una inserción que colisiona con un trabajo existente (misma clave, estado
/// en `by_state` y creado dentro de `by_period`) devuelve el trabajo
/// existente marcado como duplicado en vez de insertar.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueOpts {
    pub by_args: bool,
    /// Campos de `args` que forman la clave. Vacío usa los argumentos
    /// completos.
    pub args_fields: Vec<String>,
    pub by_queue: bool,
    pub by_period: Option<Duration>,
    pub by_state: Vec<JobState>,
}

impl Default for UniqueOpts {
    fn default() -> Self {
        Self { by_args: true,
               args_fields: Vec::new(),
               by_queue: false,
               by_period: None,
               by_state: JobState::IN_FLIGHT.to_vec() }
    }
}

impl UniqueOpts {
    /// Unicidad por argumentos durante `period` sobre los estados en vuelo.
    pub fn by_args_within(period: Duration) -> Self {
        Self { by_period: Some(period), ..Self::default() }
    }

    /// Como `by_args_within`, pero la clave sólo mira `fields`: argumentos de
    /// correlación que no identifican la petición quedan fuera.
    pub fn by_fields_within(fields: &[&str], period: Duration) -> Self {
        Self { args_fields: fields.iter().map(|f| f.to_string()).collect(),
               ..Self::by_args_within(period) }
    }
}

/// Ordenación de trabajos por una clave construida desde campos de `args`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SequenceOpts {
    /// Campos de `args` que forman la clave.
    pub by: Vec<String>,
    /// Excluye el `kind` de la clave: distintos tipos sobre el mismo sujeto
    /// comparten secuencia.
    pub exclude_kind: bool,
    pub concurrent_same_kind: bool,
    pub continue_on_discard: bool,
}

impl SequenceOpts {
    pub fn by_fields(fields: &[&str]) -> Self {
        Self { by: fields.iter().map(|f| f.to_string()).collect(),
               ..Self::default() }
    }

    pub fn exclude_kind(mut self) -> Self {
        self.exclude_kind = true;
        self
    }

    pub fn concurrent_same_kind(mut self) -> Self {
        self.concurrent_same_kind = true;
        self
    }

    pub fn continue_on_discard(mut self) -> Self {
        self.continue_on_discard = true;
        self
    }
}

/// Especificación de un trabajo a insertar.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    pub kind: String,
    pub queue: String,
    pub args: JsonValue,
    pub metadata: Metadata,
    pub max_attempts: i32,
    pub timeout_secs: i64,
    /// `None` inserta en `available`; una fecha futura inserta en
    /// `scheduled`.
    pub scheduled_at: Option<DateTime<Utc>>,
    pub unique: Option<UniqueOpts>,
    pub sequence: Option<SequenceOpts>,
}

impl JobSpec {
    /// Especificación mínima con los valores por defecto de cola, intentos y
    /// timeout.
    pub fn new(kind: impl Into<String>, args: JsonValue) -> Self {
        Self { kind: kind.into(),
               queue: DEFAULT_QUEUE.to_string(),
               args,
               metadata: Metadata::new(),
               max_attempts: DEFAULT_MAX_ATTEMPTS,
               timeout_secs: DEFAULT_TIMEOUT_SECS,
               scheduled_at: None,
               unique: None,
               sequence: None }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Validación previa a la inserción. Un spec inválido hace fallar el lote
    /// completo.
    pub fn validate(&self) -> Result<()> {
        if self.kind.trim().is_empty() {
            return Err(JobError::Database("kind vacío".into()));
        }
        if self.queue.trim().is_empty() {
            return Err(JobError::Database(format!("cola vacía para {}", self.kind)));
        }
        if self.max_attempts < 1 {
            return Err(JobError::Database(format!("max_attempts inválido para {}: {}", self.kind, self.max_attempts)));
        }
        if !self.args.is_object() {
            return Err(JobError::Database(format!("args de {} no es un objeto JSON", self.kind)));
        }
        Ok(())
    }
}

/// Resultado de insertar un spec: el trabajo y si fue un duplicado.
#[derive(Debug, Clone, PartialEq)]
pub struct JobHandle {
    pub job: Job,
    /// `true` cuando la inserción colisionó con un trabajo en vuelo y se
    /// devolvió el existente.
    pub duplicate: bool,
}

/// Resultado de marcar un trabajo como completado.
#[derive(Debug, Clone, PartialEq)]
pub struct CompleteResult {
    pub job: Job,
    /// `false` si el trabajo ya estaba completado.
    pub changed: bool,
}

/// Filtro de listado. Resultados ordenados por id descendente.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
    pub queue: Option<String>,
    pub kinds: Vec<String>,
    pub states: Vec<JobState>,
    pub metadata: Metadata,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.kinds.push(kind.into());
        self
    }

    pub fn states(mut self, states: &[JobState]) -> Self {
        self.states = states.to_vec();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Limita a los primeros `n` resultados (los más recientes).
    pub fn first(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Evalúa el filtro (excepto el límite) sobre un trabajo.
    pub fn matches(&self, job: &Job) -> bool {
        if let Some(q) = &self.queue {
            if &job.queue != q {
                return false;
            }
        }
        if !self.kinds.is_empty() && !self.kinds.iter().any(|k| k == &job.kind) {
            return false;
        }
        if !self.states.is_empty() && !self.states.contains(&job.state) {
            return false;
        }
        self.metadata
            .iter()
            .all(|(k, v)| job.metadata.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(kind: &str, state: JobState) -> Job {
        let now = Utc::now();
        Job { id: 1,
              kind: kind.into(),
              queue: DEFAULT_QUEUE.into(),
              args: json!({}),
              metadata: Metadata::from([("subject".to_string(), "ds-1".to_string())]),
              state,
              attempt: 0,
              max_attempts: DEFAULT_MAX_ATTEMPTS,
              errors: vec![],
              created_at: now,
              scheduled_at: now,
              attempted_at: None,
              finalized_at: None,
              timeout_secs: DEFAULT_TIMEOUT_SECS,
              unique_key: None,
              sequence_key: None,
              sequence_concurrent: false,
              sequence_continue_on_discard: false }
    }

    #[test]
    fn state_roundtrips_through_str() {
        for st in JobState::ALL {
            assert_eq!(st.as_str().parse::<JobState>().unwrap(), st);
        }
        assert!(matches!("paused".parse::<JobState>(), Err(JobError::Internal(_))));
    }

    #[test]
    fn filter_checks_kind_state_and_metadata() {
        let j = job("permission_group", JobState::Running);
        assert!(JobFilter::new().kind("permission_group").metadata("subject", "ds-1").matches(&j));
        assert!(!JobFilter::new().kind("collection").matches(&j));
        assert!(!JobFilter::new().states(&[JobState::Completed]).matches(&j));
        assert!(!JobFilter::new().metadata("subject", "ds-2").matches(&j));
        assert!(!JobFilter::new().queue("resync").matches(&j));
    }

    #[test]
    fn distinct_errors_keeps_first_occurrence_order() {
        let mut j = job("k", JobState::Retryable);
        let now = Utc::now();
        for (i, msg) in ["boom", "timeout", "boom"].iter().enumerate() {
            j.errors.push(AttemptError { attempt: i as i32 + 1, at: now, error: msg.to_string() });
        }
        assert_eq!(j.distinct_errors(), vec!["boom".to_string(), "timeout".to_string()]);
    }

    #[test]
    fn invalid_spec_is_rejected() {
        let mut spec = JobSpec::new("k", json!({"a": 1}));
        assert!(spec.validate().is_ok());
        spec.max_attempts = 0;
        assert!(matches!(spec.validate(), Err(JobError::Database(_))));
        assert!(JobSpec::new("k", json!([1])).validate().is_err());
    }
}
