// Archivo: args.rs
// Propósito: contrato de los argumentos tipados de cada tipo de trabajo. Cada
// tipo declara su `KIND` (etiqueta usada para despachar y filtrar) y sus
// opciones de inserción (cola, reintentos, unicidad, secuencia).
use crate::domain::{Job, JobSpec, Metadata, SequenceOpts, UniqueOpts, DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE,
                    DEFAULT_TIMEOUT_SECS};
use crate::errors::{JobError, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Opciones de inserción asociadas a un tipo de argumentos.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOpts {
    pub queue: String,
    pub max_attempts: i32,
    pub timeout_secs: i64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub unique: Option<UniqueOpts>,
    pub sequence: Option<SequenceOpts>,
    pub metadata: Metadata,
}

impl Default for InsertOpts {
    fn default() -> Self {
        Self { queue: DEFAULT_QUEUE.to_string(),
               max_attempts: DEFAULT_MAX_ATTEMPTS,
               timeout_secs: DEFAULT_TIMEOUT_SECS,
               scheduled_at: None,
               unique: None,
               sequence: None,
               metadata: Metadata::new() }
    }
}

/// Argumentos serializables de un tipo de trabajo.
pub trait JobArgs: Serialize + DeserializeOwned + Send + Sync {
    /// Etiqueta única del tipo de trabajo.
    const KIND: &'static str;

    fn insert_opts(&self) -> InsertOpts {
        InsertOpts::default()
    }
}

impl JobSpec {
    /// Construye un spec a partir de argumentos tipados y sus opciones por
    /// defecto.
    pub fn from_args<A: JobArgs>(args: &A) -> Result<Self> {
        Self::from_args_with(args, args.insert_opts())
    }

    /// Igual que `from_args` pero con opciones explícitas.
    pub fn from_args_with<A: JobArgs>(args: &A, opts: InsertOpts) -> Result<Self> {
        let value = serde_json::to_value(args)?;
        Ok(JobSpec { kind: A::KIND.to_string(),
                     queue: opts.queue,
                     args: value,
                     metadata: opts.metadata,
                     max_attempts: opts.max_attempts,
                     timeout_secs: opts.timeout_secs,
                     scheduled_at: opts.scheduled_at,
                     unique: opts.unique,
                     sequence: opts.sequence })
    }
}

impl Job {
    /// Decodifica `args` en el tipo indicado. Un `kind` distinto o un payload
    /// que no deserializa es una violación de invariante (`Internal`).
    pub fn decode_args<A: JobArgs>(&self) -> Result<A> {
        if self.kind != A::KIND {
            return Err(JobError::Internal(format!("trabajo {} es de tipo {}, se esperaba {}",
                                                  self.id,
                                                  self.kind,
                                                  A::KIND)));
        }
        serde_json::from_value(self.args.clone()).map_err(|e| {
                                                     JobError::Internal(format!("args inválidos en trabajo {} ({}): {}",
                                                                                self.id, self.kind, e))
                                                 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobState, Metadata};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct PingArgs {
        subject: String,
    }

    impl JobArgs for PingArgs {
        const KIND: &'static str = "ping";

        fn insert_opts(&self) -> InsertOpts {
            InsertOpts { queue: "pings".into(),
                         max_attempts: 3,
                         ..InsertOpts::default() }
        }
    }

    fn as_job(spec: &JobSpec) -> Job {
        let now = Utc::now();
        Job { id: 7,
              kind: spec.kind.clone(),
              queue: spec.queue.clone(),
              args: spec.args.clone(),
              metadata: Metadata::new(),
              state: JobState::Available,
              attempt: 0,
              max_attempts: spec.max_attempts,
              errors: vec![],
              created_at: now,
              scheduled_at: now,
              attempted_at: None,
              finalized_at: None,
              timeout_secs: spec.timeout_secs,
              unique_key: None,
              sequence_key: None,
              sequence_concurrent: false,
              sequence_continue_on_discard: false }
    }

    #[test]
    fn spec_carries_kind_and_opts() {
        let spec = JobSpec::from_args(&PingArgs { subject: "u1".into() }).unwrap();
        assert_eq!(spec.kind, "ping");
        assert_eq!(spec.queue, "pings");
        assert_eq!(spec.max_attempts, 3);
        assert_eq!(spec.args, json!({"subject": "u1"}));
    }

    #[test]
    fn decode_rejects_other_kind_and_bad_payload() {
        let spec = JobSpec::from_args(&PingArgs { subject: "u1".into() }).unwrap();
        let mut job = as_job(&spec);
        assert_eq!(job.decode_args::<PingArgs>().unwrap().subject, "u1");

        job.args = json!({"nope": true});
        assert!(matches!(job.decode_args::<PingArgs>(), Err(JobError::Internal(_))));

        job.kind = "pong".into();
        assert!(matches!(job.decode_args::<PingArgs>(), Err(JobError::Internal(_))));
    }
}
