// Archivo: history.rs
// Propósito: historial de un paso recurrente y diferencias campo a campo
// entre ejecuciones consecutivas (auditoría). Las diferencias se calculan,
// nunca se guardan.
use crate::args::WorkstationArgs;
use chrono::{DateTime, Utc};
use jobs::{JobId, JobState};
use serde::Serialize;
use std::collections::BTreeMap;

pub const FIELD_MACHINE_TYPE: &str = "machine_type";
pub const FIELD_CONTAINER_IMAGE: &str = "container_image";
pub const FIELD_URL_ALLOW_LIST: &str = "url_allow_list";
pub const FIELD_ONPREM_ALLOW_LIST: &str = "onprem_allow_list";

/// Una ejecución histórica de un paso con sus argumentos decodificados.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord<A> {
    pub job_id: JobId,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub args: A,
}

/// Argumentos que exponen un conjunto fijo de campos comparables.
///
/// Sólo se listan los campos con sentido para auditoría; los valores
/// escalares se devuelven como lista de un elemento.
pub trait Diffable {
    fn diff_fields(&self) -> Vec<(&'static str, Vec<String>)>;
}

impl Diffable for WorkstationArgs {
    fn diff_fields(&self) -> Vec<(&'static str, Vec<String>)> {
        let c = &self.config;
        vec![(FIELD_MACHINE_TYPE, vec![c.machine_type.clone()]),
             (FIELD_CONTAINER_IMAGE, vec![c.container_image.clone()]),
             (FIELD_URL_ALLOW_LIST, c.url_allow_list.clone()),
             (FIELD_ONPREM_ALLOW_LIST, c.onprem_allow_list.clone())]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Campo cambiado → valores añadidos y retirados.
pub type JobDiff = BTreeMap<String, FieldDiff>;

fn missing_from(values: &[String], other: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for v in values {
        if !other.contains(v) && !out.contains(v) {
            out.push(v.clone());
        }
    }
    out
}

/// Diferencia entre dos instantáneas de argumentos. Vacía si no cambió
/// ningún campo comparable.
pub fn diff_args<A: Diffable>(older: &A, newer: &A) -> JobDiff {
    let old_fields: BTreeMap<&str, Vec<String>> = older.diff_fields().into_iter().collect();
    let mut diff = JobDiff::new();
    for (field, new_values) in newer.diff_fields() {
        let old_values = old_fields.get(field).map(Vec::as_slice).unwrap_or(&[]);
        let added = missing_from(&new_values, old_values);
        let removed = missing_from(old_values, &new_values);
        if !added.is_empty() || !removed.is_empty() {
            diff.insert(field.to_string(), FieldDiff { added, removed });
        }
    }
    diff
}

pub fn diff_steps<A: Diffable>(older: &StepRecord<A>, newer: &StepRecord<A>) -> JobDiff {
    diff_args(&older.args, &newer.args)
}

/// Diferencias entre registros consecutivos, ordenados del más antiguo al
/// más reciente. Con menos de dos registros no hay nada que comparar.
pub fn adjacent_diffs<A: Diffable>(records: &[StepRecord<A>]) -> Vec<(JobId, JobId, JobDiff)> {
    if records.len() < 2 {
        return Vec::new();
    }
    records.windows(2)
           .map(|w| (w[0].job_id, w[1].job_id, diff_steps(&w[0], &w[1])))
           .collect()
}

/// Entrada de auditoría de una estación de trabajo.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkstationChange {
    pub older_job_id: JobId,
    pub newer_job_id: JobId,
    pub changed_at: DateTime<Utc>,
    pub diff: JobDiff,
}

/// Cambios efectivos de un historial de estación (más antiguo primero);
/// los reenvíos sin cambios no generan entrada.
pub fn workstation_changes(records: &[StepRecord<WorkstationArgs>]) -> Vec<WorkstationChange> {
    if records.len() < 2 {
        return Vec::new();
    }
    records.windows(2)
           .filter_map(|w| {
               let diff = diff_steps(&w[0], &w[1]);
               if diff.is_empty() {
                   return None;
               }
               Some(WorkstationChange { older_job_id: w[0].job_id,
                                        newer_job_id: w[1].job_id,
                                        changed_at: w[1].created_at,
                                        diff })
           })
           .collect()
}
