// Archivo: keys.rs
// Propósito: reglas compartidas por todas las implementaciones del almacén:
// cálculo de la clave de unicidad, de la clave de secuencia y elegibilidad de
// un trabajo secuenciado. Las funciones son puras para que el almacén en
// memoria y el de Diesel se comporten igual.
use crate::domain::{Job, JobSpec, JobState, UniqueOpts};
use crate::errors::{JobError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

/// Clave de unicidad del spec (hash blake3 en hex) o `None` si el spec no
/// pide unicidad.
///
/// `args` se serializa con `serde_json`, cuyos mapas están ordenados por
/// clave, así que dos argumentos iguales producen la misma clave sin importar
/// el orden en que se construyeron.
pub fn unique_key(spec: &JobSpec) -> Option<String> {
    let opts = spec.unique.as_ref()?;
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"kind=");
    hasher.update(spec.kind.as_bytes());
    if opts.by_queue {
        hasher.update(b"|queue=");
        hasher.update(spec.queue.as_bytes());
    }
    if opts.by_args && opts.args_fields.is_empty() {
        hasher.update(b"|args=");
        hasher.update(spec.args.to_string().as_bytes());
    } else if opts.by_args {
        for field in &opts.args_fields {
            let value = spec.args.get(field).unwrap_or(&JsonValue::Null);
            hasher.update(b"|");
            hasher.update(field.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
        }
    }
    Some(hasher.finalize().to_hex().to_string())
}

/// `true` si `existing` bloquea la inserción de un spec con clave `key`.
pub fn collides(existing: &Job, key: &str, opts: &UniqueOpts, now: DateTime<Utc>) -> bool {
    if existing.unique_key.as_deref() != Some(key) {
        return false;
    }
    if !opts.by_state.contains(&existing.state) {
        return false;
    }
    match opts.by_period {
        Some(period) => existing.created_at >= now - period,
        None => true,
    }
}

fn field_as_key_part(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Clave de secuencia del spec. Un campo ausente en `args` es un error de
/// programación del tipo de trabajo.
pub fn sequence_key(spec: &JobSpec) -> Result<Option<String>> {
    let Some(opts) = spec.sequence.as_ref() else {
        return Ok(None);
    };
    let mut parts: Vec<String> = Vec::with_capacity(opts.by.len() + 1);
    if !opts.exclude_kind {
        parts.push(format!("kind={}", spec.kind));
    }
    for field in &opts.by {
        let value = spec.args
                        .get(field)
                        .ok_or_else(|| JobError::Internal(format!("campo de secuencia '{}' ausente en args de {}",
                                                                  field, spec.kind)))?;
        parts.push(format!("{}={}", field, field_as_key_part(value)));
    }
    Ok(Some(parts.join("|")))
}

/// Decide si `candidate` puede empezar dado el resto de trabajos del almacén.
///
/// Un trabajo secuenciado sólo corre cuando todos los trabajos anteriores
/// (id menor) de su secuencia que siguen en vuelo son del mismo tipo y el
/// tipo admite ejecución concurrente dentro de la secuencia.
pub fn sequence_allows<'a, I>(candidate: &Job, others: I) -> bool
    where I: IntoIterator<Item = &'a Job>
{
    let Some(key) = candidate.sequence_key.as_deref() else {
        return true;
    };
    others.into_iter()
          .filter(|j| j.id < candidate.id)
          .filter(|j| j.sequence_key.as_deref() == Some(key))
          .filter(|j| !j.state.is_terminal())
          .all(|j| candidate.sequence_concurrent && j.kind == candidate.kind)
}

/// Trabajos que deben cancelarse cuando `failed` termina descartado o
/// cancelado dentro de una secuencia que no continúa tras un descarte: los
/// posteriores de la misma secuencia que todavía no empezaron.
pub fn halted_by<'a, I>(failed: &Job, others: I) -> Vec<i64>
    where I: IntoIterator<Item = &'a Job>
{
    let Some(key) = failed.sequence_key.as_deref() else {
        return Vec::new();
    };
    if failed.sequence_continue_on_discard
       || !matches!(failed.state, JobState::Discarded | JobState::Cancelled)
    {
        return Vec::new();
    }
    others.into_iter()
          .filter(|j| j.id > failed.id)
          .filter(|j| j.sequence_key.as_deref() == Some(key))
          .filter(|j| j.state.is_claimable())
          .map(|j| j.id)
          .collect()
}
