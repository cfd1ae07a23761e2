//! Crate `jobs` — tipos y traits del almacén de trabajos durables
//!
//! Este crate define los tipos de dominio (`Job`, `JobState`, `JobSpec`), el
//! contrato de persistencia `JobStore`/`JobTx`, una implementación en memoria
//! útil para pruebas (`InMemoryJobStore`) y el motor `JobRunner` que despacha
//! trabajos a los workers registrados.
//!
//! Diseño resumido:
//! - Inserción transaccional: un lote de trabajos se inserta entero o no se
//!   inserta (`JobTx::insert_many` + `commit`).
//! - Unicidad: un trabajo con `UniqueOpts` que colisiona con otro en vuelo
//!   devuelve el existente marcado como duplicado.
//! - Secuencias: trabajos con la misma clave de secuencia se ejecutan en orden
//!   de inserción (`SequenceOpts`).
//! - Reintentos: el runner registra cada fallo y reprograma con backoff hasta
//!   agotar `max_attempts`; después el trabajo queda descartado.
//!
//! Ejemplo rápido:
//! ```rust
//! use jobs::stubs::InMemoryJobStore;
//! use jobs::{JobSpec, JobStore};
//! use serde_json::json;
//! let store = InMemoryJobStore::new();
//! let handles = store.insert_many(vec![JobSpec::new("ping", json!({"subject": "u1"}))]).unwrap();
//! assert!(!handles[0].duplicate);
//! ```
pub mod args;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod keys;
pub mod repository;
pub mod stubs;
pub mod worker;

pub use args::*;
pub use domain::*;
pub use engine::*;
pub use errors::*;
pub use repository::*;
pub use stubs::*;
pub use worker::*;
