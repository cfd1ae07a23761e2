//! Persistencia Diesel (SQLite) del almacén de trabajos.
//! Expone el módulo `schema` y reexporta `DieselJobStore`, que implementa
//! `jobs::JobStore`. La implementación está en `job_persistence.rs`.

mod job_persistence;
pub mod schema;

pub use job_persistence::{new_from_env, DieselJobStore, DieselTx, MIGRATIONS};
