//! Crate `workflows` — orquestación de workflows de varios pasos
//!
//! Un workflow se descompone en trabajos durables (uno por paso) que se
//! encolan en un único lote transaccional sobre un `jobs::JobStore`. El
//! estado del workflow no se guarda: se reconstruye a demanda consultando el
//! estado de sus trabajos por la clave de correlación (`subject`).
//!
//! Piezas:
//! - `args`: argumentos tipados de cada paso con su unicidad y secuencia.
//! - `submitter`: traduce una petición en el lote de trabajos.
//! - `workers`: un worker por tipo de paso sobre las capacidades de
//!   `provisioning`.
//! - `status`: estado compuesto por paso.
//! - `history`: diferencias entre ejecuciones de un paso recurrente.
//! - `service`: fachada que reúne todo lo anterior.
//!
//! ```rust
//! use jobs::InMemoryJobStore;
//! use std::sync::Arc;
//! use workflows::{RestrictedDatabaseOpts, WorkflowConfig, WorkflowService};
//!
//! let svc = WorkflowService::new(Arc::new(InMemoryJobStore::new()), WorkflowConfig::default());
//! let handle = svc.submit_restricted_database(&RestrictedDatabaseOpts::for_dataset("ds-1", "proj")).unwrap();
//! assert_eq!(handle.job_ids.len(), 9);
//! let status = svc.restricted_database_status("ds-1").unwrap();
//! assert_eq!(status.overall(), workflows::OverallState::Running);
//! ```

pub mod args;
pub mod config;
pub mod errors;
pub mod history;
pub mod service;
pub mod status;
pub mod submitter;
pub mod workers;
pub mod workflow_type;

pub use config::WorkflowConfig;
pub use errors::{OpContext, WorkflowError, WorkflowResult};
pub use history::{diff_steps, Diffable, FieldDiff, JobDiff, StepRecord, WorkstationChange};
pub use service::WorkflowService;
pub use status::{ConnectivityStatus, OverallState, StepState, StepStatus, WorkflowStatus, WorkflowStatusReader};
pub use submitter::{ConnectivityOpts, RestrictedDatabaseOpts, WorkflowHandle, WorkflowSubmitter, WorkstationOpts};
pub use workers::Capabilities;
pub use workflow_type::WorkflowType;
