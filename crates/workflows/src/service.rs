// Archivo: service.rs
// Propósito: fachada de la capa de workflows. Reúne envío, estado,
// historial y la construcción del runner sobre un mismo almacén.
use crate::args::{WorkstationArgs, SUBJECT_KEY};
use crate::config::WorkflowConfig;
use crate::errors::{OpContext, WorkflowError, WorkflowResult};
use crate::history::{self, Diffable, JobDiff, StepRecord, WorkstationChange};
use crate::status::{ConnectivityStatus, StepStatus, WorkflowStatus, WorkflowStatusReader};
use crate::submitter::{ConnectivityOpts, RestrictedDatabaseOpts, WorkflowHandle, WorkflowSubmitter, WorkstationOpts};
use crate::workers::{build_workers, Capabilities};
use jobs::{JobArgs, JobFilter, JobRunner, JobStore};
use std::sync::Arc;

pub struct WorkflowService {
    store: Arc<dyn JobStore>,
    config: WorkflowConfig,
    submitter: WorkflowSubmitter,
    reader: WorkflowStatusReader,
}

impl WorkflowService {
    pub fn new(store: Arc<dyn JobStore>, config: WorkflowConfig) -> Self {
        let submitter = WorkflowSubmitter::new(store.clone(), config.clone());
        let reader = WorkflowStatusReader::new(store.clone()).parallel(config.parallel_status);
        Self { store, config, submitter, reader }
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn submit_restricted_database(&self, opts: &RestrictedDatabaseOpts) -> WorkflowResult<WorkflowHandle> {
        self.submitter.submit_restricted_database(opts)
    }

    pub fn submit_connectivity(&self, opts: &ConnectivityOpts) -> WorkflowResult<WorkflowHandle> {
        self.submitter.submit_connectivity(opts)
    }

    pub fn submit_workstation(&self, opts: &WorkstationOpts) -> WorkflowResult<WorkflowHandle> {
        self.submitter.submit_workstation(opts)
    }

    pub fn submit_config_resync(&self, reason: &str) -> WorkflowResult<WorkflowHandle> {
        self.submitter.submit_config_resync(reason)
    }

    pub fn restricted_database_status(&self, dataset_id: &str) -> WorkflowResult<WorkflowStatus> {
        self.reader.restricted_database_status(dataset_id)
    }

    pub fn connectivity_status(&self, ident: &str) -> WorkflowResult<ConnectivityStatus> {
        self.reader.connectivity_status(ident)
    }

    pub fn workstation_status(&self, ident: &str) -> WorkflowResult<StepStatus> {
        self.reader.workstation_status(ident)
    }

    /// Últimas `limit` ejecuciones de `A` para `subject`, de la más antigua a
    /// la más reciente. Unos argumentos que no decodifican son `Internal`.
    pub fn step_history<A: JobArgs>(&self, subject: &str, limit: usize) -> WorkflowResult<Vec<StepRecord<A>>> {
        let op = "step_history";
        let filter = JobFilter::new().kind(A::KIND).metadata(SUBJECT_KEY, subject).first(limit);
        let mut jobs = self.store.list(&filter).op(op)?;
        jobs.reverse();
        jobs.iter()
            .map(|job| {
                let args = job.decode_args::<A>()
                              .map_err(|e| WorkflowError::internal(op, format!("trabajo {}: {}", job.id, e)))?;
                Ok(StepRecord { job_id: job.id,
                                state: job.state,
                                created_at: job.created_at,
                                finalized_at: job.finalized_at,
                                args })
            })
            .collect()
    }

    pub fn diff_steps<A: Diffable>(&self, older: &StepRecord<A>, newer: &StepRecord<A>) -> JobDiff {
        history::diff_steps(older, newer)
    }

    /// Rastro de auditoría de la estación de `ident` sobre sus últimas
    /// `limit` ejecuciones.
    pub fn workstation_changes(&self, ident: &str, limit: usize) -> WorkflowResult<Vec<WorkstationChange>> {
        let records = self.step_history::<WorkstationArgs>(ident, limit)?;
        Ok(history::workstation_changes(&records))
    }

    /// Runner con todos los workers registrados y las colas configuradas.
    pub fn runner(&self, caps: &Capabilities) -> anyhow::Result<JobRunner> {
        let workers = build_workers(self.store.clone(), caps)?;
        Ok(JobRunner::new(self.store.clone(), workers, self.config.runner_config()))
    }
}
