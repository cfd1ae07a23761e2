// Archivo: workers/workstation.rs
// Propósito: workers de estaciones de trabajo (cambio de configuración y
// resync global, este último en una cola de un solo worker).
use super::complete_in_tx;
use crate::args::{ConfigResyncArgs, WorkstationArgs};
use async_trait::async_trait;
use jobs::{Job, JobArgs, JobStore, Worker};
use provisioning::WorkstationService;
use std::sync::Arc;

pub struct WorkstationWorker {
    store: Arc<dyn JobStore>,
    workstations: Arc<dyn WorkstationService>,
}

impl WorkstationWorker {
    pub fn new(store: Arc<dyn JobStore>, workstations: Arc<dyn WorkstationService>) -> Self {
        Self { store, workstations }
    }
}

#[async_trait]
impl Worker for WorkstationWorker {
    fn kind(&self) -> &'static str {
        WorkstationArgs::KIND
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let args: WorkstationArgs = job.decode_args()?;
        self.workstations.ensure_workstation(&args.ident, &args.config).await?;
        complete_in_tx(&self.store, job).await?;
        log::info!("estación de {} aplicada: {} / {}",
                   args.ident, args.config.machine_type, args.config.container_image);
        Ok(())
    }
}

pub struct ConfigResyncWorker {
    store: Arc<dyn JobStore>,
    workstations: Arc<dyn WorkstationService>,
}

impl ConfigResyncWorker {
    pub fn new(store: Arc<dyn JobStore>, workstations: Arc<dyn WorkstationService>) -> Self {
        Self { store, workstations }
    }
}

#[async_trait]
impl Worker for ConfigResyncWorker {
    fn kind(&self) -> &'static str {
        ConfigResyncArgs::KIND
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let args: ConfigResyncArgs = job.decode_args()?;
        let updated = self.workstations.resync_configs().await?;
        complete_in_tx(&self.store, job).await?;
        log::info!("resync de configuraciones ({}): {} estaciones", args.reason, updated);
        Ok(())
    }
}
