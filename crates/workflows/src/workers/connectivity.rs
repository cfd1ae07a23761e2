// Archivo: workers/connectivity.rs
// Propósito: workers del workflow de conectividad (connect por host,
// disconnect con la lista final y notify).
use super::complete_in_tx;
use crate::args::{ConnectArgs, DisconnectArgs, NotifyArgs};
use async_trait::async_trait;
use jobs::{Job, JobArgs, JobStore, Worker};
use provisioning::ConnectivityService;
use std::sync::Arc;

pub struct ConnectWorker {
    store: Arc<dyn JobStore>,
    connectivity: Arc<dyn ConnectivityService>,
}

impl ConnectWorker {
    pub fn new(store: Arc<dyn JobStore>, connectivity: Arc<dyn ConnectivityService>) -> Self {
        Self { store, connectivity }
    }
}

#[async_trait]
impl Worker for ConnectWorker {
    fn kind(&self) -> &'static str {
        ConnectArgs::KIND
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let args: ConnectArgs = job.decode_args()?;
        self.connectivity.connect_host(&args.ident, &args.host).await?;
        complete_in_tx(&self.store, job).await?;
        log::info!("host {} conectado para {} (petición {})", args.host, args.ident, args.request_id);
        Ok(())
    }
}

pub struct DisconnectWorker {
    store: Arc<dyn JobStore>,
    connectivity: Arc<dyn ConnectivityService>,
}

impl DisconnectWorker {
    pub fn new(store: Arc<dyn JobStore>, connectivity: Arc<dyn ConnectivityService>) -> Self {
        Self { store, connectivity }
    }
}

#[async_trait]
impl Worker for DisconnectWorker {
    fn kind(&self) -> &'static str {
        DisconnectArgs::KIND
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let args: DisconnectArgs = job.decode_args()?;
        let removed = self.connectivity.disconnect_hosts_except(&args.ident, &args.hosts).await?;
        complete_in_tx(&self.store, job).await?;
        log::info!("{} hosts retirados para {} (petición {}): {:?}",
                   removed.len(), args.ident, args.request_id, removed);
        Ok(())
    }
}

pub struct NotifyWorker {
    store: Arc<dyn JobStore>,
    connectivity: Arc<dyn ConnectivityService>,
}

impl NotifyWorker {
    pub fn new(store: Arc<dyn JobStore>, connectivity: Arc<dyn ConnectivityService>) -> Self {
        Self { store, connectivity }
    }
}

#[async_trait]
impl Worker for NotifyWorker {
    fn kind(&self) -> &'static str {
        NotifyArgs::KIND
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let args: NotifyArgs = job.decode_args()?;
        self.connectivity.notify(&args.ident, &args.request_id, &args.hosts).await?;
        complete_in_tx(&self.store, job).await?;
        log::info!("{} notificado de la petición {}", args.ident, args.request_id);
        Ok(())
    }
}
