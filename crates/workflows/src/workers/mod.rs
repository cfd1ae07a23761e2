// Archivo: workers/mod.rs
// Propósito: workers de cada paso y la tabla de registro que se pasa al
// `JobRunner`.
//
// Todos siguen el mismo patrón: decodificar args, llamar a la capacidad
// ("ensure", segura ante reintentos) y completar el trabajo dentro de una
// transacción. Un error no completa nada; el runner decide el reintento.
mod connectivity;
mod restricted_database;
mod workstation;

pub use connectivity::{ConnectWorker, DisconnectWorker, NotifyWorker};
pub use restricted_database::{RestrictedStep, RestrictedStepWorker};
pub use workstation::{ConfigResyncWorker, WorkstationWorker};

use crate::args::{DatabaseArgs, DatasetAccessArgs, FinalizeRestrictedArgs, PermissionGroupArgs, ProjectIamBindingArgs,
                  RestrictedCollectionArgs, ServiceAccountArgs, ServiceAccountKeyArgs, VerifyDatabaseArgs};
use jobs::{Job, JobStore, Workers};
use provisioning::{ConnectivityService, MetabaseProvisioner, WorkstationService};
use std::sync::Arc;

/// Capacidades externas que usan los workers.
#[derive(Clone)]
pub struct Capabilities {
    pub metabase: Arc<dyn MetabaseProvisioner>,
    pub connectivity: Arc<dyn ConnectivityService>,
    pub workstations: Arc<dyn WorkstationService>,
}

/// Marca `job` como completado en su propia transacción, en el pool
/// bloqueante. La transacción nunca cruza un `.await`.
pub(crate) async fn complete_in_tx(store: &Arc<dyn JobStore>, job: &Job) -> anyhow::Result<bool> {
    let id = job.id;
    let res = jobs::run_blocking(store, move |store| {
                  let mut tx = store.begin()?;
                  let res = tx.complete(id)?;
                  tx.commit()?;
                  Ok(res)
              }).await?;
    if !res.changed {
        log::debug!("trabajo {} ({}) ya estaba completado", job.id, job.kind);
    }
    Ok(res.changed)
}

/// Registra un worker por cada tipo de paso.
pub fn register_all(workers: &mut Workers, store: Arc<dyn JobStore>, caps: &Capabilities) -> anyhow::Result<()> {
    let mb = &caps.metabase;
    workers.register(RestrictedStepWorker::<PermissionGroupArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<RestrictedCollectionArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<ServiceAccountArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<ServiceAccountKeyArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<ProjectIamBindingArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<DatasetAccessArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<DatabaseArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<VerifyDatabaseArgs>::new(store.clone(), mb.clone()))?;
    workers.register(RestrictedStepWorker::<FinalizeRestrictedArgs>::new(store.clone(), mb.clone()))?;

    workers.register(ConnectWorker::new(store.clone(), caps.connectivity.clone()))?;
    workers.register(DisconnectWorker::new(store.clone(), caps.connectivity.clone()))?;
    workers.register(NotifyWorker::new(store.clone(), caps.connectivity.clone()))?;

    workers.register(WorkstationWorker::new(store.clone(), caps.workstations.clone()))?;
    workers.register(ConfigResyncWorker::new(store, caps.workstations.clone()))?;
    Ok(())
}

/// Tabla completa de workers.
pub fn build_workers(store: Arc<dyn JobStore>, caps: &Capabilities) -> anyhow::Result<Workers> {
    let mut workers = Workers::new();
    register_all(&mut workers, store, caps)?;
    log::debug!("workers registrados: {:?}", workers.kinds());
    Ok(workers)
}
