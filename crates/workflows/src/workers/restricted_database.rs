// Archivo: workers/restricted_database.rs
// Propósito: los nueve pasos de la base restringida comparten un worker
// genérico; cada tipo de args sabe qué operación del aprovisionador invocar.
use super::complete_in_tx;
use crate::args::{DatabaseArgs, DatasetAccessArgs, FinalizeRestrictedArgs, PermissionGroupArgs, ProjectIamBindingArgs,
                  RestrictedCollectionArgs, ServiceAccountArgs, ServiceAccountKeyArgs, VerifyDatabaseArgs};
use async_trait::async_trait;
use jobs::{Job, JobArgs, JobStore, Worker};
use provisioning::{DomainResult, MetabaseProvisioner};
use std::marker::PhantomData;
use std::sync::Arc;

/// Paso de la base restringida: aplica su efecto y devuelve un resumen para
/// el log.
#[async_trait]
pub trait RestrictedStep: JobArgs + 'static {
    async fn apply(&self, metabase: &dyn MetabaseProvisioner) -> DomainResult<String>;
}

#[async_trait]
impl RestrictedStep for PermissionGroupArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        let id = mb.ensure_permission_group(&self.dataset_id, &self.group_name).await?;
        Ok(format!("grupo {}", id))
    }
}

#[async_trait]
impl RestrictedStep for RestrictedCollectionArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        let id = mb.ensure_restricted_collection(&self.dataset_id, &self.collection_name).await?;
        Ok(format!("colección {}", id))
    }
}

#[async_trait]
impl RestrictedStep for ServiceAccountArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        mb.ensure_service_account(&self.dataset_id, &self.project_id).await
    }
}

#[async_trait]
impl RestrictedStep for ServiceAccountKeyArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        mb.ensure_service_account_key(&self.dataset_id).await?;
        Ok("clave creada".to_string())
    }
}

#[async_trait]
impl RestrictedStep for ProjectIamBindingArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        mb.ensure_project_iam_binding(&self.dataset_id, &self.project_id, &self.role).await?;
        Ok(format!("{} en {}", self.role, self.project_id))
    }
}

#[async_trait]
impl RestrictedStep for DatasetAccessArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        mb.ensure_dataset_access(&self.dataset_id, &self.bq_dataset).await?;
        Ok(format!("acceso a {}", self.bq_dataset))
    }
}

#[async_trait]
impl RestrictedStep for DatabaseArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        let id = mb.ensure_database(&self.dataset_id, &self.database_name).await?;
        Ok(format!("base {}", id))
    }
}

#[async_trait]
impl RestrictedStep for VerifyDatabaseArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        mb.verify_database(&self.dataset_id).await?;
        Ok("verificada".to_string())
    }
}

#[async_trait]
impl RestrictedStep for FinalizeRestrictedArgs {
    async fn apply(&self, mb: &dyn MetabaseProvisioner) -> DomainResult<String> {
        let res = mb.finalize_restricted(&self.dataset_id).await?;
        Ok(format!("{:?}", res))
    }
}

pub struct RestrictedStepWorker<A> {
    store: Arc<dyn JobStore>,
    metabase: Arc<dyn MetabaseProvisioner>,
    _args: PhantomData<fn() -> A>,
}

impl<A: RestrictedStep> RestrictedStepWorker<A> {
    pub fn new(store: Arc<dyn JobStore>, metabase: Arc<dyn MetabaseProvisioner>) -> Self {
        Self { store, metabase, _args: PhantomData }
    }
}

#[async_trait]
impl<A: RestrictedStep> Worker for RestrictedStepWorker<A> {
    fn kind(&self) -> &'static str {
        A::KIND
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        let args: A = job.decode_args()?;
        let summary = args.apply(self.metabase.as_ref()).await?;
        complete_in_tx(&self.store, job).await?;
        log::info!("paso {} completado para {} (trabajo {}): {}",
                   A::KIND,
                   job.metadata_value(crate::args::SUBJECT_KEY).unwrap_or("?"),
                   job.id,
                   summary);
        Ok(())
    }
}
