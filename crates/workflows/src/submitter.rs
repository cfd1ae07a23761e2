// Archivo: submitter.rs
// Propósito: traducir una petición de workflow en un lote ordenado de
// trabajos con la misma clave de correlación y encolarlo en una única
// transacción: el workflow queda encolado entero o no queda.
use crate::args::{ConfigResyncArgs, ConnectArgs, DatabaseArgs, DatasetAccessArgs, DisconnectArgs, FinalizeRestrictedArgs,
                  NotifyArgs, PermissionGroupArgs, ProjectIamBindingArgs, RestrictedCollectionArgs, ServiceAccountArgs,
                  ServiceAccountKeyArgs, VerifyDatabaseArgs, WorkstationArgs, REQUEST_ID_KEY, RESYNC_SUBJECT};
use crate::config::WorkflowConfig;
use crate::errors::{OpContext, WorkflowError, WorkflowResult};
use crate::workflow_type::WorkflowType;
use jobs::{JobArgs, JobId, JobSpec, JobStore};
use provisioning::WorkstationConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parámetros de la base restringida de un dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedDatabaseOpts {
    pub dataset_id: String,
    pub group_name: String,
    pub collection_name: String,
    pub project_id: String,
    pub role: String,
    pub bq_dataset: String,
    pub database_name: String,
}

impl RestrictedDatabaseOpts {
    /// Nombres derivados del dataset para todo salvo el proyecto destino.
    pub fn for_dataset(dataset_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let dataset_id = dataset_id.into();
        Self { group_name: format!("restricted-{}", dataset_id),
               collection_name: format!("restricted-{}", dataset_id),
               project_id: project_id.into(),
               role: "roles/bigquery.dataViewer".to_string(),
               bq_dataset: dataset_id.replace('-', "_"),
               database_name: format!("restricted-{}", dataset_id),
               dataset_id }
    }
}

/// Parámetros de un cambio de conectividad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityOpts {
    pub ident: String,
    /// Hosts que deben quedar habilitados tras el cambio.
    pub hosts: Vec<String>,
    /// Id de la petición; si falta se genera uno.
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstationOpts {
    pub ident: String,
    pub config: WorkstationConfig,
}

/// Resultado de un envío.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowHandle {
    pub workflow: WorkflowType,
    pub subject: String,
    /// Ids de los trabajos encolados en orden de envío. Si `duplicate` es
    /// `true`, ids de los trabajos en vuelo con los que colisionó.
    pub job_ids: Vec<JobId>,
    /// El workflow ya estaba en curso: no se encoló nada.
    pub duplicate: bool,
    /// Id de petición (sólo conectividad). En un duplicado es el de la
    /// petición en curso.
    pub request_id: Option<String>,
}

pub struct WorkflowSubmitter {
    store: Arc<dyn JobStore>,
    config: WorkflowConfig,
}

fn require(op: &str, field: &str, value: &str) -> WorkflowResult<()> {
    if value.trim().is_empty() {
        return Err(WorkflowError::validation(op, format!("{} vacío", field)));
    }
    Ok(())
}

impl WorkflowSubmitter {
    pub fn new(store: Arc<dyn JobStore>, config: WorkflowConfig) -> Self {
        Self { store, config }
    }

    /// Spec con la política de reintentos configurada.
    fn spec<A: JobArgs>(&self, op: &str, args: &A) -> WorkflowResult<JobSpec> {
        let mut opts = args.insert_opts();
        opts.max_attempts = self.config.max_attempts;
        opts.timeout_secs = self.config.timeout_secs;
        JobSpec::from_args_with(args, opts).op(op)
    }

    /// Inserta el lote en una transacción. Si algún paso colisiona con uno en
    /// vuelo se deshace todo y se informa el duplicado.
    fn submit_batch(&self,
                    op: &str,
                    workflow: WorkflowType,
                    subject: &str,
                    request_id: Option<String>,
                    specs: Vec<JobSpec>)
                    -> WorkflowResult<WorkflowHandle> {
        let mut tx = self.store.begin().op(op)?;
        let handles = tx.insert_many(specs).op(op)?;
        let duplicates: Vec<JobId> = handles.iter().filter(|h| h.duplicate).map(|h| h.job.id).collect();
        if !duplicates.is_empty() {
            let existing_request = handles.iter()
                                          .filter(|h| h.duplicate)
                                          .find_map(|h| h.job.metadata_value(REQUEST_ID_KEY))
                                          .map(str::to_string);
            tx.rollback().op(op)?;
            log::warn!("{} para {} ya está en curso (trabajos {:?}); no se encola de nuevo",
                       workflow, subject, duplicates);
            return Ok(WorkflowHandle { workflow,
                                       subject: subject.to_string(),
                                       job_ids: duplicates,
                                       duplicate: true,
                                       request_id: existing_request.or(request_id) });
        }
        tx.commit().op(op)?;
        let job_ids: Vec<JobId> = handles.iter().map(|h| h.job.id).collect();
        log::info!("{} encolado para {}: {} pasos {:?}", workflow, subject, job_ids.len(), job_ids);
        Ok(WorkflowHandle { workflow,
                            subject: subject.to_string(),
                            job_ids,
                            duplicate: false,
                            request_id })
    }

    /// Encola los nueve pasos de la base restringida en orden de pipeline.
    pub fn submit_restricted_database(&self, opts: &RestrictedDatabaseOpts) -> WorkflowResult<WorkflowHandle> {
        let op = "submit_restricted_database";
        require(op, "dataset_id", &opts.dataset_id)?;
        require(op, "project_id", &opts.project_id)?;
        let ds = opts.dataset_id.clone();
        let specs = vec![self.spec(op,
                                   &PermissionGroupArgs { dataset_id: ds.clone(),
                                                          group_name: opts.group_name.clone() })?,
                         self.spec(op,
                                   &RestrictedCollectionArgs { dataset_id: ds.clone(),
                                                               collection_name: opts.collection_name.clone() })?,
                         self.spec(op,
                                   &ServiceAccountArgs { dataset_id: ds.clone(),
                                                         project_id: opts.project_id.clone() })?,
                         self.spec(op, &ServiceAccountKeyArgs { dataset_id: ds.clone() })?,
                         self.spec(op,
                                   &ProjectIamBindingArgs { dataset_id: ds.clone(),
                                                            project_id: opts.project_id.clone(),
                                                            role: opts.role.clone() })?,
                         self.spec(op,
                                   &DatasetAccessArgs { dataset_id: ds.clone(),
                                                        bq_dataset: opts.bq_dataset.clone() })?,
                         self.spec(op,
                                   &DatabaseArgs { dataset_id: ds.clone(),
                                                   database_name: opts.database_name.clone() })?,
                         self.spec(op, &VerifyDatabaseArgs { dataset_id: ds.clone() })?,
                         self.spec(op, &FinalizeRestrictedArgs { dataset_id: ds.clone() })?];
        self.submit_batch(op, WorkflowType::RestrictedDatabase, &ds, None, specs)
    }

    /// Un `connect` por host, después un `disconnect` y un `notify` con la
    /// lista completa.
    pub fn submit_connectivity(&self, opts: &ConnectivityOpts) -> WorkflowResult<WorkflowHandle> {
        let op = "submit_connectivity";
        require(op, "ident", &opts.ident)?;
        let request_id = opts.request_id
                             .clone()
                             .filter(|r| !r.trim().is_empty())
                             .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut hosts: Vec<String> = Vec::with_capacity(opts.hosts.len());
        for host in &opts.hosts {
            require(op, "host", host)?;
            if !hosts.contains(host) {
                hosts.push(host.clone());
            }
        }
        let mut specs = Vec::with_capacity(hosts.len() + 2);
        for host in &hosts {
            specs.push(self.spec(op,
                                 &ConnectArgs { ident: opts.ident.clone(),
                                                host: host.clone(),
                                                request_id: request_id.clone() })?);
        }
        specs.push(self.spec(op,
                             &DisconnectArgs { ident: opts.ident.clone(),
                                               hosts: hosts.clone(),
                                               request_id: request_id.clone() })?);
        specs.push(self.spec(op,
                             &NotifyArgs { ident: opts.ident.clone(),
                                           hosts,
                                           request_id: request_id.clone() })?);
        self.submit_batch(op, WorkflowType::Connectivity, &opts.ident, Some(request_id), specs)
    }

    pub fn submit_workstation(&self, opts: &WorkstationOpts) -> WorkflowResult<WorkflowHandle> {
        let op = "submit_workstation";
        require(op, "ident", &opts.ident)?;
        opts.config.validate().op(op)?;
        let spec = self.spec(op,
                             &WorkstationArgs { ident: opts.ident.clone(),
                                                config: opts.config.clone() })?;
        self.submit_batch(op, WorkflowType::Workstation, &opts.ident, None, vec![spec])
    }

    pub fn submit_config_resync(&self, reason: &str) -> WorkflowResult<WorkflowHandle> {
        let op = "submit_config_resync";
        require(op, "reason", reason)?;
        let spec = self.spec(op, &ConfigResyncArgs { reason: reason.to_string() })?;
        self.submit_batch(op, WorkflowType::ConfigResync, RESYNC_SUBJECT, None, vec![spec])
    }
}
