// Archivo: args.rs
// Propósito: argumentos tipados de cada paso de los workflows. Cada tipo
// declara su `KIND` y sus opciones de inserción: cola, ventana de unicidad,
// secuencia y la clave de correlación (`subject`) en la metadata.
use chrono::Duration;
use jobs::{InsertOpts, JobArgs, Metadata, SequenceOpts, UniqueOpts, DEFAULT_QUEUE};
use provisioning::WorkstationConfig;
use serde::{Deserialize, Serialize};

/// Clave de metadata con la clave de correlación del workflow.
pub const SUBJECT_KEY: &str = "subject";
/// Clave de metadata con el id de petición de conectividad.
pub const REQUEST_ID_KEY: &str = "request_id";

pub const QUEUE_WORKSTATION: &str = "workstation";
pub const QUEUE_RESYNC: &str = "resync";

/// Ventana de unicidad de los pasos de base restringida.
pub fn restricted_unique_window() -> Duration {
    Duration::minutes(20)
}

/// Ventana de unicidad de los cambios de estación de trabajo.
pub fn workstation_unique_window() -> Duration {
    Duration::minutes(10)
}

fn metadata_for(subject: &str) -> Metadata {
    Metadata::from([(SUBJECT_KEY.to_string(), subject.to_string())])
}

/// Opciones compartidas por los nueve pasos: misma ventana de unicidad y
/// una secuencia por dataset que incluye todos los tipos y se detiene ante
/// un descarte.
fn restricted_opts(dataset_id: &str) -> InsertOpts {
    InsertOpts { queue: DEFAULT_QUEUE.to_string(),
                 unique: Some(UniqueOpts::by_args_within(restricted_unique_window())),
                 sequence: Some(SequenceOpts::by_fields(&["dataset_id"]).exclude_kind()),
                 metadata: metadata_for(dataset_id),
                 ..InsertOpts::default() }
}

macro_rules! restricted_step {
    ($ty:ident, $kind:literal) => {
        impl JobArgs for $ty {
            const KIND: &'static str = $kind;

            fn insert_opts(&self) -> InsertOpts {
                restricted_opts(&self.dataset_id)
            }
        }
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGroupArgs {
    pub dataset_id: String,
    pub group_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedCollectionArgs {
    pub dataset_id: String,
    pub collection_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountArgs {
    pub dataset_id: String,
    pub project_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKeyArgs {
    pub dataset_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectIamBindingArgs {
    pub dataset_id: String,
    pub project_id: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetAccessArgs {
    pub dataset_id: String,
    pub bq_dataset: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseArgs {
    pub dataset_id: String,
    pub database_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDatabaseArgs {
    pub dataset_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeRestrictedArgs {
    pub dataset_id: String,
}

restricted_step!(PermissionGroupArgs, "permission_group");
restricted_step!(RestrictedCollectionArgs, "restricted_collection");
restricted_step!(ServiceAccountArgs, "service_account");
restricted_step!(ServiceAccountKeyArgs, "service_account_key");
restricted_step!(ProjectIamBindingArgs, "project_iam_binding");
restricted_step!(DatasetAccessArgs, "dataset_access");
restricted_step!(DatabaseArgs, "database");
restricted_step!(VerifyDatabaseArgs, "verify_database");
restricted_step!(FinalizeRestrictedArgs, "finalize_restricted");

/// Tipos de la base restringida en orden de pipeline.
pub const RESTRICTED_DATABASE_KINDS: [&str; 9] = [PermissionGroupArgs::KIND,
                                                  RestrictedCollectionArgs::KIND,
                                                  ServiceAccountArgs::KIND,
                                                  ServiceAccountKeyArgs::KIND,
                                                  ProjectIamBindingArgs::KIND,
                                                  DatasetAccessArgs::KIND,
                                                  DatabaseArgs::KIND,
                                                  VerifyDatabaseArgs::KIND,
                                                  FinalizeRestrictedArgs::KIND];

/// Opciones de conectividad: una secuencia por usuario compartida por los
/// tres tipos. Los `connect` de una misma petición pueden correr a la vez;
/// `disconnect` y `notify` esperan a que todo lo anterior termine.
///
/// La unicidad la llevan `disconnect` y `notify` sobre el usuario y la lista
/// final de hosts, sin el id de petición. Los `connect` no llevan unicidad.
fn connectivity_opts(ident: &str, request_id: &str, concurrent: bool) -> InsertOpts {
    let mut sequence = SequenceOpts::by_fields(&["ident"]).exclude_kind().continue_on_discard();
    sequence.concurrent_same_kind = concurrent;
    let mut metadata = metadata_for(ident);
    metadata.insert(REQUEST_ID_KEY.to_string(), request_id.to_string());
    let unique = if concurrent {
        None
    } else {
        Some(UniqueOpts::by_fields_within(&["ident", "hosts"], restricted_unique_window()))
    };
    InsertOpts { unique,
                 sequence: Some(sequence),
                 metadata,
                 ..InsertOpts::default() }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectArgs {
    pub ident: String,
    pub host: String,
    pub request_id: String,
}

impl JobArgs for ConnectArgs {
    const KIND: &'static str = "connectivity_connect";

    fn insert_opts(&self) -> InsertOpts {
        connectivity_opts(&self.ident, &self.request_id, true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectArgs {
    pub ident: String,
    /// Hosts que deben seguir habilitados; el resto se retira.
    pub hosts: Vec<String>,
    pub request_id: String,
}

impl JobArgs for DisconnectArgs {
    const KIND: &'static str = "connectivity_disconnect";

    fn insert_opts(&self) -> InsertOpts {
        connectivity_opts(&self.ident, &self.request_id, false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyArgs {
    pub ident: String,
    pub hosts: Vec<String>,
    pub request_id: String,
}

impl JobArgs for NotifyArgs {
    const KIND: &'static str = "connectivity_notify";

    fn insert_opts(&self) -> InsertOpts {
        connectivity_opts(&self.ident, &self.request_id, false)
    }
}

/// Cambio de configuración de la estación de trabajo de un usuario. Es el
/// paso recurrente cuyo historial alimenta la auditoría de cambios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstationArgs {
    pub ident: String,
    #[serde(flatten)]
    pub config: WorkstationConfig,
}

impl JobArgs for WorkstationArgs {
    const KIND: &'static str = "workstation";

    fn insert_opts(&self) -> InsertOpts {
        InsertOpts { queue: QUEUE_WORKSTATION.to_string(),
                     unique: Some(UniqueOpts::by_args_within(workstation_unique_window())),
                     sequence: Some(SequenceOpts::by_fields(&["ident"]).continue_on_discard()),
                     metadata: metadata_for(&self.ident),
                     ..InsertOpts::default() }
    }
}

/// Correlación de los resync: no pertenecen a un usuario concreto.
pub const RESYNC_SUBJECT: &str = "workstations";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigResyncArgs {
    pub reason: String,
}

impl JobArgs for ConfigResyncArgs {
    const KIND: &'static str = "workstation_config_resync";

    fn insert_opts(&self) -> InsertOpts {
        InsertOpts { queue: QUEUE_RESYNC.to_string(),
                     unique: Some(UniqueOpts::by_args_within(workstation_unique_window())),
                     metadata: metadata_for(RESYNC_SUBJECT),
                     ..InsertOpts::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs::{keys, JobSpec};

    #[test]
    fn restricted_steps_share_one_sequence() {
        let a = JobSpec::from_args(&PermissionGroupArgs { dataset_id: "ds-1".into(), group_name: "g".into() }).unwrap();
        let b = JobSpec::from_args(&FinalizeRestrictedArgs { dataset_id: "ds-1".into() }).unwrap();
        assert_eq!(keys::sequence_key(&a).unwrap(), keys::sequence_key(&b).unwrap());
        assert_eq!(a.metadata.get(SUBJECT_KEY).map(String::as_str), Some("ds-1"));
        assert_eq!(a.unique.as_ref().and_then(|u| u.by_period), Some(Duration::minutes(20)));
    }

    #[test]
    fn workstation_args_flatten_config() {
        let args = WorkstationArgs { ident: "u1".into(),
                                     config: WorkstationConfig::new("n2-standard-4", "img:1") };
        let value = serde_json::to_value(&args).unwrap();
        assert_eq!(value["machine_type"], "n2-standard-4");
        assert_eq!(value["ident"], "u1");
        let spec = JobSpec::from_args(&args).unwrap();
        assert_eq!(spec.queue, QUEUE_WORKSTATION);
    }

    #[test]
    fn connect_jobs_run_concurrently_but_barriers_do_not() {
        let c = ConnectArgs { ident: "u1".into(), host: "h1".into(), request_id: "r1".into() }.insert_opts();
        let d = DisconnectArgs { ident: "u1".into(), hosts: vec![], request_id: "r1".into() }.insert_opts();
        assert!(c.sequence.as_ref().is_some_and(|s| s.concurrent_same_kind && s.continue_on_discard));
        assert!(d.sequence.as_ref().is_some_and(|s| !s.concurrent_same_kind));
        assert_eq!(c.metadata.get(REQUEST_ID_KEY).map(String::as_str), Some("r1"));
    }

    #[test]
    fn connectivity_uniqueness_ignores_request_id() {
        let a = JobSpec::from_args(&NotifyArgs { ident: "u1".into(), hosts: vec!["h1".into()], request_id: "r1".into() })
                .unwrap();
        let b = JobSpec::from_args(&NotifyArgs { ident: "u1".into(), hosts: vec!["h1".into()], request_id: "r2".into() })
                .unwrap();
        assert_eq!(keys::unique_key(&a), keys::unique_key(&b));
        let c = JobSpec::from_args(&ConnectArgs { ident: "u1".into(), host: "h1".into(), request_id: "r1".into() }).unwrap();
        assert!(keys::unique_key(&c).is_none());
    }
}
