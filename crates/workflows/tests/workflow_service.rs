use jobs::{Backoff, InMemoryJobStore, JobArgs, JobRunner, JobSpec, JobState, JobStore, RunnerConfig};
use provisioning::{InMemoryConnectivity, InMemoryMetabase, InMemoryWorkstations, WorkstationConfig};
use std::sync::Arc;
use std::time::Duration;
use workflows::args::{ConnectArgs, DisconnectArgs, NotifyArgs, PermissionGroupArgs, WorkstationArgs};
use workflows::workers::build_workers;
use workflows::{Capabilities, ConnectivityOpts, OverallState, RestrictedDatabaseOpts, StepState, WorkflowConfig,
                WorkflowError, WorkflowService, WorkstationOpts};

struct Harness {
  store: Arc<InMemoryJobStore>,
  svc: WorkflowService,
  metabase: Arc<InMemoryMetabase>,
  connectivity: Arc<InMemoryConnectivity>,
  workstations: Arc<InMemoryWorkstations>,
}

impl Harness {
  fn new(config: WorkflowConfig) -> Self {
    Self::with(config, InMemoryConnectivity::new(), InMemoryWorkstations::new())
  }

  fn with(config: WorkflowConfig, connectivity: InMemoryConnectivity, workstations: InMemoryWorkstations) -> Self {
    let store = Arc::new(InMemoryJobStore::new());
    let svc = WorkflowService::new(store.clone(), config);
    Self { store,
           svc,
           metabase: Arc::new(InMemoryMetabase::new()),
           connectivity: Arc::new(connectivity),
           workstations: Arc::new(workstations) }
  }

  fn caps(&self) -> Capabilities {
    Capabilities { metabase: self.metabase.clone(),
                   connectivity: self.connectivity.clone(),
                   workstations: self.workstations.clone() }
  }

  /// Runner con reintentos inmediatos para no esperar al backoff.
  fn runner(&self) -> JobRunner {
    let store: Arc<dyn JobStore> = self.store.clone();
    let workers = build_workers(store.clone(), &self.caps()).expect("workers");
    let config = RunnerConfig { backoff: Backoff::Immediate,
                                ..self.svc.config().runner_config() };
    JobRunner::new(store, workers, config)
  }

  async fn run(&self) {
    self.runner().run_until_idle().await.expect("run_until_idle");
  }
}

fn config() -> WorkflowConfig {
  WorkflowConfig { poll_interval: Duration::from_millis(10),
                   ..WorkflowConfig::default() }
}

fn opts(ds: &str) -> RestrictedDatabaseOpts {
  RestrictedDatabaseOpts::for_dataset(ds, "analytics-prod")
}

fn ws(ident: &str, machine: &str, image: &str) -> WorkstationOpts {
  WorkstationOpts { ident: ident.into(),
                    config: WorkstationConfig::new(machine, image) }
}

#[test]
fn failed_insert_leaves_no_steps_behind() {
  let h = Harness::new(config());
  h.store.fail_next_insert_at(4);
  let err = h.svc.submit_restricted_database(&opts("ds-1")).unwrap_err();
  assert!(matches!(err, WorkflowError::Database { .. }));
  assert!(h.store.dump_for_debug().unwrap().is_empty());

  let status = h.svc.restricted_database_status("ds-1").unwrap();
  assert_eq!(status.steps.len(), 9);
  assert!(status.steps.iter().all(|(_, s)| matches!(s, Err(e) if e.is_not_exist())));
  assert_eq!(status.overall(), OverallState::NotStarted);
}

#[test]
fn resubmitting_in_flight_workflow_is_a_duplicate() {
  let h = Harness::new(config());
  let first = h.svc.submit_restricted_database(&opts("ds-1")).unwrap();
  assert!(!first.duplicate);
  assert_eq!(first.job_ids.len(), 9);

  let second = h.svc.submit_restricted_database(&opts("ds-1")).unwrap();
  assert!(second.duplicate);
  assert_eq!(second.job_ids, first.job_ids);
  assert_eq!(h.store.dump_for_debug().unwrap().len(), 9);

  let other = h.svc.submit_restricted_database(&opts("ds-2")).unwrap();
  assert!(!other.duplicate);
}

#[test]
fn empty_dataset_is_rejected() {
  let h = Harness::new(config());
  let err = h.svc.submit_restricted_database(&opts(" ")).unwrap_err();
  assert!(matches!(err, WorkflowError::Validation { .. }));
}

#[tokio::test]
async fn restricted_database_runs_to_completion() {
  let h = Harness::new(config());
  h.svc.submit_restricted_database(&opts("ds-1")).unwrap();
  assert_eq!(h.svc.restricted_database_status("ds-1").unwrap().overall(), OverallState::Running);

  h.run().await;

  let status = h.svc.restricted_database_status("ds-1").unwrap();
  assert_eq!(status.overall(), OverallState::Completed);
  for (kind, step) in &status.steps {
    let step = step.as_ref().unwrap();
    assert_eq!(step.state, StepState::Completed, "{}", kind);
    assert!(step.finished_at.is_some());
  }
  let resources = h.metabase.resources("ds-1").expect("recursos del dataset");
  assert!(resources.database_id.is_some());
  let calls = h.metabase.log.calls();
  assert!(calls.first().unwrap().starts_with("ensure_permission_group:"));
  assert!(calls.last().unwrap().starts_with("finalize_restricted:"));
}

#[tokio::test]
async fn transient_failures_are_retried_and_reported_once() {
  let h = Harness::new(config());
  h.metabase.log.fail_next("ensure_database", 2);
  h.svc.submit_restricted_database(&opts("ds-1")).unwrap();

  h.run().await;

  let status = h.svc.restricted_database_status("ds-1").unwrap();
  assert_eq!(status.overall(), OverallState::Completed);
  let db = status.step("database").unwrap().as_ref().unwrap();
  assert_eq!(db.attempt, 3);
  assert_eq!(db.errors.len(), 1);
  assert_eq!(h.metabase.log.count("ensure_database"), 1);
}

#[tokio::test]
async fn exhausted_step_halts_the_rest_of_the_pipeline() {
  let h = Harness::new(WorkflowConfig { max_attempts: 1, ..config() });
  h.metabase.log.fail_next("ensure_service_account", 1);
  h.svc.submit_restricted_database(&opts("ds-1")).unwrap();

  h.run().await;

  let status = h.svc.restricted_database_status("ds-1").unwrap();
  assert_eq!(status.overall(), OverallState::Failed);
  let sa = status.step("service_account").unwrap().as_ref().unwrap();
  assert_eq!(sa.job_state, JobState::Discarded);
  assert_eq!(sa.state, StepState::Failed);
  let finalize = status.step("finalize_restricted").unwrap().as_ref().unwrap();
  assert_eq!(finalize.job_state, JobState::Cancelled);
  assert_eq!(status.step("permission_group").unwrap().as_ref().unwrap().state, StepState::Completed);
  assert_eq!(h.metabase.log.count("ensure_database"), 0);
  assert!(h.metabase.resources("ds-1").unwrap().database_id.is_none());
}

#[tokio::test]
async fn rerun_after_failure_reports_the_newest_attempt() {
  let h = Harness::new(WorkflowConfig { max_attempts: 1, ..config() });
  h.metabase.log.fail_next("ensure_permission_group", 1);
  h.svc.submit_restricted_database(&opts("ds-1")).unwrap();
  h.run().await;
  assert_eq!(h.svc.restricted_database_status("ds-1").unwrap().overall(), OverallState::Failed);

  let again = h.svc.submit_restricted_database(&opts("ds-1")).unwrap();
  assert!(!again.duplicate);
  h.run().await;

  let status = h.svc.restricted_database_status("ds-1").unwrap();
  assert_eq!(status.overall(), OverallState::Completed);
  let pg = status.step("permission_group").unwrap().as_ref().unwrap();
  assert_eq!(pg.job_id, again.job_ids[0]);
}

#[test]
fn two_in_flight_jobs_for_one_step_is_internal() {
  let h = Harness::new(config());
  h.svc.submit_restricted_database(&opts("ds-1")).unwrap();
  let args = PermissionGroupArgs { dataset_id: "ds-1".into(),
                                   group_name: "restricted-ds-1".into() };
  h.store.force_insert(JobSpec::from_args(&args).unwrap()).unwrap();

  let err = h.svc.restricted_database_status("ds-1").unwrap_err();
  assert!(matches!(err, WorkflowError::Internal { .. }));
  assert_eq!(err.operation(), "restricted_database_status");
}

#[test]
fn parallel_status_matches_sequential() {
  let store = Arc::new(InMemoryJobStore::new());
  let seq = WorkflowService::new(store.clone(), config());
  let par = WorkflowService::new(store.clone(),
                                 WorkflowConfig { parallel_status: true,
                                                  ..config() });
  seq.submit_restricted_database(&opts("ds-1")).unwrap();
  assert_eq!(seq.restricted_database_status("ds-1").unwrap(),
             par.restricted_database_status("ds-1").unwrap());
}

#[tokio::test]
async fn disconnect_waits_for_every_connect() {
  let h = Harness::with(config(),
                        InMemoryConnectivity::with_connect_delay(Duration::from_millis(40)),
                        InMemoryWorkstations::new());
  let handle = h.svc
                .submit_connectivity(&ConnectivityOpts { ident: "u1".into(),
                                                         hosts: vec!["a.internal".into(),
                                                                     "b.internal".into(),
                                                                     "a.internal".into()],
                                                         request_id: None })
                .unwrap();
  assert_eq!(handle.job_ids.len(), 4);
  let request_id = handle.request_id.clone().unwrap();

  h.run().await;

  let calls = h.connectivity.log.calls();
  assert_eq!(calls.len(), 4);
  assert!(calls[0].starts_with("connect_host:") && calls[1].starts_with("connect_host:"));
  assert_eq!(calls[2], "disconnect_hosts_except:u1");
  assert_eq!(calls[3], format!("notify:u1/{}/a.internal,b.internal", request_id));

  let status = h.svc.connectivity_status("u1").unwrap();
  assert_eq!(status.request_id.as_deref(), Some(request_id.as_str()));
  assert_eq!(status.connects.len(), 2);
  assert_eq!(status.overall(), OverallState::Completed);
}

#[tokio::test]
async fn newer_connectivity_request_replaces_hosts() {
  let h = Harness::new(config());
  let submit = |hosts: &[&str], id: &str| {
    h.svc
     .submit_connectivity(&ConnectivityOpts { ident: "u1".into(),
                                              hosts: hosts.iter().map(|s| s.to_string()).collect(),
                                              request_id: Some(id.into()) })
     .unwrap()
  };
  submit(&["a", "b"], "r1");
  h.run().await;
  submit(&["b", "c"], "r2");
  h.run().await;

  assert_eq!(h.connectivity.hosts("u1"), vec!["b".to_string(), "c".to_string()]);
  let status = h.svc.connectivity_status("u1").unwrap();
  assert_eq!(status.request_id.as_deref(), Some("r2"));
  let hosts: Vec<String> = status.connects
                                 .iter()
                                 .map(|c| c.args["host"].as_str().unwrap().to_string())
                                 .collect();
  assert_eq!(hosts, vec!["b".to_string(), "c".to_string()]);
  let notify = status.notify.as_ref().unwrap();
  assert_eq!(notify.args["request_id"], "r2");
}

fn hosts(names: &[&str]) -> Vec<String> {
  names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn resubmitting_same_connectivity_request_is_a_duplicate() {
  let h = Harness::new(config());
  let request = ConnectivityOpts { ident: "u1".into(),
                                   hosts: hosts(&["h1", "h2"]),
                                   request_id: None };
  let first = h.svc.submit_connectivity(&request).unwrap();
  let second = h.svc.submit_connectivity(&request).unwrap();
  assert!(!first.duplicate);
  assert!(second.duplicate);
  assert_eq!(second.request_id, first.request_id);
  assert_eq!(h.store.dump_for_debug().unwrap().len(), 4);

  let other = h.svc
               .submit_connectivity(&ConnectivityOpts { ident: "u1".into(),
                                                        hosts: hosts(&["h1", "h3"]),
                                                        request_id: None })
               .unwrap();
  assert!(!other.duplicate);
  assert_ne!(other.request_id, first.request_id);
}

#[tokio::test]
async fn queued_connectivity_request_reports_the_newest() {
  let h = Harness::new(config());
  for (names, id) in [(&["a", "b"][..], "r1"), (&["c"][..], "r2")] {
    let handle = h.svc
                  .submit_connectivity(&ConnectivityOpts { ident: "u1".into(),
                                                           hosts: hosts(names),
                                                           request_id: Some(id.into()) })
                  .unwrap();
    assert!(!handle.duplicate);
  }

  let status = h.svc.connectivity_status("u1").unwrap();
  assert_eq!(status.request_id.as_deref(), Some("r2"));
  assert_eq!(status.connects.len(), 1);
  let disconnect = status.disconnect.as_ref().unwrap();
  assert_eq!(disconnect.args["request_id"], "r2");
  assert_eq!(disconnect.state, StepState::Running);
  assert_eq!(status.overall(), OverallState::Running);

  h.run().await;
  let status = h.svc.connectivity_status("u1").unwrap();
  assert_eq!(status.overall(), OverallState::Completed);
  assert_eq!(h.connectivity.hosts("u1"), hosts(&["c"]));
}

#[tokio::test]
async fn queued_workstation_change_reports_the_newest() {
  let h = Harness::new(config());
  let older = h.svc.submit_workstation(&ws("u1", "a", "img:1")).unwrap();
  let newer = h.svc.submit_workstation(&ws("u1", "c", "img:1")).unwrap();
  assert!(!newer.duplicate);

  let status = h.svc.workstation_status("u1").unwrap();
  assert_eq!(status.job_id, newer.job_ids[0]);
  assert_ne!(status.job_id, older.job_ids[0]);
  assert_eq!(status.args["machine_type"], "c");

  h.run().await;
  assert_eq!(h.workstations.config("u1").unwrap().machine_type, "c");
  assert_eq!(h.svc.workstation_status("u1").unwrap().state, StepState::Completed);
}

#[test]
fn connectivity_status_without_jobs_is_empty() {
  let h = Harness::new(config());
  let status = h.svc.connectivity_status("nadie").unwrap();
  assert!(status.request_id.is_none());
  assert!(status.connects.is_empty());
  assert!(status.disconnect.as_ref().unwrap_err().is_not_exist());
  assert_eq!(status.overall(), OverallState::NotStarted);
  assert_eq!(ConnectArgs::KIND, "connectivity_connect");
  assert_ne!(DisconnectArgs::KIND, NotifyArgs::KIND);
}

#[tokio::test]
async fn workstation_history_yields_audit_trail() {
  let h = Harness::new(config());
  h.svc.submit_workstation(&ws("u1", "n2-standard-4", "img:1")).unwrap();
  h.run().await;
  h.svc.submit_workstation(&ws("u1", "n2-standard-8", "img:1")).unwrap();
  h.run().await;
  h.svc.submit_workstation(&ws("u1", "n2-standard-8", "img:1")).unwrap();
  h.run().await;
  let mut last = ws("u1", "n2-standard-8", "img:2");
  last.config.url_allow_list = vec!["pypi.org".into()];
  h.svc.submit_workstation(&last).unwrap();
  h.run().await;

  let history = h.svc.step_history::<WorkstationArgs>("u1", 10).unwrap();
  assert_eq!(history.len(), 4);
  assert!(history.windows(2).all(|w| w[0].job_id < w[1].job_id));
  assert!(h.svc.diff_steps(&history[1], &history[2]).is_empty());

  let changes = h.svc.workstation_changes("u1", 10).unwrap();
  assert_eq!(changes.len(), 2);
  let first = &changes[0].diff;
  assert_eq!(first.len(), 1);
  assert_eq!(first["machine_type"].added, vec!["n2-standard-8".to_string()]);
  assert_eq!(first["machine_type"].removed, vec!["n2-standard-4".to_string()]);
  let second = &changes[1].diff;
  assert_eq!(second["container_image"].added, vec!["img:2".to_string()]);
  assert_eq!(second["url_allow_list"].added, vec!["pypi.org".to_string()]);
  assert!(second["url_allow_list"].removed.is_empty());

  assert_eq!(h.workstations.config("u1").unwrap(), last.config);
  let status = h.svc.workstation_status("u1").unwrap();
  assert_eq!(status.state, StepState::Completed);
}

#[tokio::test]
async fn single_workstation_run_has_no_changes() {
  let h = Harness::new(config());
  h.svc.submit_workstation(&ws("u2", "e2-medium", "img:1")).unwrap();
  h.run().await;

  let history = h.svc.step_history::<WorkstationArgs>("u2", 10).unwrap();
  assert_eq!(history.len(), 1);
  assert!(h.svc.diff_steps(&history[0], &history[0]).is_empty());
  assert!(h.svc.workstation_changes("u2", 10).unwrap().is_empty());
  assert!(h.svc.workstation_status("nadie").unwrap_err().is_not_exist());
}

#[test]
fn same_workstation_change_twice_is_a_duplicate() {
  let h = Harness::new(config());
  assert!(!h.svc.submit_workstation(&ws("u1", "e2-medium", "img:1")).unwrap().duplicate);
  assert!(h.svc.submit_workstation(&ws("u1", "e2-medium", "img:1")).unwrap().duplicate);
  let err = h.svc.submit_workstation(&ws("u1", "", "img:1")).unwrap_err();
  assert!(matches!(err, WorkflowError::Validation { .. }));
}

#[tokio::test]
async fn config_resync_never_runs_concurrently() {
  let h = Harness::with(config(),
                        InMemoryConnectivity::new(),
                        InMemoryWorkstations::with_resync_delay(Duration::from_millis(30)));
  for reason in ["alta u1", "alta u2", "imagen nueva"] {
    assert!(!h.svc.submit_config_resync(reason).unwrap().duplicate);
  }

  h.run().await;

  assert_eq!(h.workstations.log.count("resync_configs"), 3);
  assert_eq!(h.workstations.resync_peak(), 1);
}
