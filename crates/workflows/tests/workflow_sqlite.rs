use jobs::JobStore;
use jobs_persistence::DieselJobStore;
use provisioning::{InMemoryConnectivity, InMemoryMetabase, InMemoryWorkstations, WorkstationConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use workflows::args::WorkstationArgs;
use workflows::{Capabilities, ConnectivityOpts, OverallState, RestrictedDatabaseOpts, WorkflowConfig, WorkflowService,
                WorkstationOpts};

fn setup() -> (TempDir, Arc<dyn JobStore>) {
  let dir = tempfile::tempdir().expect("tempdir");
  let path = dir.path().join("workflows.db");
  let store = DieselJobStore::new_sqlite(path.to_str().expect("utf8 path")).expect("new_sqlite");
  (dir, Arc::new(store))
}

fn caps() -> Capabilities {
  Capabilities { metabase: Arc::new(InMemoryMetabase::new()),
                 connectivity: Arc::new(InMemoryConnectivity::new()),
                 workstations: Arc::new(InMemoryWorkstations::new()) }
}

fn config() -> WorkflowConfig {
  WorkflowConfig { poll_interval: Duration::from_millis(10),
                   ..WorkflowConfig::default() }
}

#[tokio::test]
async fn workflows_run_end_to_end_on_sqlite() {
  let (_dir, store) = setup();
  let svc = WorkflowService::new(store, config());

  let handle = svc.submit_restricted_database(&RestrictedDatabaseOpts::for_dataset("ds-9", "analytics-prod"))
                  .expect("submit");
  assert_eq!(handle.job_ids.len(), 9);
  assert!(svc.submit_restricted_database(&RestrictedDatabaseOpts::for_dataset("ds-9", "analytics-prod"))
             .expect("resubmit")
             .duplicate);
  svc.submit_connectivity(&ConnectivityOpts { ident: "u1".into(),
                                              hosts: vec!["a".into(), "b".into()],
                                              request_id: Some("r1".into()) })
     .expect("connectivity");
  svc.submit_workstation(&WorkstationOpts { ident: "u1".into(),
                                            config: WorkstationConfig::new("e2-medium", "img:1") })
     .expect("workstation");

  let stats = svc.runner(&caps()).expect("runner").run_until_idle().await.expect("run");
  assert_eq!(stats.completed, 9 + 4 + 1);

  assert_eq!(svc.restricted_database_status("ds-9").expect("status").overall(), OverallState::Completed);
  let conn = svc.connectivity_status("u1").expect("connectivity status");
  assert_eq!(conn.connects.len(), 2);
  assert_eq!(conn.overall(), OverallState::Completed);

  svc.submit_workstation(&WorkstationOpts { ident: "u1".into(),
                                            config: WorkstationConfig::new("e2-standard-4", "img:1") })
     .expect("workstation change");
  svc.runner(&caps()).expect("runner").run_until_idle().await.expect("run");

  let history = svc.step_history::<WorkstationArgs>("u1", 5).expect("history");
  assert_eq!(history.len(), 2);
  let changes = svc.workstation_changes("u1", 5).expect("changes");
  assert_eq!(changes.len(), 1);
  assert_eq!(changes[0].diff["machine_type"].removed, vec!["e2-medium".to_string()]);
}

#[test]
fn status_of_unknown_subject_reports_missing_steps() {
  let (_dir, store) = setup();
  let svc = WorkflowService::new(store, config());
  let status = svc.restricted_database_status("nada").expect("status");
  assert_eq!(status.overall(), OverallState::NotStarted);
  assert!(svc.workstation_status("nadie").unwrap_err().is_not_exist());
}

#[tokio::test]
async fn connectivity_dedup_and_queued_requests_on_sqlite() {
  let (_dir, store) = setup();
  let svc = WorkflowService::new(store.clone(), config());
  let request = ConnectivityOpts { ident: "u1".into(),
                                   hosts: vec!["h1".into(), "h2".into()],
                                   request_id: None };
  let first = svc.submit_connectivity(&request).expect("first");
  let again = svc.submit_connectivity(&request).expect("again");
  assert!(again.duplicate);
  assert_eq!(again.request_id, first.request_id);
  assert_eq!(store.list(&jobs::JobFilter::new()).expect("list").len(), 4);

  let second = svc.submit_connectivity(&ConnectivityOpts { ident: "u1".into(),
                                                           hosts: vec!["h3".into()],
                                                           request_id: None })
                  .expect("second");
  assert!(!second.duplicate);
  let status = svc.connectivity_status("u1").expect("queued status");
  assert_eq!(status.request_id, second.request_id);
  assert_eq!(status.connects.len(), 1);
  assert_eq!(status.overall(), OverallState::Running);

  svc.submit_workstation(&WorkstationOpts { ident: "u1".into(),
                                            config: WorkstationConfig::new("a", "img:1") })
     .expect("workstation a");
  let newest = svc.submit_workstation(&WorkstationOpts { ident: "u1".into(),
                                                         config: WorkstationConfig::new("c", "img:1") })
                  .expect("workstation c");
  assert_eq!(svc.workstation_status("u1").expect("workstation status").job_id, newest.job_ids[0]);

  svc.runner(&caps()).expect("runner").run_until_idle().await.expect("run");
  assert_eq!(svc.connectivity_status("u1").expect("status").overall(), OverallState::Completed);
  assert_eq!(svc.workstation_changes("u1", 5).expect("changes").len(), 1);
}
