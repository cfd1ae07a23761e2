// Archivo: status.rs
// Propósito: reconstruir el estado de un workflow consultando el estado de
// sus trabajos. No se persiste ningún registro de estado propio.
//
// Por cada tipo de paso se buscan los trabajos del sujeto (más recientes
// primero). Ninguno es `NotExist` para ese paso. Dos en vuelo de la misma
// instancia (misma clave de unicidad) es una violación de invariante
// (`Internal`). En otro caso se informa el más reciente: una re-ejecución o
// una petición distinta encolada detrás de otra son legítimas.
use crate::args::{ConnectArgs, DisconnectArgs, NotifyArgs, WorkstationArgs, REQUEST_ID_KEY, SUBJECT_KEY};
use crate::errors::{OpContext, WorkflowError, WorkflowResult};
use crate::workflow_type::WorkflowType;
use chrono::{DateTime, Utc};
use jobs::{Job, JobArgs, JobFilter, JobId, JobState, JobStore};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Estado agregado de un paso.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    /// available, scheduled, running o retryable.
    Running,
    Completed,
    /// discarded o cancelled.
    Failed,
}

impl From<JobState> for StepState {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Available | JobState::Scheduled | JobState::Running | JobState::Retryable => StepState::Running,
            JobState::Completed => StepState::Completed,
            JobState::Discarded | JobState::Cancelled => StepState::Failed,
        }
    }
}

/// Estado de un paso derivado de su trabajo líder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatus {
    pub job_id: JobId,
    pub kind: String,
    pub state: StepState,
    pub job_state: JobState,
    pub attempt: i32,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Errores de los intentos, sin repetir.
    pub errors: Vec<String>,
    pub args: JsonValue,
}

impl From<&Job> for StepStatus {
    fn from(job: &Job) -> Self {
        StepStatus { job_id: job.id,
                     kind: job.kind.clone(),
                     state: job.state.into(),
                     job_state: job.state,
                     attempt: job.attempt,
                     submitted_at: job.created_at,
                     started_at: job.attempted_at,
                     finished_at: job.finalized_at,
                     errors: job.distinct_errors(),
                     args: job.args.clone() }
    }
}

/// Resultado por paso: sólo puede fallar con `NotExist`.
pub type StepResult = Result<StepStatus, WorkflowError>;

/// Estado agregado de un workflow completo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    /// Ningún paso tiene trabajo.
    NotStarted,
    Running,
    Completed,
    Failed,
}

fn overall<'a, I>(steps: I) -> OverallState
    where I: IntoIterator<Item = &'a StepResult>
{
    let mut any = false;
    let mut all_done = true;
    for step in steps {
        match step {
            Ok(s) => {
                any = true;
                match s.state {
                    StepState::Failed => return OverallState::Failed,
                    StepState::Running => all_done = false,
                    StepState::Completed => {}
                }
            }
            Err(_) => all_done = false,
        }
    }
    match (any, all_done) {
        (false, _) => OverallState::NotStarted,
        (true, true) => OverallState::Completed,
        (true, false) => OverallState::Running,
    }
}

/// Estado compuesto de un workflow de pasos fijos.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStatus {
    pub workflow: WorkflowType,
    pub subject: String,
    /// Un resultado por tipo de paso, en orden de pipeline.
    pub steps: Vec<(&'static str, StepResult)>,
}

impl WorkflowStatus {
    pub fn step(&self, kind: &str) -> Option<&StepResult> {
        self.steps.iter().find(|(k, _)| *k == kind).map(|(_, r)| r)
    }

    pub fn overall(&self) -> OverallState {
        overall(self.steps.iter().map(|(_, r)| r))
    }
}

/// Estado del último cambio de conectividad de un usuario.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectivityStatus {
    pub ident: String,
    /// Petición más reciente; `None` si el usuario no tiene trabajos.
    pub request_id: Option<String>,
    /// Un `connect` por host de la petición, en orden de envío.
    pub connects: Vec<StepStatus>,
    pub disconnect: StepResult,
    pub notify: StepResult,
}

impl ConnectivityStatus {
    pub fn overall(&self) -> OverallState {
        let connects: Vec<StepResult> = self.connects.iter().cloned().map(Ok).collect();
        overall(connects.iter().chain([&self.disconnect, &self.notify]))
    }
}

pub struct WorkflowStatusReader {
    store: Arc<dyn JobStore>,
    parallel: bool,
}

impl WorkflowStatusReader {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store, parallel: false }
    }

    /// Reparte las consultas por paso en el pool de rayon.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Trabajo líder de `kind` para `subject`.
    pub fn leading_job(&self, op: &str, queue: &str, kind: &str, subject: &str) -> WorkflowResult<Job> {
        self.leading_job_for(op, queue, kind, subject, None)
    }

    /// Como `leading_job`, acotado a los trabajos de `request_id` si se da.
    fn leading_job_for(&self,
                       op: &str,
                       queue: &str,
                       kind: &str,
                       subject: &str,
                       request_id: Option<&str>)
                       -> WorkflowResult<Job> {
        let mut filter = JobFilter::new().queue(queue)
                                         .kind(kind)
                                         .states(&JobState::ALL)
                                         .metadata(SUBJECT_KEY, subject)
                                         .first(2);
        if let Some(request_id) = request_id {
            filter = filter.metadata(REQUEST_ID_KEY, request_id);
        }
        let jobs = self.store.list(&filter).op(op)?;
        match jobs.as_slice() {
            [] => Err(WorkflowError::not_exist(op, format!("paso {} sin trabajo para {}", kind, subject))),
            [newest, older] if same_instance_in_flight(newest, older) => {
                Err(WorkflowError::internal(op,
                                            format!("paso {} con dos trabajos en vuelo para {}: {} y {}",
                                                    kind, subject, newest.id, older.id)))
            }
            [newest, ..] => Ok(newest.clone()),
        }
    }

    fn step(&self, op: &str, queue: &str, kind: &str, subject: &str) -> WorkflowResult<StepResult> {
        self.step_for(op, queue, kind, subject, None)
    }

    fn step_for(&self,
                op: &str,
                queue: &str,
                kind: &str,
                subject: &str,
                request_id: Option<&str>)
                -> WorkflowResult<StepResult> {
        match self.leading_job_for(op, queue, kind, subject, request_id) {
            Ok(job) => Ok(Ok(StepStatus::from(&job))),
            Err(e) if e.is_not_exist() => Ok(Err(e)),
            Err(e) => Err(e),
        }
    }

    /// Estado de un workflow de pasos fijos. Un paso sin trabajo queda como
    /// `NotExist` en su posición; `Database`/`Internal` abortan la consulta.
    pub fn workflow_status(&self, op: &str, workflow: WorkflowType, subject: &str) -> WorkflowResult<WorkflowStatus> {
        let queue = workflow.queue();
        let kinds = workflow.step_kinds();
        let results: Vec<WorkflowResult<StepResult>> = if self.parallel {
            kinds.par_iter().map(|kind| self.step(op, queue, kind, subject)).collect()
        } else {
            kinds.iter().map(|kind| self.step(op, queue, kind, subject)).collect()
        };
        let mut steps = Vec::with_capacity(kinds.len());
        for (kind, res) in kinds.iter().zip(results) {
            steps.push((*kind, res?));
        }
        Ok(WorkflowStatus { workflow, subject: subject.to_string(), steps })
    }

    pub fn restricted_database_status(&self, dataset_id: &str) -> WorkflowResult<WorkflowStatus> {
        self.workflow_status("restricted_database_status", WorkflowType::RestrictedDatabase, dataset_id)
    }

    /// Todos los pasos se leen de la petición más reciente: `disconnect` y
    /// `notify` siguen la regla del trabajo líder dentro de ella y los
    /// `connect` son todos los suyos.
    pub fn connectivity_status(&self, ident: &str) -> WorkflowResult<ConnectivityStatus> {
        let op = "connectivity_status";
        let queue = WorkflowType::Connectivity.queue();
        let latest = self.store
                         .list(&JobFilter::new().queue(queue)
                                                .kind(ConnectArgs::KIND)
                                                .kind(DisconnectArgs::KIND)
                                                .kind(NotifyArgs::KIND)
                                                .metadata(SUBJECT_KEY, ident)
                                                .first(1))
                         .op(op)?;
        let request_id = latest.first().and_then(|j| j.metadata_value(REQUEST_ID_KEY)).map(str::to_string);
        let connects = match &request_id {
            Some(request_id) => {
                let mut jobs = self.store
                                   .list(&JobFilter::new().queue(queue)
                                                          .kind(ConnectArgs::KIND)
                                                          .metadata(SUBJECT_KEY, ident)
                                                          .metadata(REQUEST_ID_KEY, request_id.as_str()))
                                   .op(op)?;
                jobs.reverse();
                jobs.iter().map(StepStatus::from).collect()
            }
            None => Vec::new(),
        };
        Ok(ConnectivityStatus { ident: ident.to_string(),
                                connects,
                                disconnect: self.step_for(op, queue, DisconnectArgs::KIND, ident, request_id.as_deref())?,
                                notify: self.step_for(op, queue, NotifyArgs::KIND, ident, request_id.as_deref())?,
                                request_id })
    }

    /// Estado del último cambio de estación del usuario. Sin trabajos es
    /// `NotExist`; con un cambio encolado detrás de otro se informa el más
    /// reciente.
    pub fn workstation_status(&self, ident: &str) -> WorkflowResult<StepStatus> {
        let job = self.leading_job("workstation_status", WorkflowType::Workstation.queue(), WorkstationArgs::KIND, ident)?;
        Ok(StepStatus::from(&job))
    }
}

/// Dos trabajos en vuelo con la misma clave de unicidad: la inserción debía
/// haber devuelto el existente.
fn same_instance_in_flight(newest: &Job, older: &Job) -> bool {
    !newest.state.is_terminal() && !older.state.is_terminal() && newest.unique_key == older.unique_key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(state: StepState) -> StepResult {
        let now = Utc::now();
        Ok(StepStatus { job_id: 1,
                        kind: "k".into(),
                        state,
                        job_state: JobState::Running,
                        attempt: 1,
                        submitted_at: now,
                        started_at: None,
                        finished_at: None,
                        errors: vec![],
                        args: JsonValue::Null })
    }

    #[test]
    fn overall_prefers_failure_then_progress() {
        let missing: StepResult = Err(WorkflowError::not_exist("op", "k"));
        assert_eq!(overall([&missing, &missing]), OverallState::NotStarted);
        assert_eq!(overall([&status(StepState::Completed), &missing]), OverallState::Running);
        assert_eq!(overall([&status(StepState::Completed), &status(StepState::Completed)]),
                   OverallState::Completed);
        assert_eq!(overall([&status(StepState::Running), &status(StepState::Failed)]), OverallState::Failed);
    }

    #[test]
    fn job_states_map_to_step_states() {
        assert_eq!(StepState::from(JobState::Retryable), StepState::Running);
        assert_eq!(StepState::from(JobState::Scheduled), StepState::Running);
        assert_eq!(StepState::from(JobState::Discarded), StepState::Failed);
        assert_eq!(StepState::from(JobState::Cancelled), StepState::Failed);
    }
}
