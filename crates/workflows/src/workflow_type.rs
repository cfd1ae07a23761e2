use crate::args::{ConfigResyncArgs, ConnectArgs, DisconnectArgs, NotifyArgs, WorkstationArgs, QUEUE_RESYNC,
                  QUEUE_WORKSTATION, RESTRICTED_DATABASE_KINDS};
use crate::errors::WorkflowError;
use jobs::{JobArgs, DEFAULT_QUEUE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enum para identificar los tipos de workflow que soporta el crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    RestrictedDatabase,
    Connectivity,
    Workstation,
    ConfigResync,
}

const CONNECTIVITY_KINDS: [&str; 3] = [ConnectArgs::KIND, DisconnectArgs::KIND, NotifyArgs::KIND];
const WORKSTATION_KINDS: [&str; 1] = [WorkstationArgs::KIND];
const CONFIG_RESYNC_KINDS: [&str; 1] = [ConfigResyncArgs::KIND];

impl WorkflowType {
    pub const ALL: [WorkflowType; 4] = [WorkflowType::RestrictedDatabase,
                                        WorkflowType::Connectivity,
                                        WorkflowType::Workstation,
                                        WorkflowType::ConfigResync];

    /// Tipos de trabajo del workflow en orden de envío.
    pub fn step_kinds(&self) -> &'static [&'static str] {
        match self {
            WorkflowType::RestrictedDatabase => &RESTRICTED_DATABASE_KINDS,
            WorkflowType::Connectivity => &CONNECTIVITY_KINDS,
            WorkflowType::Workstation => &WORKSTATION_KINDS,
            WorkflowType::ConfigResync => &CONFIG_RESYNC_KINDS,
        }
    }

    /// Cola donde se encolan los pasos.
    pub fn queue(&self) -> &'static str {
        match self {
            WorkflowType::RestrictedDatabase | WorkflowType::Connectivity => DEFAULT_QUEUE,
            WorkflowType::Workstation => QUEUE_WORKSTATION,
            WorkflowType::ConfigResync => QUEUE_RESYNC,
        }
    }
}

impl fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowType::RestrictedDatabase => "restricted_database",
            WorkflowType::Connectivity => "connectivity",
            WorkflowType::Workstation => "workstation",
            WorkflowType::ConfigResync => "config_resync",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for WorkflowType {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        WorkflowType::ALL.into_iter()
                         .find(|w| w.to_string() == wanted)
                         .ok_or_else(|| WorkflowError::validation("workflow_type", format!("tipo desconocido: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_its_display_form() {
        for w in WorkflowType::ALL {
            assert_eq!(w.to_string().parse::<WorkflowType>().unwrap(), w);
        }
        assert!("batch_export".parse::<WorkflowType>().is_err());
    }

    #[test]
    fn restricted_pipeline_has_nine_steps_in_order() {
        let kinds = WorkflowType::RestrictedDatabase.step_kinds();
        assert_eq!(kinds.len(), 9);
        assert_eq!(kinds[0], "permission_group");
        assert_eq!(kinds[8], "finalize_restricted");
    }
}
