//! Capacidades de aprovisionamiento consumidas por los workers de los
//! workflows: bases restringidas de analítica, conectividad de red y
//! estaciones de trabajo. Sólo define los contratos y stubs en memoria; las
//! integraciones reales viven fuera de este workspace.
mod connectivity;
mod domain_stubs;
mod errors;
mod metabase;
mod workstation;

pub use connectivity::ConnectivityService;
pub use domain_stubs::{CallLog, InMemoryConnectivity, InMemoryMetabase, InMemoryWorkstations};
pub use errors::{DomainError, DomainResult};
pub use metabase::{MetabaseProvisioner, RestrictedResources};
pub use workstation::{WorkstationConfig, WorkstationService};
