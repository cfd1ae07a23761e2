// workstation.rs
// Capacidad de gestión de estaciones de trabajo virtuales.
use crate::errors::{require, DomainResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Configuración deseada de una estación de trabajo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkstationConfig {
  pub machine_type: String,
  pub container_image: String,
  #[serde(default)]
  pub url_allow_list: Vec<String>,
  #[serde(default)]
  pub onprem_allow_list: Vec<String>,
}

impl WorkstationConfig {
  pub fn new(machine_type: impl Into<String>, container_image: impl Into<String>) -> Self {
    Self { machine_type: machine_type.into(),
           container_image: container_image.into(),
           url_allow_list: Vec::new(),
           onprem_allow_list: Vec::new() }
  }

  pub fn validate(&self) -> DomainResult<()> {
    require("machine_type", &self.machine_type)?;
    require("container_image", &self.container_image)
  }
}

#[async_trait]
pub trait WorkstationService: Send + Sync {
  /// Crea la estación o la actualiza a `config`.
  async fn ensure_workstation(&self, ident: &str, config: &WorkstationConfig) -> DomainResult<()>;

  /// Vuelve a aplicar la configuración de todas las estaciones. Devuelve
  /// cuántas se actualizaron.
  async fn resync_configs(&self) -> DomainResult<usize>;
}
