// metabase.rs
// Capacidad de aprovisionamiento de bases restringidas de analítica.
//
// Cada operación es un "ensure": si el recurso ya existe (por ejemplo de un
// intento anterior) se devuelve el existente en vez de fallar.
use crate::errors::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identificadores de los recursos creados para un dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestrictedResources {
  pub permission_group_id: Option<i64>,
  pub collection_id: Option<i64>,
  pub service_account_email: Option<String>,
  pub database_id: Option<i64>,
}

#[async_trait]
pub trait MetabaseProvisioner: Send + Sync {
  /// Grupo de permisos del dataset. Devuelve su id.
  async fn ensure_permission_group(&self, dataset_id: &str, name: &str) -> DomainResult<i64>;

  /// Colección restringida. Devuelve su id.
  async fn ensure_restricted_collection(&self, dataset_id: &str, name: &str) -> DomainResult<i64>;

  /// Cuenta de servicio en el proyecto destino. Devuelve su email.
  async fn ensure_service_account(&self, dataset_id: &str, project_id: &str) -> DomainResult<String>;

  /// Clave de la cuenta de servicio; la clave queda guardada del lado del
  /// servicio y nunca viaja en los argumentos del trabajo.
  async fn ensure_service_account_key(&self, dataset_id: &str) -> DomainResult<()>;

  async fn ensure_project_iam_binding(&self, dataset_id: &str, project_id: &str, role: &str) -> DomainResult<()>;

  async fn ensure_dataset_access(&self, dataset_id: &str, bq_dataset: &str) -> DomainResult<()>;

  /// Base de datos restringida. Devuelve su id.
  async fn ensure_database(&self, dataset_id: &str, name: &str) -> DomainResult<i64>;

  /// Comprueba que la base responde con la cuenta de servicio.
  async fn verify_database(&self, dataset_id: &str) -> DomainResult<()>;

  /// Conecta grupo, colección y base; deja el dataset listo para uso.
  async fn finalize_restricted(&self, dataset_id: &str) -> DomainResult<RestrictedResources>;
}
