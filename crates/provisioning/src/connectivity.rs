// connectivity.rs
// Capacidad de conectividad de red entre la estación de trabajo de un
// usuario y hosts on-prem.
use crate::errors::DomainResult;
use async_trait::async_trait;

#[async_trait]
pub trait ConnectivityService: Send + Sync {
  /// Habilita el acceso de `ident` a `host`. Repetirlo no tiene efecto.
  async fn connect_host(&self, ident: &str, host: &str) -> DomainResult<()>;

  /// Retira el acceso a todos los hosts que no estén en `keep`. Devuelve los
  /// hosts retirados.
  async fn disconnect_hosts_except(&self, ident: &str, keep: &[String]) -> DomainResult<Vec<String>>;

  /// Avisa al usuario de que la petición `request_id` terminó.
  async fn notify(&self, ident: &str, request_id: &str, hosts: &[String]) -> DomainResult<()>;
}
