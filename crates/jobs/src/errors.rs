// Archivo: errors.rs
// Propósito: definir los errores del almacén de trabajos y el alias Result<T>
// usado por las APIs del crate.
use thiserror::Error;
/// Errores comunes del almacén de trabajos.
///
/// - `NotFound`: el trabajo pedido no existe.
/// - `Database`: fallo de conectividad, transacción o serialización.
/// - `Internal`: invariante violada (payload corrupto, transición inválida).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
  /// Trabajo no encontrado.
  #[error("No encontrado: {0}")]
  NotFound(String),
  /// Error del almacenamiento subyacente (BD, pool, serialización).
  #[error("Error de base de datos: {0}")]
  Database(String),
  /// Invariante interna violada.
  #[error("Error interno: {0}")]
  Internal(String),
}

impl From<serde_json::Error> for JobError {
  fn from(e: serde_json::Error) -> Self {
    Self::Database(format!("serialización: {}", e))
  }
}

/// Alias de resultado usado por las APIs del crate.
pub type Result<T> = std::result::Result<T, JobError>;
