// errors.rs
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
  #[error("Error de validación: {0}")]
  ValidationError(String),
  #[error("Error externo: {0}")]
  ExternalError(String),
  #[error("Error de serialización: {0}")]
  SerializationError(String),
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::SerializationError(e.to_string())
  }
}

pub type DomainResult<T> = Result<T, DomainError>;

/// Falla con `ValidationError` si `value` está vacío.
pub(crate) fn require(field: &str, value: &str) -> DomainResult<()> {
  if value.trim().is_empty() {
    return Err(DomainError::ValidationError(format!("{} no puede estar vacío", field)));
  }
  Ok(())
}
