use jobs::JobError;
use provisioning::DomainError;
use thiserror::Error;

// Errores de la capa de orquestación.
//
// Cada variante lleva el nombre de la operación que falló (`op`) para poder
// rastrear el origen; la clase del error se conserva tal cual desde el
// almacén de trabajos. Un envío duplicado no es un error: se informa con
// `WorkflowHandle::duplicate`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
  /// Fallo del almacén o de conectividad con él.
  #[error("{op}: error de base de datos: {msg}")]
  Database { op: String, msg: String },

  /// Registro esperado ausente, por ejemplo un paso todavía no alcanzado.
  #[error("{op}: no existe: {msg}")]
  NotExist { op: String, msg: String },

  /// Violación de invariante: nunca se silencia.
  #[error("{op}: error interno: {msg}")]
  Internal { op: String, msg: String },

  /// Parámetros de entrada inválidos.
  #[error("{op}: error de validación: {msg}")]
  Validation { op: String, msg: String },
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

impl WorkflowError {
  pub fn not_exist(op: &str, msg: impl Into<String>) -> Self {
    Self::NotExist { op: op.to_string(), msg: msg.into() }
  }

  pub fn internal(op: &str, msg: impl Into<String>) -> Self {
    Self::Internal { op: op.to_string(), msg: msg.into() }
  }

  pub fn validation(op: &str, msg: impl Into<String>) -> Self {
    Self::Validation { op: op.to_string(), msg: msg.into() }
  }

  /// Operación que originó el error.
  pub fn operation(&self) -> &str {
    match self {
      Self::Database { op, .. } | Self::NotExist { op, .. } | Self::Internal { op, .. } | Self::Validation { op, .. } => {
        op
      }
    }
  }

  pub fn is_not_exist(&self) -> bool {
    matches!(self, Self::NotExist { .. })
  }

  fn from_job(op: &str, e: JobError) -> Self {
    match e {
      JobError::NotFound(msg) => Self::NotExist { op: op.to_string(), msg },
      JobError::Database(msg) => Self::Database { op: op.to_string(), msg },
      JobError::Internal(msg) => Self::Internal { op: op.to_string(), msg },
    }
  }

  fn from_domain(op: &str, e: DomainError) -> Self {
    match e {
      DomainError::ValidationError(msg) => Self::Validation { op: op.to_string(), msg },
      other => Self::Internal { op: op.to_string(), msg: other.to_string() },
    }
  }
}

/// Añade el nombre de la operación a un error de capa inferior.
pub trait OpContext<T> {
  fn op(self, op: &str) -> WorkflowResult<T>;
}

impl<T> OpContext<T> for Result<T, JobError> {
  fn op(self, op: &str) -> WorkflowResult<T> {
    self.map_err(|e| WorkflowError::from_job(op, e))
  }
}

impl<T> OpContext<T> for Result<T, DomainError> {
  fn op(self, op: &str) -> WorkflowResult<T> {
    self.map_err(|e| WorkflowError::from_domain(op, e))
  }
}
