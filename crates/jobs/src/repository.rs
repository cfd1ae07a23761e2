// Archivo: repository.rs
// Propósito: definir el contrato del almacén de trabajos durables
// (`JobStore`) y de sus transacciones (`JobTx`). Describe lo que deben
// implementar las persistencias (SQLite vía Diesel, in-memory, etc.).
use crate::domain::{CompleteResult, Job, JobFilter, JobHandle, JobId, JobSpec};
use crate::errors::{JobError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Transacción abierta sobre el almacén.
///
/// Las escrituras sólo son visibles para otros lectores tras `commit`.
/// Soltar la transacción sin confirmarla equivale a `rollback`.
pub trait JobTx {
    /// Inserta todos los specs de forma atómica dentro de la transacción.
    /// Si cualquiera falla devuelve error y el caller debe hacer rollback;
    /// ningún trabajo del lote debe quedar visible.
    fn insert_many(&mut self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>>;

    /// Marca el trabajo como completado. Idempotente: completar un trabajo
    /// ya completado devuelve `changed = false` sin error.
    fn complete(&mut self, id: JobId) -> Result<CompleteResult>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

/// Contrato del almacén de trabajos.
///
/// La parte orientada al llamador (`begin`, `list`, `get`) es la que usan el
/// submitter, los workers y el lector de estado. La parte orientada al motor
/// (`claim`, `fail`, `cancel`) sólo la usa el `JobRunner`.
pub trait JobStore: Send + Sync {
    /// Abre una transacción.
    fn begin(&self) -> Result<Box<dyn JobTx + '_>>;

    /// Lista trabajos que cumplen el filtro, del más reciente al más antiguo.
    /// Sin coincidencias devuelve un vector vacío.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>>;

    /// Obtiene un trabajo por id; `NotFound` si no existe.
    fn get(&self, id: JobId) -> Result<Job>;

    /// Reclama hasta `limit` trabajos ejecutables de `queue` (en orden de id,
    /// respetando secuencias) y los pasa a `running` incrementando `attempt`.
    fn claim(&self, queue: &str, limit: usize) -> Result<Vec<Job>>;

    /// Registra un intento fallido. Con intentos restantes el trabajo pasa a
    /// `retryable` programado en `retry_at`; si no, a `discarded`.
    fn fail(&self, id: JobId, error: &str, retry_at: DateTime<Utc>) -> Result<Job>;

    /// Cancela un trabajo no terminal. Sobre un trabajo terminal no hace nada.
    fn cancel(&self, id: JobId) -> Result<Job>;

    /// Conveniencia: abre una transacción, inserta el lote y confirma.
    fn insert_many(&self, specs: Vec<JobSpec>) -> Result<Vec<JobHandle>> {
        let mut tx = self.begin()?;
        let handles = tx.insert_many(specs)?;
        tx.commit()?;
        Ok(handles)
    }

    /// Conveniencia: completa un trabajo en su propia transacción.
    fn complete(&self, id: JobId) -> Result<CompleteResult> {
        let mut tx = self.begin()?;
        let res = tx.complete(id)?;
        tx.commit()?;
        Ok(res)
    }
}

/// Ejecuta `f` sobre el almacén en el pool bloqueante de tokio. Toda llamada
/// al almacén desde código async pasa por aquí: las implementaciones son
/// síncronas y una escritura puede quedar esperando el lock de la base.
pub async fn run_blocking<T, F>(store: &Arc<dyn JobStore>, f: F) -> Result<T>
    where F: FnOnce(&dyn JobStore) -> Result<T> + Send + 'static,
          T: Send + 'static
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(&*store)).await
                                                   .map_err(|e| JobError::Internal(format!("tarea del almacén: {}", e)))?
}
