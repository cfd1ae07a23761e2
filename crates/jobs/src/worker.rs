// Archivo: worker.rs
// Propósito: contrato de los workers (uno por tipo de trabajo) y la tabla de
// registro `kind -> worker` que se construye una vez al arrancar y se pasa
// al `JobRunner`.
use crate::args::JobArgs;
use crate::domain::Job;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Ejecuta exactamente un tipo de trabajo.
///
/// Un `Err` no completa el trabajo: el runner registra el error y aplica la
/// política de reintentos. Las implementaciones deben tolerar ejecuciones
/// repetidas del mismo trabajo.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Tipo de trabajo que atiende.
    fn kind(&self) -> &'static str;

    async fn work(&self, job: &Job) -> anyhow::Result<()>;
}

/// Tabla de registro de workers.
#[derive(Clone, Default)]
pub struct Workers {
    by_kind: HashMap<&'static str, Arc<dyn Worker>>,
}

impl Workers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un worker. Registrar dos veces el mismo tipo es un error de
    /// arranque.
    pub fn register<W: Worker + 'static>(&mut self, worker: W) -> anyhow::Result<()> {
        self.register_arc(Arc::new(worker))
    }

    pub fn register_arc(&mut self, worker: Arc<dyn Worker>) -> anyhow::Result<()> {
        let kind = worker.kind();
        if self.by_kind.contains_key(kind) {
            anyhow::bail!("worker ya registrado para el tipo {}", kind);
        }
        self.by_kind.insert(kind, worker);
        Ok(())
    }

    /// Registra el worker comprobando que atiende el tipo de argumentos `A`.
    pub fn register_for<A: JobArgs, W: Worker + 'static>(&mut self, worker: W) -> anyhow::Result<()> {
        if worker.kind() != A::KIND {
            anyhow::bail!("worker {} no corresponde al tipo {}", worker.kind(), A::KIND);
        }
        self.register(worker)
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Worker>> {
        self.by_kind.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<&'static str> = self.by_kind.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.by_kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }
}
