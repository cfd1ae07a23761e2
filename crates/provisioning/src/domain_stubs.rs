// domain_stubs.rs
// Implementaciones en memoria de las capacidades de aprovisionamiento. Se
// usan en pruebas y en el binario de demostración: registran cada llamada
// y permiten inyectar fallos por operación.
use crate::connectivity::ConnectivityService;
use crate::errors::{require, DomainError, DomainResult};
use crate::metabase::{MetabaseProvisioner, RestrictedResources};
use crate::workstation::{WorkstationConfig, WorkstationService};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registro de llamadas con fallos programables por operación.
#[derive(Debug, Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl CallLog {
    /// Hace fallar las próximas `times` llamadas a `op`.
    pub fn fail_next(&self, op: &str, times: usize) {
        lock(&self.failures).insert(op.to_string(), times);
    }

    /// Llamadas exitosas en orden, con formato `op:detalle`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, op: &str) -> usize {
        let prefix = format!("{}:", op);
        lock(&self.calls).iter().filter(|c| c.starts_with(&prefix)).count()
    }

    fn check(&self, op: &str) -> DomainResult<()> {
        let mut failures = lock(&self.failures);
        if let Some(left) = failures.get_mut(op) {
            if *left > 0 {
                *left -= 1;
                log::debug!("stub: fallo inyectado en {}", op);
                return Err(DomainError::ExternalError(format!("fallo inyectado en {}", op)));
            }
        }
        Ok(())
    }

    fn record(&self, op: &str, detail: impl Into<String>) {
        lock(&self.calls).push(format!("{}:{}", op, detail.into()));
    }
}

/// Aprovisionador en memoria: asigna ids crecientes y devuelve el mismo id
/// en llamadas repetidas para el mismo dataset.
#[derive(Debug)]
pub struct InMemoryMetabase {
    pub log: CallLog,
    resources: Mutex<HashMap<String, RestrictedResources>>,
    keys: Mutex<BTreeSet<String>>,
    next_id: AtomicI64,
}

impl Default for InMemoryMetabase {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetabase {
    pub fn new() -> Self {
        Self { log: CallLog::default(),
               resources: Mutex::new(HashMap::new()),
               keys: Mutex::new(BTreeSet::new()),
               next_id: AtomicI64::new(1) }
    }

    pub fn resources(&self, dataset_id: &str) -> Option<RestrictedResources> {
        lock(&self.resources).get(dataset_id).cloned()
    }

    fn ensure_id(&self, dataset_id: &str, pick: fn(&mut RestrictedResources) -> &mut Option<i64>) -> i64 {
        let mut all = lock(&self.resources);
        let entry = pick(all.entry(dataset_id.to_string()).or_default());
        *entry.get_or_insert_with(|| self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn require_resources(&self, dataset_id: &str) -> DomainResult<RestrictedResources> {
        self.resources(dataset_id)
            .ok_or_else(|| DomainError::ValidationError(format!("dataset {} sin recursos", dataset_id)))
    }
}

#[async_trait]
impl MetabaseProvisioner for InMemoryMetabase {
    async fn ensure_permission_group(&self, dataset_id: &str, name: &str) -> DomainResult<i64> {
        require("name", name)?;
        self.log.check("ensure_permission_group")?;
        let id = self.ensure_id(dataset_id, |r| &mut r.permission_group_id);
        self.log.record("ensure_permission_group", dataset_id);
        Ok(id)
    }

    async fn ensure_restricted_collection(&self, dataset_id: &str, name: &str) -> DomainResult<i64> {
        require("name", name)?;
        self.log.check("ensure_restricted_collection")?;
        let id = self.ensure_id(dataset_id, |r| &mut r.collection_id);
        self.log.record("ensure_restricted_collection", dataset_id);
        Ok(id)
    }

    async fn ensure_service_account(&self, dataset_id: &str, project_id: &str) -> DomainResult<String> {
        require("project_id", project_id)?;
        self.log.check("ensure_service_account")?;
        let email = {
            let mut all = lock(&self.resources);
            let res = all.entry(dataset_id.to_string()).or_default();
            res.service_account_email
               .get_or_insert_with(|| format!("{}@{}.iam.gserviceaccount.com", dataset_id, project_id))
               .clone()
        };
        self.log.record("ensure_service_account", dataset_id);
        Ok(email)
    }

    async fn ensure_service_account_key(&self, dataset_id: &str) -> DomainResult<()> {
        self.log.check("ensure_service_account_key")?;
        if self.require_resources(dataset_id)?.service_account_email.is_none() {
            return Err(DomainError::ValidationError(format!("dataset {} sin cuenta de servicio", dataset_id)));
        }
        lock(&self.keys).insert(dataset_id.to_string());
        self.log.record("ensure_service_account_key", dataset_id);
        Ok(())
    }

    async fn ensure_project_iam_binding(&self, dataset_id: &str, project_id: &str, role: &str) -> DomainResult<()> {
        require("role", role)?;
        self.log.check("ensure_project_iam_binding")?;
        self.log.record("ensure_project_iam_binding", format!("{}/{}/{}", dataset_id, project_id, role));
        Ok(())
    }

    async fn ensure_dataset_access(&self, dataset_id: &str, bq_dataset: &str) -> DomainResult<()> {
        self.log.check("ensure_dataset_access")?;
        self.log.record("ensure_dataset_access", format!("{}/{}", dataset_id, bq_dataset));
        Ok(())
    }

    async fn ensure_database(&self, dataset_id: &str, name: &str) -> DomainResult<i64> {
        require("name", name)?;
        self.log.check("ensure_database")?;
        if !lock(&self.keys).contains(dataset_id) {
            return Err(DomainError::ValidationError(format!("dataset {} sin clave de cuenta de servicio", dataset_id)));
        }
        let id = self.ensure_id(dataset_id, |r| &mut r.database_id);
        self.log.record("ensure_database", dataset_id);
        Ok(id)
    }

    async fn verify_database(&self, dataset_id: &str) -> DomainResult<()> {
        self.log.check("verify_database")?;
        if self.require_resources(dataset_id)?.database_id.is_none() {
            return Err(DomainError::ExternalError(format!("la base del dataset {} no responde", dataset_id)));
        }
        self.log.record("verify_database", dataset_id);
        Ok(())
    }

    async fn finalize_restricted(&self, dataset_id: &str) -> DomainResult<RestrictedResources> {
        self.log.check("finalize_restricted")?;
        let res = self.require_resources(dataset_id)?;
        self.log.record("finalize_restricted", dataset_id);
        Ok(res)
    }
}

/// Conectividad en memoria: conjunto de hosts habilitados por usuario.
#[derive(Debug, Default)]
pub struct InMemoryConnectivity {
    pub log: CallLog,
    hosts: Mutex<BTreeMap<String, BTreeSet<String>>>,
    /// Latencia simulada de `connect_host`.
    connect_delay: Duration,
}

impl InMemoryConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_delay(delay: Duration) -> Self {
        Self { connect_delay: delay, ..Self::default() }
    }

    pub fn hosts(&self, ident: &str) -> Vec<String> {
        lock(&self.hosts).get(ident).map(|h| h.iter().cloned().collect()).unwrap_or_default()
    }
}

#[async_trait]
impl ConnectivityService for InMemoryConnectivity {
    async fn connect_host(&self, ident: &str, host: &str) -> DomainResult<()> {
        require("host", host)?;
        self.log.check("connect_host")?;
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        lock(&self.hosts).entry(ident.to_string()).or_default().insert(host.to_string());
        self.log.record("connect_host", format!("{}/{}", ident, host));
        Ok(())
    }

    async fn disconnect_hosts_except(&self, ident: &str, keep: &[String]) -> DomainResult<Vec<String>> {
        self.log.check("disconnect_hosts_except")?;
        let removed = {
            let mut all = lock(&self.hosts);
            let current = all.entry(ident.to_string()).or_default();
            let removed: Vec<String> = current.iter().filter(|h| !keep.contains(h)).cloned().collect();
            current.retain(|h| keep.contains(h));
            removed
        };
        self.log.record("disconnect_hosts_except", ident);
        Ok(removed)
    }

    async fn notify(&self, ident: &str, request_id: &str, hosts: &[String]) -> DomainResult<()> {
        require("request_id", request_id)?;
        self.log.check("notify")?;
        self.log.record("notify", format!("{}/{}/{}", ident, request_id, hosts.join(",")));
        Ok(())
    }
}

/// Estaciones de trabajo en memoria. Mide la concurrencia máxima observada
/// en `resync_configs` para comprobar el límite de la cola de resync.
#[derive(Debug, Default)]
pub struct InMemoryWorkstations {
    pub log: CallLog,
    configs: Mutex<BTreeMap<String, WorkstationConfig>>,
    resync_delay: Duration,
    resync_running: AtomicUsize,
    resync_peak: AtomicUsize,
}

impl InMemoryWorkstations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resync_delay(delay: Duration) -> Self {
        Self { resync_delay: delay, ..Self::default() }
    }

    pub fn config(&self, ident: &str) -> Option<WorkstationConfig> {
        lock(&self.configs).get(ident).cloned()
    }

    /// Máximo de `resync_configs` simultáneos observado.
    pub fn resync_peak(&self) -> usize {
        self.resync_peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkstationService for InMemoryWorkstations {
    async fn ensure_workstation(&self, ident: &str, config: &WorkstationConfig) -> DomainResult<()> {
        require("ident", ident)?;
        config.validate()?;
        self.log.check("ensure_workstation")?;
        lock(&self.configs).insert(ident.to_string(), config.clone());
        self.log.record("ensure_workstation", format!("{}/{}", ident, config.machine_type));
        Ok(())
    }

    async fn resync_configs(&self) -> DomainResult<usize> {
        self.log.check("resync_configs")?;
        let running = self.resync_running.fetch_add(1, Ordering::SeqCst) + 1;
        self.resync_peak.fetch_max(running, Ordering::SeqCst);
        if !self.resync_delay.is_zero() {
            tokio::time::sleep(self.resync_delay).await;
        }
        self.resync_running.fetch_sub(1, Ordering::SeqCst);
        let n = lock(&self.configs).len();
        self.log.record("resync_configs", n.to_string());
        Ok(n)
    }
}
