use async_trait::async_trait;
use jobs::stubs::InMemoryJobStore;
use jobs::{Job, JobFilter, JobRunner, JobSpec, JobStore, RunnerConfig, SequenceOpts, Worker, Workers};
use serde_json::json;
use std::sync::Arc;

struct Echo(&'static str);

#[async_trait]
impl Worker for Echo {
    fn kind(&self) -> &'static str {
        self.0
    }

    async fn work(&self, job: &Job) -> anyhow::Result<()> {
        println!("ejecutando {} #{} con {}", job.kind, job.id, job.args);
        Ok(())
    }
}

fn step(kind: &str, subject: &str) -> JobSpec {
    let mut spec = JobSpec::new(kind, json!({"subject": subject})).with_metadata("subject", subject);
    spec.sequence = Some(SequenceOpts::by_fields(&["subject"]).exclude_kind());
    spec
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Almacén y lote de tres pasos encadenados por secuencia
    let store = Arc::new(InMemoryJobStore::new());
    let handles = store.insert_many(vec![step("extract", "ds-1"), step("load", "ds-1"), step("publish", "ds-1")])?;
    println!("encolados: {:?}\n", handles.iter().map(|h| h.job.id).collect::<Vec<_>>());

    // Un worker por tipo; la secuencia fuerza el orden extract -> load -> publish
    let mut workers = Workers::new();
    for kind in ["extract", "load", "publish"] {
        workers.register(Echo(kind))?;
    }
    let runner = JobRunner::new(store.clone(), workers, RunnerConfig::default());
    let stats = runner.run_until_idle().await?;
    println!("\nresultado: {:?}", stats);

    for job in store.list(&JobFilter::new().metadata("subject", "ds-1"))? {
        println!("{} #{} -> {}", job.kind, job.id, job.state);
    }
    Ok(())
}
