use provisioning::{InMemoryConnectivity, InMemoryMetabase, InMemoryWorkstations, WorkstationConfig};
use std::error::Error;
use std::io::{self, Write};
use std::sync::Arc;
use tokio::sync::watch;
use workflows::args::WorkstationArgs;
use workflows::{Capabilities, ConnectivityOpts, RestrictedDatabaseOpts, WorkflowConfig, WorkflowService,
                WorkstationOpts};

/// Pequeño menú interactivo para enviar workflows y consultar su estado.
///
/// El almacén es SQLite si `JOBS_DB_URL`/`DATABASE_URL` está definido y en
/// memoria en otro caso. Las capacidades externas son los stubs en memoria
/// de `provisioning`. El runner corre en segundo plano mientras el menú
/// está abierto.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = WorkflowConfig::from_env()?;
    let store: Arc<dyn jobs::JobStore> = match &config.database_url {
        Some(url) => {
            log::info!("usando almacén SQLite en {}", url);
            Arc::new(jobs_persistence::new_from_env()?)
        }
        None => {
            log::info!("sin JOBS_DB_URL: usando almacén en memoria");
            Arc::new(jobs::InMemoryJobStore::new())
        }
    };
    let svc = WorkflowService::new(store, config);
    let caps = Capabilities { metabase: Arc::new(InMemoryMetabase::new()),
                              connectivity: Arc::new(InMemoryConnectivity::new()),
                              workstations: Arc::new(InMemoryWorkstations::new()) };
    let runner = svc.runner(&caps)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner_task = tokio::spawn(async move { runner.run(shutdown_rx).await });

    loop {
        println!("\n== Workflows ==");
        println!("1) Enviar base restringida");
        println!("2) Enviar cambio de conectividad");
        println!("3) Enviar cambio de estación de trabajo");
        println!("4) Enviar resync de configuraciones");
        println!("5) Estado de base restringida");
        println!("6) Estado de conectividad");
        println!("7) Estado y cambios de estación de trabajo");
        println!("8) Salir");
        let choice = prompt("Elige una opción: ")?;
        match choice.trim() {
            "1" => {
                let ds = prompt("Dataset id: ")?;
                let project = prompt("Proyecto destino: ")?;
                match svc.submit_restricted_database(&RestrictedDatabaseOpts::for_dataset(ds.trim(), project.trim())) {
                    Ok(h) if h.duplicate => println!("Ya en curso: trabajos {:?}", h.job_ids),
                    Ok(h) => println!("Encolado: trabajos {:?}", h.job_ids),
                    Err(e) => eprintln!("Error enviando: {}", e),
                }
            }
            "2" => {
                let ident = prompt("Usuario: ")?;
                let hosts = prompt("Hosts separados por comas: ")?;
                let opts = ConnectivityOpts { ident: ident.trim().to_string(),
                                              hosts: split_list(&hosts),
                                              request_id: None };
                match svc.submit_connectivity(&opts) {
                    Ok(h) => println!("Petición {} encolada: trabajos {:?} (duplicado: {})",
                                      h.request_id.unwrap_or_default(), h.job_ids, h.duplicate),
                    Err(e) => eprintln!("Error enviando: {}", e),
                }
            }
            "3" => {
                let ident = prompt("Usuario: ")?;
                let machine = prompt("Tipo de máquina: ")?;
                let image = prompt("Imagen de contenedor: ")?;
                let urls = prompt("URLs permitidas (comas, enter para ninguna): ")?;
                let mut config = WorkstationConfig::new(machine.trim(), image.trim());
                config.url_allow_list = split_list(&urls);
                match svc.submit_workstation(&WorkstationOpts { ident: ident.trim().to_string(), config }) {
                    Ok(h) => println!("Trabajos {:?} (duplicado: {})", h.job_ids, h.duplicate),
                    Err(e) => eprintln!("Error enviando: {}", e),
                }
            }
            "4" => {
                let reason = prompt("Motivo: ")?;
                match svc.submit_config_resync(reason.trim()) {
                    Ok(h) => println!("Trabajos {:?} (duplicado: {})", h.job_ids, h.duplicate),
                    Err(e) => eprintln!("Error enviando: {}", e),
                }
            }
            "5" => {
                let ds = prompt("Dataset id: ")?;
                match svc.restricted_database_status(ds.trim()) {
                    Ok(status) => {
                        println!("Estado global: {:?}", status.overall());
                        for (kind, step) in &status.steps {
                            match step {
                                Ok(s) => println!("  {:<22} {:?} (intento {}) {:?}", kind, s.state, s.attempt, s.errors),
                                Err(_) => println!("  {:<22} pendiente", kind),
                            }
                        }
                    }
                    Err(e) => eprintln!("Error consultando: {}", e),
                }
            }
            "6" => {
                let ident = prompt("Usuario: ")?;
                match svc.connectivity_status(ident.trim()) {
                    Ok(status) => {
                        println!("Petición: {}", status.request_id.as_deref().unwrap_or("-"));
                        println!("Estado global: {:?}", status.overall());
                        for c in &status.connects {
                            println!("  connect {} {:?}", c.args["host"], c.state);
                        }
                    }
                    Err(e) => eprintln!("Error consultando: {}", e),
                }
            }
            "7" => {
                let ident = prompt("Usuario: ")?;
                match svc.workstation_status(ident.trim()) {
                    Ok(s) => println!("Último cambio: trabajo {} {:?}", s.job_id, s.state),
                    Err(e) => eprintln!("{}", e),
                }
                match svc.workstation_changes(ident.trim(), 20) {
                    Ok(changes) => {
                        for c in changes {
                            println!("  {} (trabajo {} -> {}):", c.changed_at, c.older_job_id, c.newer_job_id);
                            for (field, d) in &c.diff {
                                println!("    {}: +{:?} -{:?}", field, d.added, d.removed);
                            }
                        }
                    }
                    Err(e) => eprintln!("Error consultando historial: {}", e),
                }
                if let Ok(history) = svc.step_history::<WorkstationArgs>(ident.trim(), 1) {
                    if let Some(last) = history.last() {
                        println!("Configuración actual: {:?}", last.args.config);
                    }
                }
            }
            "8" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    shutdown_tx.send(true)?;
    runner_task.await??;
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
