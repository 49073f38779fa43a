//! pgpilot entry point
//!
//! Load configuration from the environment, seed the registry, start the
//! HTTP server. Any startup failure is reported as one JSON line on stderr
//! and a non-zero exit.

use std::process;
use std::sync::Arc;

use pgpilot::api::{ApiServer, AppState};
use pgpilot::config::Config;
use pgpilot::driver::{DockerDriver, NodeDriver};
use pgpilot::failover::Orchestrator;
use pgpilot::observability::log;
use pgpilot::topology::Registry;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => fatal("config", &err.to_string()),
    };

    let registry = match Registry::from_seeds(&config.initial_nodes) {
        Ok(registry) => Arc::new(registry),
        Err(err) => fatal("initial_nodes", &err.to_string()),
    };

    let driver: Arc<dyn NodeDriver> = Arc::new(DockerDriver::new(config.credentials.clone()));
    let orchestrator = Orchestrator::new(driver.clone(), registry.clone(), config.clone());

    log::info("STARTUP")
        .field("listen_addr", config.listen_addr.as_str())
        .field("nodes", registry.len())
        .emit();

    let state = Arc::new(AppState {
        orchestrator,
        registry,
        driver,
        config,
    });

    if let Err(err) = ApiServer::new(state).serve().await {
        fatal("server", &err.to_string());
    }
}

fn fatal(stage: &str, message: &str) -> ! {
    let error_json = serde_json::json!({
        "status": "error",
        "stage": stage,
        "message": message,
    });
    eprintln!("{}", error_json);
    process::exit(1);
}
