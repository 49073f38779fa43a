//! Startup configuration
//!
//! All configuration is read once from the environment at process start and
//! is immutable afterwards. Credentials in particular are never accepted on
//! the wire; every SQL session the service opens uses the single triple
//! loaded here.

use std::env;
use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::topology::NodeKind;

/// Default data directory inside the PostgreSQL containers.
const DEFAULT_PGDATA: &str = "/var/lib/postgresql/data";

/// The `(user, password, database)` triple used for every SQL session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
    pub database: String,
}

/// A node record loaded at startup from `INITIAL_NODES`.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSeed {
    pub name: String,
    #[serde(default)]
    pub container: Option<String>,
    pub host: String,
    pub port: u16,
    pub kind: NodeKind,
}

impl NodeSeed {
    /// Container name, defaulting to `postgres-<name>` when not given.
    pub fn container_name(&self) -> String {
        self.container
            .clone()
            .unwrap_or_else(|| format!("postgres-{}", self.name))
    }
}

/// Process-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP bind address.
    pub listen_addr: String,

    /// SQL credentials for every probe and orchestrated statement.
    pub credentials: Credentials,

    /// Threshold for the HEALTHY verdict: a standby further behind than
    /// this many bytes degrades the cluster.
    pub healthy_lag_bytes: i64,

    /// Global budget for a promote operation.
    pub promote_deadline: Duration,

    /// Global budget for a demote-all operation.
    pub demote_deadline: Duration,

    /// Per-node budget for a single status probe.
    pub probe_deadline: Duration,

    /// Budget for one orchestration step (a single exec or SQL call).
    pub step_deadline: Duration,

    /// Data directory inside the PostgreSQL containers.
    pub pgdata: String,

    /// Nodes known at startup.
    pub initial_nodes: Vec<NodeSeed>,
}

/// Configuration loading failure.
#[derive(Debug)]
pub struct ConfigError {
    variable: String,
    message: String,
}

impl ConfigError {
    fn new(variable: &str, message: impl Into<String>) -> Self {
        Self {
            variable: variable.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.variable, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5001".to_string(),
            credentials: Credentials {
                user: "postgres".to_string(),
                password: String::new(),
                database: "postgres".to_string(),
            },
            healthy_lag_bytes: 1_048_576,
            promote_deadline: Duration::from_secs(180),
            demote_deadline: Duration::from_secs(120),
            probe_deadline: Duration::from_secs(5),
            step_deadline: Duration::from_secs(30),
            pgdata: DEFAULT_PGDATA.to_string(),
            initial_nodes: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Unset variables fall back to defaults; malformed values are an error
    /// rather than a silent fallback.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(addr) = env::var("LISTEN_ADDR") {
            // The short `:5001` form binds all interfaces.
            config.listen_addr = if let Some(port) = addr.strip_prefix(':') {
                format!("0.0.0.0:{}", port)
            } else {
                addr
            };
        }

        if let Ok(user) = env::var("DB_USER") {
            config.credentials.user = user;
        }
        if let Ok(password) = env::var("DB_PASSWORD") {
            config.credentials.password = password;
        }
        if let Ok(database) = env::var("DB_NAME") {
            config.credentials.database = database;
        }
        if let Ok(pgdata) = env::var("PGDATA_PATH") {
            config.pgdata = pgdata;
        }

        if let Ok(raw) = env::var("HEALTHY_LAG_BYTES") {
            config.healthy_lag_bytes = raw
                .parse::<i64>()
                .map_err(|e| ConfigError::new("HEALTHY_LAG_BYTES", e.to_string()))?;
        }

        config.promote_deadline = read_seconds("PROMOTE_DEADLINE_SECONDS", config.promote_deadline)?;
        config.demote_deadline = read_seconds("DEMOTE_DEADLINE_SECONDS", config.demote_deadline)?;
        config.probe_deadline = read_seconds("PROBE_DEADLINE_SECONDS", config.probe_deadline)?;
        config.step_deadline = read_seconds("STEP_DEADLINE_SECONDS", config.step_deadline)?;

        if let Ok(raw) = env::var("INITIAL_NODES") {
            config.initial_nodes = serde_json::from_str(&raw)
                .map_err(|e| ConfigError::new("INITIAL_NODES", e.to_string()))?;
        }

        Ok(config)
    }
}

fn read_seconds(variable: &str, fallback: Duration) -> Result<Duration, ConfigError> {
    match env::var(variable) {
        Ok(raw) => {
            let seconds = raw
                .parse::<u64>()
                .map_err(|e| ConfigError::new(variable, e.to_string()))?;
            if seconds == 0 {
                return Err(ConfigError::new(variable, "must be non-zero"));
            }
            Ok(Duration::from_secs(seconds))
        }
        Err(_) => Ok(fallback),
    }
}
