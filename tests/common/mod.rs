//! Shared test fixture: a scripted in-memory PostgreSQL fleet.
//!
//! The simulator implements the driver seam with just enough PostgreSQL
//! semantics to exercise the orchestrator end to end: standby signals,
//! restarts that honor them, promotion, base backups that copy the source's
//! WAL position, and text-form probe results. No containers, no sockets.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pgpilot::api::AppState;
use pgpilot::config::Config;
use pgpilot::driver::{ExecError, ExecOutput, NodeDriver, SqlError, SqlRow, SqlTarget};
use pgpilot::failover::Orchestrator;
use pgpilot::topology::{Node, NodeKind, Registry};

/// One simulated PostgreSQL server.
#[derive(Debug, Clone)]
pub struct SimNode {
    pub host: String,
    pub container: String,
    pub running: bool,
    pub exec_reachable: bool,
    pub sql_reachable: bool,
    pub in_recovery: bool,
    pub standby_signal: bool,
    /// WAL bytes written (meaningful on a primary).
    pub wal_written: i64,
    /// WAL bytes received (meaningful on a standby).
    pub wal_received: i64,
    /// When set, `pg_ctl promote` exits 0 but changes nothing.
    pub ignore_promote: bool,
    /// When set, `pg_basebackup` fails.
    pub fail_basebackup: bool,
}

impl SimNode {
    fn standby(host: &str, container: &str) -> Self {
        Self {
            host: host.to_string(),
            container: container.to_string(),
            running: true,
            exec_reachable: true,
            sql_reachable: true,
            in_recovery: true,
            standby_signal: true,
            wal_written: 1_000,
            wal_received: 1_000,
            ignore_promote: false,
            fail_basebackup: false,
        }
    }

    fn primary(host: &str, container: &str) -> Self {
        Self {
            in_recovery: false,
            standby_signal: false,
            ..Self::standby(host, container)
        }
    }
}

/// The scripted fleet driver.
pub struct ClusterSim {
    nodes: Mutex<HashMap<String, SimNode>>,
    execs: AtomicUsize,
    latency: Mutex<Option<Duration>>,
}

impl ClusterSim {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            execs: AtomicUsize::new(0),
            latency: Mutex::new(None),
        })
    }

    pub fn add_standby(&self, host: &str, container: &str) {
        self.nodes
            .lock()
            .unwrap()
            .insert(host.to_string(), SimNode::standby(host, container));
    }

    pub fn add_primary(&self, host: &str, container: &str) {
        self.nodes
            .lock()
            .unwrap()
            .insert(host.to_string(), SimNode::primary(host, container));
    }

    pub fn with_node<R>(&self, host: &str, f: impl FnOnce(&mut SimNode) -> R) -> R {
        let mut nodes = self.nodes.lock().unwrap();
        f(nodes.get_mut(host).expect("unknown sim node"))
    }

    pub fn set_wal(&self, host: &str, written: i64, received: i64) {
        self.with_node(host, |n| {
            n.wal_written = written;
            n.wal_received = received;
        });
    }

    pub fn set_sql_unreachable(&self, host: &str) {
        self.with_node(host, |n| n.sql_reachable = false);
    }

    pub fn set_exec_unreachable(&self, host: &str) {
        self.with_node(host, |n| n.exec_reachable = false);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    pub fn is_in_recovery(&self, host: &str) -> bool {
        self.with_node(host, |n| n.in_recovery)
    }

    pub fn received(&self, host: &str) -> i64 {
        self.with_node(host, |n| n.wal_received)
    }

    pub fn exec_count(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    async fn maybe_sleep(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn container_key(&self, container: &str) -> Option<String> {
        self.nodes
            .lock()
            .unwrap()
            .values()
            .find(|n| n.container == container)
            .map(|n| n.host.clone())
    }
}

fn ok_output() -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: String::new(),
        stderr: String::new(),
    }
}

fn failed_output(stderr: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

fn lsn(bytes: i64) -> String {
    format!("0/{:X}", bytes)
}

fn parse_lsn(text: &str) -> i64 {
    let lo = text.rsplit('/').next().unwrap_or("0");
    i64::from_str_radix(lo, 16).unwrap_or(0)
}

#[async_trait]
impl NodeDriver for ClusterSim {
    async fn exec(
        &self,
        container: &str,
        argv: &[String],
        _deadline: Duration,
    ) -> Result<ExecOutput, ExecError> {
        self.maybe_sleep().await;
        self.execs.fetch_add(1, Ordering::SeqCst);

        let key = self.container_key(container).ok_or_else(|| {
            ExecError::Unreachable {
                container: container.to_string(),
                detail: "No such container".to_string(),
            }
        })?;
        if !self.with_node(&key, |n| n.exec_reachable) {
            return Err(ExecError::Unreachable {
                container: container.to_string(),
                detail: "is not running".to_string(),
            });
        }

        let command = argv.first().map(String::as_str).unwrap_or("");
        match command {
            "pg_ctl" => {
                let action = argv.get(1).map(String::as_str).unwrap_or("");
                match action {
                    "promote" => Ok(self.with_node(&key, |n| {
                        if n.ignore_promote {
                            ok_output()
                        } else if !n.in_recovery {
                            failed_output("pg_ctl: server is not in standby mode")
                        } else {
                            n.in_recovery = false;
                            n.standby_signal = false;
                            ok_output()
                        }
                    })),
                    "restart" => Ok(self.with_node(&key, |n| {
                        n.running = true;
                        n.in_recovery = n.standby_signal;
                        ok_output()
                    })),
                    "stop" => Ok(self.with_node(&key, |n| {
                        n.running = false;
                        ok_output()
                    })),
                    other => Ok(failed_output(&format!("pg_ctl: unknown action {}", other))),
                }
            }
            "rm" => Ok(self.with_node(&key, |n| {
                n.standby_signal = false;
                ok_output()
            })),
            "touch" => Ok(self.with_node(&key, |n| {
                n.standby_signal = true;
                ok_output()
            })),
            "pg_isready" => Ok(self.with_node(&key, |n| {
                if n.running && n.sql_reachable {
                    ok_output()
                } else {
                    failed_output("no response")
                }
            })),
            "bash" => {
                let script = argv.get(2).map(String::as_str).unwrap_or("");
                if script.contains("rm -rf") {
                    Ok(self.with_node(&key, |n| {
                        n.wal_received = 0;
                        n.standby_signal = false;
                        ok_output()
                    }))
                } else if script.contains("pg_basebackup") {
                    if self.with_node(&key, |n| n.fail_basebackup) {
                        return Ok(failed_output("pg_basebackup: could not connect to server"));
                    }
                    let source_host = script
                        .split_whitespace()
                        .skip_while(|part| *part != "-h")
                        .nth(1)
                        .unwrap_or("")
                        .to_string();
                    let source_written = self
                        .nodes
                        .lock()
                        .unwrap()
                        .values()
                        .find(|n| n.host == source_host)
                        .map(|n| n.wal_written);
                    match source_written {
                        Some(written) => Ok(self.with_node(&key, |n| {
                            n.wal_received = written;
                            // -R writes both the connection info and the
                            // standby signal.
                            n.standby_signal = true;
                            ok_output()
                        })),
                        None => Ok(failed_output("pg_basebackup: could not resolve host")),
                    }
                } else {
                    Ok(failed_output("bash: unknown script"))
                }
            }
            other => Ok(failed_output(&format!("exec: command not found: {}", other))),
        }
    }

    async fn sql(
        &self,
        target: &SqlTarget,
        statement: &str,
        _deadline: Duration,
    ) -> Result<Vec<SqlRow>, SqlError> {
        self.maybe_sleep().await;

        let reachable = {
            let nodes = self.nodes.lock().unwrap();
            match nodes.values().find(|n| n.host == target.host) {
                Some(node) => node.running && node.sql_reachable,
                None => false,
            }
        };
        if !reachable {
            return Err(SqlError::ConnRefused);
        }

        let state = self.with_node(&target.host, |n| n.clone());
        if statement.starts_with("SELECT pg_is_in_recovery") {
            let value = if state.in_recovery { "t" } else { "f" };
            Ok(vec![vec![Some(value.to_string())]])
        } else if statement.starts_with("SELECT pg_last_wal_receive_lsn") {
            Ok(vec![vec![Some(lsn(state.wal_received))]])
        } else if statement.starts_with("SELECT pg_last_wal_replay_lsn") {
            Ok(vec![vec![Some(lsn(state.wal_received))]])
        } else if statement.starts_with("SELECT pg_current_wal_lsn(), pg_wal_lsn_diff") {
            if state.in_recovery {
                return Err(SqlError::other("55000", "recovery is in progress"));
            }
            let receive = statement.split('\'').nth(1).map(parse_lsn).unwrap_or(0);
            Ok(vec![vec![
                Some(lsn(state.wal_written)),
                Some((state.wal_written - receive).to_string()),
            ]])
        } else if statement.starts_with("SELECT pg_wal_replay_resume") {
            Ok(vec![vec![Some(String::new())]])
        } else if statement == "CHECKPOINT" {
            Ok(Vec::new())
        } else {
            Err(SqlError::other("42601", format!("unexpected: {}", statement)))
        }
    }
}

/// A three-backup, one-replica fleet wired to an orchestrator.
pub struct Fixture {
    pub sim: Arc<ClusterSim>,
    pub registry: Arc<Registry>,
    pub orchestrator: Arc<Orchestrator>,
    pub config: Arc<Config>,
}

impl Fixture {
    /// Cluster with `primary` writable (or all standbys when `None`).
    pub fn cluster(primary: Option<&str>) -> Self {
        let sim = ClusterSim::new();
        let registry = Arc::new(Registry::new());

        for name in ["node1", "node2", "node3"] {
            let host = format!("pg-{}", name);
            let container = format!("postgres-{}", name);
            if primary == Some(name) {
                sim.add_primary(&host, &container);
            } else {
                sim.add_standby(&host, &container);
            }
            registry
                .insert(Node::new(name, container, host, 5432, NodeKind::Backup))
                .unwrap();
        }
        sim.add_standby("pg-replica-1", "postgres-replica-1");
        registry
            .insert(Node::new(
                "replica-1",
                "postgres-replica-1",
                "pg-replica-1",
                5432,
                NodeKind::Replica,
            ))
            .unwrap();

        let config = Arc::new(Config::default());
        let driver: Arc<dyn NodeDriver> = sim.clone();
        let orchestrator = Orchestrator::new(driver, registry.clone(), config.clone());

        Self {
            sim,
            registry,
            orchestrator,
            config,
        }
    }

    /// App state for router-level tests.
    pub fn app_state(&self) -> Arc<AppState> {
        let driver: Arc<dyn NodeDriver> = self.sim.clone();
        Arc::new(AppState {
            orchestrator: self.orchestrator.clone(),
            registry: self.registry.clone(),
            driver,
            config: self.config.clone(),
        })
    }
}
