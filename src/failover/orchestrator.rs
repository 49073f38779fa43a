//! Failover orchestrator
//!
//! Runs the promote and demote workflows against live nodes and owns every
//! topology mutation. The concurrency contract:
//!
//! - each mutating operation holds the operation lock for its whole run;
//! - each runs inside its own spawned task with a global deadline, so a
//!   client that gives up does not cancel the work; `/status` stays the
//!   source of truth for what actually happened;
//! - topology role hints change only in the finalize step, never mid-flight.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::{sleep, timeout, Instant};

use super::errors::{OpError, OpErrorKind, OpResult};
use super::lock::OperationLock;
use super::steps::{DemoteStep, PromoteStep};
use crate::config::{Config, NodeSeed};
use crate::driver::{NodeDriver, SqlTarget};
use crate::observability::log;
use crate::probe;
use crate::topology::{observe_all, Node, NodeKind, Registry, RegistryError, RoleHint};

/// Budget for the post-promote "target left recovery" poll.
const VERIFY_PRIMARY_BUDGET: Duration = Duration::from_secs(30);
/// Budget for a rebuilt standby to come back in recovery.
const REATTACH_BUDGET: Duration = Duration::from_secs(60);
/// Budget for a demoted node to report recovery.
const DEMOTE_VERIFY_BUDGET: Duration = Duration::from_secs(30);
/// Pacing between verification polls.
const POLL_PACING: Duration = Duration::from_secs(2);
/// `pg_basebackup` copies a full data directory; it gets more room than an
/// ordinary step.
const BASEBACKUP_DEADLINE: Duration = Duration::from_secs(60);
/// Registry operations hold the lock only briefly.
const REGISTRY_OP_BUDGET: Duration = Duration::from_secs(10);

/// Result of a successful promote.
#[derive(Debug, Clone, Serialize)]
pub struct PromoteOutcome {
    pub new_primary: String,
    /// True when the target already was primary and nothing was touched.
    pub already_primary: bool,
    /// Standbys that failed to re-attach, one message each. Non-empty
    /// warnings mean a partial reconfiguration, not a failed promote.
    pub warnings: Vec<String>,
}

/// Per-node failure inside a demote-all.
#[derive(Debug, Clone, Serialize)]
pub struct NodeFailure {
    pub node: String,
    pub reason: String,
}

/// Result of a demote-all.
#[derive(Debug, Clone, Serialize)]
pub struct DemoteReport {
    pub demoted: Vec<String>,
    /// Replicas are pinned standbys; demotion is a no-op for them.
    pub skipped: Vec<String>,
    pub failed: Vec<NodeFailure>,
}

/// Host record as rendered in registry responses.
#[derive(Debug, Clone, Serialize)]
pub struct HostDoc {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub kind: NodeKind,
    pub container: String,
}

impl From<&Node> for HostDoc {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            host: node.host.clone(),
            port: node.port,
            kind: node.kind,
            container: node.container.clone(),
        }
    }
}

pub struct Orchestrator {
    driver: Arc<dyn NodeDriver>,
    registry: Arc<Registry>,
    lock: Arc<OperationLock>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        driver: Arc<dyn NodeDriver>,
        registry: Arc<Registry>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            driver,
            registry,
            lock: OperationLock::new(),
            config,
        })
    }

    pub fn lock(&self) -> &Arc<OperationLock> {
        &self.lock
    }

    // =========================================================================
    // PUBLIC OPERATIONS
    // =========================================================================

    /// Promote `target` to primary. Fails fast with BUSY on contention.
    pub async fn promote(self: &Arc<Self>, target: String) -> OpResult<PromoteOutcome> {
        self.run_locked("promote", self.config.promote_deadline, move |this| {
            async move { this.run_promote(&target).await }
        })
        .await
    }

    /// Converge the whole fleet to standbys (NO_PRIMARY).
    pub async fn demote_all(self: &Arc<Self>) -> OpResult<DemoteReport> {
        self.run_locked("demote_all", self.config.demote_deadline, move |this| {
            async move { this.run_demote_all().await }
        })
        .await
    }

    /// Demote a single backup to standby.
    pub async fn demote_one(self: &Arc<Self>, target: String) -> OpResult<String> {
        self.run_locked("demote", self.config.demote_deadline, move |this| {
            async move { this.run_demote_one(&target).await }
        })
        .await
    }

    /// Register a node. No PostgreSQL side effects; the node merely becomes
    /// visible to subsequent status and promote calls.
    pub async fn add_host(&self, seed: NodeSeed) -> OpResult<HostDoc> {
        let _guard = self
            .lock
            .try_acquire("add_host", REGISTRY_OP_BUDGET)
            .map_err(OpError::busy)?;

        let node = Node::from_seed(&seed);
        let doc = HostDoc::from(&node);
        self.registry.insert(node).map_err(|err| match err {
            RegistryError::Duplicate { .. } => OpError::duplicate(err.to_string()),
            RegistryError::NotFound { .. } => OpError::internal(err.to_string()),
        })?;

        log::info("HOST_ADDED")
            .field("name", doc.name.as_str())
            .field("kind", doc.kind.as_str())
            .emit();
        Ok(doc)
    }

    /// Unregister a node by name, host, or container. Refused while the
    /// node is the current primary.
    pub async fn delete_host(&self, identifier: &str) -> OpResult<HostDoc> {
        let _guard = self
            .lock
            .try_acquire("delete_host", REGISTRY_OP_BUDGET)
            .map_err(OpError::busy)?;

        let node = self
            .registry
            .resolve(identifier)
            .ok_or_else(|| OpError::not_found(identifier))?;

        if let Ok(true) =
            probe::is_primary(self.driver.as_ref(), &node.sql_target(), self.config.probe_deadline)
                .await
        {
            return Err(OpError::invalid_target(format!(
                "node {} is the current primary; promote another node first",
                node.name
            )));
        }

        let removed = self
            .registry
            .remove(&node.name)
            .map_err(|err| OpError::internal(err.to_string()))?;
        log::info("HOST_DELETED")
            .field("name", removed.name.as_str())
            .emit();
        Ok(HostDoc::from(&removed))
    }

    // =========================================================================
    // LOCK + DEADLINE HARNESS
    // =========================================================================

    /// Acquire the lock, then run `work` in a spawned task under the global
    /// budget. The guard lives inside the task: the lock is released when
    /// the work finishes or the deadline abandons it, regardless of whether
    /// any client is still listening.
    async fn run_locked<T, F, Fut>(
        self: &Arc<Self>,
        operation: &'static str,
        budget: Duration,
        work: F,
    ) -> OpResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Arc<Orchestrator>) -> Fut + Send + 'static,
        Fut: Future<Output = OpResult<T>> + Send + 'static,
    {
        let guard = self
            .lock
            .try_acquire(operation, budget)
            .map_err(OpError::busy)?;
        let operation_id = guard.id;
        log::info("OPERATION_START")
            .field("operation", operation)
            .field("operation_id", operation_id)
            .emit();

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let _guard = guard;
            match timeout(budget, work(this)).await {
                Ok(result) => result,
                Err(_) => {
                    // The in-flight step keeps running in the container; its
                    // result is ignored. /status describes what came of it.
                    log::warn("OPERATION_DEADLINE")
                        .field("operation", operation)
                        .emit();
                    Err(OpError::deadline(operation, budget))
                }
            }
        });

        let result = handle
            .await
            .unwrap_or_else(|err| Err(OpError::internal(format!("{} task failed: {}", operation, err))));

        match &result {
            Ok(_) => log::info("OPERATION_COMPLETE")
                .field("operation", operation)
                .field("operation_id", operation_id)
                .emit(),
            Err(err) => log::error("OPERATION_FAILED")
                .field("operation", operation)
                .field("operation_id", operation_id)
                .field("error", err.kind.as_str())
                .emit(),
        }
        result
    }

    // =========================================================================
    // PROMOTE WORKFLOW
    // =========================================================================

    async fn run_promote(&self, target_name: &str) -> OpResult<PromoteOutcome> {
        let probe_deadline = self.config.probe_deadline;
        let step_deadline = self.config.step_deadline;

        // Preconditions, checked before any mutation.
        let target = self
            .registry
            .get(target_name)
            .ok_or_else(|| OpError::invalid_target(format!("unknown node {:?}", target_name)))?;
        if !target.kind.is_promotable() {
            return Err(OpError::invalid_target(format!(
                "node {} is a replica and is pinned read-only",
                target.name
            )));
        }
        let target_sql = target.sql_target();

        let target_is_primary =
            probe::is_primary(self.driver.as_ref(), &target_sql, probe_deadline)
                .await
                .map_err(|err| OpError::unreachable(&target.name, err))?;
        if target_is_primary {
            log::info("PROMOTE_NOOP").field("target", target_name).emit();
            return Ok(PromoteOutcome {
                new_primary: target.name.clone(),
                already_primary: true,
                warnings: Vec::new(),
            });
        }

        let nodes = self.registry.list();
        let observations = observe_all(self.driver.as_ref(), &nodes, probe_deadline).await;
        let current_primary = observations
            .iter()
            .find(|o| o.connected && o.is_primary)
            .map(|o| o.node.clone());

        // The lag gate: the system's central safety invariant. A standby is
        // promotable only when it has received every byte the primary has
        // written as of this instant; the diff is computed by the primary
        // itself in a single statement. No primary means a forced election
        // and the gate is skipped.
        if let Some(primary) = &current_primary {
            let receive = probe::receive_lsn(self.driver.as_ref(), &target_sql, probe_deadline)
                .await
                .map_err(|err| OpError::unreachable(&target.name, err))?
                .unwrap_or_else(|| probe::ZERO_LSN.to_string());
            let (primary_lsn, gap) = probe::wal_gap(
                self.driver.as_ref(),
                &primary.sql_target(),
                &receive,
                probe_deadline,
            )
            .await
            .map_err(|err| OpError::unreachable(&primary.name, err))?;

            log::info("PROMOTE_GATE")
                .field("target", target_name)
                .field("primary", primary.name.as_str())
                .field("gap_bytes", gap)
                .emit();
            if gap > 0 {
                return Err(OpError::lag_too_high(gap, &primary_lsn, &receive));
            }
        } else {
            log::warn("PROMOTE_GATE_SKIPPED")
                .field("target", target_name)
                .field("reason", "no reachable primary")
                .emit();
        }

        let mut warnings: Vec<String> = Vec::new();
        let mut standbys: Vec<String> = Vec::new();

        let mut step = Some(PromoteStep::FIRST);
        while let Some(current) = step {
            log::info("PROMOTE_STEP")
                .field("step", current.name())
                .field("target", target_name)
                .emit();
            match current {
                PromoteStep::Quiesce => {
                    // Best-effort: an unreachable old primary is skipped and
                    // rebuilt during reconfigure like any other standby.
                    if let Some(primary) = &current_primary {
                        let _ = self
                            .driver
                            .sql(&primary.sql_target(), "CHECKPOINT", step_deadline)
                            .await;
                        if let Err(err) = self.demote_node(primary).await {
                            warnings
                                .push(format!("quiesce of {} incomplete: {}", primary.name, err));
                        }
                    }
                }
                PromoteStep::ResumeReplay => {
                    self.driver
                        .sql(&target_sql, "SELECT pg_wal_replay_resume()", step_deadline)
                        .await
                        .map_err(|err| OpError::promote_failed(current.name(), err))?;
                }
                PromoteStep::ClearStandbySignal => {
                    let output = self
                        .driver
                        .exec(&target.container, &self.argv_rm_standby_signal(), step_deadline)
                        .await
                        .map_err(|err| OpError::promote_failed(current.name(), err))?;
                    if !output.success() {
                        return Err(OpError::promote_failed(
                            current.name(),
                            output.stderr.trim(),
                        ));
                    }
                }
                PromoteStep::Promote => {
                    let output = self
                        .driver
                        .exec(&target.container, &self.argv_pg_ctl_promote(), step_deadline)
                        .await
                        .map_err(|err| OpError::promote_failed(current.name(), err))?;
                    if !output.success() {
                        return Err(OpError::promote_failed(
                            current.name(),
                            output.stderr.trim(),
                        ));
                    }
                }
                PromoteStep::Verify => {
                    if !self.wait_for_primary(&target_sql, VERIFY_PRIMARY_BUDGET).await {
                        return Err(OpError::promote_failed(
                            current.name(),
                            "target did not leave recovery within the verification budget",
                        ));
                    }
                }
                PromoteStep::Reconfigure => {
                    for observation in observations.iter().filter(|o| o.name != target.name) {
                        if !observation.connected {
                            warnings.push(format!(
                                "{} was unreachable and was not reconfigured",
                                observation.name
                            ));
                            continue;
                        }
                        match self.rebuild_standby(&observation.node, &target).await {
                            Ok(()) => standbys.push(observation.name.clone()),
                            Err(reason) => {
                                warnings.push(format!("{}: {}", observation.name, reason))
                            }
                        }
                    }
                }
                PromoteStep::Finalize => {
                    self.registry.apply_roles(Some(&target.name), &standbys);
                }
            }
            step = current.next();
        }

        log::info("PROMOTE_COMPLETE")
            .field("new_primary", target_name)
            .field("warnings", warnings.len())
            .emit();
        Ok(PromoteOutcome {
            new_primary: target.name.clone(),
            already_primary: false,
            warnings,
        })
    }

    /// Rebuild one node as a standby of `new_primary`: stop, wipe the data
    /// directory, base-backup from the new primary, start, and wait for it
    /// to come back in recovery. Errors are returned as plain reasons; the
    /// caller records them as warnings and moves on.
    async fn rebuild_standby(&self, node: &Node, new_primary: &Node) -> Result<(), String> {
        let step_deadline = self.config.step_deadline;

        // A failed stop is tolerated; the server may already be down.
        let _ = self
            .driver
            .exec(&node.container, &self.argv_pg_ctl_stop(), step_deadline)
            .await;

        let wipe = self
            .driver
            .exec(&node.container, &self.argv_wipe_pgdata(), step_deadline)
            .await
            .map_err(|err| format!("wipe failed: {}", err))?;
        if !wipe.success() {
            return Err(format!("wipe failed: {}", wipe.stderr.trim()));
        }

        let backup = self
            .driver
            .exec(
                &node.container,
                &self.argv_basebackup(&new_primary.host),
                BASEBACKUP_DEADLINE,
            )
            .await
            .map_err(|err| format!("pg_basebackup failed: {}", err))?;
        if !backup.success() {
            return Err(format!("pg_basebackup failed: {}", backup.stderr.trim()));
        }

        if node.kind == NodeKind::Replica {
            // -R already wrote the standby config; for pinned replicas the
            // signal file is written again as the authoritative marker.
            let touch = self
                .driver
                .exec(&node.container, &self.argv_touch_standby_signal(), step_deadline)
                .await
                .map_err(|err| format!("standby signal failed: {}", err))?;
            if !touch.success() {
                return Err(format!("standby signal failed: {}", touch.stderr.trim()));
            }
        }

        // restart also starts a stopped server, with a warning instead of a
        // failure, so its exit code is not checked here.
        self.driver
            .exec(&node.container, &self.argv_pg_ctl_restart(), step_deadline)
            .await
            .map_err(|err| format!("start failed: {}", err))?;

        if !self.wait_for_standby(node, REATTACH_BUDGET).await {
            return Err("did not re-attach as a standby within the budget".to_string());
        }
        Ok(())
    }

    // =========================================================================
    // DEMOTE WORKFLOWS
    // =========================================================================

    async fn run_demote_all(&self) -> OpResult<DemoteReport> {
        let observations = observe_all(
            self.driver.as_ref(),
            &self.registry.list(),
            self.config.probe_deadline,
        )
        .await;
        let was_primary: Vec<String> = observations
            .iter()
            .filter(|o| o.connected && o.is_primary)
            .map(|o| o.name.clone())
            .collect();

        let mut demoted: Vec<String> = Vec::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut failed: Vec<NodeFailure> = Vec::new();

        for observation in &observations {
            if observation.kind == NodeKind::Replica {
                skipped.push(observation.name.clone());
                continue;
            }
            if !observation.connected {
                failed.push(NodeFailure {
                    node: observation.name.clone(),
                    reason: "unreachable".to_string(),
                });
                continue;
            }
            match self.demote_node(&observation.node).await {
                Ok(()) => demoted.push(observation.name.clone()),
                Err(err) => failed.push(NodeFailure {
                    node: observation.name.clone(),
                    reason: err.message,
                }),
            }
        }

        // The operation succeeds iff every node that was primary going in is
        // a standby coming out; other per-node failures are reported but do
        // not fail the convergence.
        let stranded: Vec<String> = was_primary
            .iter()
            .filter(|name| !demoted.contains(name))
            .cloned()
            .collect();
        if !stranded.is_empty() {
            return Err(OpError::demote_failed(
                format!(
                    "previously-primary nodes still writable: {}",
                    stranded.join(", ")
                ),
                json!({
                    "stranded": stranded,
                    "failures": serde_json::to_value(&failed).unwrap_or(Value::Null),
                }),
            ));
        }

        let mut standbys = demoted.clone();
        standbys.extend(
            observations
                .iter()
                .filter(|o| o.kind == NodeKind::Replica && o.connected)
                .map(|o| o.name.clone()),
        );
        self.registry.apply_roles(None, &standbys);

        Ok(DemoteReport {
            demoted,
            skipped,
            failed,
        })
    }

    async fn run_demote_one(&self, identifier: &str) -> OpResult<String> {
        let node = self
            .registry
            .get(identifier)
            .ok_or_else(|| OpError::invalid_target(format!("unknown node {:?}", identifier)))?;
        if node.kind == NodeKind::Replica {
            return Err(OpError::invalid_target(format!(
                "node {} is a replica and is always a standby",
                node.name
            )));
        }
        self.demote_node(&node).await?;
        self.registry.set_role(&node.name, RoleHint::Standby);
        Ok(node.name)
    }

    /// Demote one node: write the standby signal, restart, verify recovery.
    async fn demote_node(&self, node: &Node) -> OpResult<()> {
        let step_deadline = self.config.step_deadline;

        let mut step = Some(DemoteStep::FIRST);
        while let Some(current) = step {
            log::info("DEMOTE_STEP")
                .field("step", current.name())
                .field("node", node.name.as_str())
                .emit();
            match current {
                DemoteStep::WriteStandbySignal => {
                    let output = self
                        .driver
                        .exec(&node.container, &self.argv_touch_standby_signal(), step_deadline)
                        .await
                        .map_err(|err| demote_step_error(node, current, err))?;
                    if !output.success() {
                        return Err(demote_step_error(node, current, output.stderr.trim()));
                    }
                }
                DemoteStep::Restart => {
                    self.driver
                        .exec(&node.container, &self.argv_pg_ctl_restart(), step_deadline)
                        .await
                        .map_err(|err| demote_step_error(node, current, err))?;
                }
                DemoteStep::Verify => {
                    if !self.wait_for_standby(node, DEMOTE_VERIFY_BUDGET).await {
                        return Err(demote_step_error(
                            node,
                            current,
                            "still writable after restart",
                        ));
                    }
                }
            }
            step = current.next();
        }
        Ok(())
    }

    // =========================================================================
    // VERIFICATION POLLS
    // =========================================================================

    /// Poll until the target reports it left recovery, within `budget`.
    async fn wait_for_primary(&self, target: &SqlTarget, budget: Duration) -> bool {
        let started = Instant::now();
        loop {
            if let Ok(true) =
                probe::is_primary(self.driver.as_ref(), target, self.config.probe_deadline).await
            {
                return true;
            }
            if started.elapsed() + POLL_PACING > budget {
                return false;
            }
            sleep(POLL_PACING).await;
        }
    }

    /// Poll until the node accepts connections and reports recovery.
    async fn wait_for_standby(&self, node: &Node, budget: Duration) -> bool {
        let started = Instant::now();
        loop {
            // Readiness first: the server may still be restarting.
            if let Ok(ready) = self
                .driver
                .exec(&node.container, &self.argv_pg_isready(), self.config.probe_deadline)
                .await
            {
                if ready.success() {
                    if let Ok(false) = probe::is_primary(
                        self.driver.as_ref(),
                        &node.sql_target(),
                        self.config.probe_deadline,
                    )
                    .await
                    {
                        return true;
                    }
                }
            }
            if started.elapsed() + POLL_PACING > budget {
                return false;
            }
            sleep(POLL_PACING).await;
        }
    }

    // =========================================================================
    // EXEC COMMAND TABLES
    // =========================================================================

    fn argv_pg_ctl_promote(&self) -> Vec<String> {
        string_argv(&["pg_ctl", "promote", "-D", &self.config.pgdata])
    }

    fn argv_pg_ctl_restart(&self) -> Vec<String> {
        string_argv(&["pg_ctl", "restart", "-D", &self.config.pgdata, "-m", "fast"])
    }

    fn argv_pg_ctl_stop(&self) -> Vec<String> {
        string_argv(&["pg_ctl", "stop", "-D", &self.config.pgdata, "-m", "fast"])
    }

    fn argv_rm_standby_signal(&self) -> Vec<String> {
        string_argv(&["rm", "-f", &format!("{}/standby.signal", self.config.pgdata)])
    }

    fn argv_touch_standby_signal(&self) -> Vec<String> {
        string_argv(&["touch", &format!("{}/standby.signal", self.config.pgdata)])
    }

    fn argv_wipe_pgdata(&self) -> Vec<String> {
        // The glob needs a shell; used only during standby rebuild.
        string_argv(&["bash", "-c", &format!("rm -rf {}/*", self.config.pgdata)])
    }

    fn argv_basebackup(&self, primary_host: &str) -> Vec<String> {
        let credentials = &self.config.credentials;
        string_argv(&[
            "bash",
            "-c",
            &format!(
                "PGPASSWORD={} pg_basebackup -h {} -D {} -U {} -P -R",
                credentials.password, primary_host, self.config.pgdata, credentials.user
            ),
        ])
    }

    fn argv_pg_isready(&self) -> Vec<String> {
        string_argv(&["pg_isready", "-U", &self.config.credentials.user])
    }
}

fn string_argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn demote_step_error(node: &Node, step: DemoteStep, detail: impl std::fmt::Display) -> OpError {
    OpError::new(
        OpErrorKind::DemoteFailed,
        format!("{}: {} failed: {}", node.name, step.name(), detail),
    )
}
