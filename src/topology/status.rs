//! Status and overview documents
//!
//! Built fresh on every request: fan out one probe per node in parallel,
//! each with its own deadline, then aggregate. A node that cannot be
//! reached shows up as `connected: false` with role UNKNOWN. A torn
//! topology mid-failover is reported faithfully, never smoothed over.

use std::collections::BTreeMap;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;

use super::node::{Node, NodeKind, RoleHint};
use super::registry::Registry;
use crate::driver::NodeDriver;
use crate::probe;

/// Result of probing one node.
#[derive(Debug, Clone)]
pub struct NodeObservation {
    pub name: String,
    pub container: String,
    pub port: u16,
    pub kind: NodeKind,
    pub connected: bool,
    pub is_primary: bool,
    pub node: Node,
}

impl NodeObservation {
    pub fn role(&self) -> RoleHint {
        if !self.connected {
            RoleHint::Unknown
        } else if self.is_primary {
            RoleHint::Primary
        } else {
            RoleHint::Standby
        }
    }
}

/// Per-node entry of the `Status` document.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatusDoc {
    pub is_primary: bool,
    pub container: String,
    pub port: u16,
    pub connected: bool,
    pub role: RoleHint,
}

/// The `GET /status` document.
#[derive(Debug, Serialize)]
pub struct StatusDoc {
    pub nodes: BTreeMap<String, NodeStatusDoc>,
}

/// Replication gap of one standby, as computed by the primary.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicationGap {
    pub gap_bytes: i64,
    pub primary_lsn: String,
    pub receive_lsn: String,
}

/// Per-node entry of the `Overview` document.
#[derive(Debug, Serialize)]
pub struct OverviewNodeDoc {
    #[serde(flatten)]
    pub status: NodeStatusDoc,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_gap: Option<ReplicationGap>,
}

/// Cluster-level verdict. Downstream consumers should treat any value they
/// do not recognize as DEGRADED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterVerdict {
    Healthy,
    NoPrimary,
    SplitBrain,
    Degraded,
}

impl ClusterVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterVerdict::Healthy => "HEALTHY",
            ClusterVerdict::NoPrimary => "NO_PRIMARY",
            ClusterVerdict::SplitBrain => "SPLIT_BRAIN",
            ClusterVerdict::Degraded => "DEGRADED",
        }
    }
}

/// The `GET /overview` document.
#[derive(Debug, Serialize)]
pub struct OverviewDoc {
    pub nodes: BTreeMap<String, OverviewNodeDoc>,
    pub primary_node: Option<String>,
    pub cluster_status: ClusterVerdict,
}

/// Input to the verdict computation, one entry per registered node.
#[derive(Debug, Clone)]
pub struct VerdictInput {
    pub connected: bool,
    pub is_primary: bool,
    /// Gap in bytes for a connected standby; `None` when it could not be
    /// determined.
    pub gap_bytes: Option<i64>,
}

/// The four-value cluster verdict.
///
/// - HEALTHY: exactly one reachable primary, everything else reachable and
///   within the lag threshold.
/// - NO_PRIMARY: zero reachable primaries.
/// - SPLIT_BRAIN: two or more reachable primaries.
/// - DEGRADED: one primary, but a node is unreachable or a standby is
///   lagging (or its lag is unknown).
pub fn cluster_verdict(inputs: &[VerdictInput], healthy_lag_bytes: i64) -> ClusterVerdict {
    let primaries = inputs.iter().filter(|i| i.connected && i.is_primary).count();
    if primaries == 0 {
        return ClusterVerdict::NoPrimary;
    }
    if primaries > 1 {
        return ClusterVerdict::SplitBrain;
    }

    let unreachable = inputs.iter().any(|i| !i.connected);
    let lagging = inputs
        .iter()
        .filter(|i| i.connected && !i.is_primary)
        .any(|i| i.gap_bytes.map_or(true, |gap| gap > healthy_lag_bytes));

    if unreachable || lagging {
        ClusterVerdict::Degraded
    } else {
        ClusterVerdict::Healthy
    }
}

/// Probe one node within its own deadline.
pub async fn observe_node(
    driver: &dyn NodeDriver,
    node: &Node,
    deadline: Duration,
) -> NodeObservation {
    let probed = probe::is_primary(driver, &node.sql_target(), deadline).await;
    let (connected, is_primary) = match probed {
        Ok(primary) => (true, primary),
        Err(_) => (false, false),
    };
    NodeObservation {
        name: node.name.clone(),
        container: node.container.clone(),
        port: node.port,
        kind: node.kind,
        connected,
        is_primary,
        node: node.clone(),
    }
}

/// Probe every node in parallel.
pub async fn observe_all(
    driver: &dyn NodeDriver,
    nodes: &[Node],
    deadline: Duration,
) -> Vec<NodeObservation> {
    join_all(nodes.iter().map(|node| observe_node(driver, node, deadline))).await
}

fn status_entry(observation: &NodeObservation) -> NodeStatusDoc {
    NodeStatusDoc {
        is_primary: observation.connected && observation.is_primary,
        container: observation.container.clone(),
        port: observation.port,
        connected: observation.connected,
        role: observation.role(),
    }
}

/// Build the `Status` document.
pub async fn build_status(
    driver: &dyn NodeDriver,
    registry: &Registry,
    probe_deadline: Duration,
) -> StatusDoc {
    let observations = observe_all(driver, &registry.list(), probe_deadline).await;
    StatusDoc {
        nodes: observations
            .iter()
            .map(|o| (o.name.clone(), status_entry(o)))
            .collect(),
    }
}

/// Single-node status document (`GET /status/{node}`).
#[derive(Debug, Serialize)]
pub struct SingleNodeDoc {
    pub node: String,
    pub status: NodeStatusDoc,
}

pub async fn node_status_doc(
    driver: &dyn NodeDriver,
    node: &Node,
    probe_deadline: Duration,
) -> SingleNodeDoc {
    let observation = observe_node(driver, node, probe_deadline).await;
    SingleNodeDoc {
        node: observation.name.clone(),
        status: status_entry(&observation),
    }
}

/// Flat node listing (`GET /nodes`).
#[derive(Debug, Serialize)]
pub struct NodesDoc {
    pub nodes: Vec<NodeListEntry>,
}

#[derive(Debug, Serialize)]
pub struct NodeListEntry {
    pub name: String,
    pub container: String,
    pub port: u16,
    pub kind: NodeKind,
    pub connected: bool,
    pub is_primary: bool,
    pub role: RoleHint,
}

pub async fn nodes_doc(
    driver: &dyn NodeDriver,
    registry: &Registry,
    probe_deadline: Duration,
) -> NodesDoc {
    let observations = observe_all(driver, &registry.list(), probe_deadline).await;
    NodesDoc {
        nodes: observations
            .iter()
            .map(|o| NodeListEntry {
                name: o.name.clone(),
                container: o.container.clone(),
                port: o.port,
                kind: o.kind,
                connected: o.connected,
                is_primary: o.connected && o.is_primary,
                role: o.role(),
            })
            .collect(),
    }
}

/// Build the `Overview` document: the status snapshot enriched with
/// per-standby replication gaps and the cluster verdict.
pub async fn build_overview(
    driver: &dyn NodeDriver,
    registry: &Registry,
    probe_deadline: Duration,
    healthy_lag_bytes: i64,
) -> OverviewDoc {
    let observations = observe_all(driver, &registry.list(), probe_deadline).await;

    let primaries: Vec<&NodeObservation> = observations
        .iter()
        .filter(|o| o.connected && o.is_primary)
        .collect();
    let primary = if primaries.len() == 1 {
        Some(primaries[0])
    } else {
        None
    };

    // Gap per connected standby. With no unique primary the gap is reported
    // as zero against the 0/0 sentinel, matching a cluster at rest.
    let mut gaps: BTreeMap<String, Option<ReplicationGap>> = BTreeMap::new();
    for observation in observations.iter().filter(|o| o.connected && !o.is_primary) {
        let gap = match primary {
            Some(p) => standby_gap(driver, p, observation, probe_deadline).await,
            None => Some(ReplicationGap {
                gap_bytes: 0,
                primary_lsn: probe::ZERO_LSN.to_string(),
                receive_lsn: probe::ZERO_LSN.to_string(),
            }),
        };
        gaps.insert(observation.name.clone(), gap);
    }

    let verdict_inputs: Vec<VerdictInput> = observations
        .iter()
        .map(|o| VerdictInput {
            connected: o.connected,
            is_primary: o.is_primary,
            gap_bytes: gaps
                .get(&o.name)
                .and_then(|g| g.as_ref().map(|g| g.gap_bytes)),
        })
        .collect();
    let cluster_status = cluster_verdict(&verdict_inputs, healthy_lag_bytes);

    let nodes = observations
        .iter()
        .map(|o| {
            let replication_gap = gaps.get(&o.name).cloned().flatten();
            (
                o.name.clone(),
                OverviewNodeDoc {
                    status: status_entry(o),
                    kind: o.kind,
                    replication_gap,
                },
            )
        })
        .collect();

    OverviewDoc {
        nodes,
        primary_node: primary.map(|p| p.name.clone()),
        cluster_status,
    }
}

async fn standby_gap(
    driver: &dyn NodeDriver,
    primary: &NodeObservation,
    standby: &NodeObservation,
    deadline: Duration,
) -> Option<ReplicationGap> {
    let receive = probe::receive_lsn(driver, &standby.node.sql_target(), deadline)
        .await
        .ok()?
        .unwrap_or_else(|| probe::ZERO_LSN.to_string());
    let (primary_lsn, gap_bytes) =
        probe::wal_gap(driver, &primary.node.sql_target(), &receive, deadline)
            .await
            .ok()?;
    Some(ReplicationGap {
        gap_bytes,
        primary_lsn,
        receive_lsn: receive,
    })
}
