//! Node model
//!
//! A node is either a `backup` (promotable) or a `replica` (pinned
//! read-only; its standby signal is never removed). Role hints are advisory
//! last-observed values; the live truth always comes from probes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::NodeSeed;
use crate::driver::SqlTarget;

/// Node kind. Replicas can never become primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Backup,
    Replica,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Backup => "backup",
            NodeKind::Replica => "replica",
        }
    }

    pub fn is_promotable(&self) -> bool {
        matches!(self, NodeKind::Backup)
    }
}

/// Last-observed role. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleHint {
    Primary,
    Standby,
    Unknown,
}

impl RoleHint {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleHint::Primary => "PRIMARY",
            RoleHint::Standby => "STANDBY",
            RoleHint::Unknown => "UNKNOWN",
        }
    }
}

/// A member of the cluster.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub container: String,
    pub host: String,
    pub port: u16,
    pub kind: NodeKind,
    pub role_hint: RoleHint,
    pub last_probe: Option<DateTime<Utc>>,
}

impl Node {
    pub fn new(
        name: impl Into<String>,
        container: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        kind: NodeKind,
    ) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            host: host.into(),
            port,
            kind,
            role_hint: RoleHint::Unknown,
            last_probe: None,
        }
    }

    pub fn from_seed(seed: &NodeSeed) -> Self {
        Self::new(
            seed.name.clone(),
            seed.container_name(),
            seed.host.clone(),
            seed.port,
            seed.kind,
        )
    }

    /// SQL endpoint of this node.
    pub fn sql_target(&self) -> SqlTarget {
        SqlTarget::new(self.host.clone(), self.port)
    }
}
