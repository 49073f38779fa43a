//! Node registry
//!
//! Names and `(host, port)` pairs are unique across the registry. Reads are
//! snapshot-based; callers get owned copies and never hold the inner lock
//! across I/O. All mutation paths run under the orchestrator's operation
//! lock, so writers never race each other.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use chrono::Utc;

use super::node::{Node, RoleHint};
use crate::config::NodeSeed;

/// Registry mutation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Name or endpoint already present.
    Duplicate { field: &'static str, value: String },
    /// No node matches the identifier.
    NotFound { identifier: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Duplicate { field, value } => {
                write!(f, "duplicate {}: {}", field, value)
            }
            RegistryError::NotFound { identifier } => {
                write!(f, "no node matches {:?}", identifier)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// In-memory catalog of all known nodes.
#[derive(Debug, Default)]
pub struct Registry {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from startup seeds. Duplicate seeds fail the boot
    /// instead of shadowing each other.
    pub fn from_seeds(seeds: &[NodeSeed]) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for seed in seeds {
            registry.insert(Node::from_seed(seed))?;
        }
        Ok(registry)
    }

    /// Register a node. Fails on duplicate name or `(host, port)`.
    pub fn insert(&self, node: Node) -> Result<(), RegistryError> {
        let mut nodes = self.nodes.write().unwrap();
        if nodes.contains_key(&node.name) {
            return Err(RegistryError::Duplicate {
                field: "name",
                value: node.name.clone(),
            });
        }
        if let Some(existing) = nodes
            .values()
            .find(|n| n.host == node.host && n.port == node.port)
        {
            return Err(RegistryError::Duplicate {
                field: "endpoint",
                value: format!("{}:{} (held by {})", node.host, node.port, existing.name),
            });
        }
        nodes.insert(node.name.clone(), node);
        Ok(())
    }

    /// Remove a node by name, host, or container name.
    pub fn remove(&self, identifier: &str) -> Result<Node, RegistryError> {
        let mut nodes = self.nodes.write().unwrap();
        let name = if nodes.contains_key(identifier) {
            identifier.to_string()
        } else {
            nodes
                .values()
                .find(|n| n.host == identifier || n.container == identifier)
                .map(|n| n.name.clone())
                .ok_or_else(|| RegistryError::NotFound {
                    identifier: identifier.to_string(),
                })?
        };
        Ok(nodes.remove(&name).expect("name resolved above"))
    }

    /// Look up a node by name, host, or container name.
    pub fn resolve(&self, identifier: &str) -> Option<Node> {
        let nodes = self.nodes.read().unwrap();
        nodes
            .get(identifier)
            .or_else(|| {
                nodes
                    .values()
                    .find(|n| n.host == identifier || n.container == identifier)
            })
            .cloned()
    }

    pub fn get(&self, name: &str) -> Option<Node> {
        self.nodes.read().unwrap().get(name).cloned()
    }

    /// Snapshot of every node, ordered by name.
    pub fn list(&self) -> Vec<Node> {
        self.nodes.read().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().unwrap().is_empty()
    }

    /// Update one node's role hint, stamping `last_probe`.
    pub fn set_role(&self, name: &str, role: RoleHint) {
        let mut nodes = self.nodes.write().unwrap();
        if let Some(node) = nodes.get_mut(name) {
            node.role_hint = role;
            node.last_probe = Some(Utc::now());
        }
    }

    /// Apply the post-operation role hints in one step: the named node (if
    /// any) becomes PRIMARY, every name in `standbys` becomes STANDBY, and
    /// every other node becomes UNKNOWN. Stamps `last_probe` on all of them.
    pub fn apply_roles(&self, primary: Option<&str>, standbys: &[String]) {
        let now = Utc::now();
        let mut nodes = self.nodes.write().unwrap();
        for (name, node) in nodes.iter_mut() {
            node.role_hint = if Some(name.as_str()) == primary {
                RoleHint::Primary
            } else if standbys.iter().any(|s| s == name) {
                RoleHint::Standby
            } else {
                RoleHint::Unknown
            };
            node.last_probe = Some(now);
        }
    }
}
