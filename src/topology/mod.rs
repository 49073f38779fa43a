//! Cluster topology
//!
//! The in-memory catalog of known nodes plus the public documents built
//! from live probes. The registry is mutated only while the operation lock
//! is held; status reads are lock-free and never mutate anything.

mod node;
mod registry;
mod status;

pub use node::{Node, NodeKind, RoleHint};
pub use registry::{Registry, RegistryError};
pub use status::{
    build_overview, build_status, cluster_verdict, node_status_doc, nodes_doc, observe_all,
    observe_node, ClusterVerdict, NodeListEntry, NodeObservation, NodeStatusDoc, NodesDoc,
    OverviewDoc, OverviewNodeDoc, ReplicationGap, SingleNodeDoc, StatusDoc, VerdictInput,
};
