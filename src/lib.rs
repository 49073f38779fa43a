//! pgpilot - a control plane for PostgreSQL streaming-replication clusters
//!
//! The service drives a small fixed fleet of already-deployed PostgreSQL
//! backends over two channels: SQL sessions (probes) and container exec
//! (pg_ctl and friends). Operators reshape the primary/standby topology
//! through the HTTP API; pgpilot never runs PostgreSQL itself.

pub mod api;
pub mod config;
pub mod driver;
pub mod failover;
pub mod observability;
pub mod probe;
pub mod topology;
