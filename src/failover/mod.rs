//! Failover orchestration
//!
//! The only component allowed to issue mutating exec calls or touch the
//! topology registry. All mutating operations serialize on the
//! [`OperationLock`]; contenders fail fast instead of queueing, and the
//! lock is released on every exit path, deadline expiry included.

mod errors;
mod lock;
mod orchestrator;
mod steps;

pub use errors::{OpError, OpErrorKind, OpResult};
pub use lock::{HolderInfo, OperationGuard, OperationLock};
pub use orchestrator::{DemoteReport, HostDoc, NodeFailure, Orchestrator, PromoteOutcome};
pub use steps::{DemoteStep, PromoteStep};
