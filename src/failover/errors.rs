//! Operation error taxonomy
//!
//! Every failure an orchestrated operation can surface, classified into
//! stable kinds. Driver errors never escape raw: the orchestrator maps
//! them into this taxonomy and the API renders them as JSON.

use std::fmt;
use std::time::Duration;

use serde_json::{json, Value};

use super::lock::HolderInfo;

/// Stable error kinds, rendered verbatim in API error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpErrorKind {
    /// Node name unknown, or the target is a replica.
    InvalidTarget,
    /// SQL or exec path failed to reach a node.
    Unreachable,
    /// Promotion refused by the lag gate. Carries `gap_bytes`.
    LagTooHigh,
    /// Operation lock held by another operation.
    Busy,
    /// Promotion ran its steps but the target never left recovery.
    PromoteFailed,
    /// A demotion left a previously-primary node writable.
    DemoteFailed,
    /// The whole operation exceeded its global budget.
    Deadline,
    /// Registry already holds this name or endpoint.
    Duplicate,
    /// Registry has no such node.
    NotFound,
    /// Invariant violation inside the service.
    Internal,
}

impl OpErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpErrorKind::InvalidTarget => "INVALID_TARGET",
            OpErrorKind::Unreachable => "UNREACHABLE",
            OpErrorKind::LagTooHigh => "LAG_TOO_HIGH",
            OpErrorKind::Busy => "BUSY",
            OpErrorKind::PromoteFailed => "PROMOTE_FAILED",
            OpErrorKind::DemoteFailed => "DEMOTE_FAILED",
            OpErrorKind::Deadline => "DEADLINE",
            OpErrorKind::Duplicate => "DUPLICATE",
            OpErrorKind::NotFound => "NOT_FOUND",
            OpErrorKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for OpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An operation failure: kind, human message, structured details.
#[derive(Debug, Clone)]
pub struct OpError {
    pub kind: OpErrorKind,
    pub message: String,
    pub details: Value,
}

impl OpError {
    pub fn new(kind: OpErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::InvalidTarget, message)
    }

    pub fn unreachable(node: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            OpErrorKind::Unreachable,
            format!("node {} is unreachable: {}", node, detail),
        )
        .with_details(json!({ "node": node }))
    }

    /// The only error that carries a numeric `gap_bytes`.
    pub fn lag_too_high(gap_bytes: i64, primary_lsn: &str, receive_lsn: &str) -> Self {
        Self::new(
            OpErrorKind::LagTooHigh,
            format!(
                "target has not received {} bytes of primary WAL",
                gap_bytes
            ),
        )
        .with_details(json!({
            "gap_bytes": gap_bytes,
            "primary_lsn": primary_lsn,
            "receive_lsn": receive_lsn,
        }))
    }

    pub fn busy(holder: HolderInfo) -> Self {
        Self::new(
            OpErrorKind::Busy,
            format!("operation {} (id {}) holds the lock", holder.operation, holder.id),
        )
        .with_details(json!({
            "holder": holder.operation,
            "holder_id": holder.id,
            "acquired_at": holder.acquired_at.to_rfc3339(),
        }))
    }

    pub fn promote_failed(step: &str, detail: impl fmt::Display) -> Self {
        Self::new(
            OpErrorKind::PromoteFailed,
            format!("promotion failed at step {}: {}", step, detail),
        )
        .with_details(json!({ "step": step }))
    }

    pub fn demote_failed(message: impl Into<String>, failures: Value) -> Self {
        Self::new(OpErrorKind::DemoteFailed, message).with_details(failures)
    }

    pub fn deadline(operation: &str, budget: Duration) -> Self {
        Self::new(
            OpErrorKind::Deadline,
            format!("{} exceeded its {}s budget", operation, budget.as_secs()),
        )
        .with_details(json!({ "budget_seconds": budget.as_secs() }))
    }

    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Duplicate, message)
    }

    pub fn not_found(identifier: &str) -> Self {
        Self::new(
            OpErrorKind::NotFound,
            format!("no node matches {:?}", identifier),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(OpErrorKind::Internal, message)
    }

    /// `gap_bytes` when this is a lag-gate refusal.
    pub fn gap_bytes(&self) -> Option<i64> {
        self.details.get("gap_bytes").and_then(Value::as_i64)
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for OpError {}

/// Result type for orchestrated operations.
pub type OpResult<T> = Result<T, OpError>;
