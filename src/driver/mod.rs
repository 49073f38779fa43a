//! Node driver
//!
//! The one place pgpilot touches the outside world. A driver exposes exactly
//! two capabilities, both blocking I/O with a caller-provided deadline:
//!
//! - run a shell command inside a named container;
//! - open a SQL session against a `(host, port)` endpoint and execute one
//!   statement.
//!
//! The driver never retries and never interprets command strings or result
//! values; retry policy and typing live in the orchestrator and probe layers.

mod docker;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use docker::DockerDriver;

/// SQL endpoint of a node. Credentials are process-wide and owned by the
/// concrete driver, never passed per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTarget {
    pub host: String,
    pub port: u16,
}

impl SqlTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Outcome of a container exec. A non-zero exit is data, not an error.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Exec-path failure: the command never produced an exit status.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    #[error("container {container} cannot be addressed: {detail}")]
    Unreachable { container: String, detail: String },

    #[error("exec deadline of {}s expired", .0.as_secs())]
    Deadline(Duration),
}

/// SQL-path failure, classified from SQLSTATE or the transport error.
#[derive(Debug, Clone, Error)]
pub enum SqlError {
    #[error("connection refused")]
    ConnRefused,

    #[error("authentication failed")]
    AuthFailed,

    #[error("server is read-only")]
    ReadOnly,

    #[error("statement deadline expired")]
    Timeout,

    #[error("sql error {code}: {message}")]
    Other { code: String, message: String },
}

impl SqlError {
    pub fn other(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Other {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// One result row: column values in text form, `None` for SQL NULL.
pub type SqlRow = Vec<Option<String>>;

/// The driver seam. Concrete implementations talk to real containers and
/// PostgreSQL servers; tests substitute a scripted in-memory driver.
#[async_trait]
pub trait NodeDriver: Send + Sync {
    /// Run `argv` inside `container`. Returns the exit status and captured
    /// output; fails only when the container cannot be addressed or the
    /// deadline fires.
    async fn exec(
        &self,
        container: &str,
        argv: &[String],
        deadline: Duration,
    ) -> Result<ExecOutput, ExecError>;

    /// Execute one statement on a fresh SQL session. Every call opens and
    /// closes its own connection; pooling is an optimization the driver may
    /// add without changing this contract.
    async fn sql(
        &self,
        target: &SqlTarget,
        statement: &str,
        deadline: Duration,
    ) -> Result<Vec<SqlRow>, SqlError>;
}
