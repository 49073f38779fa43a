//! Observability
//!
//! Structured JSON log events and the audit trail of HTTP traffic. Logging
//! is best-effort everywhere: a failed write never changes an operation's
//! outcome or timing.

pub mod log;
mod request_log;

pub use request_log::{log_requests, redact_headers, redact_json, REDACTED};
