//! HTTP API
//!
//! Translates requests into orchestrator or topology calls. Read endpoints
//! never take the operation lock; mutating endpoints surface the
//! orchestrator's error taxonomy as JSON bodies with stable `error` kinds.

mod error;
mod routes;
mod server;

pub use error::{error_response, ErrorBody};
pub use routes::{build_router, AppState};
pub use server::ApiServer;
