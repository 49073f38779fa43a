//! HTTP server
//!
//! Binds the listener and serves the combined router with CORS and the
//! request audit middleware applied.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use super::routes::{build_router, AppState};
use crate::observability::{log, log_requests};

pub struct ApiServer {
    listen_addr: String,
    router: Router,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>) -> Self {
        let listen_addr = state.config.listen_addr.clone();

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = build_router(state)
            .layer(middleware::from_fn(log_requests))
            .layer(cors);

        Self {
            listen_addr,
            router,
        }
    }

    /// The router, for in-process testing.
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process exits.
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.listen_addr).await?;
        log::info("SERVER_LISTENING")
            .field("addr", self.listen_addr.as_str())
            .emit();

        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
    }
}
