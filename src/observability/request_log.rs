//! HTTP request/response audit log
//!
//! Every request emits two records: one on arrival and one on completion,
//! both tagged with a monotonic request id. Headers and bodies land in the
//! records as JSON values, with sensitive headers and credential-bearing
//! body fields redacted first.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;

use super::log;

/// Literal substituted for every redacted header or body field.
pub const REDACTED: &str = "<redacted>";

/// Bodies past this size are summarized instead of logged.
const BODY_LOG_LIMIT: usize = 8 * 1024;

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

/// Axum middleware emitting the arrival/completion record pair.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let request_id = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let headers = redact_headers(request.headers());

    // Write methods get their body captured (and put back) for audit.
    let is_write = matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    let (request, request_body) = if is_write {
        buffer_request_body(request).await
    } else {
        (request, None)
    };

    let mut arrival = log::info("REQUEST_RECEIVED")
        .field("request_id", request_id)
        .field("method", method)
        .field("path", path)
        .field("client_ip", client_ip)
        .field("user_agent", user_agent)
        .field("headers", headers);
    if let Some(body) = request_body {
        arrival = arrival.field("body", body);
    }
    arrival.emit();

    let started = Instant::now();
    let response = next.run(request).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let status = response.status();

    let is_json = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/json"))
        .unwrap_or(false);

    // Successful JSON responses carry their body in the completion record.
    let (response, response_body) = if is_json && status.is_success() {
        buffer_response_body(response).await
    } else {
        (response, None)
    };

    let mut completion = log::info("REQUEST_COMPLETED")
        .field("request_id", request_id)
        .field("status", status.as_u16())
        .field("elapsed_ms", elapsed_ms);
    if let Some(body) = response_body {
        completion = completion.field("body", body);
    }
    completion.emit();

    response
}

/// Read and restore the request body, returning a redacted value to log.
async fn buffer_request_body(request: Request) -> (Request, Option<Value>) {
    let (parts, body) = request.into_parts();
    match to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let logged = if bytes.is_empty() {
                None
            } else if bytes.len() > BODY_LOG_LIMIT {
                Some(Value::String(format!("<body of {} bytes>", bytes.len())))
            } else {
                match serde_json::from_slice::<Value>(&bytes) {
                    Ok(value) => Some(redact_json(value)),
                    Err(_) => Some(Value::String("<non-json body>".to_string())),
                }
            };
            (Request::from_parts(parts, Body::from(bytes)), logged)
        }
        Err(_) => (
            Request::from_parts(parts, Body::empty()),
            Some(Value::String("<unreadable body>".to_string())),
        ),
    }
}

/// Read and restore the response body for the completion record.
async fn buffer_response_body(response: Response) -> (Response, Option<Value>) {
    let (parts, body) = response.into_parts();
    match to_bytes(body, usize::MAX).await {
        Ok(bytes) => {
            let logged = if bytes.len() > BODY_LOG_LIMIT {
                Some(Value::String(format!("<body of {} bytes>", bytes.len())))
            } else {
                serde_json::from_slice::<Value>(&bytes).ok()
            };
            (Response::from_parts(parts, Body::from(bytes)), logged)
        }
        Err(_) => (Response::from_parts(parts, Body::empty()), None),
    }
}

/// Render the header map as a JSON object, redacting sensitive keys.
pub fn redact_headers(headers: &HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        let lowered = name.as_str().to_ascii_lowercase();
        let rendered = if is_sensitive_header(&lowered) {
            REDACTED.to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };
        map.insert(name.as_str().to_string(), Value::String(rendered));
    }
    Value::Object(map)
}

fn is_sensitive_header(lowered: &str) -> bool {
    matches!(
        lowered,
        "authorization" | "proxy-authorization" | "cookie" | "set-cookie"
    )
}

/// Recursively redact credential-bearing fields in a JSON document.
pub fn redact_json(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let redacted = map
                .into_iter()
                .map(|(key, inner)| {
                    if is_sensitive_field(&key) {
                        (key, Value::String(REDACTED.to_string()))
                    } else {
                        (key, redact_json(inner))
                    }
                })
                .collect();
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(redact_json).collect()),
        other => other,
    }
}

fn is_sensitive_field(key: &str) -> bool {
    let lowered = key.to_ascii_lowercase();
    lowered.contains("password") || lowered.contains("secret") || lowered.contains("token")
}
