//! Client helper for talking to the budget daemon.
//!
//! The daemon is the only writer. Failures are surfaced to the caller; there
//! is no local fallback.

use budget_protocol::{
    Method, RedirectAction, Request, Response, SyncViewsParams, ViewEventEnvelope, ViewEventType,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};
use chrono::Utc;
use rand::RngCore;
use serde_json::Value;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const ENABLE_ENV: &str = "BUDGET_DAEMON_ENABLED";
const SOCKET_ENV: &str = "BUDGET_TRACKER_SOCKET";
const READ_TIMEOUT_MS: u64 = 6000;
const WRITE_TIMEOUT_MS: u64 = 600;
const RETRY_DELAY_MS: u64 = 50;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Daemon disabled via BUDGET_DAEMON_ENABLED")]
    Disabled,

    #[error("Cannot resolve daemon socket: {0}")]
    Socket(String),

    #[error("Daemon I/O failed: {0}")]
    Io(String),

    #[error("Daemon rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Invalid daemon response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Rejections are answers, not delivery failures; retrying won't help.
    fn is_retryable(&self) -> bool {
        !matches!(self, ClientError::Rejected { .. } | ClientError::Disabled)
    }
}

/// A view event as reported by the browser integration.
#[derive(Debug, Clone)]
pub struct ViewReport {
    pub event_type: ViewEventType,
    pub view_id: u64,
    pub url: Option<String>,
    pub complete: Option<bool>,
}

/// Sends one view event, retrying once with the same event id so the daemon
/// can drop the replay if the first attempt did land.
pub fn send_view_event(report: &ViewReport) -> Result<Value, ClientError> {
    if !daemon_enabled() {
        return Err(ClientError::Disabled);
    }

    let event_id = make_event_id(report.view_id);
    let recorded_at = Utc::now().to_rfc3339();
    let build_envelope = || ViewEventEnvelope {
        event_id: event_id.clone(),
        recorded_at: recorded_at.clone(),
        event_type: report.event_type,
        view_id: Some(report.view_id),
        url: report.url.clone(),
        complete: report.complete,
    };

    with_retry("view event", || {
        let envelope = build_envelope();
        let params = serde_json::to_value(&envelope)
            .map_err(|err| ClientError::InvalidResponse(format!("serialize event: {}", err)))?;
        call(Method::Event, Some(params), Some(envelope.event_id))
    })
}

pub fn sync_views(params: &SyncViewsParams) -> Result<Value, ClientError> {
    let params = serde_json::to_value(params)
        .map_err(|err| ClientError::InvalidResponse(format!("serialize views: {}", err)))?;
    with_retry("view snapshot", || call(Method::SyncViews, Some(params.clone()), None))
}

pub fn get_budget() -> Result<Value, ClientError> {
    with_retry("budget query", || call(Method::GetBudget, None, None))
}

pub fn set_daily_limit(seconds: i64) -> Result<Value, ClientError> {
    let params = serde_json::json!({ "daily_limit_seconds": seconds });
    with_retry("limit edit", || {
        call(Method::SetDailyLimit, Some(params.clone()), None)
    })
}

pub fn reset_budget() -> Result<Value, ClientError> {
    call(Method::ResetBudget, None, None)
}

/// Not retried: a lost response would drop the drained redirects.
pub fn take_redirects() -> Result<Vec<RedirectAction>, ClientError> {
    let data = call(Method::TakeRedirects, None, None)?;
    let redirects = data.get("redirects").cloned().unwrap_or(Value::Null);
    serde_json::from_value(redirects)
        .map_err(|err| ClientError::InvalidResponse(format!("redirects: {}", err)))
}

pub fn daemon_health() -> Option<bool> {
    let data = call(Method::GetHealth, None, Some("health-check".to_string())).ok()?;
    let status = data.get("status").and_then(|value| value.as_str());
    Some(matches!(status, Some("ok")))
}

pub fn daemon_enabled() -> bool {
    match env::var(ENABLE_ENV) {
        Ok(value) => matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => true,
    }
}

fn socket_path() -> Result<PathBuf, ClientError> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    budget_core::daemon_socket_path().map_err(|err| ClientError::Socket(err.to_string()))
}

fn call(method: Method, params: Option<Value>, id: Option<String>) -> Result<Value, ClientError> {
    if !daemon_enabled() {
        return Err(ClientError::Disabled);
    }

    let response = send_request(Request {
        protocol_version: PROTOCOL_VERSION,
        method,
        id,
        params,
    })?;

    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(match response.error {
            Some(err) => ClientError::Rejected {
                code: err.code,
                message: err.message,
            },
            None => ClientError::InvalidResponse("error response without details".to_string()),
        })
    }
}

fn with_retry<F>(label: &str, mut attempt: F) -> Result<Value, ClientError>
where
    F: FnMut() -> Result<Value, ClientError>,
{
    match attempt() {
        Ok(value) => Ok(value),
        Err(err) if err.is_retryable() => {
            tracing::warn!(error = %err, "Failed to send {} to daemon", label);
            std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS));
            attempt().map_err(|retry_err| {
                tracing::warn!(
                    error = %retry_err,
                    "Retry failed sending {} to daemon",
                    label
                );
                retry_err
            })
        }
        Err(err) => Err(err),
    }
}

fn send_request(request: Request) -> Result<Response, ClientError> {
    let socket = socket_path()?;
    let mut stream = UnixStream::connect(&socket)
        .map_err(|err| ClientError::Io(format!("connect to {}: {}", socket.display(), err)))?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));

    serde_json::to_writer(&mut stream, &request)
        .map_err(|err| ClientError::Io(format!("write request: {}", err)))?;
    stream
        .write_all(b"\n")
        .map_err(|err| ClientError::Io(format!("flush request: {}", err)))?;
    stream.flush().ok();

    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Result<Response, ClientError> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ClientError::InvalidResponse(
                        "response exceeded maximum size".to_string(),
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ClientError::Io(
                    "timed out waiting for daemon response".to_string(),
                ));
            }
            Err(err) => return Err(ClientError::Io(format!("read response: {}", err))),
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.is_empty() {
        return Err(ClientError::InvalidResponse(
            "daemon response was empty".to_string(),
        ));
    }

    serde_json::from_slice(response_bytes)
        .map_err(|err| ClientError::InvalidResponse(format!("parse response JSON: {}", err)))
}

fn make_event_id(view_id: u64) -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!("evt-{}-{}-{:x}", Utc::now().timestamp_millis(), view_id, rand)
}
