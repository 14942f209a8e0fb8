//! Budget daemon entrypoint.
//!
//! This is a small, single-writer service that owns the daily budget: a
//! socket listener with strict request validation, a SQLite-backed budget
//! store, and one event-loop thread that drives the tracker.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use budget_core::{
    BudgetConfig, BudgetEvent, BudgetSnapshot, BudgetStore, Clock, SystemClock, Tracker,
};
use budget_protocol::{
    parse_event, parse_set_daily_limit, parse_sync_views, ErrorInfo, Method, Request, Response,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod db;
mod state;
mod ticker;
mod views;

use db::{Db, EventPruner};
use state::{LoopMessage, SharedState};
use ticker::ThreadTicker;
use views::{DaemonViews, RedirectOutbox};

const SOCKET_ENV: &str = "BUDGET_TRACKER_SOCKET";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const EVENT_RETENTION_DAYS: i64 = 7;

fn main() {
    init_logging();

    let config = match budget_core::load_config(None) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load budget config; using defaults");
            BudgetConfig::default()
        }
    };

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare daemon socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind daemon socket");
            std::process::exit(1);
        }
    };

    let db_path = match budget_core::daemon_db_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve daemon database path");
            std::process::exit(1);
        }
    };

    let db = match Db::new(db_path) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon database");
            std::process::exit(1);
        }
    };

    let mut pruner = EventPruner::new(Arc::clone(&db), EVENT_RETENTION_DAYS);
    pruner.run(SystemClock.today());

    let (loop_tx, loop_rx) = mpsc::channel();
    let store_tx = loop_tx.clone();
    db.subscribe(Box::new(move |change| {
        let _ = store_tx.send(LoopMessage::Event(BudgetEvent::StoreChanged(change.clone())));
    }));

    let outbox = RedirectOutbox::new();
    let tracker = match Tracker::new(
        Arc::clone(&db),
        DaemonViews::new(outbox.clone(), config.monitor.blocking_target.clone()),
        ThreadTicker::new(loop_tx.clone()),
        SystemClock,
        config.monitor.classifier(),
        config.budget.default_daily_limit_seconds,
    ) {
        Ok(tracker) => tracker,
        Err(err) => {
            error!(error = %err, "Failed to load budget");
            std::process::exit(1);
        }
    };
    thread::spawn(move || state::run_event_loop(tracker, loop_rx));
    spawn_rollover_checker(
        loop_tx.clone(),
        config.schedule.rollover_check_interval_secs,
        pruner,
    );

    info!(
        path = %socket_path.display(),
        domains = config.monitor.domains.len(),
        max_daily_limit_seconds = config.budget.max_daily_limit_seconds,
        "Budget daemon started"
    );

    let shared_state = Arc::new(SharedState::new(db, loop_tx, outbox, config));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                thread::spawn(|| handle_connection(stream, state));
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept daemon connection");
            }
        }
    }
}

/// Also prunes recorded events once the day has changed, so the events
/// table stays bounded while the daemon runs.
fn spawn_rollover_checker(tx: Sender<LoopMessage>, interval_secs: u64, mut pruner: EventPruner) {
    thread::spawn(move || loop {
        thread::sleep(Duration::from_secs(interval_secs));
        if tx
            .send(LoopMessage::Event(BudgetEvent::RolloverCheck))
            .is_err()
        {
            warn!("Event loop gone; stopping rollover checks");
            break;
        }
        pruner.run(SystemClock.today());
    });
}

fn init_logging() {
    let debug_enabled = env::var("BUDGET_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Ok(path) = env::var(SOCKET_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    budget_core::daemon_socket_path().map_err(|err| err.to_string())
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Daemon request received");
    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
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
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    if buffer.is_empty() {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let request_bytes = match newline_index {
        Some(index) => {
            if buffer.len() > index + 1 {
                let trailing = &buffer[index + 1..];
                if trailing.iter().any(|b| !b.is_ascii_whitespace()) {
                    warn!("Extra bytes detected after newline; ignoring trailing data");
                }
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let config = state.config();
            let data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
                "rollover_check_interval_secs": config.schedule.rollover_check_interval_secs,
                "max_daily_limit_seconds": config.budget.max_daily_limit_seconds,
                "monitored_domains": config.monitor.domains,
                "pending_redirects": state.pending_redirects(),
            });
            Response::ok(request.id, data)
        }
        Method::GetBudget => snapshot_response(request.id, state.budget_snapshot()),
        Method::Event => handle_event(request, state),
        Method::SetDailyLimit => {
            let params = match parse_set_daily_limit(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            info!(
                daily_limit_seconds = params.daily_limit_seconds,
                "Daily limit edit requested"
            );
            snapshot_response(
                request.id,
                state.set_daily_limit(params.daily_limit_seconds),
            )
        }
        Method::ResetBudget => {
            info!("Budget reset requested");
            snapshot_response(request.id, state.reset_budget())
        }
        Method::SyncViews => {
            let params = match parse_sync_views(request.params) {
                Ok(params) => params,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            info!(views = params.views.len(), "View snapshot received");
            snapshot_response(request.id, state.sync_views(params))
        }
        Method::TakeRedirects => {
            let redirects = state.take_redirects();
            tracing::debug!(redirects = redirects.len(), "Redirects drained");
            match serde_json::to_value(&redirects) {
                Ok(value) => Response::ok(request.id, serde_json::json!({ "redirects": value })),
                Err(err) => Response::error(
                    request.id,
                    "serialization_error",
                    format!("Failed to serialize redirects: {}", err),
                ),
            }
        }
    }
}

fn handle_event(request: Request, state: &SharedState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "event payload is required"),
    };

    let event = match parse_event(params) {
        Ok(event) => event,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    info!(
        event_type = ?event.event_type,
        event_id = %event.event_id,
        view_id = ?event.view_id,
        url = ?event.url,
        complete = ?event.complete,
        "Received event"
    );

    match state.apply_view_event(&event) {
        Ok(Some(snapshot)) => match serde_json::to_value(snapshot) {
            Ok(budget) => Response::ok(
                request.id,
                serde_json::json!({ "accepted": true, "budget": budget }),
            ),
            Err(err) => Response::error(
                request.id,
                "serialization_error",
                format!("Failed to serialize budget: {}", err),
            ),
        },
        Ok(None) => Response::ok(
            request.id,
            serde_json::json!({ "accepted": false, "duplicate": true }),
        ),
        Err(err) => Response::error_with_info(request.id, err),
    }
}

fn snapshot_response(id: Option<String>, result: Result<BudgetSnapshot, ErrorInfo>) -> Response {
    match result {
        Ok(snapshot) => match serde_json::to_value(snapshot) {
            Ok(value) => Response::ok(id, value),
            Err(err) => Response::error(
                id,
                "serialization_error",
                format!("Failed to serialize budget: {}", err),
            ),
        },
        Err(err) => Response::error_with_info(id, err),
    }
}

fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
