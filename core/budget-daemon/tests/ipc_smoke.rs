use budget_protocol::{
    Method, RedirectAction, Request, Response, ViewEventEnvelope, ViewEventType, PROTOCOL_VERSION,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::sleep;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct DaemonGuard {
    child: Child,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn spawn_daemon(home: &Path) -> DaemonGuard {
    let child = Command::new(env!("CARGO_BIN_EXE_budget-daemon"))
        .env("HOME", home)
        .env_remove("BUDGET_TRACKER_SOCKET")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn budget-daemon");
    DaemonGuard { child }
}

fn write_config(home: &Path, contents: &str) {
    let dir = home.join(".budget-tracker");
    std::fs::create_dir_all(&dir).expect("create config dir");
    std::fs::write(dir.join("config.toml"), contents).expect("write config");
}

fn socket_path(home: &Path) -> PathBuf {
    home.join(".budget-tracker").join("daemon.sock")
}

fn wait_for_socket(path: &Path, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        sleep(Duration::from_millis(25));
    }
    panic!("Timed out waiting for daemon socket at {}", path.display());
}

fn send_request(socket: &Path, request: Request) -> Response {
    let mut stream = UnixStream::connect(socket).expect("Failed to connect to daemon socket");
    serde_json::to_writer(&mut stream, &request).expect("Failed to serialize request");
    stream.write_all(b"\n").expect("Failed to write request");
    stream.flush().ok();
    read_response(&mut stream)
}

fn read_response(stream: &mut UnixStream) -> Response {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).expect("Failed to read response");
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if chunk[..n].contains(&b'\n') {
            break;
        }
    }

    let newline_index = buffer.iter().position(|b| *b == b'\n');
    let response_bytes = match newline_index {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    serde_json::from_slice(response_bytes).expect("Failed to parse response JSON")
}

fn call(socket: &Path, method: Method, params: Option<Value>) -> Response {
    send_request(
        socket,
        Request {
            protocol_version: PROTOCOL_VERSION,
            method,
            id: Some("smoke".to_string()),
            params,
        },
    )
}

fn view_event(event_id: &str, event_type: ViewEventType, view_id: u64) -> ViewEventEnvelope {
    ViewEventEnvelope {
        event_id: event_id.to_string(),
        recorded_at: Utc::now().to_rfc3339(),
        event_type,
        view_id: Some(view_id),
        url: None,
        complete: None,
    }
}

fn field(response: &Response, key: &str) -> Value {
    response
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}

#[test]
fn daemon_health_and_budget_smoke() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(2));

    let health = call(&socket, Method::GetHealth, None);
    assert!(health.ok, "health response was not ok");
    assert_eq!(field(&health, "status"), "ok");

    let budget = call(&socket, Method::GetBudget, None);
    assert!(budget.ok);
    assert_eq!(field(&budget, "daily_limit_seconds"), 5400);
    assert_eq!(field(&budget, "remaining_seconds"), 5400);
    assert_eq!(field(&budget, "state"), "idle");

    let rejected = call(
        &socket,
        Method::SetDailyLimit,
        Some(json!({ "daily_limit_seconds": 0 })),
    );
    assert!(!rejected.ok);
    assert_eq!(rejected.error.expect("error").code, "invalid_limit");

    let accepted = call(
        &socket,
        Method::SetDailyLimit,
        Some(json!({ "daily_limit_seconds": 1800 })),
    );
    assert!(accepted.ok);
    assert_eq!(field(&accepted, "daily_limit_seconds"), 1800);
    assert_eq!(field(&accepted, "remaining_seconds"), 1800);

    let mismatch = send_request(
        &socket,
        Request {
            protocol_version: PROTOCOL_VERSION + 1,
            method: Method::GetHealth,
            id: None,
            params: None,
        },
    );
    assert_eq!(mismatch.error.expect("error").code, "protocol_mismatch");
}

#[test]
fn daemon_blocks_and_queues_redirects_when_budget_runs_out() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    write_config(
        home.path(),
        "[budget]\ndefault_daily_limit_seconds = 2\nmax_daily_limit_seconds = 600\n\n[monitor]\ndomains = [\"youtube.com\"]\nblocking_target = \"https://example.org/blocked.html\"\n",
    );
    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(2));

    let mut activated = view_event("evt-1", ViewEventType::ViewActivated, 11);
    activated.url = Some("https://www.youtube.com/watch?v=1".to_string());
    let response = call(
        &socket,
        Method::Event,
        Some(serde_json::to_value(&activated).expect("event json")),
    );
    assert!(response.ok, "event rejected: {:?}", response.error);
    assert_eq!(field(&response, "budget")["state"], "tracking");

    let replay = call(
        &socket,
        Method::Event,
        Some(serde_json::to_value(&activated).expect("event json")),
    );
    assert_eq!(field(&replay, "duplicate"), true);

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let budget = call(&socket, Method::GetBudget, None);
        if field(&budget, "state") == "blocked" {
            assert_eq!(field(&budget, "remaining_seconds"), 0);
            break;
        }
        assert!(Instant::now() < deadline, "budget never ran out");
        sleep(Duration::from_millis(100));
    }

    let redirects = call(&socket, Method::TakeRedirects, None);
    let actions: Vec<RedirectAction> =
        serde_json::from_value(field(&redirects, "redirects")).expect("redirects");
    assert_eq!(
        actions,
        vec![RedirectAction {
            view_id: 11,
            target: "https://example.org/blocked.html".to_string()
        }]
    );

    let reset = call(&socket, Method::ResetBudget, None);
    assert_eq!(field(&reset, "remaining_seconds"), 2);
    assert_ne!(field(&reset, "state"), "blocked");
}

#[test]
fn daemon_rejects_invalid_view_events() {
    let home = TempDir::new().expect("Failed to create temp HOME");
    let socket = socket_path(home.path());
    let _guard = spawn_daemon(home.path());
    wait_for_socket(&socket, Duration::from_secs(2));

    let settled = view_event("evt-bad", ViewEventType::ViewContentSettled, 3);
    let response = call(
        &socket,
        Method::Event,
        Some(serde_json::to_value(&settled).expect("event json")),
    );
    assert!(!response.ok);
    assert_eq!(response.error.expect("error").code, "missing_field");

    let sync = call(
        &socket,
        Method::SyncViews,
        Some(json!({ "views": [
            { "view_id": 1, "active": true },
            { "view_id": 2, "active": true }
        ]})),
    );
    assert_eq!(sync.error.expect("error").code, "invalid_params");
}
