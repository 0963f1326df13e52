//! Integration tests for the `helpdesk serve` HTTP API.
//!
//! Each test starts the server as a child process on a unique port,
//! makes HTTP requests, and verifies the responses.

use std::fs;
use std::io::Read;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;

/// Atomic port counter to avoid port conflicts between parallel tests.
/// Base port is derived from process ID so separate test binaries don't
/// collide on the same port range.
static NEXT_PORT: AtomicU16 = AtomicU16::new(0);
static PORT_INIT: std::sync::Once = std::sync::Once::new();

fn next_port() -> u16 {
    PORT_INIT.call_once(|| {
        let base = 20000 + (std::process::id() as u16 % 20000);
        NEXT_PORT.store(base, Ordering::SeqCst);
    });
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

/// Write the fixture plus `extra` TOML and a data file into `dir`.
fn write_config(dir: &TempDir, server: &str) -> PathBuf {
    let fixture = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/helpdesk.toml");
    let text = fs::read_to_string(fixture).expect("read fixture");
    // replace the fixture's [server] table so tests can tune it
    let text = text.replace("[server]\nrate_limit = 1000\n", server);
    let data_file = dir.path().join("tickets.db");
    let text = format!("{}\n[storage]\ndata_file = '{}'\n", text, data_file.display());
    let path = dir.path().join("helpdesk.toml");
    fs::write(&path, text).expect("write config");
    path
}

fn helpdesk(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_helpdesk"));
    cmd.arg("--config").arg(config);
    cmd.env_remove("HELPDESK_API_KEY")
        .env_remove("HELPDESK_RATE_LIMIT")
        .env_remove("HELPDESK_PORT");
    cmd
}

/// Helper: start `helpdesk serve` on the given port.
fn start_server(port: u16, config: &Path) -> Child {
    let mut cmd = helpdesk(config);
    cmd.arg("serve").arg("--port").arg(port.to_string());
    // Redirect stdout/stderr to avoid blocking
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let child = cmd.spawn().expect("failed to start helpdesk serve");
    // Wait for server to be ready by polling the port
    for _ in 0..50 {
        if TcpStream::connect(format!("127.0.0.1:{}", port)).is_ok() {
            return child;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    child
}

fn stop(mut child: Child) {
    child.kill().ok();
    child.wait().ok();
}

/// Helper: send one request and return (status, body).
fn http(
    port: u16,
    method: &str,
    path: &str,
    headers: &[(&str, &str)],
    body: Option<&str>,
) -> (u16, String) {
    let mut stream = TcpStream::connect(format!("127.0.0.1:{}", port)).expect("failed to connect");
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();

    let mut header_lines = String::new();
    for (name, value) in headers {
        header_lines.push_str(&format!("{}: {}\r\n", name, value));
    }
    let request = match body {
        Some(body) => format!(
            "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Content-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            method, path, port, header_lines, body.len(), body
        ),
        None => format!(
            "{} {} HTTP/1.1\r\nHost: localhost:{}\r\n{}Content-Length: 0\r\nConnection: close\r\n\r\n",
            method, path, port, header_lines
        ),
    };
    std::io::Write::write_all(&mut stream, request.as_bytes()).expect("failed to write");

    let mut response = String::new();
    let _ = stream.read_to_string(&mut response);

    parse_http_response(&response)
}

/// Request on behalf of `user`, parsing the body as JSON.
fn call(port: u16, user: &str, method: &str, path: &str, body: Option<&str>) -> (u16, Value) {
    let (status, raw) = http(port, method, path, &[("X-User-Id", user)], body);
    let json = serde_json::from_str(&raw).unwrap_or(Value::Null);
    (status, json)
}

/// Parse an HTTP response into (status_code, body).
fn parse_http_response(response: &str) -> (u16, String) {
    let parts: Vec<&str> = response.splitn(2, "\r\n\r\n").collect();
    let headers = parts.first().unwrap_or(&"").to_string();
    let body = parts.get(1).unwrap_or(&"").to_string();

    let status_line = headers.lines().next().unwrap_or("");
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(0);

    // Handle chunked transfer encoding
    let body = if headers.to_lowercase().contains("transfer-encoding: chunked") {
        decode_chunked(&body)
    } else {
        body
    };

    (status, body)
}

/// Decode chunked transfer encoding.
fn decode_chunked(data: &str) -> String {
    let mut result = String::new();
    let mut remaining = data;

    while let Some(line_end) = remaining.find("\r\n") {
        let size = match usize::from_str_radix(remaining[..line_end].trim(), 16) {
            Ok(s) => s,
            Err(_) => break,
        };
        if size == 0 {
            break;
        }
        let chunk_start = line_end + 2;
        let chunk_end = chunk_start + size;
        if chunk_end > remaining.len() {
            result.push_str(&remaining[chunk_start..]);
            break;
        }
        result.push_str(&remaining[chunk_start..chunk_end]);
        remaining = if chunk_end + 2 <= remaining.len() {
            &remaining[chunk_end + 2..]
        } else {
            ""
        };
    }

    result
}

const PRINTER: &str =
    r#"{"title":"Printer jams","description":"Paper jam on floor 2","type":"material","priority":"low"}"#;

#[test]
fn health_returns_200_with_version() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[server]\nrate_limit = 1000\n");
    let port = next_port();
    let child = start_server(port, &config);

    let (status, body) = http(port, "GET", "/health", &[], None);
    stop(child);

    assert_eq!(status, 200);
    let json: Value = serde_json::from_str(&body).expect("valid JSON");
    assert_eq!(json["status"], "ok");
    assert!(json.get("version").is_some(), "version field must be present");
}

#[test]
fn caller_must_be_a_known_active_user() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[server]\nrate_limit = 1000\n");
    let port = next_port();
    let child = start_server(port, &config);

    let (missing, _) = http(port, "GET", "/tickets", &[], None);
    let (unknown, unknown_body) = call(port, "mallory", "GET", "/tickets", None);
    let (inactive, _) = call(port, "ghost", "GET", "/tickets", None);
    let (known, _) = call(port, "alice", "GET", "/tickets", None);
    let (no_route, _) = call(port, "alice", "GET", "/nowhere", None);
    stop(child);

    assert_eq!(missing, 401);
    assert_eq!(unknown, 401);
    assert_eq!(unknown_body["kind"], "unauthorized");
    assert_eq!(inactive, 401);
    assert_eq!(known, 200);
    assert_eq!(no_route, 404);
}

#[test]
fn full_lifecycle_over_http_then_offline_history() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[server]\nrate_limit = 1000\n");
    let port = next_port();
    let child = start_server(port, &config);

    let (status, ticket) = call(port, "alice", "POST", "/tickets", Some(PRINTER));
    assert_eq!(status, 201, "create: {}", ticket);
    assert_eq!(ticket["number"], 1);
    assert_eq!(ticket["status"], "pending");

    // another requester cannot see it
    let (status, _) = call(port, "bob", "GET", "/tickets/1", None);
    assert_eq!(status, 403);

    let (status, body) = call(port, "sara", "GET", "/tickets/1/candidates", None);
    assert_eq!(status, 200);
    let candidates = body["candidates"].as_array().expect("candidates array");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["id"], "tina");

    let (status, body) = call(
        port,
        "sara",
        "PUT",
        "/tickets/1/assign",
        Some(r#"{"technician_id":"theo"}"#),
    );
    assert_eq!(status, 422, "specialization mismatch: {}", body);
    assert_eq!(body["kind"], "validation_error");

    let (status, body) = call(
        port,
        "sara",
        "PUT",
        "/tickets/1/assign",
        Some(r#"{"technician_id":"tina","notes":"bring toner"}"#),
    );
    assert_eq!(status, 200, "assign: {}", body);
    assert_eq!(body["status"], "assigned");
    assert_eq!(body["technician_id"], "tina");

    let (status, _) = call(port, "sara", "PUT", "/tickets/1/escalate", None);
    assert_eq!(status, 403);
    let (status, body) = call(port, "dave", "PUT", "/tickets/1/escalate", None);
    assert_eq!(status, 200);
    assert_eq!(body["priority"], "medium");

    let (status, _) = call(port, "tina", "PUT", "/tickets/1/accept-assignment", None);
    assert_eq!(status, 200);
    let (status, body) = call(
        port,
        "tina",
        "PUT",
        "/tickets/1/status",
        Some(r#"{"status":"in_progress"}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(body["status"], "in_progress");

    // nothing to validate yet
    let (status, body) = call(
        port,
        "alice",
        "PUT",
        "/tickets/1/validate",
        Some(r#"{"validated":true}"#),
    );
    assert_eq!(status, 409);
    assert_eq!(body["kind"], "invalid_transition");

    let (status, body) = call(
        port,
        "tina",
        "PUT",
        "/tickets/1/status",
        Some(r#"{"status":"resolved","resolution_summary":"Replaced roller"}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(body["status"], "resolved");

    let (status, _) = call(
        port,
        "alice",
        "PUT",
        "/tickets/1/validate",
        Some(r#"{"validated":false,"rejection_reason":"  "}"#),
    );
    assert_eq!(status, 422);
    let (status, body) = call(
        port,
        "alice",
        "PUT",
        "/tickets/1/validate",
        Some(r#"{"validated":false,"rejection_reason":"still jams"}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(body["status"], "rejected");

    let (status, body) = call(port, "sara", "GET", "/tickets/1/rejection-reason", None);
    assert_eq!(status, 200);
    assert_eq!(body["reason"], "still jams");

    let (status, body) = call(
        port,
        "sara",
        "PUT",
        "/tickets/1/reopen",
        Some(r#"{"technician_id":"tina","reason":"second visit"}"#),
    );
    assert_eq!(status, 200, "reopen: {}", body);
    assert_eq!(body["status"], "assigned");

    for step in [
        r#"{"status":"in_progress"}"#,
        r#"{"status":"resolved","resolution_summary":"New drum"}"#,
    ] {
        let (status, _) = call(port, "tina", "PUT", "/tickets/1/status", Some(step));
        assert_eq!(status, 200);
    }
    let (status, body) = call(
        port,
        "alice",
        "PUT",
        "/tickets/1/validate",
        Some(r#"{"validated":true}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(body["status"], "closed");

    for bad in [r#"{"score":-1}"#, r#"{"score":300}"#] {
        let (status, body) = call(port, "alice", "PUT", "/tickets/1/feedback", Some(bad));
        assert_eq!(status, 422, "feedback {}: {}", bad, body);
        assert_eq!(body["kind"], "validation_error");
    }
    let (status, body) = call(
        port,
        "alice",
        "PUT",
        "/tickets/1/feedback",
        Some(r#"{"score":5,"comment":"quick"}"#),
    );
    assert_eq!(status, 200);
    assert_eq!(body["feedback_score"], 5);

    let (status, body) = call(
        port,
        "alice",
        "POST",
        "/tickets/1/comments",
        Some(r#"{"content":"thanks!"}"#),
    );
    assert_eq!(status, 201, "comment: {}", body);

    let (status, body) = call(port, "alice", "GET", "/tickets/1/history", None);
    assert_eq!(status, 200);
    let history = body["history"].as_array().expect("history array");
    assert!(history.len() >= 8, "history: {}", body);
    stop(child);

    // the data file outlives the server
    let output = helpdesk(&config)
        .args(["history", "1"])
        .output()
        .expect("run helpdesk history");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("#1 [closed] Printer jams"), "{}", stdout);
    assert!(stdout.contains("still jams"), "{}", stdout);
}

#[test]
fn offline_sweep_auto_closes_stale_resolution() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[server]\nrate_limit = 1000\n");
    let port = next_port();
    let child = start_server(port, &config);

    let (status, _) = call(port, "alice", "POST", "/tickets", Some(PRINTER));
    assert_eq!(status, 201);
    let (status, _) = call(
        port,
        "sara",
        "PUT",
        "/tickets/1/assign",
        Some(r#"{"technician_id":"tina"}"#),
    );
    assert_eq!(status, 200);
    for step in [
        r#"{"status":"in_progress"}"#,
        r#"{"status":"resolved","resolution_summary":"Cleaned rollers"}"#,
    ] {
        let (status, _) = call(port, "tina", "PUT", "/tickets/1/status", Some(step));
        assert_eq!(status, 200);
    }
    stop(child);

    let output = helpdesk(&config)
        .args(["--output", "json", "sweep", "--now", "2099-01-01T00:00:00Z"])
        .output()
        .expect("run helpdesk sweep");
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).expect("report JSON");
    assert_eq!(report["examined"], 1);
    assert_eq!(report["auto_closed"], 1);

    let output = helpdesk(&config)
        .args(["tickets", "--status", "closed"])
        .output()
        .expect("run helpdesk tickets");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Printer jams"));
}

#[test]
fn api_key_gates_everything_but_health() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[server]\nrate_limit = 1000\napi_key = \"s3cret\"\n");
    let port = next_port();
    let child = start_server(port, &config);

    let (health, _) = http(port, "GET", "/health", &[], None);
    let (missing, _) = http(port, "GET", "/tickets", &[("X-User-Id", "alice")], None);
    let (wrong, _) = http(
        port,
        "GET",
        "/tickets",
        &[("X-User-Id", "alice"), ("X-API-Key", "nope")],
        None,
    );
    let (bearer, _) = http(
        port,
        "GET",
        "/tickets",
        &[("X-User-Id", "alice"), ("Authorization", "Bearer s3cret")],
        None,
    );
    let (header, _) = http(
        port,
        "GET",
        "/tickets",
        &[("X-User-Id", "alice"), ("X-API-Key", "s3cret")],
        None,
    );
    stop(child);

    assert_eq!(health, 200);
    assert_eq!(missing, 401);
    assert_eq!(wrong, 403);
    assert_eq!(bearer, 200);
    assert_eq!(header, 200);
}

#[test]
fn rate_limit_returns_429() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[server]\nrate_limit = 2\n");
    let port = next_port();
    let child = start_server(port, &config);

    let statuses: Vec<u16> = (0..3)
        .map(|_| http(port, "GET", "/health", &[], None).0)
        .collect();
    stop(child);

    assert_eq!(statuses, vec![200, 200, 429]);
}
