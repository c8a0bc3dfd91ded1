//! End-to-end tests over real sockets.
//!
//! Each test starts a server on an ephemeral loopback port, backed by a
//! monitor reading a temp-directory device, and speaks raw HTTP to it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use devicestat_core::{CommandRunner, MonitorConfig, StaticCommands, SystemMonitor};
use devicestat_server::{HttpServer, ServerConfig, ServerHandle};

/// Panics on `dumpsys battery`, answers nothing else.
struct BrokenBattery;

impl CommandRunner for BrokenBattery {
    fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        if program == "dumpsys" && args == ["battery"] {
            panic!("battery service died");
        }
        None
    }
}

struct Reply {
    status: u16,
    head: String,
    body: String,
}

impl Reply {
    fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

async fn start(root: &Path, commands: Arc<dyn CommandRunner>, timeout: Duration) -> ServerHandle {
    write(root, "proc/stat", "cpu  100 0 100 800 0 0 0 0\ncpu0 100 0 100 800 0 0 0 0\n");
    write(root, "proc/meminfo", "MemTotal: 1000 kB\nMemAvailable: 400 kB\n");
    let monitor = SystemMonitor::new(
        MonitorConfig::builder()
            .proc_root(root.join("proc"))
            .sys_root(root.join("sys"))
            .storage_path(root)
            .commands(commands)
            .build(),
    );
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        workers: 4,
        request_timeout: timeout,
    };
    HttpServer::new(config, Arc::new(monitor)).start().await.unwrap()
}

async fn start_default(root: &Path) -> ServerHandle {
    start(root, Arc::new(StaticCommands::new()), Duration::from_secs(5)).await
}

async fn raw_bytes(handle: &ServerHandle, request: &[u8]) -> String {
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

async fn raw(handle: &ServerHandle, request: &str) -> String {
    raw_bytes(handle, request.as_bytes()).await
}

async fn send_bytes(handle: &ServerHandle, request: &[u8]) -> Reply {
    let text = raw_bytes(handle, request).await;
    let (head, body) = text.split_once("\r\n\r\n").expect("no header terminator");
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("no status code");
    Reply {
        status,
        head: head.to_string(),
        body: body.to_string(),
    }
}

async fn send(handle: &ServerHandle, request: &str) -> Reply {
    send_bytes(handle, request.as_bytes()).await
}

async fn get(handle: &ServerHandle, path: &str) -> Reply {
    send(handle, &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n")).await
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_and_root_are_liveness() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;

    for path in ["/", "/status"] {
        let reply = get(&server, path).await;
        assert_eq!(reply.status, 200);
        assert!(reply.head.contains("Content-Type: application/json; charset=utf-8"));
        assert!(reply.head.contains("Access-Control-Allow-Origin: *"));
        assert!(reply.head.contains(&format!("Content-Length: {}", reply.body.len())));
        let body = reply.json();
        assert_eq!(body["status"], "running");
        assert_eq!(body["service"], "devicestat");
    }
    server.shutdown().await;
}

#[tokio::test]
async fn sections_are_served_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;

    assert_eq!(get(&server, "/memory").await.json()["usedMemory"], 600 * 1024);
    assert_eq!(get(&server, "/gpu").await.json()["name"], "Generic GPU");
    assert_eq!(get(&server, "/current").await.json()["packageName"], "Unknown");
    let all = get(&server, "/all").await.json();
    for key in ["cpu", "gpu", "memory", "battery", "display", "system"] {
        assert!(all.get(key).is_some(), "{key}");
    }
    assert!(get(&server, "/summary").await.json().get("cpuUsage").is_some());
    server.shutdown().await;
}

#[tokio::test]
async fn api_page_is_html() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let first = get(&server, "/api").await;
    let second = get(&server, "/api").await;
    assert_eq!(first.status, 200);
    assert!(first.head.contains("Content-Type: text/html; charset=utf-8"));
    assert!(first.body.contains("GET /current-app"));
    assert_eq!(first.body, second.body);
    server.shutdown().await;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_path_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let reply = get(&server, "/unknown-path").await;
    assert_eq!(reply.status, 404);
    assert!(reply.head.contains("Access-Control-Allow-Origin: *"));
    let body = reply.json();
    assert_eq!(body["code"], 404);
    assert_eq!(body["error"], "Not Found");
    server.shutdown().await;
}

#[tokio::test]
async fn non_get_is_405() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let reply = send(&server, "POST /cpu HTTP/1.1\r\nContent-Length: 0\r\n\r\n").await;
    assert_eq!(reply.status, 405);
    assert_eq!(reply.json()["code"], 405);
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_request_line_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let reply = send(&server, "NONSENSE\r\n").await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["error"], "Bad Request");
    server.shutdown().await;
}

#[tokio::test]
async fn latin1_header_value_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let reply = send_bytes(&server, b"GET /status HTTP/1.1\r\nUser-Agent: caf\xe9\r\n\r\n").await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.json()["status"], "running");
    server.shutdown().await;
}

#[tokio::test]
async fn non_utf8_request_line_is_400() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let reply = send_bytes(&server, b"GET /st\xffatus HTTP/1.1\r\n").await;
    assert_eq!(reply.status, 400);
    assert_eq!(reply.json()["error"], "Bad Request");
    server.shutdown().await;
}

#[tokio::test]
async fn empty_request_closes_without_response() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    assert_eq!(raw(&server, "\r\n").await, "");

    // Half-close with nothing sent at all.
    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    assert_eq!(out, "");
    server.shutdown().await;
}

#[tokio::test]
async fn handler_panic_is_500_and_server_keeps_serving() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(dir.path(), Arc::new(BrokenBattery), Duration::from_secs(5)).await;

    let reply = get(&server, "/battery").await;
    assert_eq!(reply.status, 500);
    let body = reply.json();
    assert_eq!(body["code"], 500);
    let message = body["error"].as_str().unwrap();
    assert!(message.starts_with("Internal Server Error: "), "{message}");
    assert!(message.contains("battery service died"), "{message}");

    // Contained to the battery section in the merged view.
    let all = get(&server, "/all").await.json();
    assert!(all["battery"]["error"].is_string());
    assert_eq!(all["memory"]["usedMemory"], 600 * 1024);

    assert_eq!(get(&server, "/status").await.status, 200);
    server.shutdown().await;
}

#[tokio::test]
async fn idle_connection_is_dropped_after_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let server = start(dir.path(), Arc::new(StaticCommands::new()), Duration::from_millis(200)).await;

    let mut stream = TcpStream::connect(server.local_addr()).await.unwrap();
    let mut out = String::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_string(&mut out)).await;
    assert!(read.is_ok(), "server never closed the idle connection");
    assert_eq!(out, "");
    server.shutdown().await;
}

// ---------------------------------------------------------------------------
// Concurrency and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cpu_requests_with_constant_counters() {
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(start_default(dir.path()).await);

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let server = Arc::clone(&server);
            tokio::spawn(async move { get(&server, "/cpu").await })
        })
        .collect();
    for task in tasks {
        let reply = task.await.unwrap();
        assert_eq!(reply.status, 200);
        // First sample has nothing to diff against; later ones see a zero delta.
        assert_eq!(reply.json()["currentUsage"], -1);
    }

    write(dir.path(), "proc/stat", "cpu  200 0 100 900 0 0 0 0\ncpu0 200 0 100 900 0 0 0 0\n");
    assert_eq!(get(&server, "/cpu").await.json()["currentUsage"], 50.0);

    let Ok(server) = Arc::try_unwrap(server) else {
        panic!("server handle still shared");
    };
    server.shutdown().await;
}

#[tokio::test]
async fn waiting_keeps_the_server_up() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let addr = server.local_addr();
    let waiter = tokio::spawn(server.wait());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"GET /status HTTP/1.1\r\n\r\n").await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));

    waiter.abort();
    let _ = waiter.await;
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let dir = tempfile::tempdir().unwrap();
    let server = start_default(dir.path()).await;
    let addr = server.local_addr();
    assert_eq!(get(&server, "/status").await.status, 200);

    server.shutdown().await;
    assert!(TcpStream::connect(addr).await.is_err());
}
