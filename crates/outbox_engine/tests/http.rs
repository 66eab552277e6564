//! The reqwest-backed remote store against a local HTTP stub.

use outbox_engine::{
    ConnectivityProbe, HttpRemoteStore, RemoteConfig, RemoteError, RemoteStore, SyncClient,
    SyncConfig, WriteOperation, WriteStatus,
};
use outbox_testkit::prelude::*;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Reads one HTTP/1.1 request (head and body) from `stream`.
fn read_request(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        if let Some(head_end) = text.find("\r\n\r\n") {
            let content_length = text[..head_end]
                .lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
                .map(|(_, v)| v.trim().parse::<usize>().unwrap())
                .unwrap_or(0);
            if data.len() >= head_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8(data).unwrap()
}

/// Serves one request with `status`, returning the raw request text.
fn serve_once(status: u16, body: &'static str) -> (SocketAddr, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        let response = format!(
            "HTTP/1.1 {status} Stub\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(response.as_bytes()).unwrap();
        let _ = tx.send(request);
    });
    (addr, rx)
}

/// Accepts connections and never answers.
fn serve_silence() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => held.push(stream),
                Err(_) => break,
            }
        }
    });
    addr
}

/// An address nobody listens on.
fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

fn remote(addr: SocketAddr) -> HttpRemoteStore {
    HttpRemoteStore::connect(&RemoteConfig::new(format!("http://{addr}"), "test-key")).unwrap()
}

fn upsert() -> WriteOperation {
    WriteOperation::upsert("empresas", vec![row(json!({"id": 1, "estado": "Activa"}))], "id")
}

#[test]
fn successful_upsert() {
    let (addr, rx) = serve_once(201, "");
    remote(addr).execute(&upsert(), TIMEOUT).unwrap();

    let request = rx.recv_timeout(TIMEOUT).unwrap();
    let lower = request.to_ascii_lowercase();
    assert!(request.starts_with("POST /rest/v1/empresas?on_conflict=id HTTP/1.1"));
    assert!(lower.contains("apikey: test-key"));
    assert!(lower.contains("authorization: bearer test-key"));
    assert!(lower.contains("prefer: resolution=merge-duplicates,return=minimal"));
    assert!(request.ends_with(r#"[{"estado":"Activa","id":1}]"#));
}

#[test]
fn patch_sends_filter_in_query() {
    let (addr, rx) = serve_once(204, "");
    let op = WriteOperation::patch(
        "empresas",
        row(json!({"id": 7})),
        row(json!({"estado": "Inactiva"})),
    );
    remote(addr).execute(&op, TIMEOUT).unwrap();

    let request = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(request.starts_with("PATCH /rest/v1/empresas?id=eq.7 HTTP/1.1"));
    assert!(request.ends_with(r#"{"estado":"Inactiva"}"#));
}

#[test]
fn client_errors_are_permanent() {
    let (addr, _rx) = serve_once(400, r#"{"message":"column does not exist"}"#);
    let err = remote(addr).execute(&upsert(), TIMEOUT).unwrap_err();

    assert!(!err.is_transient());
    match err {
        RemoteError::Http { status, body } => {
            assert_eq!(status, 400);
            assert!(body.contains("column does not exist"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn server_errors_and_throttling_are_transient() {
    for status in [429, 500, 503] {
        let (addr, _rx) = serve_once(status, "");
        let err = remote(addr).execute(&upsert(), TIMEOUT).unwrap_err();
        assert_eq!(err, RemoteError::from_status(status, ""));
        assert!(err.is_transient());
    }
}

#[test]
fn refused_connection_is_transient() {
    let err = remote(closed_port()).execute(&upsert(), TIMEOUT).unwrap_err();
    assert!(matches!(err, RemoteError::Connect(_)), "{err:?}");
    assert!(err.is_transient());
}

#[test]
fn silent_server_times_out() {
    let addr = serve_silence();
    let started = Instant::now();
    let err = remote(addr)
        .execute(&upsert(), Duration::from_millis(300))
        .unwrap_err();

    assert_eq!(err, RemoteError::Timeout);
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[test]
fn ping_reports_reachability() {
    let (addr, rx) = serve_once(404, "");
    assert!(remote(addr).ping(TIMEOUT));
    assert!(rx.recv_timeout(TIMEOUT).unwrap().starts_with("GET /rest/v1/ HTTP/1.1"));

    assert!(!remote(closed_port()).ping(Duration::from_millis(500)));
}

#[test]
fn connected_client_queues_against_silent_backend() {
    let addr = serve_silence();
    let temp = tempfile::tempdir().unwrap();
    let config = SyncConfig::new(temp.path().join("outbox"))
        .with_fast_path_timeout(Duration::from_millis(300))
        .with_worker(false);
    let client = SyncClient::connect(&RemoteConfig::new(format!("http://{addr}"), "k"), config)
        .unwrap();

    let started = Instant::now();
    let outcome = client
        .upsert_with_queue("empresas", vec![row(json!({"id": 1}))], "id")
        .unwrap();

    assert_eq!(outcome.status, WriteStatus::Queued);
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(client.queue_stats().pending, 1);
}

#[test]
fn invalid_base_url_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let result = SyncClient::connect(
        &RemoteConfig::new("::not a url::", "k"),
        SyncConfig::new(temp.path()).with_worker(false),
    );
    assert!(matches!(result, Err(outbox_engine::SyncError::Config(_))));
}
