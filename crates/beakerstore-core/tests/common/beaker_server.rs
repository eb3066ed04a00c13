//! Minimal HTTP/1.1 server standing in for both the dataset registry and blob
//! storage in integration tests.
//!
//! Registry: `GET /api/v3/datasets/{identifier}` answers with the dataset's
//! id and storage coordinates pointing back at this server.
//! Storage: `GET /storage/datasets/{storage_id}/manifest` and
//! `GET /storage/datasets/{storage_id}/files/{path}`, both requiring the
//! dataset's bearer token.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub const TOKEN: &str = "secret-token";

#[derive(Debug, Clone, Default)]
struct Dataset {
    id: String,
    storage_id: String,
    files: Vec<(String, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct State {
    /// identifier (id or author/name) -> dataset
    registry: HashMap<String, Dataset>,
    /// request path -> forced status
    failures: HashMap<String, u16>,
    /// request path -> hit count
    hits: HashMap<String, usize>,
}

/// Handle to a running server. The server runs until the process exits.
#[derive(Clone)]
pub struct BeakerServer {
    base: String,
    state: Arc<Mutex<State>>,
}

impl BeakerServer {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().unwrap().port();
        let base = format!("http://127.0.0.1:{port}");
        let state = Arc::new(Mutex::new(State::default()));
        let server = Self {
            base: base.clone(),
            state: Arc::clone(&state),
        };
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                let state = Arc::clone(&state);
                let base = base.clone();
                thread::spawn(move || handle(stream, &base, &state));
            }
        });
        server
    }

    /// Registry API base, e.g. "http://127.0.0.1:12345/api/v3".
    pub fn registry_url(&self) -> String {
        format!("{}/api/v3", self.base)
    }

    /// Register a dataset reachable by `id` and, if given, by `author/name`.
    pub fn add_dataset(&self, id: &str, author_name: Option<&str>, files: &[(&str, &[u8])]) {
        let ds = Dataset {
            id: id.to_string(),
            storage_id: format!("st_{id}"),
            files: files
                .iter()
                .map(|(p, b)| (p.to_string(), b.to_vec()))
                .collect(),
        };
        let mut st = self.state.lock().unwrap();
        if let Some(alias) = author_name {
            st.registry.insert(alias.to_string(), ds.clone());
        }
        st.registry.insert(id.to_string(), ds);
    }

    /// Answer `path` with `status` from now on.
    pub fn fail(&self, path: &str, status: u16) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(path.to_string(), status);
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }

    /// Total requests served under `/storage/`.
    pub fn storage_hits(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .iter()
            .filter(|(p, _)| p.starts_with("/storage/"))
            .map(|(_, n)| n)
            .sum()
    }
}

fn handle(mut stream: TcpStream, base: &str, state: &Mutex<State>) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let (method, path, auth) = parse_request(&request);
    if !method.eq_ignore_ascii_case("GET") {
        respond(&mut stream, "405 Method Not Allowed", "text/plain", b"");
        return;
    }

    let mut st = state.lock().unwrap();
    *st.hits.entry(path.clone()).or_default() += 1;
    if let Some(status) = st.failures.get(&path).copied() {
        drop(st);
        let line = format!("{status} Forced");
        respond(&mut stream, &line, "text/plain", b"forced failure");
        return;
    }

    if let Some(identifier) = path.strip_prefix("/api/v3/datasets/") {
        match st.registry.get(identifier) {
            Some(ds) => {
                let body = format!(
                    r#"{{"id":"{}","name":"n","storage":{{"address":"{}/storage","id":"{}","token":"{}"}}}}"#,
                    ds.id, base, ds.storage_id, TOKEN
                );
                drop(st);
                respond(&mut stream, "200 OK", "application/json", body.as_bytes());
            }
            None => {
                drop(st);
                respond(&mut stream, "404 Not Found", "application/json", b"{}");
            }
        }
        return;
    }

    if let Some(rest) = path.strip_prefix("/storage/datasets/") {
        if auth.as_deref() != Some(&format!("Bearer {TOKEN}")) {
            drop(st);
            respond(&mut stream, "401 Unauthorized", "text/plain", b"");
            return;
        }
        let (storage_id, tail) = rest.split_once('/').unwrap_or((rest, ""));
        let Some(ds) = st.registry.values().find(|d| d.storage_id == storage_id).cloned() else {
            drop(st);
            respond(&mut stream, "404 Not Found", "text/plain", b"");
            return;
        };
        drop(st);
        if tail == "manifest" {
            let files: Vec<String> = ds
                .files
                .iter()
                .map(|(p, b)| format!(r#"{{"path":"{}","size":{}}}"#, p, b.len()))
                .collect();
            let body = format!(r#"{{"files":[{}]}}"#, files.join(","));
            respond(&mut stream, "200 OK", "application/json", body.as_bytes());
        } else if let Some(name) = tail.strip_prefix("files/") {
            match ds.files.iter().find(|(p, _)| p == name) {
                Some((_, body)) => respond(&mut stream, "200 OK", "application/octet-stream", body),
                None => respond(&mut stream, "404 Not Found", "text/plain", b""),
            }
        } else {
            respond(&mut stream, "404 Not Found", "text/plain", b"");
        }
        return;
    }

    drop(st);
    respond(&mut stream, "404 Not Found", "text/plain", b"");
}

/// Read until the end of the request headers.
fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8(buf).ok()
}

/// Returns (method, path, Authorization header value).
fn parse_request(request: &str) -> (String, String, Option<String>) {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("").to_string();
    let path = first.next().unwrap_or("").to_string();
    let mut auth = None;
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("authorization") {
                auth = Some(value.trim().to_string());
            }
        }
    }
    (method, path, auth)
}

fn respond(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}
