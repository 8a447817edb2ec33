//! Helpers shared by the HTTP-facing tests: a `Config` pointing every API at
//! one base URL, and a local HTTP server that replays canned responses.

use crate::config::{Config, StoreBackend};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub fn test_config(base_url: &str) -> Config {
    Config {
        access_token: String::from("test_token"),
        app_id: Some(String::from("1234")),
        app_secret: None,
        graph_api_url: format!("{base_url}/v19.0"),
        google_sheet_creds: None,
        sheets_api_url: format!("{base_url}/v4"),
        drive_api_url: format!("{base_url}/drive/v3"),
        profile: PathBuf::from("profiles/ad_report.json"),
        store: StoreBackend::Sheets,
        parquet_path: None,
        max_retries: 0,
        request_timeout_secs: 1,
    }
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub target: String,
    pub body: String,
}

pub struct StubResponse {
    status: u16,
    body: String,
}

impl StubResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        StubResponse {
            status,
            body: body.to_string(),
        }
    }

    pub fn raw(status: u16, body: &str) -> Self {
        StubResponse {
            status,
            body: body.to_string(),
        }
    }
}

/// A listener bound to a free local port. Bind first so responses can refer
/// to the server's own URL, then `serve` or `stall`.
pub struct StubServer {
    listener: TcpListener,
    base_url: String,
}

impl StubServer {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        StubServer { listener, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Answers one connection per response, in order, and records each
    /// request before answering it.
    pub fn serve(self, responses: Vec<StubResponse>) -> Arc<Mutex<Vec<CapturedRequest>>> {
        let captured = Arc::new(Mutex::new(vec![]));
        let log = captured.clone();
        thread::spawn(move || {
            for response in responses {
                let Ok((mut stream, _)) = self.listener.accept() else {
                    return;
                };
                let request = read_request(&mut stream);
                log.lock().unwrap().push(request);
                let head = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    response.status,
                    response.body.len()
                );
                let _ = stream.write_all(head.as_bytes());
                let _ = stream.write_all(response.body.as_bytes());
                let _ = stream.flush();
            }
        });
        captured
    }

    /// Accepts a single connection, reads the request and never answers it.
    pub fn stall(self, hold: Duration) {
        thread::spawn(move || {
            if let Ok((mut stream, _)) = self.listener.accept() {
                read_request(&mut stream);
                thread::sleep(hold);
            }
        });
    }
}

fn read_request(stream: &mut TcpStream) -> CapturedRequest {
    let mut buf = vec![];
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break buf.len(),
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        match stream.read(&mut chunk) {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let body_end = buf.len().min(header_end + content_length);

    CapturedRequest {
        method,
        target,
        body: String::from_utf8_lossy(&buf[header_end..body_end]).to_string(),
    }
}
