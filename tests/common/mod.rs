#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};

use conduit::http::connection::{Connection, ConnectionConfig};
use conduit::http::interceptor::HttpProcessor;
use conduit::server::executor::TaskExecutor;
use conduit::server::processor::{ConnectionProcessor, ProcessorHandle};
use conduit::server::session::SessionManager;
use conduit::server::{HttpService, ServiceContext, Worker};

/// One connection served by a processor over an in-memory stream.
pub struct Harness {
    pub client: TestClient<DuplexStream>,
    pub handle: Arc<ProcessorHandle>,
    pub sessions: Arc<SessionManager>,
    pub executor: TaskExecutor,
}

pub fn serve<W: Worker>(worker: W) -> Harness {
    let (server, client) = tokio::io::duplex(64 * 1024);
    let (reader, writer) = tokio::io::split(server);
    let conn = Connection::new(Box::new(reader), Box::new(writer), &ConnectionConfig::default());

    let sessions = Arc::new(SessionManager::default());
    let context = ServiceContext::new(HttpProcessor::standard("Simple-Server/1.1"))
        .with_sessions(Arc::clone(&sessions))
        .with_listener_port(6060);
    let service = Arc::new(HttpService::new(context, Arc::new(worker)));

    let handle = Arc::new(ProcessorHandle::new(1));
    let processor = ConnectionProcessor::new(Arc::clone(&handle), conn, service);
    let executor = TaskExecutor::new("test", 1);
    executor
        .execute(|interrupt| processor.run(interrupt))
        .unwrap();

    Harness {
        client: TestClient::new(client),
        handle,
        sessions,
        executor,
    }
}

#[derive(Debug)]
pub struct TestResponse {
    pub version: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers_named(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The `axis_session` id from `Set-Cookie`.
    pub fn session_id(&self) -> Option<String> {
        self.header("Set-Cookie")
            .and_then(|v| v.strip_prefix("axis_session="))
            .map(|v| v.split(';').next().unwrap_or(v).to_string())
    }
}

/// Minimal HTTP/1.x client over any byte stream.
pub struct TestClient<S> {
    stream: S,
    buf: Vec<u8>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> TestClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    async fn fill(&mut self) -> usize {
        let mut tmp = [0u8; 4096];
        let n = self.stream.read(&mut tmp).await.unwrap_or(0);
        self.buf.extend_from_slice(&tmp[..n]);
        n
    }

    async fn read_line(&mut self) -> String {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line).into_owned();
                return line.trim_end_matches(['\r', '\n']).to_string();
            }
            if self.fill().await == 0 {
                panic!("connection closed while reading a line");
            }
        }
    }

    async fn read_exact(&mut self, n: usize) -> Vec<u8> {
        while self.buf.len() < n {
            if self.fill().await == 0 {
                panic!("connection closed with {} of {n} body bytes", self.buf.len());
            }
        }
        self.buf.drain(..n).collect()
    }

    /// Reads a status line and headers.
    pub async fn read_head(&mut self) -> TestResponse {
        let status_line = self.read_line().await;
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default().to_string();
        let status = parts
            .next()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("bad status line: {status_line:?}"));

        let mut headers = Vec::new();
        loop {
            let line = self.read_line().await;
            if line.is_empty() {
                break;
            }
            let (k, v) = line.split_once(':').unwrap();
            headers.push((k.trim().to_string(), v.trim().to_string()));
        }

        TestResponse {
            version,
            status,
            headers,
            body: Vec::new(),
        }
    }

    /// Reads a complete response; `head_request` skips the body.
    pub async fn read_response_to(&mut self, head_request: bool) -> TestResponse {
        let mut response = self.read_head().await;
        if head_request || matches!(response.status, 100..=199 | 204 | 304) {
            return response;
        }

        let chunked = response
            .header("Transfer-Encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
        if chunked {
            loop {
                let size_line = self.read_line().await;
                let size = usize::from_str_radix(size_line.split(';').next().unwrap().trim(), 16).unwrap();
                if size == 0 {
                    while !self.read_line().await.is_empty() {}
                    break;
                }
                let data = self.read_exact(size).await;
                response.body.extend_from_slice(&data);
                assert_eq!(self.read_line().await, "");
            }
        } else if let Some(length) = response.header("Content-Length") {
            let length: usize = length.parse().unwrap();
            response.body = self.read_exact(length).await;
        } else {
            while self.fill().await > 0 {}
            response.body = std::mem::take(&mut self.buf);
        }
        response
    }

    pub async fn read_response(&mut self) -> TestResponse {
        self.read_response_to(false).await
    }

    pub async fn request(&mut self, bytes: &[u8]) -> TestResponse {
        self.send(bytes).await;
        self.read_response().await
    }

    /// Whether the server closed the connection (within a second).
    pub async fn is_closed(&mut self) -> bool {
        if !self.buf.is_empty() {
            return false;
        }
        matches!(
            tokio::time::timeout(Duration::from_secs(1), self.fill()).await,
            Ok(0)
        )
    }
}
