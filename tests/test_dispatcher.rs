mod common;

use common::serve;
use conduit::http::request::Request;
use conduit::http::response::{Response, StatusCode};
use conduit::server::{EchoWorker, MessageContext, Worker, WorkerError};

/// Routes on the request path to exercise the fault mapping.
struct ScriptedWorker;

impl Worker for ScriptedWorker {
    async fn service(
        &self,
        request: &mut Request<'_>,
        response: &mut Response<'_>,
        context: &mut MessageContext,
    ) -> Result<(), WorkerError> {
        match request.uri() {
            "/secure" => Err(WorkerError::Unauthorized {
                realm: "axis".into(),
            }),
            "/bad" => Err(WorkerError::ClientFault("missing envelope".into())),
            "/boom" => Err(WorkerError::Fault("endpoint crashed".into())),
            "/stream" => {
                response.set_content_type("text/plain");
                response.write(b"hello ").await?;
                response.write(b"world").await?;
                Ok(())
            }
            "/late-fault" => {
                response.write(b"partial").await?;
                Err(WorkerError::Fault("failed mid-stream".into()))
            }
            "/session" => {
                let key = context
                    .session()
                    .map(|s| s.key().to_string())
                    .unwrap_or_default();
                response.set_body(key);
                Ok(())
            }
            _ => {
                response.set_status(StatusCode::NoContent);
                Ok(())
            }
        }
    }
}

#[tokio::test]
async fn test_keep_alive_serves_sequential_requests() {
    let mut h = serve(EchoWorker);

    let first = h
        .client
        .request(b"GET /a HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    assert_eq!(first.status, 200);
    assert_eq!(first.version, "HTTP/1.1");
    assert_eq!(first.body_text(), "GET /a\n");
    assert_eq!(first.header("Content-Length"), Some("7"));
    assert_eq!(first.header("Content-Type"), Some("text/plain"));
    assert_eq!(first.header("Server"), Some("Simple-Server/1.1"));
    assert!(first.header("Date").is_some_and(|d| d.ends_with("GMT")));

    let second = h
        .client
        .request(b"POST /b HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhello")
        .await;
    assert_eq!(second.status, 200);
    assert_eq!(second.body_text(), "POST /b\nhello");
    assert!(!h.handle.is_destroyed());
}

#[tokio::test]
async fn test_expect_continue() {
    let mut h = serve(EchoWorker);

    h.client
        .send(b"PUT /upload HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 4\r\n\r\n")
        .await;
    let interim = h.client.read_head().await;
    assert_eq!(interim.status, 100);
    assert!(interim.headers.is_empty());

    h.client.send(b"data").await;
    let response = h.client.read_response().await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "PUT /upload\ndata");
}

#[tokio::test]
async fn test_chunked_request_body() {
    let mut h = serve(EchoWorker);

    let response = h
        .client
        .request(
            b"POST /c HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\nTrailer: x\r\n\r\n",
        )
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "POST /c\nWikipedia");
    assert_eq!(response.header("Content-Length"), Some("17"));
}

#[tokio::test]
async fn test_malformed_chunked_body_is_answered() {
    let mut h = serve(EchoWorker);

    let response = h
        .client
        .request(
            b"POST /c HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
              zz\r\nabc\r\n0\r\n\r\n",
        )
        .await;
    assert_eq!(response.status, 400);
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(response.body_text().contains("chunk"));
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_streamed_response_is_chunked() {
    let mut h = serve(ScriptedWorker);

    let response = h
        .client
        .request(b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n")
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Transfer-Encoding"), Some("chunked"));
    assert!(response.header("Content-Length").is_none());
    assert_eq!(response.body_text(), "hello world");

    // Still reusable
    let next = h.client.request(b"GET /other HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(next.status, 204);
}

#[tokio::test]
async fn test_streamed_response_to_http10_reads_until_close() {
    let mut h = serve(ScriptedWorker);

    let response = h.client.request(b"GET /stream HTTP/1.0\r\n\r\n").await;
    assert_eq!(response.status, 200);
    assert!(response.header("Transfer-Encoding").is_none());
    assert_eq!(response.header("Connection"), Some("close"));
    assert_eq!(response.body_text(), "hello world");
}

#[tokio::test]
async fn test_unauthorized_challenge_keeps_connection() {
    let mut h = serve(ScriptedWorker);

    let response = h
        .client
        .request(b"GET /secure HTTP/1.1\r\nHost: x\r\n\r\n")
        .await;
    assert_eq!(response.status, 401);
    assert_eq!(response.header("WWW-Authenticate"), Some("basic realm=\"axis\""));
    assert!(response.body_text().contains("axis"));

    let next = h.client.request(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(next.status, 204);
}

#[tokio::test]
async fn test_worker_faults_map_to_status() {
    let mut h = serve(ScriptedWorker);

    let bad = h.client.request(b"GET /bad HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(bad.status, 400);
    assert_eq!(bad.body_text(), "missing envelope");
    assert_eq!(bad.header("Connection"), Some("close"));
    assert!(h.client.is_closed().await);

    let mut h = serve(ScriptedWorker);
    let boom = h.client.request(b"GET /boom HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(boom.status, 500);
    assert_eq!(boom.body_text(), "endpoint crashed");
}

#[tokio::test]
async fn test_fault_after_commit_closes_connection() {
    let mut h = serve(ScriptedWorker);

    let response = h
        .client
        .request(b"GET /late-fault HTTP/1.1\r\nHost: x\r\n\r\n")
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "partial");
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_malformed_request_line() {
    let mut h = serve(EchoWorker);

    let response = h.client.request(b"GARBAGE\r\n\r\n").await;
    assert_eq!(response.status, 400);
    assert_eq!(response.version, "HTTP/1.0");
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_unsupported_version() {
    let mut h = serve(EchoWorker);

    let response = h.client.request(b"GET / HTTP/2.0\r\n\r\n").await;
    assert_eq!(response.status, 505);
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_unsupported_transfer_coding() {
    let mut h = serve(EchoWorker);

    let response = h
        .client
        .request(b"POST / HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: gzip\r\n\r\n")
        .await;
    assert_eq!(response.status, 501);
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_head_request_has_no_body() {
    let mut h = serve(EchoWorker);

    h.client.send(b"HEAD /h HTTP/1.1\r\nHost: x\r\n\r\n").await;
    let response = h.client.read_response_to(true).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Content-Length"), Some("8"));

    // The next response starts right after the head
    let next = h.client.request(b"GET /n HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(next.body_text(), "GET /n\n");
}

#[tokio::test]
async fn test_connection_close_honoured() {
    let mut h = serve(EchoWorker);

    let response = h
        .client
        .request(b"GET / HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await;
    assert_eq!(response.status, 200);
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_http10_keep_alive_is_opt_in() {
    let mut h = serve(EchoWorker);

    let kept = h
        .client
        .request(b"GET /1 HTTP/1.0\r\nConnection: keep-alive\r\n\r\n")
        .await;
    assert_eq!(kept.header("Connection"), Some("keep-alive"));

    let closed = h.client.request(b"GET /2 HTTP/1.0\r\n\r\n").await;
    assert_eq!(closed.body_text(), "GET /2\n");
    assert!(h.client.is_closed().await);
}

#[tokio::test]
async fn test_session_cookie_issued_and_honoured() {
    let mut h = serve(ScriptedWorker);

    let first = h
        .client
        .request(b"GET /session HTTP/1.1\r\nHost: x\r\n\r\n")
        .await;
    let id = first.session_id().expect("session cookie");
    assert_eq!(first.body_text(), id);
    assert!(
        first
            .headers_named("Set-Cookie2")
            .iter()
            .any(|v| v.starts_with(&format!("axis_session={id}")) && v.contains("Port=\"6060\""))
    );

    let request = format!("GET /session HTTP/1.1\r\nHost: x\r\nCookie: axis_session={id}\r\n\r\n");
    let second = h.client.request(request.as_bytes()).await;
    assert_eq!(second.session_id(), Some(id.clone()));
    assert_eq!(second.body_text(), id);
    assert_eq!(h.sessions.len(), 1);
}

#[tokio::test]
async fn test_peer_close_ends_processor() {
    let h = serve(EchoWorker);
    drop(h.client);

    assert!(
        h.executor
            .await_termination(std::time::Duration::from_secs(1))
            .await
    );
    assert!(h.handle.is_destroyed());
}

#[tokio::test]
async fn test_interrupt_stops_idle_processor() {
    let h = serve(EchoWorker);

    h.executor.shutdown_now();
    assert!(
        h.executor
            .await_termination(std::time::Duration::from_secs(1))
            .await
    );
    assert!(h.handle.is_destroyed());
}
