mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;

use common::TestClient;
use conduit::config::{Config, WorkerConfig};
use conduit::http::connection::ConnectionConfig;
use conduit::http::interceptor::HttpProcessor;
use conduit::http::request::Request;
use conduit::http::response::Response;
use conduit::server::executor::TaskExecutor;
use conduit::server::failure::DefaultFailureHandler;
use conduit::server::listener::Listener;
use conduit::server::manager::ConnectionManager;
use conduit::server::{
    EchoWorker, HttpService, MessageContext, ServerError, ServiceContext, SimpleHttpServer, Worker,
    WorkerError,
};

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".into();
    config.server.port = 0;
    config.executor.core_pool_size = 2;
    config.executor.max_pool_size = 4;
    config.shutdown_grace_ms = 500;
    config
}

async fn connect<W: Worker>(server: &SimpleHttpServer<W>) -> TestClient<TcpStream> {
    let addr = server.local_addr().expect("server initialized");
    TestClient::new(TcpStream::connect(addr).await.unwrap())
}

/// Never finishes its exchange.
struct Stuck;

impl Worker for Stuck {
    async fn service(
        &self,
        _request: &mut Request<'_>,
        _response: &mut Response<'_>,
        _context: &mut MessageContext,
    ) -> Result<(), WorkerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_server_lifecycle() {
    let mut server = SimpleHttpServer::from_config(test_config());
    assert!(!server.is_running());
    assert!(matches!(server.start(), Err(ServerError::NotInitialized)));

    server.init().unwrap();
    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert!(!server.is_running());

    server.start().unwrap();
    assert!(server.is_running());
    assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));

    let mut client = connect(&server).await;
    let response = client
        .request(b"GET /services/ HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await;
    assert_eq!(response.status, 200);
    assert!(response.body_text().contains("Echo"));
    assert!(response.session_id().is_some());
    assert!(
        response
            .headers_named("Set-Cookie2")
            .iter()
            .any(|v| v.contains(&format!("Port=\"{}\"", addr.port())))
    );
    assert_eq!(server.sessions().map(|s| s.len()), Some(1));
    assert_eq!(server.active_connections(), 1);

    server.destroy().await;
    assert!(!server.is_running());
    assert!(client.is_closed().await);
    assert!(TcpStream::connect(addr).await.is_err());

    // Idempotent
    server.destroy().await;
}

#[tokio::test]
async fn test_echo_worker_over_tcp() {
    let mut config = test_config();
    config.worker = WorkerConfig::Echo;
    config.session.tracking = false;
    let mut server = SimpleHttpServer::from_config(config);
    server.init().unwrap();
    server.start().unwrap();

    let mut client = connect(&server).await;
    for path in ["/one", "/two"] {
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        let response = client.request(request.as_bytes()).await;
        assert_eq!(response.status, 200);
        assert_eq!(response.body_text(), format!("GET {path}\n"));
        assert!(response.header("Set-Cookie").is_none());
    }
    assert!(server.sessions().is_none());

    server.destroy().await;
}

#[tokio::test]
async fn test_saturated_server_answers_503() {
    let mut config = test_config();
    config.executor.core_pool_size = 1;
    config.executor.max_pool_size = 1;
    let mut server = SimpleHttpServer::new(config, EchoWorker);
    server.init().unwrap();
    server.start().unwrap();

    // Holds the only slot
    let mut first = connect(&server).await;
    let response = first.request(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(response.status, 200);

    let mut second = connect(&server).await;
    let rejected = second.read_response().await;
    assert_eq!(rejected.status, 503);
    assert_eq!(rejected.header("Connection"), Some("close"));
    assert!(second.is_closed().await);

    // The held connection is unaffected
    let response = first.request(b"GET /again HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(response.status, 200);

    server.destroy().await;
}

#[tokio::test]
async fn test_destroy_forces_stuck_connections() {
    let mut config = test_config();
    config.shutdown_grace_ms = 300;
    let mut server = SimpleHttpServer::new(config, Stuck);
    server.init().unwrap();
    server.start().unwrap();

    let mut client = connect(&server).await;
    client.send(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.active_connections(), 1);

    let started = Instant::now();
    server.destroy().await;
    // A single grace period bounds the whole shutdown
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(550), "{elapsed:?}");
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_endpoint_reference() {
    let mut server = SimpleHttpServer::from_config(Config::default());
    assert_eq!(
        server.epr_for_service("Echo").unwrap().as_str(),
        "http://127.0.0.1:6060/services/Echo"
    );

    let mut config = test_config();
    config.worker = WorkerConfig::Service {
        context_path: "/axis2/services".into(),
        services: vec!["Echo".into()],
    };
    server = SimpleHttpServer::from_config(config);
    server.init().unwrap();
    let port = server.local_addr().unwrap().port();
    assert_eq!(
        server.epr_for_service("Echo").unwrap().as_str(),
        format!("http://127.0.0.1:{port}/axis2/services/Echo")
    );
    server.destroy().await;
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = test_config();
    config.server.port = taken.local_addr().unwrap().port();

    let mut server = SimpleHttpServer::from_config(config);
    assert!(matches!(server.init(), Err(ServerError::Bind { .. })));
}

#[tokio::test]
async fn test_listener_gives_up_when_bind_keeps_failing() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = taken.local_addr().unwrap();

    let service = Arc::new(HttpService::new(
        ServiceContext::new(HttpProcessor::standard("Simple-Server/1.1")),
        Arc::new(EchoWorker),
    ));
    let manager = Arc::new(ConnectionManager::new(
        service,
        Arc::new(TaskExecutor::new("http-request", 1)),
    ));
    let failure_handler =
        DefaultFailureHandler::new(Duration::from_millis(10), 2, Duration::from_secs(60));
    let listener = Listener::new(
        addr,
        ConnectionConfig::default(),
        manager,
        Box::new(failure_handler),
    );
    let handle = listener.handle();

    let executor = TaskExecutor::new("http-listener", 1);
    executor.execute(move |interrupt| listener.run(interrupt)).unwrap();

    // Three failed binds with short backoffs, then the listener stops itself
    assert!(executor.await_termination(Duration::from_secs(2)).await);
    assert!(handle.is_destroyed());
}
