//! Tests for forwarding, snippet injection and the end-to-end proxy path

use std::sync::Arc;
use std::time::Duration;

use hoard::http::error::HttpError;
use hoard::http::headers::Headers;
use hoard::proxy::cache::{CacheCoordinator, CacheSettings};
use hoard::proxy::tally::{ContentTypeTally, media_type};
use hoard::proxy::upstream::{Origin, ProxyHandler, inject_snippet, prepare_forward_headers};
use hoard::server::ErrorLog;
use hoard::server::error_log::error_kind;
use hoard::server::listener;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[test]
fn test_prepare_forward_headers_removes_hop_by_hop() {
    let mut headers: Headers = [
        ("Connection", "keep-alive"),
        ("Upgrade", "websocket"),
        ("Proxy-Connection", "keep-alive"),
        ("User-Agent", "Test"),
    ]
    .into_iter()
    .collect();

    prepare_forward_headers(&mut headers);

    assert_eq!(headers.get("Connection"), Some("close"));
    assert!(!headers.contains("Upgrade"));
    assert!(!headers.contains("Proxy-Connection"));
    assert_eq!(headers.get("User-Agent"), Some("Test"));
}

#[test]
fn test_inject_snippet_after_head() {
    let body = b"<!doctype html><HTML><Head lang=\"en\"><title>t</title></head></html>";

    let injected = inject_snippet(body, "<script>x()</script>").unwrap();

    assert_eq!(
        String::from_utf8(injected).unwrap(),
        "<!doctype html><HTML><Head lang=\"en\"><script>x()</script><title>t</title></head></html>"
    );
}

#[test]
fn test_inject_snippet_creates_head_after_html() {
    let injected = inject_snippet(b"<html><body>hi</body></html>", "<b>!</b>").unwrap();

    assert_eq!(
        String::from_utf8(injected).unwrap(),
        "<html><head><b>!</b></head><body>hi</body></html>"
    );
}

#[test]
fn test_inject_snippet_without_document_tags() {
    assert!(inject_snippet(b"just text", "<b>!</b>").is_none());
}

#[test]
fn test_media_type_drops_parameters() {
    assert_eq!(media_type("text/html; charset=utf-8"), "text/html");
    assert_eq!(media_type(" image/png "), "image/png");
}

#[tokio::test]
async fn test_tally_writes_csv() {
    let dir = tempfile::tempdir().unwrap();
    let tally = ContentTypeTally::new(dir.path().join("types.csv"));

    tally.record("text/html; charset=utf-8").await.unwrap();
    tally.record("image/png").await.unwrap();
    tally.record("text/html").await.unwrap();

    assert_eq!(tally.count("text/html").await, 2);
    assert_eq!(
        std::fs::read_to_string(tally.path()).unwrap(),
        "image/png,1\ntext/html,2\n"
    );
}

#[tokio::test]
async fn test_error_log_records_kind_and_chain() {
    let dir = tempfile::tempdir().unwrap();
    let log = ErrorLog::create(dir.path().join("error.log")).await.unwrap();

    let err = anyhow::Error::from(HttpError::NoHost).context("handling request");
    assert_eq!(error_kind(&err), "NoHost");
    log.record(&err).await.unwrap();

    let text = std::fs::read_to_string(log.path()).unwrap();
    assert!(text.starts_with("NoHost, handling request\n"));
    assert!(text.contains("Host header field not set"));

    let again = ErrorLog::create(log.path().to_path_buf()).await.unwrap();
    assert!(std::fs::read_to_string(again.path()).unwrap().is_empty());
}

#[test]
fn test_error_kind_falls_back() {
    assert_eq!(error_kind(&anyhow::anyhow!("plain")), "Error");
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
    assert_eq!(error_kind(&anyhow::Error::from(io)), "IoError");
}

/// Origin that answers exactly one connection and then stops listening.
async fn single_use_origin(response: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        drop(listener);
        let (read, mut write) = socket.into_split();
        let mut reader = BufReader::new(read);
        let mut head = String::new();
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            head.push_str(&line);
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }
        write.write_all(response).await.unwrap();
        write.shutdown().await.unwrap();
        head
    });

    (port, handle)
}

async fn start_proxy(
    handler: ProxyHandler,
    error_log: Arc<ErrorLog>,
) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener::serve(listener, Arc::new(handler), error_log));
    addr
}

async fn exchange(proxy: std::net::SocketAddr, request: &str) -> String {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(request.as_bytes()).await.unwrap();
    let mut reply = Vec::new();
    client.read_to_end(&mut reply).await.unwrap();
    String::from_utf8(reply).unwrap()
}

#[tokio::test]
async fn test_proxy_fetches_once_then_serves_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let (port, origin) = single_use_origin(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nTransfer-Encoding: chunked\r\n\r\n\
          d\r\n<html></html>\r\n0\r\n\r\n",
    )
    .await;

    let coordinator = Arc::new(
        CacheCoordinator::open(dir.path().join("cache"), CacheSettings::default())
            .await
            .unwrap(),
    );
    let tally = Arc::new(ContentTypeTally::new(dir.path().join("types.csv")));
    let handler = ProxyHandler::new(coordinator.clone(), Origin::Direct, Duration::from_secs(2))
        .with_snippet("<i>cached</i>")
        .with_tally(tally.clone());
    let error_log = Arc::new(ErrorLog::create(dir.path().join("error.log")).await.unwrap());
    let proxy = start_proxy(handler, error_log).await;

    let request = format!(
        "GET http://127.0.0.1:{}/page HTTP/1.1\r\nProxy-Connection: keep-alive\r\n\r\n",
        port
    );
    let first = exchange(proxy, &request).await;
    let origin_head = origin.await.unwrap();

    assert!(origin_head.starts_with("GET /page HTTP/1.1\r\n"));
    assert!(origin_head.contains("Connection: close\r\n"));
    assert!(!origin_head.contains("Proxy-Connection"));

    let expected = "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 39\r\nContent-Type: text/html\r\n\r\n<html><head><i>cached</i></head></html>";
    assert_eq!(first, expected);
    assert_eq!(tally.count("text/html").await, 1);

    // the origin no longer accepts connections, so this must be a cache hit
    let second = exchange(proxy, &request).await;
    assert_eq!(second, expected);
    assert_eq!(tally.count("text/html").await, 1);
}

#[tokio::test]
async fn test_malformed_request_closes_silently() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(
        CacheCoordinator::open(dir.path().join("cache"), CacheSettings::default())
            .await
            .unwrap(),
    );
    let handler = ProxyHandler::new(coordinator, Origin::Direct, Duration::from_secs(1));
    let error_log = Arc::new(ErrorLog::create(dir.path().join("error.log")).await.unwrap());
    let proxy = start_proxy(handler, error_log.clone()).await;

    let reply = exchange(proxy, "NONSENSE\r\n\r\n").await;

    assert!(reply.is_empty());
    assert!(std::fs::read_to_string(error_log.path()).unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_fetch_is_logged_and_connection_closed() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = Arc::new(
        CacheCoordinator::open(dir.path().join("cache"), CacheSettings::default())
            .await
            .unwrap(),
    );
    // nothing listens on the port this listener held
    let closed_port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let handler = ProxyHandler::new(coordinator.clone(), Origin::Direct, Duration::from_secs(1));
    let error_log = Arc::new(ErrorLog::create(dir.path().join("error.log")).await.unwrap());
    let proxy = start_proxy(handler, error_log.clone()).await;

    let reply = exchange(
        proxy,
        &format!("GET / HTTP/1.1\r\nHost: 127.0.0.1:{}\r\n\r\n", closed_port),
    )
    .await;

    assert!(reply.is_empty());
    assert_eq!(coordinator.in_flight().await, 0);

    let mut logged = String::new();
    for _ in 0..100 {
        logged = std::fs::read_to_string(error_log.path()).unwrap();
        if !logged.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(logged.starts_with("CacheClaimFailure, "));
}
