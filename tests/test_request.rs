use hoard::http::entity::EntitySize;
use hoard::http::error::HttpError;
use hoard::http::request::{Method, Request, RequestBuilder};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

fn request(method: Method, headers: &[(&str, &str)]) -> Request {
    headers
        .iter()
        .fold(RequestBuilder::new().method(method).target("/"), |b, (k, v)| b.header(k, *v))
        .build()
        .unwrap()
}

#[test]
fn test_request_header_retrieval() {
    let req = request(
        Method::GET,
        &[("Host", "example.com"), ("Content-Type", "application/json")],
    );

    assert_eq!(req.header("host"), Some("example.com"));
    assert_eq!(req.header("Content-Type"), Some("application/json"));
    assert_eq!(req.header("Missing"), None);
}

#[test]
fn test_method_parsing() {
    assert_eq!(Method::from_str("DELETE"), Some(Method::DELETE));
    assert_eq!(Method::from_str("delete"), None);
    assert_eq!(Method::parse("BREW"), Method::Extension("BREW".to_string()));
    assert_eq!(Method::parse("BREW").to_string(), "BREW");
}

#[test]
fn test_get_and_head_never_have_entity() {
    let get = request(Method::GET, &[("Content-Length", "10")]);
    let head = request(Method::HEAD, &[("Transfer-Encoding", "chunked")]);

    assert_eq!(get.entity_size().unwrap(), EntitySize::Length(0));
    assert_eq!(head.entity_size().unwrap(), EntitySize::Length(0));
}

#[test]
fn test_entity_size_rules() {
    let chunked = request(Method::POST, &[("Transfer-Encoding", "gzip, chunked"), ("Content-Length", "3")]);
    let identity = request(Method::POST, &[("Transfer-Encoding", "identity"), ("Content-Length", "3")]);
    let length = request(Method::PUT, &[("Content-Length", "42")]);
    let multipart = request(
        Method::POST,
        &[("Content-Type", "multipart/byteranges; boundary=THIS")],
    );
    let until_close = request(Method::POST, &[("Content-Type", "text/plain")]);

    assert_eq!(chunked.entity_size().unwrap(), EntitySize::Chunked);
    assert_eq!(identity.entity_size().unwrap(), EntitySize::Length(3));
    assert_eq!(length.entity_size().unwrap(), EntitySize::Length(42));
    assert_eq!(multipart.entity_size().unwrap(), EntitySize::MultipartByteranges);
    assert_eq!(until_close.entity_size().unwrap(), EntitySize::UntilClose);
}

#[test]
fn test_invalid_content_length_is_an_error() {
    let req = request(Method::POST, &[("Content-Length", "ten")]);

    assert!(matches!(req.entity_size(), Err(HttpError::Field(_))));
}

#[test]
fn test_resolve_origin_from_absolute_target() {
    let mut req = RequestBuilder::new()
        .method(Method::GET)
        .target("http://example.com:8080/a?b=1")
        .build()
        .unwrap();

    assert_eq!(req.resolve_origin().unwrap(), ("example.com".to_string(), 8080));
    assert_eq!(req.header("Host"), Some("example.com:8080"));
    assert_eq!(req.parsed_target().unwrap().path(), "/a");
}

#[test]
fn test_resolve_origin_from_host_header() {
    let mut req = request(Method::GET, &[("Host", "localhost:3000")]);
    assert_eq!(req.resolve_origin().unwrap(), ("localhost".to_string(), 3000));

    let mut req = request(Method::GET, &[("Host", "example.org")]);
    assert_eq!(req.resolve_origin().unwrap(), ("example.org".to_string(), 80));
}

#[test]
fn test_resolve_origin_without_host() {
    let mut req = request(Method::GET, &[]);

    assert!(matches!(req.resolve_origin(), Err(HttpError::NoHost)));
}

#[test]
fn test_strip_host_from_target() {
    let mut req = RequestBuilder::new()
        .method(Method::GET)
        .target("http://example.com/x/example.com")
        .header("Host", "example.com")
        .build()
        .unwrap();

    req.strip_host_from_target();
    assert_eq!(req.target, "/x/example.com");

    req.strip_host_from_target();
    assert_eq!(req.target, "");
}

#[tokio::test]
async fn test_to_bytes_serializes_sorted_headers() {
    let mut req = RequestBuilder::new()
        .method(Method::POST)
        .target("/submit")
        .header("User-Agent", "test")
        .header("Host", "example.com")
        .header("Content-Length", "4")
        .body(&b"data"[..])
        .build()
        .unwrap();

    let bytes = req.to_bytes().await.unwrap();

    assert_eq!(
        String::from_utf8(bytes).unwrap(),
        "POST /submit HTTP/1.1\r\nContent-Length: 4\r\nHost: example.com\r\nUser-Agent: test\r\n\r\ndata"
    );
}

/// Accepts one connection, reads the request head and answers with
/// `response`. Returns the port and a handle yielding the request head.
async fn one_shot_origin(response: &'static [u8]) -> (u16, tokio::task::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
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

#[tokio::test]
async fn test_fetch_response_round_trip() {
    let (port, origin) =
        one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nhi").await;

    let mut req = RequestBuilder::new()
        .method(Method::GET)
        .target(format!("http://127.0.0.1:{}/hello", port))
        .build()
        .unwrap();

    let response = req.fetch_response(None).await.unwrap();
    let head = origin.await.unwrap();

    assert!(head.starts_with(&format!("GET http://127.0.0.1:{}/hello HTTP/1.1\r\n", port)));
    assert!(head.contains(&format!("Host: 127.0.0.1:{}\r\n", port)));
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.request_method(), Some(&Method::GET));
    assert_eq!(&response.body.contents().await.unwrap()[..], b"hi");
}

#[tokio::test]
async fn test_fetch_response_to_head_has_no_entity() {
    let (port, origin) =
        one_shot_origin(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n").await;

    let mut req = RequestBuilder::new()
        .method(Method::HEAD)
        .target("/")
        .header("Host", format!("127.0.0.1:{}", port))
        .build()
        .unwrap();

    let mut response = req.fetch_response(None).await.unwrap();
    origin.await.unwrap();

    assert_eq!(response.entity_size().unwrap(), EntitySize::Length(0));
    assert!(response.body.contents().await.unwrap().is_empty());
    let bytes = response.to_bytes().await.unwrap();
    assert!(String::from_utf8(bytes).unwrap().contains("Content-Length: 1000\r\n"));
}
