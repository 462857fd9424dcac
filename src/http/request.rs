use std::fmt;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::http::body::EntityBody;
use crate::http::entity::EntitySize;
use crate::http::error::{HttpError, Result};
use crate::http::field;
use crate::http::headers::Headers;
use crate::http::message::{self, Message};
use crate::http::response::Response;

/// HTTP request methods.
///
/// The common methods get their own variant; anything else a client sends
/// is carried verbatim in [`Method::Extension`] so it can be forwarded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// TRACE - Loop-back test
    TRACE,
    /// CONNECT - Tunnel request
    CONNECT,
    /// Any other token
    Extension(String),
}

impl Method {
    /// Parses a known HTTP method (case-sensitive).
    ///
    /// # Example
    ///
    /// ```
    /// # use hoard::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            "TRACE" => Some(Method::TRACE),
            "CONNECT" => Some(Method::CONNECT),
            _ => None,
        }
    }

    /// Like [`Method::from_str`], but keeps unknown tokens as extensions.
    pub fn parse(s: &str) -> Self {
        Self::from_str(s).unwrap_or_else(|| Method::Extension(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::TRACE => "TRACE",
            Method::CONNECT => "CONNECT",
            Method::Extension(token) => token,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request.
#[derive(Debug)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The request-target exactly as received (origin or absolute form)
    pub target: String,
    /// HTTP version (typically "HTTP/1.1")
    pub version: String,
    pub headers: Headers,
    pub body: EntityBody,
    /// Rewrite framing headers once a chunked or until-close body has been
    /// fully buffered.
    pub adjust_entity_headers: bool,
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    target: Option<String>,
    version: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            target: None,
            version: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.append_at(key, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> std::result::Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            target: self.target.ok_or("target missing")?,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: EntityBody::from_bytes(self.body),
            adjust_entity_headers: true,
        })
    }
}

impl Request {
    /// `METHOD target version`
    pub fn firstline(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.version)
    }

    /// Retrieves the last value of a header (case-insensitive).
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// GET and HEAD requests never carry an entity; everything else follows
    /// the general framing rules.
    pub fn entity_size(&self) -> Result<EntitySize> {
        if matches!(self.method, Method::GET | Method::HEAD) {
            return Ok(EntitySize::Length(0));
        }
        message::general_entity_size(&self.headers)
    }

    /// The request-target parsed as an absolute URL, if it is one.
    pub fn parsed_target(&self) -> Option<url::Url> {
        url::Url::parse(&self.target).ok()
    }

    /// Host name from the Host header, without any port.
    pub fn host(&self) -> Option<&str> {
        self.header(field::HOST.name())
            .map(|host| split_host_port(host).0)
            .filter(|host| !host.is_empty())
    }

    /// Removes everything up to and including the first occurrence of the
    /// Host header value from the request-target, so `http://example.com/a`
    /// becomes `/a`. Some origins mishandle targets that repeat the host.
    pub fn strip_host_from_target(&mut self) {
        let Some(host) = self.header(field::HOST.name()).map(|host| host.trim().to_string()) else {
            return;
        };
        self.target = strip_host(&self.target, &host).to_string();
    }

    /// Sets a default for the Host header from an absolute request-target
    /// and works out where to connect.
    pub fn resolve_origin(&mut self) -> Result<(String, u16)> {
        let parsed = self.parsed_target();
        let missing_host = self.host().is_none();
        if let Some(url) = parsed.as_ref().filter(|_| missing_host) {
            if let Some(url_host) = url.host_str() {
                let value = match url.port() {
                    Some(port) => format!("{}:{}", url_host, port),
                    None => url_host.to_string(),
                };
                self.headers.set(field::HOST.name(), value);
            }
        }

        let header_port = self
            .header(field::HOST.name())
            .and_then(|host| split_host_port(host).1);
        let host = self.host().ok_or(HttpError::NoHost)?.to_string();
        let port = parsed
            .as_ref()
            .and_then(|url| url.port())
            .or(header_port)
            .unwrap_or(80);

        Ok((host, port))
    }

    /// Buffers the entity, rewrites framing headers if needed and returns
    /// the full wire form of the request.
    pub async fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let entity = self.body.contents().await?;
        if self.adjust_entity_headers {
            message::adjust_entity_headers(&mut self.headers, &self.body, entity.len()).await;
        }
        Ok(message::serialize(&self.firstline(), &self.headers, &entity))
    }

    /// Sends this request and reads the response from the same connection.
    ///
    /// If `socket` is given it is assumed to already be connected to the
    /// right server; otherwise a connection is opened to the host named by
    /// the request-target or the Host header.
    pub async fn fetch_response(&mut self, socket: Option<TcpStream>) -> Result<Response> {
        let (host, port) = self.resolve_origin()?;

        let mut stream = match socket {
            Some(stream) => stream,
            None => {
                tracing::debug!(%host, port, "connecting to origin");
                TcpStream::connect((host.as_str(), port)).await?
            }
        };

        let bytes = self.to_bytes().await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        tracing::trace!(request = %self.firstline(), "request sent");

        let dispatcher = self.body.dispatcher();
        match Message::read_with(BufReader::new(stream), dispatcher).await? {
            Message::Response(mut response) => {
                response.set_request_method(self.method.clone()).await?;
                Ok(response)
            }
            Message::Request(request) => Err(HttpError::UnexpectedMessage(format!(
                "expected a response, got request {:?}",
                request.firstline()
            ))),
        }
    }
}

/// The part of `target` after the first occurrence of `host`, or all of
/// `target` if the host does not appear in it.
pub fn strip_host<'a>(target: &'a str, host: &str) -> &'a str {
    if host.is_empty() {
        return target;
    }
    match target.find(host) {
        Some(pos) => &target[pos + host.len()..],
        None => target,
    }
}

/// Splits `host[:port]`. An unparsable port is left attached to the host.
fn split_host_port(value: &str) -> (&str, Option<u16>) {
    let value = value.trim();
    if let Some((host, port)) = value.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            return (host, Some(port));
        }
    }
    (value, None)
}
