use bytes::Bytes;

use crate::http::body::EntityBody;
use crate::http::entity::EntitySize;
use crate::http::error::Result;
use crate::http::field;
use crate::http::headers::Headers;
use crate::http::message;
use crate::http::request::Method;

/// An HTTP status code.
///
/// Any three digit code a server sends is representable; the well-known
/// ones have constants and canonical reason phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const CONTINUE: StatusCode = StatusCode(100);
    pub const OK: StatusCode = StatusCode(200);
    pub const CREATED: StatusCode = StatusCode(201);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const MOVED_PERMANENTLY: StatusCode = StatusCode(301);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const NOT_MODIFIED: StatusCode = StatusCode(304);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const BAD_GATEWAY: StatusCode = StatusCode(502);
    pub const GATEWAY_TIMEOUT: StatusCode = StatusCode(504);

    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use hoard::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.as_u16(), 200);
    /// assert_eq!(StatusCode::NOT_FOUND.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// True for codes that never carry an entity: 1xx, 204 and 304.
    pub fn is_bodiless(&self) -> bool {
        (100..200).contains(&self.0) || self.0 == 204 || self.0 == 304
    }

    /// Returns the standard reason phrase, or an empty string for codes this
    /// table does not know.
    ///
    /// # Example
    ///
    /// ```
    /// # use hoard::http::response::StatusCode;
    /// assert_eq!(StatusCode::OK.reason_phrase(), "OK");
    /// assert_eq!(StatusCode(599).reason_phrase(), "");
    /// ```
    pub fn reason_phrase(&self) -> &'static str {
        match self.0 {
            100 => "Continue",
            101 => "Switching Protocols",
            200 => "OK",
            201 => "Created",
            202 => "Accepted",
            204 => "No Content",
            206 => "Partial Content",
            301 => "Moved Permanently",
            302 => "Found",
            303 => "See Other",
            304 => "Not Modified",
            307 => "Temporary Redirect",
            400 => "Bad Request",
            401 => "Unauthorized",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            500 => "Internal Server Error",
            502 => "Bad Gateway",
            503 => "Service Unavailable",
            504 => "Gateway Timeout",
            _ => "",
        }
    }
}

/// An HTTP response.
#[derive(Debug)]
pub struct Response {
    pub version: String,
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: EntityBody,
    /// Method of the request this answers, once known. HEAD responses have
    /// no entity regardless of their headers.
    request_method: Option<Method>,
    /// Rewrite framing headers once a chunked or until-close body has been
    /// fully buffered.
    pub adjust_entity_headers: bool,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::OK)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    reason: Option<String>,
    headers: Headers,
    body: Bytes,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Overrides the canonical reason phrase.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Adds a header value, keeping earlier values for the same key.
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.append_at(key, value);
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Builds the final Response.
    ///
    /// Adds a Content-Length header matching the body unless one is already
    /// present.
    pub fn build(mut self) -> Response {
        if !self.headers.contains(field::CONTENT_LENGTH.name()) {
            self.headers
                .set_field(&field::CONTENT_LENGTH, Some(&(self.body.len() as u64)));
        }

        Response {
            version: "HTTP/1.1".to_string(),
            reason: self
                .reason
                .unwrap_or_else(|| self.status.reason_phrase().to_string()),
            status: self.status,
            headers: self.headers,
            body: EntityBody::from_bytes(self.body),
            request_method: None,
            adjust_entity_headers: true,
        }
    }
}

impl Response {
    pub(crate) fn from_parts(
        version: String,
        status: StatusCode,
        reason: String,
        headers: Headers,
        body: EntityBody,
    ) -> Self {
        Self {
            version,
            status,
            reason,
            headers,
            body,
            request_method: None,
            adjust_entity_headers: true,
        }
    }

    /// Creates a simple 200 OK response with the given body.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        ResponseBuilder::new(StatusCode::OK).body(body).build()
    }

    /// `version status reason`
    pub fn firstline(&self) -> String {
        format!("{} {} {}", self.version, self.status.as_u16(), self.reason)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    /// The Location header, if any.
    pub fn location(&self) -> Option<&str> {
        self.header(field::LOCATION.name())
    }

    pub fn request_method(&self) -> Option<&Method> {
        self.request_method.as_ref()
    }

    /// Records the method of the originating request. Learning that it was
    /// HEAD changes the entity size, so the body reader is rebuilt if nothing
    /// has been buffered yet; otherwise the body is left alone.
    pub async fn set_request_method(&mut self, method: Method) -> Result<()> {
        self.request_method = Some(method);
        if !self.body.buffering_started() {
            let size = self.entity_size()?;
            self.body.reframe(size).await?;
        }
        Ok(())
    }

    /// 1xx, 204 and 304 responses and answers to HEAD have no entity;
    /// everything else follows the general framing rules.
    pub fn entity_size(&self) -> Result<EntitySize> {
        if self.status.is_bodiless() {
            return Ok(EntitySize::Length(0));
        }
        if self.request_method == Some(Method::HEAD) {
            return Ok(EntitySize::Length(0));
        }
        message::general_entity_size(&self.headers)
    }

    /// Replaces the entity with in-memory bytes and updates Content-Length.
    pub fn set_body(&mut self, body: impl Into<Bytes>) {
        let body = body.into();
        self.headers.delete(field::TRANSFER_ENCODING.name());
        self.headers
            .set_field(&field::CONTENT_LENGTH, Some(&(body.len() as u64)));
        self.body = EntityBody::from_bytes(body);
    }

    /// Buffers the entity, rewrites framing headers if needed and returns
    /// the full wire form of the response.
    pub async fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let entity = self.body.contents().await?;
        if self.adjust_entity_headers {
            message::adjust_entity_headers(&mut self.headers, &self.body, entity.len()).await;
        }
        Ok(message::serialize(&self.firstline(), &self.headers, &entity))
    }
}
