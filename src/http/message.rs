//! Message construction and the framing rules shared by requests and
//! responses.

use tokio::io::AsyncBufRead;

use crate::http::body::EntityBody;
use crate::http::dispatch::Dispatcher;
use crate::http::entity::EntitySize;
use crate::http::error::Result;
use crate::http::field;
use crate::http::headers::Headers;
use crate::http::parser;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};

/// Either kind of HTTP message, as decided by its firstline.
#[derive(Debug)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Reads one message head from `source` and leaves the entity to be
    /// decoded lazily by the message body. Notifications go to the
    /// process-wide dispatcher.
    pub async fn read_from<R>(source: R) -> Result<Message>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        Self::read_with(source, Dispatcher::global()).await
    }

    /// Like [`Message::read_from`], announcing body progress on `dispatcher`.
    pub async fn read_with<R>(mut source: R, dispatcher: Dispatcher) -> Result<Message>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (firstline, header_text) = parser::read_head(&mut source).await?;

        if parser::is_status_line(&firstline) {
            let line = parser::parse_status_line(&firstline)?;
            let headers = parser::parse_header_block(&header_text)?;
            let mut response = Response::from_parts(
                line.version,
                StatusCode(line.status),
                line.reason,
                headers,
                EntityBody::from_bytes(Vec::new()),
            );
            let size = response.entity_size()?;
            response.body = EntityBody::streaming(Box::new(source), size, dispatcher);
            tracing::trace!(firstline = %firstline, ?size, "response head parsed");
            Ok(Message::Response(response))
        } else {
            let line = parser::parse_request_line(&firstline)?;
            let headers = parser::parse_header_block(&header_text)?;
            let mut request = Request {
                method: Method::parse(&line.method),
                target: line.target,
                version: line.version,
                headers,
                body: EntityBody::from_bytes(Vec::new()),
                adjust_entity_headers: true,
            };
            let size = request.entity_size()?;
            request.body = EntityBody::streaming(Box::new(source), size, dispatcher);
            tracing::trace!(firstline = %firstline, ?size, "request head parsed");
            Ok(Message::Request(request))
        }
    }

    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(request) => &request.headers,
            Message::Response(response) => &response.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        match self {
            Message::Request(request) => &mut request.headers,
            Message::Response(response) => &mut response.headers,
        }
    }

    pub fn body(&self) -> &EntityBody {
        match self {
            Message::Request(request) => &request.body,
            Message::Response(response) => &response.body,
        }
    }

    pub fn firstline(&self) -> String {
        match self {
            Message::Request(request) => request.firstline(),
            Message::Response(response) => response.firstline(),
        }
    }

    pub fn entity_size(&self) -> Result<EntitySize> {
        match self {
            Message::Request(request) => request.entity_size(),
            Message::Response(response) => response.entity_size(),
        }
    }

    pub async fn to_bytes(&mut self) -> Result<Vec<u8>> {
        match self {
            Message::Request(request) => request.to_bytes().await,
            Message::Response(response) => response.to_bytes().await,
        }
    }
}

/// The framing rule for messages without a method- or status-specific
/// override: a non-identity Transfer-Encoding means chunked, then
/// Content-Length, then `multipart/byteranges`, and otherwise the entity runs
/// until the connection closes.
pub fn general_entity_size(headers: &Headers) -> Result<EntitySize> {
    if let Some(codings) = headers.field(&field::TRANSFER_ENCODING)? {
        if codings
            .iter()
            .any(|coding| !coding.eq_ignore_ascii_case("identity"))
        {
            return Ok(EntitySize::Chunked);
        }
    }

    if let Some(length) = headers.field(&field::CONTENT_LENGTH)? {
        return Ok(EntitySize::Length(length));
    }

    if let Some(content_type) = headers.get(field::CONTENT_TYPE.name()) {
        let media_type = content_type.split(';').next().unwrap_or_default().trim();
        if media_type.eq_ignore_ascii_case("multipart/byteranges") {
            return Ok(EntitySize::MultipartByteranges);
        }
    }

    Ok(EntitySize::UntilClose)
}

/// Once a chunked or until-close body is fully in memory, its headers are
/// rewritten to describe the buffered form.
pub(crate) async fn adjust_entity_headers(headers: &mut Headers, body: &EntityBody, len: usize) {
    if !body.is_materialized() {
        return;
    }
    if matches!(
        body.framing().await,
        Some(EntitySize::Chunked | EntitySize::UntilClose)
    ) {
        headers.delete(field::TRANSFER_ENCODING.name());
        headers.set_field(&field::CONTENT_LENGTH, Some(&(len as u64)));
    }
}

/// Firstline, CRLF, sorted header lines, blank line, entity.
pub fn serialize(firstline: &str, headers: &Headers, entity: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(firstline.len() + entity.len() + 256);
    out.extend_from_slice(firstline.as_bytes());
    out.extend_from_slice(b"\r\n");
    headers.write_to(&mut out);
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(entity);
    out
}
