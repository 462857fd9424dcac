use tokio::io::AsyncBufRead;

use crate::http::entity::read_line;
use crate::http::error::{HttpError, Result};
use crate::http::headers::Headers;

/// The parts of a request-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
}

/// The parts of a status-line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: String,
    pub status: u16,
    pub reason: String,
}

/// A firstline starting with `HTTP/` (any case) belongs to a response.
pub fn is_status_line(line: &str) -> bool {
    line.get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("HTTP/"))
}

/// Parses `METHOD target [version]`. A two-token line is an HTTP/0.9
/// request.
pub fn parse_request_line(line: &str) -> Result<RequestLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        [method, target, version] => Ok(RequestLine {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
        }),
        [method, target] => Ok(RequestLine {
            method: method.to_string(),
            target: target.to_string(),
            version: "HTTP/0.9".to_string(),
        }),
        _ => Err(HttpError::MalformedFirstline(line.to_string())),
    }
}

/// Parses `version status [reason phrase...]`.
pub fn parse_status_line(line: &str) -> Result<StatusLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(HttpError::MalformedFirstline(line.to_string()));
    }

    let status = parts[1]
        .parse::<u16>()
        .map_err(|_| HttpError::MalformedFirstline(line.to_string()))?;

    Ok(StatusLine {
        version: parts[0].to_string(),
        status,
        reason: parts[2..].join(" "),
    })
}

/// Parses an RFC 822 style header block. Lines starting with a space or tab
/// continue the previous header; their leading whitespace collapses to a
/// single space. Parsing stops at the first empty line.
pub fn parse_header_block(text: &str) -> Result<Headers> {
    let mut raw_headers: Vec<String> = Vec::new();

    for line in text.split('\n') {
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }

        if line.starts_with([' ', '\t']) {
            let Some(previous) = raw_headers.last_mut() else {
                return Err(HttpError::MalformedHeaders(format!(
                    "continuation line without a header: {:?}",
                    line
                )));
            };
            previous.push(' ');
            previous.push_str(line.trim_start());
        } else {
            raw_headers.push(line.to_string());
        }
    }

    let mut headers = Headers::new();
    for raw in raw_headers {
        let Some((key, value)) = raw.split_once(':') else {
            return Err(HttpError::MalformedHeaders(format!(
                "no colon found in header: {:?}",
                raw
            )));
        };
        let key = key.trim_end();
        if key.is_empty() {
            return Err(HttpError::MalformedHeaders(format!(
                "no header key in header: {:?}",
                raw
            )));
        }
        headers.append_at(key, value.trim());
    }

    Ok(headers)
}

/// Reads the firstline and the header block (up to and including the blank
/// line) from `source`. Returns the firstline with its line terminator
/// removed, and the raw header text.
pub async fn read_head<R>(source: &mut R) -> Result<(String, String)>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let firstline = read_line(source).await?;
    let firstline = String::from_utf8_lossy(&firstline).trim().to_string();

    let mut header_text = String::new();
    loop {
        let line = read_line(source).await?;
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(&line);
        header_text.push_str(&line);
        if line.trim().is_empty() {
            break;
        }
    }

    Ok((firstline, header_text))
}
