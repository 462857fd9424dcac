//! Typed header fields.
//!
//! A [`Field`] binds a header name to a decode/encode pair. The four codec
//! kinds cover every header the proxy cares about: plain text, integers,
//! HTTP-dates and comma-separated lists. [`FIELD_TABLE`] maps known header
//! names to their kind so that [`Headers::typed`](crate::http::headers::Headers::typed)
//! can decode any header uniformly.

use std::time::SystemTime;

use crate::http::error::FieldError;
use crate::http::headers::{Headers, header_case};

/// A header name together with the codec that converts its raw string value.
pub struct Field<T> {
    name: &'static str,
    decode: fn(&'static str, &str) -> Result<T, FieldError>,
    encode: fn(&T) -> String,
}

impl<T> Field<T> {
    pub const fn new(
        name: &'static str,
        decode: fn(&'static str, &str) -> Result<T, FieldError>,
        encode: fn(&T) -> String,
    ) -> Self {
        Self {
            name,
            decode,
            encode,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn decode(&self, raw: &str) -> Result<T, FieldError> {
        (self.decode)(self.name, raw)
    }

    pub fn encode(&self, value: &T) -> String {
        (self.encode)(value)
    }
}

fn decode_text(_: &'static str, raw: &str) -> Result<String, FieldError> {
    Ok(raw.to_string())
}

fn encode_text(value: &String) -> String {
    value.clone()
}

fn decode_integer(header: &'static str, raw: &str) -> Result<u64, FieldError> {
    raw.trim()
        .parse()
        .map_err(|_| FieldError::InvalidInteger {
            header,
            value: raw.to_string(),
        })
}

fn encode_integer(value: &u64) -> String {
    value.to_string()
}

fn decode_date(header: &'static str, raw: &str) -> Result<SystemTime, FieldError> {
    httpdate::parse_http_date(raw.trim()).map_err(|_| FieldError::InvalidDate {
        header,
        value: raw.to_string(),
    })
}

fn encode_date(value: &SystemTime) -> String {
    httpdate::fmt_http_date(*value)
}

fn decode_list(_: &'static str, raw: &str) -> Result<Vec<String>, FieldError> {
    Ok(split_list(raw))
}

fn encode_list(items: &Vec<String>) -> String {
    join_list(items)
}

/// Splits a comma-separated header value. Double-quoted items may contain
/// commas; `""` inside quotes is a literal quote. Items are trimmed and empty
/// items dropped.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => {
                items.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    items.push(current);

    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Joins list items with `", "`, quoting items that contain a comma or a
/// quote.
pub fn join_list<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .map(|item| {
            let item = item.as_ref().trim();
            if item.contains(',') || item.contains('"') {
                format!("\"{}\"", item.replace('"', "\"\""))
            } else {
                item.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

macro_rules! text_field {
    ($ident:ident, $name:literal) => {
        pub const $ident: Field<String> = Field::new($name, decode_text, encode_text);
    };
}

macro_rules! integer_field {
    ($ident:ident, $name:literal) => {
        pub const $ident: Field<u64> = Field::new($name, decode_integer, encode_integer);
    };
}

macro_rules! date_field {
    ($ident:ident, $name:literal) => {
        pub const $ident: Field<SystemTime> = Field::new($name, decode_date, encode_date);
    };
}

macro_rules! list_field {
    ($ident:ident, $name:literal) => {
        pub const $ident: Field<Vec<String>> = Field::new($name, decode_list, encode_list);
    };
}

// general
list_field!(CACHE_CONTROL, "Cache-Control");
list_field!(CONNECTION, "Connection");
date_field!(DATE, "Date");
list_field!(PRAGMA, "Pragma");
list_field!(TRAILER, "Trailer");
list_field!(TRANSFER_ENCODING, "Transfer-Encoding");
list_field!(UPGRADE, "Upgrade");
list_field!(VIA, "Via");
list_field!(WARNING, "Warning");

// request
list_field!(ACCEPT, "Accept");
list_field!(ACCEPT_CHARSET, "Accept-Charset");
list_field!(ACCEPT_ENCODING, "Accept-Encoding");
list_field!(ACCEPT_LANGUAGE, "Accept-Language");
text_field!(AUTHORIZATION, "Authorization");
list_field!(EXPECT, "Expect");
text_field!(FROM, "From");
text_field!(HOST, "Host");
list_field!(IF_MATCH, "If-Match");
date_field!(IF_MODIFIED_SINCE, "If-Modified-Since");
list_field!(IF_NONE_MATCH, "If-None-Match");
text_field!(IF_RANGE, "If-Range");
date_field!(IF_UNMODIFIED_SINCE, "If-Unmodified-Since");
integer_field!(MAX_FORWARDS, "Max-Forwards");
text_field!(PROXY_AUTHORIZATION, "Proxy-Authorization");
text_field!(RANGE, "Range");
text_field!(REFERER, "Referer");
list_field!(TE, "Te");
list_field!(USER_AGENT, "User-Agent");
text_field!(COOKIE, "Cookie");

// response
list_field!(ACCEPT_RANGES, "Accept-Ranges");
integer_field!(AGE, "Age");
text_field!(ETAG, "Etag");
text_field!(LOCATION, "Location");
list_field!(PROXY_AUTHENTICATE, "Proxy-Authenticate");
text_field!(RETRY_AFTER, "Retry-After");
text_field!(SERVER, "Server");
list_field!(VARY, "Vary");
list_field!(WWW_AUTHENTICATE, "Www-Authenticate");
text_field!(SET_COOKIE, "Set-Cookie");

// entity
list_field!(ALLOW, "Allow");
list_field!(CONTENT_ENCODING, "Content-Encoding");
list_field!(CONTENT_LANGUAGE, "Content-Language");
integer_field!(CONTENT_LENGTH, "Content-Length");
text_field!(CONTENT_LOCATION, "Content-Location");
text_field!(CONTENT_MD5, "Content-Md5");
text_field!(CONTENT_RANGE, "Content-Range");
text_field!(CONTENT_TYPE, "Content-Type");
date_field!(EXPIRES, "Expires");
date_field!(LAST_MODIFIED, "Last-Modified");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Date,
    List,
}

/// A decoded header value of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    Integer(u64),
    Date(SystemTime),
    List(Vec<String>),
}

impl FieldKind {
    pub fn decode(self, header: &'static str, raw: &str) -> Result<FieldValue, FieldError> {
        Ok(match self {
            FieldKind::Text => FieldValue::Text(decode_text(header, raw)?),
            FieldKind::Integer => FieldValue::Integer(decode_integer(header, raw)?),
            FieldKind::Date => FieldValue::Date(decode_date(header, raw)?),
            FieldKind::List => FieldValue::List(decode_list(header, raw)?),
        })
    }
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            FieldValue::Text(_) => FieldKind::Text,
            FieldValue::Integer(_) => FieldKind::Integer,
            FieldValue::Date(_) => FieldKind::Date,
            FieldValue::List(_) => FieldKind::List,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            FieldValue::Text(text) => encode_text(text),
            FieldValue::Integer(n) => encode_integer(n),
            FieldValue::Date(date) => encode_date(date),
            FieldValue::List(items) => encode_list(items),
        }
    }
}

/// Codec kind for every header with known structure. Names are stored in
/// header case.
pub static FIELD_TABLE: &[(&str, FieldKind)] = &[
    ("Accept", FieldKind::List),
    ("Accept-Charset", FieldKind::List),
    ("Accept-Encoding", FieldKind::List),
    ("Accept-Language", FieldKind::List),
    ("Accept-Ranges", FieldKind::List),
    ("Age", FieldKind::Integer),
    ("Allow", FieldKind::List),
    ("Authorization", FieldKind::Text),
    ("Cache-Control", FieldKind::List),
    ("Connection", FieldKind::List),
    ("Content-Encoding", FieldKind::List),
    ("Content-Language", FieldKind::List),
    ("Content-Length", FieldKind::Integer),
    ("Content-Location", FieldKind::Text),
    ("Content-Md5", FieldKind::Text),
    ("Content-Range", FieldKind::Text),
    ("Content-Type", FieldKind::Text),
    ("Cookie", FieldKind::Text),
    ("Date", FieldKind::Date),
    ("Etag", FieldKind::Text),
    ("Expect", FieldKind::List),
    ("Expires", FieldKind::Date),
    ("From", FieldKind::Text),
    ("Host", FieldKind::Text),
    ("If-Match", FieldKind::List),
    ("If-Modified-Since", FieldKind::Date),
    ("If-None-Match", FieldKind::List),
    ("If-Range", FieldKind::Text),
    ("If-Unmodified-Since", FieldKind::Date),
    ("Last-Modified", FieldKind::Date),
    ("Location", FieldKind::Text),
    ("Max-Forwards", FieldKind::Integer),
    ("Pragma", FieldKind::List),
    ("Proxy-Authenticate", FieldKind::List),
    ("Proxy-Authorization", FieldKind::Text),
    ("Range", FieldKind::Text),
    ("Referer", FieldKind::Text),
    ("Retry-After", FieldKind::Text),
    ("Server", FieldKind::Text),
    ("Set-Cookie", FieldKind::Text),
    ("Te", FieldKind::List),
    ("Trailer", FieldKind::List),
    ("Transfer-Encoding", FieldKind::List),
    ("Upgrade", FieldKind::List),
    ("User-Agent", FieldKind::List),
    ("Vary", FieldKind::List),
    ("Via", FieldKind::List),
    ("Warning", FieldKind::List),
    ("Www-Authenticate", FieldKind::List),
];

/// Looks up a header's codec kind. Unknown headers are plain text.
pub fn kind_of(name: &str) -> (&'static str, FieldKind) {
    let name = header_case(name);
    FIELD_TABLE
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(known, kind)| (*known, *kind))
        .unwrap_or(("extension header", FieldKind::Text))
}

impl Headers {
    /// Decodes `name` with the codec registered in [`FIELD_TABLE`].
    pub fn typed(&self, name: &str) -> Result<Option<FieldValue>, FieldError> {
        let (label, kind) = kind_of(name);
        self.get(name).map(|raw| kind.decode(label, raw)).transpose()
    }

    /// Encodes a value for `name`, checking that it matches the registered
    /// codec kind. `None` deletes the header.
    pub fn set_typed(&mut self, name: &str, value: Option<FieldValue>) -> Result<(), FieldError> {
        let Some(value) = value else {
            self.delete(name);
            return Ok(());
        };
        let (label, kind) = kind_of(name);
        if value.kind() != kind {
            return Err(FieldError::WrongKind {
                header: label,
                expected: match kind {
                    FieldKind::Text => "text",
                    FieldKind::Integer => "integer",
                    FieldKind::Date => "http-date",
                    FieldKind::List => "list",
                },
            });
        }
        self.set(name, value.encode());
        Ok(())
    }
}
