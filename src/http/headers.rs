//! Case-insensitive, multi-valued header storage.
//!
//! Every key passed in is normalized to *Header-Case* (`content-length`
//! becomes `Content-Length`) before it touches the map, so lookups never
//! depend on the casing a peer happened to send. Each key holds its values in
//! insertion order; iteration walks keys in sorted order, which is also the
//! order headers are serialized on the wire.

use std::collections::BTreeMap;
use std::fmt;

use crate::http::error::FieldError;
use crate::http::field::Field;

/// Normalizes a header name: every hyphen-delimited segment gets an upper
/// case first letter and lower case remainder.
pub fn header_case(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the last value stored for `key`, creating the key if it is
    /// not present yet.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let values = self.entries.entry(header_case(key)).or_default();
        match values.last_mut() {
            Some(last) => *last = value.into(),
            None => values.push(value.into()),
        }
    }

    /// Adds another value for `key`, keeping any previous ones.
    pub fn append_at(&mut self, key: &str, value: impl Into<String>) {
        self.entries
            .entry(header_case(key))
            .or_default()
            .push(value.into());
    }

    /// Returns the last value stored for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&header_case(key))
            .and_then(|values| values.last())
            .map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&header_case(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn get_at(&self, key: &str, index: usize) -> Option<&str> {
        self.entries
            .get(&header_case(key))
            .and_then(|values| values.get(index))
            .map(String::as_str)
    }

    /// Replaces the value at `index`. Returns `false` if there is no such
    /// value.
    pub fn set_at(&mut self, key: &str, index: usize, value: impl Into<String>) -> bool {
        match self
            .entries
            .get_mut(&header_case(key))
            .and_then(|values| values.get_mut(index))
        {
            Some(slot) => {
                *slot = value.into();
                true
            }
            None => false,
        }
    }

    /// Removes every value stored for `key`. Absent keys are ignored.
    pub fn delete(&mut self, key: &str) {
        self.entries.remove(&header_case(key));
    }

    /// Removes a single value, dropping the key once it has none left.
    pub fn delete_at(&mut self, key: &str, index: usize) -> Option<String> {
        let key = header_case(key);
        let values = self.entries.get_mut(&key)?;
        if index >= values.len() {
            return None;
        }
        let removed = values.remove(index);
        if values.is_empty() {
            self.entries.remove(&key);
        }
        Some(removed)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(&header_case(key))
    }

    /// Number of values stored for `key`.
    pub fn len_at(&self, key: &str) -> usize {
        self.entries.get(&header_case(key)).map_or(0, Vec::len)
    }

    /// Total number of header lines.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Yields `(key, value)` pairs sorted by key; repeated keys keep their
    /// insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (key.as_str(), value.as_str()))
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Decodes a typed field. A missing header yields `Ok(None)`.
    pub fn field<T>(&self, field: &Field<T>) -> Result<Option<T>, FieldError> {
        self.get(field.name()).map(|raw| field.decode(raw)).transpose()
    }

    /// Encodes a typed field. `None` deletes the header.
    pub fn set_field<T>(&mut self, field: &Field<T>, value: Option<&T>) {
        match value.map(|value| field.encode(value)) {
            Some(raw) => self.set(field.name(), raw),
            None => self.delete(field.name()),
        }
    }

    /// Writes one `Key: value\r\n` line per stored value.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for (key, value) in self.iter() {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            write!(f, "{}: {}\r\n", key, value)?;
        }
        Ok(())
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (key, value) in iter {
            headers.append_at(key.as_ref(), value);
        }
        headers
    }
}
