//! Cache keys and their on-disk file names.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha512};

use crate::http::error::{HttpError, Result};
use crate::http::field;
use crate::http::request::{Request, strip_host};

/// Longest file name used verbatim; longer keys are hashed.
pub const MAX_FILENAME_LEN: usize = 255;

/// Characters that cannot appear in cache file names and their stand-ins.
const SUBSTITUTIONS: [(char, char); 10] = [
    ('/', '#'),
    ('&', '~'),
    (';', ':'),
    ('|', '-'),
    ('<', '['),
    ('>', ']'),
    ('?', ','),
    ('(', '{'),
    (')', '}'),
    ('$', '%'),
];

/// Identity of a cacheable request: the Host value followed by the
/// request-target with any leading copy of the host removed, e.g.
/// `example.com/a?b=1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(host: &str, target: &str) -> Self {
        Fingerprint(format!("{}{}", host, strip_host(target, host)))
    }

    /// Strips the host out of the request-target in place and fingerprints
    /// the result.
    pub fn from_request(request: &mut Request) -> Result<Self> {
        request.strip_host_from_target();
        let host = request
            .header(field::HOST.name())
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or(HttpError::NoHost)?;
        Ok(Fingerprint(format!("{}{}", host, request.target)))
    }

    /// Wraps a key that is already in fingerprint form, such as a normalized
    /// redirect target.
    pub fn from_key(key: impl Into<String>) -> Self {
        Fingerprint(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }

    /// File name for this key inside the cache directory.
    pub fn filename(&self) -> String {
        let name = if self.0.len() > MAX_FILENAME_LEN {
            hex::encode(Sha512::digest(self.0.as_bytes()))
        } else {
            self.0.clone()
        };

        name.chars()
            .map(|c| {
                SUBSTITUTIONS
                    .iter()
                    .find(|(from, _)| *from == c)
                    .map_or(c, |(_, to)| *to)
            })
            .collect()
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.filename())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_reserved_characters() {
        let fp = Fingerprint::from_key("a.com/x?y=1&z=(2);$|<>");
        assert_eq!(fp.filename(), "a.com#x,y=1~z={2}:%-[]");
    }

    #[test]
    fn long_keys_are_hashed() {
        let fp = Fingerprint::from_key("h".repeat(MAX_FILENAME_LEN + 1));
        let name = fp.filename();
        assert_eq!(name.len(), 128);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
