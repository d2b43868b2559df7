//! Logical-path-to-physical-key mapping

use std::fmt;

use serde::Serialize;

/// Physical backend key.
///
/// Deterministic function of the logical path and the configured key
/// prefix; no hidden state.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Key(String);

impl Key {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for Key {
    fn from(key: String) -> Self {
        Key(key)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Map a logical path to its physical backend key.
///
/// Without a prefix the path is returned unchanged. With a prefix, the
/// two are joined with exactly one `/`, regardless of stray leading or
/// trailing separators on either side.
pub fn build_key(prefix: Option<&str>, path: &str) -> Key {
    match prefix {
        Some(prefix) => Key(join_key(prefix, path)),
        None => Key(path.to_string()),
    }
}

fn join_key(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let path = path.trim_start_matches('/');

    if prefix.is_empty() {
        path.to_string()
    } else if path.is_empty() {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, path)
    }
}
