//! Opaque resource handles.
//!
//! A managed object is identified by a single string that packs the
//! connection endpoint, the TLS mode, the database path and the path of the
//! object inside the database:
//!
//! ```text
//! grpcs://ydb.example.net:2135/?database=/ru-central1/b1g/etn&path=dir/table
//! ```
//!
//! New handles always carry the explicit `&path=` marker. Handles issued by
//! older releases omitted it and relied on the database path being exactly
//! three segments deep; [`EntityIdentifier::decode`] still accepts those.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ReconcileError, Result};

const GRPC_SCHEME: &str = "grpc://";
const GRPCS_SCHEME: &str = "grpcs://";
const DATABASE_MARKER: &str = "/?database=";
const PATH_MARKERS: [&str; 2] = ["&path=", "?path="];

/// Number of `/` separators in a legacy handle that precede the entity path.
const LEGACY_DATABASE_SEPARATORS: usize = 4;

/// Location of a managed object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityIdentifier {
    endpoint_host: String,
    use_tls: bool,
    database_path: String,
    entity_path: String,
}

impl EntityIdentifier {
    /// Builds an identifier, checking that it can round-trip through
    /// [`encode`](Self::encode) and [`decode`](Self::decode).
    pub fn new(
        endpoint_host: impl Into<String>,
        use_tls: bool,
        database_path: impl Into<String>,
        entity_path: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            endpoint_host: endpoint_host.into(),
            use_tls,
            database_path: database_path.into(),
            entity_path: entity_path.into(),
        };
        id.validate()?;
        Ok(id)
    }

    fn validate(&self) -> Result<()> {
        let raw = self.encode();
        if self.endpoint_host.is_empty() {
            return Err(ReconcileError::malformed(&raw, "empty endpoint host"));
        }
        if self.endpoint_host.contains('/') {
            return Err(ReconcileError::malformed(&raw, "endpoint host contains '/'"));
        }
        if !self.database_path.starts_with('/') {
            return Err(ReconcileError::malformed(&raw, "database path is not absolute"));
        }
        if self.database_path.contains(['?', '&']) {
            return Err(ReconcileError::malformed(
                &raw,
                "database path contains a query separator",
            ));
        }
        if self.entity_path.is_empty() {
            return Err(ReconcileError::malformed(&raw, "empty entity path"));
        }
        Ok(())
    }

    /// Host and port of the endpoint, without scheme.
    #[must_use]
    pub fn endpoint_host(&self) -> &str {
        &self.endpoint_host
    }

    /// Whether the endpoint is reached over TLS.
    #[must_use]
    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Absolute database path, e.g. `/local`.
    #[must_use]
    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    /// Path of the object relative to the database.
    #[must_use]
    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    /// Connection string for the database, e.g. `grpc://localhost:2136/?database=/local`.
    #[must_use]
    pub fn full_endpoint_uri(&self) -> String {
        let scheme = if self.use_tls {
            GRPCS_SCHEME
        } else {
            GRPC_SCHEME
        };
        format!(
            "{}{}{}{}",
            scheme, self.endpoint_host, DATABASE_MARKER, self.database_path
        )
    }

    /// Absolute path of the object, e.g. `/local/dir/table`.
    #[must_use]
    pub fn full_entity_path(&self) -> String {
        format!("{}/{}", self.database_path, self.entity_path)
    }

    /// Encodes the identifier into its canonical handle.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}&path={}", self.full_endpoint_uri(), self.entity_path)
    }

    /// Decodes a handle produced by [`encode`](Self::encode) or by the
    /// legacy positional format.
    pub fn decode(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ReconcileError::malformed(raw, "empty identifier"));
        }

        let (use_tls, rest) = if let Some(rest) = raw.strip_prefix(GRPCS_SCHEME) {
            (true, rest)
        } else if let Some(rest) = raw.strip_prefix(GRPC_SCHEME) {
            (false, rest)
        } else {
            return Err(ReconcileError::malformed(
                raw,
                "expected grpc:// or grpcs:// scheme",
            ));
        };

        let (host, database_part) = rest
            .split_once(DATABASE_MARKER)
            .ok_or_else(|| ReconcileError::malformed(raw, "missing '/?database=' section"))?;
        if host.is_empty() {
            return Err(ReconcileError::malformed(raw, "empty endpoint host"));
        }

        let (database_path, entity_path) = match split_marked(database_part) {
            Some(parts) => parts,
            None => {
                warn!(identifier = %raw, "Decoding legacy positional identifier");
                split_legacy(database_part)
                    .ok_or_else(|| ReconcileError::malformed(raw, "cannot locate entity path"))?
            }
        };
        if entity_path.is_empty() {
            return Err(ReconcileError::malformed(raw, "empty entity path"));
        }
        if !database_path.starts_with('/') {
            return Err(ReconcileError::malformed(raw, "database path is not absolute"));
        }

        Ok(Self {
            endpoint_host: host.to_string(),
            use_tls,
            database_path: database_path.to_string(),
            entity_path: entity_path.to_string(),
        })
    }
}

/// Splits `<database><marker><entity>` at the first path marker.
fn split_marked(database_part: &str) -> Option<(&str, &str)> {
    PATH_MARKERS
        .iter()
        .filter_map(|marker| {
            database_part
                .find(marker)
                .map(|idx| (idx, &database_part[idx + marker.len()..]))
        })
        .min_by_key(|(idx, _)| *idx)
        .map(|(idx, entity)| (&database_part[..idx], entity))
}

/// Compatibility decoder for handles without a path marker: the database
/// path is whatever precedes the fourth `/`.
fn split_legacy(database_part: &str) -> Option<(&str, &str)> {
    let (idx, _) = database_part
        .char_indices()
        .filter(|(_, c)| *c == '/')
        .nth(LEGACY_DATABASE_SEPARATORS - 1)?;
    let entity = &database_part[idx + 1..];
    if entity.is_empty() {
        return None;
    }
    Some((&database_part[..idx], entity))
}

impl fmt::Display for EntityIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for EntityIdentifier {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        Self::decode(s)
    }
}

impl TryFrom<String> for EntityIdentifier {
    type Error = ReconcileError;

    fn try_from(value: String) -> Result<Self> {
        Self::decode(&value)
    }
}

impl From<EntityIdentifier> for String {
    fn from(id: EntityIdentifier) -> Self {
        id.encode()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(host: &str, tls: bool, db: &str, path: &str) -> EntityIdentifier {
        EntityIdentifier::new(host, tls, db, path).unwrap()
    }

    #[test]
    fn test_encode() {
        let x = id("localhost:2136", false, "/local", "dir/table");
        assert_eq!(
            x.encode(),
            "grpc://localhost:2136/?database=/local&path=dir/table"
        );
        assert_eq!(
            x.full_endpoint_uri(),
            "grpc://localhost:2136/?database=/local"
        );
        assert_eq!(x.full_entity_path(), "/local/dir/table");
    }

    #[test]
    fn test_encode_tls() {
        let x = id("ydb.serverless.example.net:2135", true, "/ru/b1g/etn", "t");
        assert!(x.encode().starts_with("grpcs://ydb.serverless.example.net:2135/"));
    }

    #[test]
    fn test_round_trip() {
        for x in [
            id("localhost:2136", false, "/local", "topic"),
            id("h:1", true, "/a/b/c", "x/y/z"),
            id("h:1", true, "/a", "weird&path=inside"),
            id("h:1", false, "/a/b/c/d/e", "t"),
        ] {
            assert_eq!(EntityIdentifier::decode(&x.encode()).unwrap(), x);
        }
    }

    #[test]
    fn test_decode_question_mark_marker() {
        let x = EntityIdentifier::decode("grpc://localhost:2136/?database=/local?path=topic")
            .unwrap();
        assert_eq!(x.endpoint_host(), "localhost:2136");
        assert!(!x.use_tls());
        assert_eq!(x.database_path(), "/local");
        assert_eq!(x.entity_path(), "topic");
    }

    #[test]
    fn test_decode_legacy() {
        let x =
            EntityIdentifier::decode("grpcs://h:2135/?database=/ru/b1g/etn/dir/table").unwrap();
        assert!(x.use_tls());
        assert_eq!(x.database_path(), "/ru/b1g/etn");
        assert_eq!(x.entity_path(), "dir/table");
    }

    #[test]
    fn test_decode_legacy_too_shallow() {
        let err = EntityIdentifier::decode("grpc://h:2135/?database=/ru/b1g/etn").unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedIdentifier { .. }));
    }

    #[test]
    fn test_decode_legacy_trailing_slash() {
        let err = EntityIdentifier::decode("grpc://h:2135/?database=/ru/b1g/etn/").unwrap_err();
        assert!(matches!(err, ReconcileError::MalformedIdentifier { .. }));
    }

    #[test]
    fn test_decode_errors() {
        for raw in [
            "",
            "http://h/?database=/local&path=t",
            "grpc://h/local&path=t",
            "grpc:///?database=/local&path=t",
            "grpc://h/?database=/local&path=",
            "grpc://h/?database=local&path=t",
        ] {
            let err = EntityIdentifier::decode(raw).unwrap_err();
            assert!(
                matches!(err, ReconcileError::MalformedIdentifier { .. }),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_new_rejects_invalid() {
        assert!(EntityIdentifier::new("h", false, "local", "t").is_err());
        assert!(EntityIdentifier::new("h", false, "/local", "").is_err());
        assert!(EntityIdentifier::new("", false, "/local", "t").is_err());
        assert!(EntityIdentifier::new("h", false, "/lo&cal", "t").is_err());
        assert!(EntityIdentifier::new("h/x", false, "/local", "t").is_err());
    }

    #[test]
    fn test_serde_as_handle() {
        let x = id("localhost:2136", false, "/local", "t");
        let json = serde_json::to_string(&x).unwrap();
        assert_eq!(json, "\"grpc://localhost:2136/?database=/local&path=t\"");
        let back: EntityIdentifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, x);
    }
}
