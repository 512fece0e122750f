//! Topic codecs and the codec name table.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Compression scheme attached to a topic or consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// No compression.
    Raw,
    /// Gzip.
    Gzip,
    /// Zstandard.
    Zstd,
}

impl Codec {
    /// Every codec, in declaration order.
    pub const ALL: [Codec; 3] = [Codec::Raw, Codec::Gzip, Codec::Zstd];

    /// Stable lowercase name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// Name as written in DDL settings.
    #[must_use]
    pub fn ddl_name(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Gzip => "GZIP",
            Self::Zstd => "ZSTD",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static STANDARD: LazyLock<CodecTable> = LazyLock::new(CodecTable::new);

/// Name lookup and the set of codecs new consumers get by default.
///
/// Built once and only read afterwards; pass it by reference to whatever
/// needs to resolve codec names.
#[derive(Debug, Clone)]
pub struct CodecTable {
    by_name: HashMap<&'static str, Codec>,
    allowed: Vec<Codec>,
}

impl Default for CodecTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecTable {
    /// Creates a table that allows every known codec.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allowed(Codec::ALL.to_vec())
    }

    /// Creates a table restricted to `allowed`.
    #[must_use]
    pub fn with_allowed(allowed: Vec<Codec>) -> Self {
        let by_name = Codec::ALL.iter().map(|c| (c.name(), *c)).collect();
        Self { by_name, allowed }
    }

    /// The process-wide default table.
    #[must_use]
    pub fn standard() -> &'static Self {
        &STANDARD
    }

    /// Codecs allowed by this table, used when none are specified.
    #[must_use]
    pub fn allowed(&self) -> &[Codec] {
        &self.allowed
    }

    /// Resolves a codec name, ignoring case.
    pub fn lookup(&self, name: &str) -> Result<Codec> {
        let normalized = name.trim().to_lowercase();
        match self.by_name.get(normalized.as_str()) {
            Some(codec) if self.allowed.contains(codec) => Ok(*codec),
            _ => Err(ReconcileError::UnknownCodec(name.to_string())),
        }
    }

    /// Resolves a list of codec names, preserving order.
    pub fn parse_list<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Codec>> {
        names.iter().map(|n| self.lookup(n.as_ref())).collect()
    }
}
