//! Describer backed by JSON snapshot files.
//!
//! The object at absolute path `/local/dir/users` is read from
//! `<root>/local/dir/users.json`. A missing file means the object does not
//! exist.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ReconcileError, Result};
use crate::reconciler::SchemaDescriber;
use crate::schema::{TableSpec, TopicSpec};

/// Reads observed state from a directory of JSON files.
#[derive(Debug, Clone)]
pub struct SnapshotDescriber {
    root: PathBuf,
}

impl SnapshotDescriber {
    /// Creates a describer rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File holding the snapshot for `path`.
    ///
    /// Paths with `..` segments are refused so lookups stay under the root.
    pub fn snapshot_file(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_matches('/'));
        if relative.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ReconcileError::Encoding(format!(
                "snapshot path '{}' leaves the snapshot directory",
                path
            )));
        }
        Ok(self.root.join(format!("{}.json", relative.display())))
    }

    async fn load<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let file = self.snapshot_file(path)?;
        let content = match tokio::fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path, file = %file.display(), "No snapshot");
                return Ok(None);
            }
            Err(e) => {
                return Err(ReconcileError::Describe {
                    path: path.to_string(),
                    source: Box::new(e),
                });
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| ReconcileError::Describe {
                path: path.to_string(),
                source: Box::new(e),
            })
    }
}

#[async_trait]
impl SchemaDescriber for SnapshotDescriber {
    async fn describe_table(&self, path: &str) -> Result<Option<TableSpec>> {
        self.load(path).await
    }

    async fn describe_topic(&self, path: &str) -> Result<Option<TopicSpec>> {
        self.load(path).await
    }
}
