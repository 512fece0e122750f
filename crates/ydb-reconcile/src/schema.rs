//! Schema representation types.
//!
//! These types describe tables and topics. The same types carry both the
//! desired state (built from configuration) and the observed state (built
//! from a describe call against the database).

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::codec::{Codec, CodecTable};
use crate::consumers::{ConsumerSpec, ConsumerSpecInput};
use crate::error::{ReconcileError, Result};

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// YQL type, e.g. `Utf8` or `Optional<Uint64>`.
    #[serde(rename = "type")]
    pub column_type: String,
    /// Column family the column is stored in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Whether the column is declared NOT NULL.
    #[serde(default)]
    pub not_null: bool,
}

impl ColumnSpec {
    /// Creates a new nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            family: None,
            not_null: false,
        }
    }

    /// Assigns the column to a family.
    #[must_use]
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Type with any `Optional<...>` wrapper or trailing `?` removed.
    #[must_use]
    pub fn base_type(&self) -> &str {
        let ty = self.column_type.trim();
        if let Some(inner) = ty
            .strip_prefix("Optional<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return inner.trim();
        }
        ty.strip_suffix('?').unwrap_or(ty)
    }
}

/// Whether a secondary index is updated synchronously with the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Updated in the writing transaction.
    #[default]
    Sync,
    /// Updated in the background.
    Async,
}

impl IndexKind {
    /// DDL keyword for this kind.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Sync => "SYNC",
            Self::Async => "ASYNC",
        }
    }
}

/// Schema definition for a global secondary index.
///
/// Equality compares the name, the key column sequence and the cover
/// columns as a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Sync or async maintenance.
    #[serde(default)]
    pub kind: IndexKind,
    /// Indexed columns, in key order.
    pub columns: Vec<String>,
    /// Extra columns stored in the index.
    #[serde(default)]
    pub cover: Vec<String>,
}

impl IndexSpec {
    /// Creates a new synchronous index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: IndexKind::Sync,
            columns,
            cover: Vec::new(),
        }
    }

    /// Sets the index kind.
    #[must_use]
    pub fn kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the cover columns.
    #[must_use]
    pub fn cover(mut self, cover: Vec<String>) -> Self {
        self.cover = cover;
        self
    }

    fn cover_set(&self) -> BTreeSet<&str> {
        self.cover.iter().map(String::as_str).collect()
    }
}

impl PartialEq for IndexSpec {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.columns == other.columns
            && self.cover_set() == other.cover_set()
    }
}

impl Eq for IndexSpec {}

/// Schema definition for a column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilySpec {
    /// Family name.
    pub name: String,
    /// Storage pool, e.g. `ssd` or `rot`.
    pub media_type: String,
    /// Compression codec, e.g. `lz4` or `off`.
    pub compression: String,
}

impl FamilySpec {
    /// Creates a new family.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        compression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            compression: compression.into(),
        }
    }
}

/// Row expiration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSpec {
    /// Column holding the row timestamp.
    pub column_name: String,
    /// ISO 8601 duration, e.g. `PT1H`.
    pub expire_interval: String,
}

impl TtlSpec {
    /// Creates TTL settings.
    #[must_use]
    pub fn new(column_name: impl Into<String>, expire_interval: impl Into<String>) -> Self {
        Self {
            column_name: column_name.into(),
            expire_interval: expire_interval.into(),
        }
    }
}

/// Partitioning settings. Every field is optional; absent fields are left
/// to the server defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitioningSpec {
    /// Number of equal-sized partitions created up front.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uniform_partitions: Option<u64>,
    /// Lower bound for automatic partitioning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_partitions: Option<u64>,
    /// Upper bound for automatic partitioning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_partitions: Option<u64>,
    /// Split partitions under load.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_load_enabled: Option<bool>,
    /// Split partitions that grow too large.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_size_enabled: Option<bool>,
    /// Size at which partitions are split.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by_size_threshold_bytes: Option<u64>,
    /// Explicit split points; each tuple is typed by the primary key.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partition_at_keys: Vec<Vec<String>>,
}

impl PartitioningSpec {
    /// Returns true if no setting is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Replica placement settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSpec {
    /// Raw `READ_REPLICAS_SETTINGS` value, e.g. `PER_AZ:1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_replicas_setting: Option<String>,
}

/// What a changefeed emits for each change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangefeedMode {
    /// Only the primary key.
    KeysOnly,
    /// The primary key and the changed columns.
    #[default]
    Updates,
    /// The row after the change.
    NewImage,
    /// The row before the change.
    OldImage,
    /// The row before and after the change.
    NewAndOldImages,
}

impl ChangefeedMode {
    /// DDL literal for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeysOnly => "KEYS_ONLY",
            Self::Updates => "UPDATES",
            Self::NewImage => "NEW_IMAGE",
            Self::OldImage => "OLD_IMAGE",
            Self::NewAndOldImages => "NEW_AND_OLD_IMAGES",
        }
    }
}

/// Record format of a changefeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangefeedFormat {
    /// Native JSON records.
    #[default]
    Json,
    /// DynamoDB Streams compatible JSON.
    DynamodbStreamsJson,
}

impl ChangefeedFormat {
    /// DDL literal for this format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "JSON",
            Self::DynamodbStreamsJson => "DYNAMODB_STREAMS_JSON",
        }
    }
}

/// Schema definition for a changefeed attached to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangefeedSpec {
    /// Changefeed name.
    pub name: String,
    /// What each record contains.
    #[serde(default)]
    pub mode: ChangefeedMode,
    /// Record encoding.
    #[serde(default)]
    pub format: ChangefeedFormat,
    /// Emit virtual timestamps.
    #[serde(default)]
    pub virtual_timestamps: bool,
    /// How long records are kept, as an ISO 8601 duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<String>,
    /// Export the existing rows when the changefeed is created.
    #[serde(default)]
    pub initial_scan: bool,
}

impl ChangefeedSpec {
    /// Creates an `UPDATES`/`JSON` changefeed.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: ChangefeedMode::default(),
            format: ChangefeedFormat::default(),
            virtual_timestamps: false,
            retention_period: None,
            initial_scan: false,
        }
    }

    /// Sets the mode.
    #[must_use]
    pub fn mode(mut self, mode: ChangefeedMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the format.
    #[must_use]
    pub fn format(mut self, format: ChangefeedFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the retention period.
    #[must_use]
    pub fn retention_period(mut self, period: impl Into<String>) -> Self {
        self.retention_period = Some(period.into());
        self
    }
}

/// Settings that can be changed on an existing table with `ALTER TABLE ... SET`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSettings {
    /// Row expiration.
    pub ttl: Option<TtlSpec>,
    /// Partitioning.
    pub partitioning: Option<PartitioningSpec>,
    /// Read replicas.
    pub replication: Option<ReplicationSpec>,
}

impl TableSettings {
    /// Returns true if no setting is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ttl.is_none() && self.partitioning.is_none() && self.replication.is_none()
    }
}

/// Complete schema definition for a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table path relative to the database.
    pub path: String,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnSpec>,
    /// Primary key column(s).
    pub primary_key: Vec<String>,
    /// Secondary indexes.
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
    /// Column families.
    #[serde(default)]
    pub families: Vec<FamilySpec>,
    /// Row expiration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlSpec>,
    /// Partitioning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<PartitioningSpec>,
    /// Read replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationSpec>,
    /// Extra table settings, rendered as `KEY = "value"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Changefeeds attached to the table.
    #[serde(default)]
    pub changefeeds: Vec<ChangefeedSpec>,
}

impl TableSpec {
    /// Creates a new table schema.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Adds a column to the table.
    #[must_use]
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key columns.
    #[must_use]
    pub fn primary_key(mut self, columns: Vec<String>) -> Self {
        self.primary_key = columns;
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Adds a column family.
    #[must_use]
    pub fn family(mut self, family: FamilySpec) -> Self {
        self.families.push(family);
        self
    }

    /// Sets row expiration.
    #[must_use]
    pub fn ttl(mut self, ttl: TtlSpec) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Sets partitioning.
    #[must_use]
    pub fn partitioning(mut self, partitioning: PartitioningSpec) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    /// Sets replication.
    #[must_use]
    pub fn replication(mut self, replication: ReplicationSpec) -> Self {
        self.replication = Some(replication);
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds a changefeed.
    #[must_use]
    pub fn changefeed(mut self, changefeed: ChangefeedSpec) -> Self {
        self.changefeeds.push(changefeed);
        self
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Settings alterable after creation.
    #[must_use]
    pub fn settings(&self) -> TableSettings {
        TableSettings {
            ttl: self.ttl.clone(),
            partitioning: self.partitioning.clone(),
            replication: self.replication.clone(),
        }
    }

    /// Checks that the table is internally consistent.
    ///
    /// Every problem found is reported, not just the first.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        let mut invalid = |message: String| {
            errors.push(ReconcileError::Encoding(format!(
                "table '{}': {}",
                self.path, message
            )));
        };

        if self.path.is_empty() {
            invalid("empty table path".to_string());
        }
        if self.columns.is_empty() {
            invalid("no columns".to_string());
        }
        if self.primary_key.is_empty() {
            invalid("missing primary key".to_string());
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                invalid(format!("duplicate column '{}'", column.name));
            }
        }

        let families: HashSet<&str> = self.families.iter().map(|f| f.name.as_str()).collect();
        for column in &self.columns {
            if let Some(family) = &column.family {
                if !families.contains(family.as_str()) {
                    invalid(format!(
                        "column '{}' uses undeclared family '{}'",
                        column.name, family
                    ));
                }
            }
        }

        for key in &self.primary_key {
            if !seen.contains(key.as_str()) {
                invalid(format!("primary key column '{}' is not declared", key));
            }
        }

        for index in &self.indexes {
            if index.columns.is_empty() {
                invalid(format!("index '{}' has no columns", index.name));
            }
            for column in index.columns.iter().chain(&index.cover) {
                if !seen.contains(column.as_str()) {
                    invalid(format!(
                        "index '{}' references undeclared column '{}'",
                        index.name, column
                    ));
                }
            }
        }

        if let Some(ttl) = &self.ttl {
            if !seen.contains(ttl.column_name.as_str()) {
                invalid(format!(
                    "TTL column '{}' is not declared",
                    ttl.column_name
                ));
            }
        }

        ReconcileError::collect(errors)
    }
}

/// Desired topic state, as written in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpecInput {
    /// Topic path relative to the database.
    pub path: String,
    /// Minimum number of active partitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions_count: Option<u64>,
    /// How long messages are kept, as an ISO 8601 duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<String>,
    /// Codec names; empty means every allowed codec.
    #[serde(default)]
    pub supported_codecs: Vec<String>,
    /// Consumers.
    #[serde(default)]
    pub consumers: Vec<ConsumerSpecInput>,
}

impl TopicSpecInput {
    /// Resolves codec names and consumer defaults into a full topic.
    pub fn resolve(&self, codecs: &CodecTable) -> Result<TopicSpec> {
        let supported_codecs = if self.supported_codecs.is_empty() {
            codecs.allowed().to_vec()
        } else {
            codecs.parse_list(&self.supported_codecs)?
        };

        let mut seen = HashSet::new();
        let mut consumers = Vec::with_capacity(self.consumers.len());
        for consumer in &self.consumers {
            if !seen.insert(consumer.name.as_str()) {
                return Err(ReconcileError::Encoding(format!(
                    "topic '{}': duplicate consumer '{}'",
                    self.path, consumer.name
                )));
            }
            consumers.push(consumer.resolve(codecs)?);
        }

        Ok(TopicSpec {
            path: self.path.clone(),
            partitions_count: self.partitions_count,
            retention_period: self.retention_period.clone(),
            supported_codecs,
            consumers,
        })
    }
}

/// Resolved topic state, as created or as described by the database.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSpec {
    /// Topic path relative to the database.
    pub path: String,
    /// Minimum number of active partitions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitions_count: Option<u64>,
    /// How long messages are kept, as an ISO 8601 duration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_period: Option<String>,
    /// Codecs writers may use.
    #[serde(default)]
    pub supported_codecs: Vec<Codec>,
    /// Consumers.
    #[serde(default)]
    pub consumers: Vec<ConsumerSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_table_spec_builder() {
        let table = TableSpec::new("dir/users")
            .column(ColumnSpec::new("id", "Uint64").not_null())
            .column(ColumnSpec::new("name", "Utf8").family("cold"))
            .primary_key(strings(&["id"]))
            .family(FamilySpec::new("cold", "rot", "lz4"));

        assert_eq!(table.path, "dir/users");
        assert_eq!(table.columns.len(), 2);
        assert!(table.get_column("id").unwrap().not_null);
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_index_equality_ignores_cover_order() {
        let a = IndexSpec::new("idx", strings(&["a", "b"])).cover(strings(&["c", "d"]));
        let b = IndexSpec::new("idx", strings(&["a", "b"])).cover(strings(&["d", "c"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_index_equality_respects_column_order() {
        let a = IndexSpec::new("idx", strings(&["a", "b"]));
        let b = IndexSpec::new("idx", strings(&["b", "a"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_base_type() {
        assert_eq!(ColumnSpec::new("a", "Optional<Uint64>").base_type(), "Uint64");
        assert_eq!(ColumnSpec::new("a", "Utf8?").base_type(), "Utf8");
        assert_eq!(ColumnSpec::new("a", "Int32").base_type(), "Int32");
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let table = TableSpec::new("t")
            .column(ColumnSpec::new("a", "Utf8").family("missing"))
            .primary_key(strings(&["b"]))
            .index(IndexSpec::new("idx", strings(&["c"])))
            .ttl(TtlSpec::new("ts", "PT1H"));

        match table.validate() {
            Err(ReconcileError::Multiple(errors)) => assert_eq!(errors.len(), 4),
            other => panic!("Expected Multiple, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_missing_primary_key() {
        let table = TableSpec::new("t").column(ColumnSpec::new("a", "Utf8"));
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("missing primary key"));
    }

    #[test]
    fn test_partitioning_is_empty() {
        assert!(PartitioningSpec::default().is_empty());
        let p = PartitioningSpec {
            min_partitions: Some(2),
            ..PartitioningSpec::default()
        };
        assert!(!p.is_empty());
    }

    #[test]
    fn test_table_spec_from_json() {
        let json = r#"{
            "path": "series",
            "columns": [
                {"name": "id", "type": "Uint64", "not_null": true},
                {"name": "title", "type": "Utf8"}
            ],
            "primary_key": ["id"],
            "indexes": [{"name": "by_title", "kind": "async", "columns": ["title"]}],
            "ttl": {"column_name": "id", "expire_interval": "PT1H"}
        }"#;
        let table: TableSpec = serde_json::from_str(json).unwrap();
        assert_eq!(table.columns[0].column_type, "Uint64");
        assert_eq!(table.indexes[0].kind, IndexKind::Async);
        assert!(table.partitioning.is_none());
        assert!(table.validate().is_ok());
    }

    #[test]
    fn test_topic_resolve() {
        let input = TopicSpecInput {
            path: "events".to_string(),
            supported_codecs: strings(&["GZIP"]),
            consumers: vec![ConsumerSpecInput::new("reader")],
            ..TopicSpecInput::default()
        };
        let topic = input.resolve(CodecTable::standard()).unwrap();
        assert_eq!(topic.supported_codecs, vec![Codec::Gzip]);
        assert_eq!(topic.consumers[0].supported_codecs, Codec::ALL.to_vec());

        let duplicated = TopicSpecInput {
            consumers: vec![ConsumerSpecInput::new("c"), ConsumerSpecInput::new("c")],
            ..input
        };
        assert!(duplicated.resolve(CodecTable::standard()).is_err());
    }
}
