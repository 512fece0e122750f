//! YQL dialect.
//!
//! Statements are rendered byte-for-byte deterministically. Multi-part
//! bodies (CREATE TABLE, CREATE TOPIC, WITH clauses) put one entry per line,
//! tab-indented and comma-separated.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::codec::Codec;
use crate::consumers::{ConsumerOp, ConsumerSpec};
use crate::error::{ReconcileError, Result};
use crate::operations::{DdlOperation, TopicSettings};
use crate::schema::{
    ChangefeedSpec, ColumnSpec, FamilySpec, IndexSpec, ReplicationSpec, TableSettings, TableSpec,
    TopicSpec,
};

use super::DdlDialect;

/// YDB's YQL dialect.
#[derive(Debug, Clone, Default)]
pub struct YqlDialect;

impl YqlDialect {
    /// Creates a new YQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Generates SQL for creating a table.
    fn create_table_sql(&self, table: &TableSpec) -> Result<String> {
        if table.columns.is_empty() {
            return Err(ReconcileError::Encoding(format!(
                "table '{}' has no columns",
                table.path
            )));
        }
        if table.primary_key.is_empty() {
            return Err(ReconcileError::Encoding(format!(
                "table '{}' has no primary key",
                table.path
            )));
        }

        let mut entries = Vec::new();
        for column in &table.columns {
            entries.push(self.column_definition(column)?);
        }
        for index in &table.indexes {
            entries.push(self.index_definition(index)?);
        }
        entries.push(format!("PRIMARY KEY ({})", self.quote_list(&table.primary_key)?));
        for family in &table.families {
            entries.push(self.family_definition(family)?);
        }

        let mut sql = format!("CREATE TABLE {}(\n", self.quote_identifier(&table.path)?);
        sql.push_str(&block(&entries));
        sql.push_str("\n)");

        let key_columns = table
            .primary_key
            .iter()
            .map(|name| {
                table.get_column(name).ok_or_else(|| {
                    ReconcileError::Encoding(format!(
                        "primary key column '{}' is not declared",
                        name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let settings = self.with_entries(&table.settings(), &table.attributes, &key_columns)?;
        if !settings.is_empty() {
            sql.push_str("\nWITH (\n");
            sql.push_str(&block(&settings));
            sql.push_str("\n)");
        }

        sql.push('\n');
        Ok(sql)
    }

    /// Generates a column declaration.
    fn column_definition(&self, column: &ColumnSpec) -> Result<String> {
        let mut sql = format!(
            "{} {}",
            self.quote_identifier(&column.name)?,
            checked_type(column)?
        );
        if let Some(family) = &column.family {
            sql.push_str(" FAMILY ");
            sql.push_str(&self.quote_identifier(family)?);
        }
        if column.not_null {
            sql.push_str(" NOT NULL");
        }
        Ok(sql)
    }

    /// Generates an index declaration, without the leading `ADD`.
    fn index_definition(&self, index: &IndexSpec) -> Result<String> {
        if index.columns.is_empty() {
            return Err(ReconcileError::Encoding(format!(
                "index '{}' has no columns",
                index.name
            )));
        }
        let mut sql = format!(
            "INDEX {} GLOBAL {} ON ({})",
            self.quote_identifier(&index.name)?,
            index.kind.keyword(),
            self.quote_list(&index.columns)?
        );
        if !index.cover.is_empty() {
            sql.push_str(" COVER (");
            sql.push_str(&self.quote_list(&index.cover)?);
            sql.push(')');
        }
        Ok(sql)
    }

    /// Generates a column family declaration.
    fn family_definition(&self, family: &FamilySpec) -> Result<String> {
        Ok(format!(
            "FAMILY {}(DATA = {}, COMPRESSION = {})",
            self.quote_identifier(&family.name)?,
            self.quote_literal(&family.media_type)?,
            self.quote_literal(&family.compression)?
        ))
    }

    /// Generates the entries of a table `WITH (...)` or `SET (...)` clause.
    fn with_entries(
        &self,
        settings: &TableSettings,
        attributes: &BTreeMap<String, String>,
        key_columns: &[&ColumnSpec],
    ) -> Result<Vec<String>> {
        let mut entries = Vec::new();

        if let Some(ttl) = &settings.ttl {
            entries.push(format!(
                "TTL = Interval({}) ON {}",
                self.quote_literal(&ttl.expire_interval)?,
                self.quote_identifier(&ttl.column_name)?
            ));
        }

        if let Some(p) = &settings.partitioning {
            if let Some(enabled) = p.by_load_enabled {
                entries.push(format!("AUTO_PARTITIONING_BY_LOAD = {}", toggle(enabled)));
            }
            if let Some(enabled) = p.by_size_enabled {
                entries.push(format!(
                    "AUTO_PARTITIONING_BY_SIZE_ENABLED = {}",
                    toggle(enabled)
                ));
            }
            if let Some(bytes) = p.by_size_threshold_bytes {
                entries.push(format!("AUTO_PARTITIONING_BY_SIZE = {}", bytes));
            }
            if let Some(n) = p.uniform_partitions {
                entries.push(format!("UNIFORM_PARTITIONS = {}", n));
            }
            if let Some(n) = p.min_partitions {
                entries.push(format!("AUTO_PARTITIONING_MIN_PARTITIONS_COUNT = {}", n));
            }
            if let Some(n) = p.max_partitions {
                entries.push(format!("AUTO_PARTITIONING_MAX_PARTITIONS_COUNT = {}", n));
            }
            if !p.partition_at_keys.is_empty() {
                entries.push(format!(
                    "PARTITION_AT_KEYS = ({})",
                    self.split_points(&p.partition_at_keys, key_columns)?
                ));
            }
        }

        if let Some(ReplicationSpec {
            read_replicas_setting: Some(setting),
        }) = &settings.replication
        {
            entries.push(format!(
                "READ_REPLICAS_SETTINGS = {}",
                self.quote_literal(setting)?
            ));
        }

        for (key, value) in attributes {
            if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(ReconcileError::Encoding(format!(
                    "invalid attribute name '{}'",
                    key
                )));
            }
            entries.push(format!("{} = {}", key, self.quote_literal(value)?));
        }

        Ok(entries)
    }

    /// Renders explicit split points, typing each literal by the key column
    /// at the same position.
    fn split_points(&self, points: &[Vec<String>], key_columns: &[&ColumnSpec]) -> Result<String> {
        let mut tuples = Vec::with_capacity(points.len());
        for point in points {
            if point.is_empty() || point.len() > key_columns.len() {
                return Err(ReconcileError::Encoding(format!(
                    "split point has {} values but the primary key has {} columns",
                    point.len(),
                    key_columns.len()
                )));
            }
            let values = point
                .iter()
                .zip(key_columns)
                .map(|(literal, column)| self.typed_literal(column, literal))
                .collect::<Result<Vec<_>>>()?;
            tuples.push(format!("({})", values.join(", ")));
        }
        Ok(tuples.join(", "))
    }

    /// Renders `literal` as a value of the column's type.
    fn typed_literal(&self, column: &ColumnSpec, literal: &str) -> Result<String> {
        let invalid = || ReconcileError::InvalidColumnType {
            column: column.name.clone(),
            column_type: column.column_type.clone(),
            literal: literal.to_string(),
        };

        let rendered = match column.base_type() {
            "Int8" => integer::<i8>(literal),
            "Int16" => integer::<i16>(literal),
            "Int32" => integer::<i32>(literal),
            "Int64" => integer::<i64>(literal),
            "Uint8" => integer::<u8>(literal),
            "Uint16" => integer::<u16>(literal),
            "Uint32" => integer::<u32>(literal),
            "Uint64" => integer::<u64>(literal),
            "Bool" => match literal.trim().to_ascii_lowercase().as_str() {
                "true" => Some("true".to_string()),
                "false" => Some("false".to_string()),
                _ => None,
            },
            "Utf8" | "String" | "Text" | "Bytes" => Some(self.quote_literal(literal)?),
            _ => None,
        };
        rendered.ok_or_else(invalid)
    }

    /// Generates SQL for adding a column.
    fn add_column_sql(&self, table: &str, column: &ColumnSpec) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote_identifier(table)?,
            self.column_definition(column)?
        ))
    }

    /// Generates SQL for adding an index.
    fn add_index_sql(&self, table: &str, index: &IndexSpec) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table)?,
            self.index_definition(index)?
        ))
    }

    /// Generates SQL for dropping an index.
    fn drop_index_sql(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP INDEX {}",
            self.quote_identifier(table)?,
            self.quote_identifier(name)?
        ))
    }

    /// Generates SQL for adding a changefeed.
    fn add_changefeed_sql(&self, table: &str, changefeed: &ChangefeedSpec) -> Result<String> {
        let mut settings = vec![
            format!("MODE = {}", self.quote_literal(changefeed.mode.as_str())?),
            format!("FORMAT = {}", self.quote_literal(changefeed.format.as_str())?),
        ];
        if changefeed.virtual_timestamps {
            settings.push("VIRTUAL_TIMESTAMPS = TRUE".to_string());
        }
        if let Some(period) = &changefeed.retention_period {
            settings.push(format!(
                "RETENTION_PERIOD = Interval({})",
                self.quote_literal(period)?
            ));
        }
        if changefeed.initial_scan {
            settings.push("INITIAL_SCAN = TRUE".to_string());
        }

        Ok(format!(
            "ALTER TABLE {} ADD CHANGEFEED {} WITH ({})",
            self.quote_identifier(table)?,
            self.quote_identifier(&changefeed.name)?,
            settings.join(", ")
        ))
    }

    /// Generates SQL for dropping a changefeed.
    fn drop_changefeed_sql(&self, table: &str, name: &str) -> Result<String> {
        Ok(format!(
            "ALTER TABLE {} DROP CHANGEFEED {}",
            self.quote_identifier(table)?,
            self.quote_identifier(name)?
        ))
    }

    /// Generates SQL for changing table settings.
    fn set_table_settings_sql(&self, table: &str, settings: &TableSettings) -> Result<String> {
        let entries = self.with_entries(settings, &BTreeMap::new(), &[])?;
        if entries.is_empty() {
            return Err(ReconcileError::Encoding(format!(
                "no settings to change on table '{}'",
                table
            )));
        }
        Ok(format!(
            "ALTER TABLE {} SET ({})",
            self.quote_identifier(table)?,
            entries.join(", ")
        ))
    }

    /// Generates SQL for creating a topic.
    fn create_topic_sql(&self, topic: &TopicSpec) -> Result<String> {
        let mut sql = format!("CREATE TOPIC {}", self.quote_identifier(&topic.path)?);

        if !topic.consumers.is_empty() {
            let consumers = topic
                .consumers
                .iter()
                .map(|c| {
                    Ok(format!(
                        "CONSUMER {} WITH ({})",
                        self.quote_identifier(&c.name)?,
                        self.consumer_settings(c)?
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            sql.push_str("(\n");
            sql.push_str(&block(&consumers));
            sql.push_str("\n)");
        }

        let settings = self.topic_entries(&TopicSettings {
            partitions_count: topic.partitions_count,
            retention_period: topic.retention_period.clone(),
            supported_codecs: topic.supported_codecs.clone(),
        })?;
        if !settings.is_empty() {
            sql.push_str("\nWITH (\n");
            sql.push_str(&block(&settings));
            sql.push_str("\n)");
        }

        sql.push('\n');
        Ok(sql)
    }

    /// Generates the entries of a topic `WITH (...)` or `SET (...)` clause.
    fn topic_entries(&self, settings: &TopicSettings) -> Result<Vec<String>> {
        let mut entries = Vec::new();
        if let Some(n) = settings.partitions_count {
            entries.push(format!("min_active_partitions = {}", n));
        }
        if let Some(period) = &settings.retention_period {
            entries.push(format!(
                "retention_period = Interval({})",
                self.quote_literal(period)?
            ));
        }
        if !settings.supported_codecs.is_empty() {
            entries.push(format!(
                "supported_codecs = {}",
                self.codec_list(&settings.supported_codecs)?
            ));
        }
        Ok(entries)
    }

    /// Generates SQL for changing topic settings.
    fn alter_topic_sql(&self, topic: &str, settings: &TopicSettings) -> Result<String> {
        let entries = self.topic_entries(settings)?;
        if entries.is_empty() {
            return Err(ReconcileError::Encoding(format!(
                "no settings to change on topic '{}'",
                topic
            )));
        }
        Ok(format!(
            "ALTER TOPIC {} SET ({})",
            self.quote_identifier(topic)?,
            entries.join(", ")
        ))
    }

    /// Generates SQL for a consumer change.
    fn consumer_sql(&self, topic: &str, op: &ConsumerOp) -> Result<String> {
        let topic = self.quote_identifier(topic)?;
        match op {
            ConsumerOp::AddConsumer(spec) => Ok(format!(
                "ALTER TOPIC {} ADD CONSUMER {} WITH ({})",
                topic,
                self.quote_identifier(&spec.name)?,
                self.consumer_settings(spec)?
            )),
            ConsumerOp::SetReadFrom { name, read_from } => Ok(format!(
                "ALTER TOPIC {} ALTER CONSUMER {} SET (read_from = {})",
                topic,
                self.quote_identifier(name)?,
                self.datetime(read_from)?
            )),
            ConsumerOp::SetCodecs { name, codecs } => {
                if codecs.is_empty() {
                    return Err(ReconcileError::Encoding(format!(
                        "empty codec list for consumer '{}'",
                        name
                    )));
                }
                Ok(format!(
                    "ALTER TOPIC {} ALTER CONSUMER {} SET (supported_codecs = {})",
                    topic,
                    self.quote_identifier(name)?,
                    self.codec_list(codecs)?
                ))
            }
        }
    }

    fn consumer_settings(&self, consumer: &ConsumerSpec) -> Result<String> {
        let mut settings = Vec::new();
        if !consumer.supported_codecs.is_empty() {
            settings.push(format!(
                "supported_codecs = {}",
                self.codec_list(&consumer.supported_codecs)?
            ));
        }
        settings.push(format!("read_from = {}", self.datetime(&consumer.read_from)?));
        Ok(settings.join(", "))
    }

    fn codec_list(&self, codecs: &[Codec]) -> Result<String> {
        let names: Vec<&str> = codecs.iter().map(|c| c.ddl_name()).collect();
        self.quote_literal(&names.join(","))
    }

    /// Whole seconds only; sub-second precision is dropped.
    fn datetime(&self, at: &DateTime<Utc>) -> Result<String> {
        let literal = self.quote_literal(&at.to_rfc3339_opts(SecondsFormat::Secs, true))?;
        Ok(format!("Datetime({})", literal))
    }
}

impl DdlDialect for YqlDialect {
    fn name(&self) -> &'static str {
        "yql"
    }

    fn generate_sql(&self, operation: &DdlOperation) -> Result<String> {
        match operation {
            DdlOperation::CreateTable(table) => self.create_table_sql(table),

            DdlOperation::AddColumn { table, column } => self.add_column_sql(table, column),

            DdlOperation::AddIndex { table, index } => self.add_index_sql(table, index),

            DdlOperation::DropIndex { table, name } => self.drop_index_sql(table, name),

            DdlOperation::AddChangefeed { table, changefeed } => {
                self.add_changefeed_sql(table, changefeed)
            }

            DdlOperation::DropChangefeed { table, name } => self.drop_changefeed_sql(table, name),

            DdlOperation::SetTableSettings { table, settings } => {
                self.set_table_settings_sql(table, settings)
            }

            DdlOperation::ResetTtl { table } => Ok(format!(
                "ALTER TABLE {} RESET (TTL)",
                self.quote_identifier(table)?
            )),

            DdlOperation::CreateTopic(topic) => self.create_topic_sql(topic),

            DdlOperation::AlterTopic { topic, settings } => self.alter_topic_sql(topic, settings),

            DdlOperation::Consumer { topic, op } => self.consumer_sql(topic, op),
        }
    }
}

/// One entry per line, tab-indented, comma-separated, no trailing comma.
fn block(entries: &[String]) -> String {
    entries
        .iter()
        .map(|e| format!("\t{}", e))
        .collect::<Vec<_>>()
        .join(",\n")
}

fn toggle(enabled: bool) -> &'static str {
    if enabled {
        "ENABLED"
    } else {
        "DISABLED"
    }
}

fn integer<T: FromStr + Display>(literal: &str) -> Option<String> {
    literal.trim().parse::<T>().ok().map(|v| v.to_string())
}

/// Column types are emitted unquoted, so only type-shaped text is accepted.
fn checked_type(column: &ColumnSpec) -> Result<&str> {
    let ty = column.column_type.trim();
    let valid = !ty.is_empty()
        && ty.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '_' | '<' | '>' | '(' | ')' | ',' | ' ' | '?')
        });
    if valid {
        Ok(ty)
    } else {
        Err(ReconcileError::Encoding(format!(
            "invalid type '{}' for column '{}'",
            column.column_type, column.name
        )))
    }
}
