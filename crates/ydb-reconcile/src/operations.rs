//! DDL operations.
//!
//! This module defines every statement the reconciler can emit. A dialect
//! turns each operation into exactly one DDL statement.

use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::consumers::ConsumerOp;
use crate::schema::{ChangefeedSpec, ColumnSpec, IndexSpec, TableSettings, TableSpec, TopicSpec};

/// Topic-level setting changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicSettings {
    /// New minimum number of active partitions.
    pub partitions_count: Option<u64>,
    /// New retention period.
    pub retention_period: Option<String>,
    /// New codec list; empty means unchanged.
    pub supported_codecs: Vec<Codec>,
}

impl TopicSettings {
    /// Returns true if no setting is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions_count.is_none()
            && self.retention_period.is_none()
            && self.supported_codecs.is_empty()
    }
}

/// A single DDL operation.
#[derive(Debug, Clone, PartialEq)]
pub enum DdlOperation {
    /// Create a table with everything it declares.
    CreateTable(TableSpec),

    /// Add a column to a table.
    AddColumn {
        /// Table path.
        table: String,
        /// Column definition.
        column: ColumnSpec,
    },

    /// Add a secondary index.
    AddIndex {
        /// Table path.
        table: String,
        /// Index definition.
        index: IndexSpec,
    },

    /// Drop a secondary index.
    DropIndex {
        /// Table path.
        table: String,
        /// Index name.
        name: String,
    },

    /// Attach a changefeed.
    AddChangefeed {
        /// Table path.
        table: String,
        /// Changefeed definition.
        changefeed: ChangefeedSpec,
    },

    /// Detach a changefeed.
    DropChangefeed {
        /// Table path.
        table: String,
        /// Changefeed name.
        name: String,
    },

    /// Change table settings.
    SetTableSettings {
        /// Table path.
        table: String,
        /// Settings to apply.
        settings: TableSettings,
    },

    /// Remove row expiration.
    ResetTtl {
        /// Table path.
        table: String,
    },

    /// Create a topic with its consumers.
    CreateTopic(TopicSpec),

    /// Change topic settings.
    AlterTopic {
        /// Topic path.
        topic: String,
        /// Settings to apply.
        settings: TopicSettings,
    },

    /// Add or alter a consumer.
    Consumer {
        /// Topic path.
        topic: String,
        /// Consumer change.
        op: ConsumerOp,
    },
}

impl DdlOperation {
    // Convenience constructors

    /// Creates an AddColumn operation.
    #[must_use]
    pub fn add_column(table: impl Into<String>, column: ColumnSpec) -> Self {
        Self::AddColumn {
            table: table.into(),
            column,
        }
    }

    /// Creates an AddIndex operation.
    #[must_use]
    pub fn add_index(table: impl Into<String>, index: IndexSpec) -> Self {
        Self::AddIndex {
            table: table.into(),
            index,
        }
    }

    /// Creates a DropIndex operation.
    #[must_use]
    pub fn drop_index(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropIndex {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates an AddChangefeed operation.
    #[must_use]
    pub fn add_changefeed(table: impl Into<String>, changefeed: ChangefeedSpec) -> Self {
        Self::AddChangefeed {
            table: table.into(),
            changefeed,
        }
    }

    /// Creates a DropChangefeed operation.
    #[must_use]
    pub fn drop_changefeed(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self::DropChangefeed {
            table: table.into(),
            name: name.into(),
        }
    }

    /// Creates a Consumer operation.
    #[must_use]
    pub fn consumer(topic: impl Into<String>, op: ConsumerOp) -> Self {
        Self::Consumer {
            topic: topic.into(),
            op,
        }
    }

    /// Returns true if the operation removes something from the server.
    #[must_use]
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Self::DropIndex { .. } | Self::DropChangefeed { .. } | Self::ResetTtl { .. }
        )
    }

    /// Path of the table or topic the operation applies to.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::CreateTable(table) => &table.path,
            Self::CreateTopic(topic) => &topic.path,
            Self::AddColumn { table, .. }
            | Self::AddIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::AddChangefeed { table, .. }
            | Self::DropChangefeed { table, .. }
            | Self::SetTableSettings { table, .. }
            | Self::ResetTtl { table } => table,
            Self::AlterTopic { topic, .. } | Self::Consumer { topic, .. } => topic,
        }
    }
}
