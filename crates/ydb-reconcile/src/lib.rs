//! Declarative schema reconciliation for YDB.
//!
//! `ydb-reconcile` compares a desired table or topic against what the
//! database currently has and compiles the difference into YQL statements.
//! It never executes anything; running the statements is up to the caller.
//!
//! # Architecture
//!
//! - **Identifier** - Opaque handles that pack endpoint, TLS mode, database
//!   and object path into one string
//! - **Diff** - Column, index, changefeed and settings differences between
//!   two snapshots
//! - **Consumers** - Name-keyed merge of topic consumers
//! - **Dialect** - Deterministic, escaped DDL rendering
//! - **Reconciler** - Chooses between CREATE, ALTER and nothing
//!
//! # Example
//!
//! ```rust
//! use ydb_reconcile::prelude::*;
//!
//! let desired = TableSpec::new("series")
//!     .column(ColumnSpec::new("series_id", "Uint64").not_null())
//!     .column(ColumnSpec::new("title", "Utf8"))
//!     .primary_key(vec!["series_id".to_string()]);
//!
//! let plan = plan_table(&YqlDialect::new(), &ReconcilerOptions::new(), &desired, None).unwrap();
//! assert!(matches!(plan, Plan::Create(_)));
//!
//! let id = EntityIdentifier::new("localhost:2136", false, "/local", "series").unwrap();
//! assert_eq!(id.encode(), "grpc://localhost:2136/?database=/local&path=series");
//! ```
//!
//! # CLI Usage
//!
//! ```bash
//! # Plan a table against the snapshots in ./snapshots
//! ydb-reconcile plan-table --desired series.json
//!
//! # Decode a resource handle
//! ydb-reconcile decode-id 'grpc://localhost:2136/?database=/local&path=series'
//! ```

pub mod codec;
pub mod consumers;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod identifier;
pub mod operations;
pub mod reconciler;
pub mod schema;
pub mod snapshots;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::codec::{Codec, CodecTable};
    pub use crate::consumers::{
        merge_consumers, ConsumerOp, ConsumerPlan, ConsumerSpec, ConsumerSpecInput,
    };
    pub use crate::dialect::{escape, DdlDialect, YqlDialect};
    pub use crate::diff::{
        changefeed_diff, column_diff, index_diff, settings_diff, table_diff, TableDiff,
    };
    pub use crate::error::{ReconcileError, Result};
    pub use crate::identifier::EntityIdentifier;
    pub use crate::operations::{DdlOperation, TopicSettings};
    pub use crate::reconciler::{
        plan_table, plan_topic, Plan, Reconciler, ReconcilerOptions, SchemaDescriber,
    };
    pub use crate::schema::{
        ChangefeedFormat, ChangefeedMode, ChangefeedSpec, ColumnSpec, FamilySpec, IndexKind,
        IndexSpec, PartitioningSpec, ReplicationSpec, TableSettings, TableSpec, TopicSpec,
        TopicSpecInput, TtlSpec,
    };
    pub use crate::snapshots::SnapshotDescriber;
}
