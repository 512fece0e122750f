//! Reconciliation driver.
//!
//! Given a desired object and whatever the database currently has, the
//! driver decides between a full CREATE, a list of incremental ALTERs, or
//! nothing at all. The planning functions are pure; [`Reconciler`] wraps
//! them with an asynchronous describe step.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::codec::CodecTable;
use crate::consumers::merge_consumers;
use crate::diff::{changefeed_diff, settings_diff, table_diff, topic_settings_diff};
use crate::dialect::DdlDialect;
use crate::error::{ReconcileError, Result};
use crate::identifier::EntityIdentifier;
use crate::operations::DdlOperation;
use crate::schema::{TableSpec, TopicSpec, TopicSpecInput};

/// Options for the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Drop a same-named index before re-adding it when its structure changed.
    pub drop_changed_indexes: bool,
    /// Emit `SET`/`RESET` statements for TTL, partitioning and replication drift.
    pub alter_settings: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcilerOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            drop_changed_indexes: true,
            alter_settings: true,
        }
    }

    /// Leaves changed indexes in place; only the new definition is added.
    #[must_use]
    pub fn keep_changed_indexes(mut self) -> Self {
        self.drop_changed_indexes = false;
        self
    }

    /// Ignores drift in table settings.
    #[must_use]
    pub fn without_settings(mut self) -> Self {
        self.alter_settings = false;
        self
    }
}

/// What has to be executed to reach the desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    /// The object does not exist; run this single statement.
    Create(String),
    /// The object exists; run these statements in order.
    Alter(Vec<String>),
    /// Nothing to do.
    UpToDate,
}

impl Plan {
    /// Statements in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<&str> {
        match self {
            Self::Create(sql) => vec![sql.as_str()],
            Self::Alter(statements) => statements.iter().map(String::as_str).collect(),
            Self::UpToDate => Vec::new(),
        }
    }

    /// Returns true if nothing has to be executed.
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Self::UpToDate)
    }

    fn from_operations<D: DdlDialect + ?Sized>(
        dialect: &D,
        operations: &[DdlOperation],
    ) -> Result<Self> {
        if operations.is_empty() {
            return Ok(Self::UpToDate);
        }
        for op in operations.iter().filter(|op| op.is_destructive()) {
            warn!(path = %op.target(), operation = ?op, "Plan removes server state");
        }
        Ok(Self::Alter(dialect.generate_all(operations)?))
    }
}

/// Operations that bring `observed` to `desired`.
///
/// Order: new columns, index drops, index (re)adds, changefeed drops,
/// changefeed adds, then setting changes.
pub fn alter_table_operations(
    options: &ReconcilerOptions,
    desired: &TableSpec,
    observed: &TableSpec,
) -> Result<Vec<DdlOperation>> {
    let path = desired.path.as_str();
    let diff = table_diff(desired, observed)?;
    let mut operations = Vec::new();

    for column in diff.columns_to_add {
        operations.push(DdlOperation::add_column(path, column));
    }

    for name in diff.indexes_to_drop {
        operations.push(DdlOperation::drop_index(path, name));
    }
    if options.drop_changed_indexes {
        let existing: HashSet<&str> = observed.indexes.iter().map(|i| i.name.as_str()).collect();
        for index in &diff.indexes_to_add {
            if existing.contains(index.name.as_str()) {
                debug!(table = %path, index = %index.name, "Index changed, dropping first");
                operations.push(DdlOperation::drop_index(path, index.name.clone()));
            }
        }
    }
    for index in diff.indexes_to_add {
        operations.push(DdlOperation::add_index(path, index));
    }

    let feeds = changefeed_diff(&desired.changefeeds, &observed.changefeeds);
    for name in feeds.to_drop {
        operations.push(DdlOperation::drop_changefeed(path, name));
    }
    for feed in feeds.to_add {
        operations.push(DdlOperation::add_changefeed(path, feed));
    }

    if options.alter_settings {
        let settings = settings_diff(desired, observed);
        if !settings.set.is_empty() {
            operations.push(DdlOperation::SetTableSettings {
                table: path.to_string(),
                settings: settings.set,
            });
        }
        if settings.reset_ttl {
            operations.push(DdlOperation::ResetTtl {
                table: path.to_string(),
            });
        }
    }

    Ok(operations)
}

/// Plans a table: CREATE when `observed` is `None`, ALTERs otherwise.
pub fn plan_table<D: DdlDialect + ?Sized>(
    dialect: &D,
    options: &ReconcilerOptions,
    desired: &TableSpec,
    observed: Option<&TableSpec>,
) -> Result<Plan> {
    desired.validate()?;

    let Some(observed) = observed else {
        debug!(table = %desired.path, "Table not found, planning CREATE");
        let sql = dialect.generate_sql(&DdlOperation::CreateTable(desired.clone()))?;
        return Ok(Plan::Create(sql));
    };

    let operations = alter_table_operations(options, desired, observed)?;
    Plan::from_operations(dialect, &operations)
}

/// Operations that bring an existing topic to `desired`.
pub fn alter_topic_operations(
    codecs: &CodecTable,
    desired: &TopicSpecInput,
    observed: &TopicSpec,
) -> Result<Vec<DdlOperation>> {
    let mut operations = Vec::new();

    let settings = topic_settings_diff(desired, observed, codecs)?;
    if !settings.is_empty() {
        operations.push(DdlOperation::AlterTopic {
            topic: desired.path.clone(),
            settings,
        });
    }

    for op in merge_consumers(&desired.consumers, &observed.consumers, codecs)? {
        operations.push(DdlOperation::consumer(desired.path.as_str(), op));
    }

    Ok(operations)
}

/// Plans a topic: CREATE when `observed` is `None`, ALTERs otherwise.
pub fn plan_topic<D: DdlDialect + ?Sized>(
    dialect: &D,
    codecs: &CodecTable,
    desired: &TopicSpecInput,
    observed: Option<&TopicSpec>,
) -> Result<Plan> {
    if desired.path.is_empty() {
        return Err(ReconcileError::Encoding("empty topic path".to_string()));
    }

    let Some(observed) = observed else {
        debug!(topic = %desired.path, "Topic not found, planning CREATE");
        let topic = desired.resolve(codecs)?;
        let sql = dialect.generate_sql(&DdlOperation::CreateTopic(topic))?;
        return Ok(Plan::Create(sql));
    };

    let operations = alter_topic_operations(codecs, desired, observed)?;
    Plan::from_operations(dialect, &operations)
}

/// Fetches the current state of objects from the database.
///
/// `Ok(None)` means the object does not exist. Implementations report
/// transport failures as [`ReconcileError::Describe`].
#[async_trait]
pub trait SchemaDescriber: Send + Sync {
    /// Describes the table at an absolute path.
    async fn describe_table(&self, path: &str) -> Result<Option<TableSpec>>;

    /// Describes the topic at an absolute path.
    async fn describe_topic(&self, path: &str) -> Result<Option<TopicSpec>>;
}

/// Plans changes for objects addressed by [`EntityIdentifier`].
pub struct Reconciler<'c, D: DdlDialect, S: SchemaDescriber> {
    dialect: D,
    describer: S,
    codecs: &'c CodecTable,
    options: ReconcilerOptions,
}

impl<D: DdlDialect, S: SchemaDescriber> Reconciler<'static, D, S> {
    /// Creates a reconciler using the standard codec table and default options.
    pub fn new(dialect: D, describer: S) -> Self {
        Self {
            dialect,
            describer,
            codecs: CodecTable::standard(),
            options: ReconcilerOptions::default(),
        }
    }
}

impl<'c, D: DdlDialect, S: SchemaDescriber> Reconciler<'c, D, S> {
    /// Uses a different codec table.
    #[must_use]
    pub fn with_codecs<'n>(self, codecs: &'n CodecTable) -> Reconciler<'n, D, S> {
        Reconciler {
            dialect: self.dialect,
            describer: self.describer,
            codecs,
            options: self.options,
        }
    }

    /// Sets the options.
    #[must_use]
    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    /// Describes the table behind `id` and plans the changes to reach `desired`.
    pub async fn plan_table(&self, id: &EntityIdentifier, desired: &TableSpec) -> Result<Plan> {
        check_path(id, &desired.path)?;
        let path = id.full_entity_path();
        let observed = self.describer.describe_table(&path).await?;
        let plan = plan_table(&self.dialect, &self.options, desired, observed.as_ref())?;
        log_plan(&path, &plan);
        Ok(plan)
    }

    /// Describes the topic behind `id` and plans the changes to reach `desired`.
    pub async fn plan_topic(
        &self,
        id: &EntityIdentifier,
        desired: &TopicSpecInput,
    ) -> Result<Plan> {
        check_path(id, &desired.path)?;
        let path = id.full_entity_path();
        let observed = self.describer.describe_topic(&path).await?;
        let plan = plan_topic(&self.dialect, self.codecs, desired, observed.as_ref())?;
        log_plan(&path, &plan);
        Ok(plan)
    }

    /// Checks that a freshly created table exists and returns its handle.
    pub async fn confirm_table(&self, id: &EntityIdentifier) -> Result<String> {
        let path = id.full_entity_path();
        match self.describer.describe_table(&path).await? {
            Some(_) => Ok(id.encode()),
            None => Err(ReconcileError::NotCreated(path)),
        }
    }

    /// Checks that a freshly created topic exists and returns its handle.
    pub async fn confirm_topic(&self, id: &EntityIdentifier) -> Result<String> {
        let path = id.full_entity_path();
        match self.describer.describe_topic(&path).await? {
            Some(_) => Ok(id.encode()),
            None => Err(ReconcileError::NotCreated(path)),
        }
    }
}

fn check_path(id: &EntityIdentifier, desired_path: &str) -> Result<()> {
    if id.entity_path() == desired_path {
        Ok(())
    } else {
        Err(ReconcileError::Encoding(format!(
            "desired path '{}' does not match identifier path '{}'",
            desired_path,
            id.entity_path()
        )))
    }
}

fn log_plan(path: &str, plan: &Plan) {
    match plan {
        Plan::Create(_) => info!(path = %path, "Object missing, will be created"),
        Plan::Alter(statements) => {
            info!(path = %path, statements = statements.len(), "Object needs changes");
        }
        Plan::UpToDate => info!(path = %path, "Object is up to date"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::codec::Codec;
    use crate::consumers::{ConsumerSpec, ConsumerSpecInput};
    use crate::dialect::YqlDialect;
    use crate::schema::{ChangefeedSpec, ColumnSpec, IndexSpec, TtlSpec};

    #[derive(Default)]
    struct MemoryDescriber {
        tables: HashMap<String, TableSpec>,
        topics: HashMap<String, TopicSpec>,
        fail: bool,
    }

    #[async_trait]
    impl SchemaDescriber for MemoryDescriber {
        async fn describe_table(&self, path: &str) -> Result<Option<TableSpec>> {
            if self.fail {
                return Err(ReconcileError::Describe {
                    path: path.to_string(),
                    source: "connection refused".into(),
                });
            }
            Ok(self.tables.get(path).cloned())
        }

        async fn describe_topic(&self, path: &str) -> Result<Option<TopicSpec>> {
            Ok(self.topics.get(path).cloned())
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn users() -> TableSpec {
        TableSpec::new("users")
            .column(ColumnSpec::new("id", "Uint64"))
            .column(ColumnSpec::new("name", "Utf8"))
            .primary_key(strings(&["id"]))
            .index(IndexSpec::new("by_name", strings(&["name"])))
    }

    fn id(path: &str) -> EntityIdentifier {
        EntityIdentifier::new("localhost:2136", false, "/local", path).unwrap()
    }

    #[test]
    fn test_plan_create() {
        let plan =
            plan_table(&YqlDialect::new(), &ReconcilerOptions::new(), &users(), None).unwrap();
        match plan {
            Plan::Create(sql) => assert!(sql.starts_with("CREATE TABLE `users`(")),
            other => panic!("Expected Create, got {:?}", other),
        }
    }

    #[test]
    fn test_plan_up_to_date() {
        let table = users();
        let plan = plan_table(&YqlDialect::new(), &ReconcilerOptions::new(), &table, Some(&table))
            .unwrap();
        assert!(plan.is_up_to_date());
        assert!(plan.statements().is_empty());
    }

    #[test]
    fn test_plan_validates_desired() {
        let table = TableSpec::new("t").column(ColumnSpec::new("a", "Utf8"));
        let err =
            plan_table(&YqlDialect::new(), &ReconcilerOptions::new(), &table, None).unwrap_err();
        assert!(matches!(err, ReconcileError::Encoding(_)));
    }

    #[test]
    fn test_alter_order() {
        let observed = users().index(IndexSpec::new("old", strings(&["name"])));
        let desired = users()
            .column(ColumnSpec::new("email", "Utf8"))
            .index(IndexSpec::new("by_email", strings(&["email"])))
            .ttl(TtlSpec::new("id", "PT1H"));

        let ops = alter_table_operations(&ReconcilerOptions::new(), &desired, &observed).unwrap();
        assert_eq!(
            ops,
            vec![
                DdlOperation::add_column("users", ColumnSpec::new("email", "Utf8")),
                DdlOperation::drop_index("users", "old"),
                DdlOperation::add_index("users", IndexSpec::new("by_email", strings(&["email"]))),
                DdlOperation::SetTableSettings {
                    table: "users".to_string(),
                    settings: crate::schema::TableSettings {
                        ttl: Some(TtlSpec::new("id", "PT1H")),
                        ..Default::default()
                    },
                },
            ]
        );
    }

    #[test]
    fn test_changed_index_is_dropped_first() {
        let observed = users();
        let desired = TableSpec {
            indexes: vec![IndexSpec::new("by_name", strings(&["name", "id"]))],
            ..users()
        };

        let ops = alter_table_operations(&ReconcilerOptions::new(), &desired, &observed).unwrap();
        assert_eq!(
            ops,
            vec![
                DdlOperation::drop_index("users", "by_name"),
                DdlOperation::add_index("users", desired.indexes[0].clone()),
            ]
        );

        let kept = alter_table_operations(
            &ReconcilerOptions::new().keep_changed_indexes(),
            &desired,
            &observed,
        )
        .unwrap();
        assert_eq!(kept, vec![DdlOperation::add_index("users", desired.indexes[0].clone())]);
    }

    #[test]
    fn test_settings_drift_can_be_ignored() {
        let observed = users().ttl(TtlSpec::new("id", "PT1H"));
        let desired = users();

        let ops = alter_table_operations(&ReconcilerOptions::new(), &desired, &observed).unwrap();
        assert_eq!(
            ops,
            vec![DdlOperation::ResetTtl {
                table: "users".to_string()
            }]
        );

        let ignored = alter_table_operations(
            &ReconcilerOptions::new().without_settings(),
            &desired,
            &observed,
        )
        .unwrap();
        assert!(ignored.is_empty());
    }

    #[test]
    fn test_dropping_column_is_refused() {
        let observed = users().column(ColumnSpec::new("legacy", "Utf8"));
        let err = plan_table(
            &YqlDialect::new(),
            &ReconcilerOptions::new(),
            &users(),
            Some(&observed),
        )
        .unwrap_err();
        assert!(err.to_string().contains("legacy"));
    }

    #[test]
    fn test_initial_scan_changefeed_is_stable() {
        let mut feed = ChangefeedSpec::new("f");
        feed.initial_scan = true;
        let desired = users().changefeed(feed);
        let observed = users().changefeed(ChangefeedSpec::new("f"));

        let plan = plan_table(
            &YqlDialect::new(),
            &ReconcilerOptions::new(),
            &desired,
            Some(&observed),
        )
        .unwrap();
        assert!(plan.is_up_to_date());
    }

    #[test]
    fn test_unsafe_name_fails_the_plan() {
        let observed = users();
        let desired = users().index(IndexSpec::new("x` ; DROP TABLE `victim", strings(&["name"])));

        let err = plan_table(
            &YqlDialect::new(),
            &ReconcilerOptions::new(),
            &desired,
            Some(&observed),
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::Encoding(_)));
    }

    #[test]
    fn test_plan_topic_create_and_update() {
        let desired = TopicSpecInput {
            path: "events".to_string(),
            partitions_count: Some(2),
            consumers: vec![ConsumerSpecInput::new("reader").codecs(["raw"])],
            ..TopicSpecInput::default()
        };

        let create =
            plan_topic(&YqlDialect::new(), CodecTable::standard(), &desired, None).unwrap();
        assert!(
            matches!(create, Plan::Create(ref sql) if sql.starts_with("CREATE TOPIC `events`("))
        );

        let observed = TopicSpec {
            path: "events".to_string(),
            partitions_count: Some(1),
            retention_period: None,
            supported_codecs: vec![Codec::Raw],
            consumers: vec![ConsumerSpec {
                name: "reader".to_string(),
                supported_codecs: vec![Codec::Raw],
                read_from: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            }],
        };
        let update =
            plan_topic(&YqlDialect::new(), CodecTable::standard(), &desired, Some(&observed))
                .unwrap();
        assert_eq!(
            update,
            Plan::Alter(vec![
                "ALTER TOPIC `events` SET (min_active_partitions = 2)".to_string(),
                "ALTER TOPIC `events` ALTER CONSUMER `reader` SET (supported_codecs = \"RAW\")"
                    .to_string(),
            ])
        );
    }

    #[test]
    fn test_reconciler_describes_full_path() {
        let mut describer = MemoryDescriber::default();
        describer
            .tables
            .insert("/local/users".to_string(), users());
        let reconciler = Reconciler::new(YqlDialect::new(), describer);

        let plan = tokio_test::block_on(reconciler.plan_table(&id("users"), &users())).unwrap();
        assert!(plan.is_up_to_date());

        let handle = tokio_test::block_on(reconciler.confirm_table(&id("users"))).unwrap();
        assert_eq!(handle, "grpc://localhost:2136/?database=/local&path=users");
    }

    #[test]
    fn test_reconciler_missing_object() {
        let reconciler = Reconciler::new(YqlDialect::new(), MemoryDescriber::default());

        let plan = tokio_test::block_on(reconciler.plan_table(&id("users"), &users())).unwrap();
        assert!(matches!(plan, Plan::Create(_)));

        let err = tokio_test::block_on(reconciler.confirm_topic(&id("events"))).unwrap_err();
        assert!(matches!(err, ReconcileError::NotCreated(path) if path == "/local/events"));
    }

    #[test]
    fn test_reconciler_surfaces_describe_errors() {
        let describer = MemoryDescriber {
            fail: true,
            ..MemoryDescriber::default()
        };
        let reconciler = Reconciler::new(YqlDialect::new(), describer);
        let err = tokio_test::block_on(reconciler.plan_table(&id("users"), &users())).unwrap_err();
        assert!(matches!(err, ReconcileError::Describe { .. }));
    }

    #[test]
    fn test_reconciler_path_mismatch() {
        let reconciler = Reconciler::new(YqlDialect::new(), MemoryDescriber::default());
        let err = tokio_test::block_on(reconciler.plan_table(&id("other"), &users())).unwrap_err();
        assert!(matches!(err, ReconcileError::Encoding(_)));
    }

    #[test]
    fn test_reconciler_custom_codecs() {
        let table = CodecTable::with_allowed(vec![Codec::Raw]);
        let reconciler =
            Reconciler::new(YqlDialect::new(), MemoryDescriber::default()).with_codecs(&table);
        let desired = TopicSpecInput {
            path: "events".to_string(),
            supported_codecs: strings(&["gzip"]),
            ..TopicSpecInput::default()
        };
        let err = tokio_test::block_on(reconciler.plan_topic(&id("events"), &desired)).unwrap_err();
        assert!(matches!(err, ReconcileError::UnknownCodec(_)));
    }
}
