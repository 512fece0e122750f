//! Structural diffing of table snapshots.
//!
//! This module compares a desired table against the observed one and works
//! out what has to be added or dropped. Nothing here performs I/O.
//!
//! Columns are never dropped: a column that exists on the server but not in
//! the desired schema is an error, because removing it would destroy data.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::codec::{Codec, CodecTable};
use crate::error::{ReconcileError, Result};
use crate::operations::TopicSettings;
use crate::schema::{
    ChangefeedSpec, ColumnSpec, IndexSpec, PartitioningSpec, ReplicationSpec, TableSettings,
    TableSpec, TopicSpec, TopicSpecInput,
};

/// Changes needed to bring an existing table to its desired shape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableDiff {
    /// Columns to add, in declaration order.
    pub columns_to_add: Vec<ColumnSpec>,
    /// Indexes to (re)create.
    pub indexes_to_add: Vec<IndexSpec>,
    /// Names of indexes to drop.
    pub indexes_to_drop: Vec<String>,
}

impl TableDiff {
    /// Returns true if there are no differences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns_to_add.is_empty()
            && self.indexes_to_add.is_empty()
            && self.indexes_to_drop.is_empty()
    }
}

/// Returns the desired columns missing from `observed`.
///
/// Fails with [`ReconcileError::UnsupportedOperation`] naming every observed
/// column that the desired schema no longer declares.
pub fn column_diff(desired: &[ColumnSpec], observed: &[ColumnSpec]) -> Result<Vec<ColumnSpec>> {
    let desired_names: HashSet<&str> = desired.iter().map(|c| c.name.as_str()).collect();
    let observed_names: HashSet<&str> = observed.iter().map(|c| c.name.as_str()).collect();

    let removed: Vec<String> = observed
        .iter()
        .filter(|c| !desired_names.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect();
    if !removed.is_empty() {
        return Err(ReconcileError::UnsupportedOperation {
            operation: "dropping columns".to_string(),
            targets: removed,
        });
    }

    Ok(desired
        .iter()
        .filter(|c| !observed_names.contains(c.name.as_str()))
        .cloned()
        .collect())
}

/// Matches indexes by name.
///
/// Returns the indexes to add (missing, or present with a different
/// structure) and the names of indexes to drop (no longer desired). An index
/// whose structure changed only appears in the add list; dropping the old
/// one first is up to the caller.
#[must_use]
pub fn index_diff(desired: &[IndexSpec], observed: &[IndexSpec]) -> (Vec<IndexSpec>, Vec<String>) {
    let desired_map: HashMap<&str, &IndexSpec> =
        desired.iter().map(|i| (i.name.as_str(), i)).collect();
    let observed_map: HashMap<&str, &IndexSpec> =
        observed.iter().map(|i| (i.name.as_str(), i)).collect();

    let to_add = desired
        .iter()
        .filter(|idx| observed_map.get(idx.name.as_str()) != Some(idx))
        .cloned()
        .collect();

    let to_drop = observed
        .iter()
        .filter(|idx| !desired_map.contains_key(idx.name.as_str()))
        .map(|idx| idx.name.clone())
        .collect();

    (to_add, to_drop)
}

/// Computes the column and index changes between two snapshots of a table.
pub fn table_diff(desired: &TableSpec, observed: &TableSpec) -> Result<TableDiff> {
    let columns_to_add = column_diff(&desired.columns, &observed.columns)?;
    let (indexes_to_add, indexes_to_drop) = index_diff(&desired.indexes, &observed.indexes);

    debug!(
        table = %desired.path,
        columns = columns_to_add.len(),
        add_indexes = indexes_to_add.len(),
        drop_indexes = indexes_to_drop.len(),
        "Computed table diff"
    );

    Ok(TableDiff {
        columns_to_add,
        indexes_to_add,
        indexes_to_drop,
    })
}

/// Changefeed changes. Changefeeds cannot be altered in place, so a changed
/// changefeed shows up in both lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangefeedDiff {
    /// Changefeeds to create.
    pub to_add: Vec<ChangefeedSpec>,
    /// Names of changefeeds to drop.
    pub to_drop: Vec<String>,
}

/// Matches changefeeds by name.
///
/// `initial_scan` only applies when a changefeed is created and is not
/// reported back by the server, so it never counts as drift.
#[must_use]
pub fn changefeed_diff(desired: &[ChangefeedSpec], observed: &[ChangefeedSpec]) -> ChangefeedDiff {
    let desired_map: HashMap<&str, &ChangefeedSpec> =
        desired.iter().map(|c| (c.name.as_str(), c)).collect();
    let observed_map: HashMap<&str, &ChangefeedSpec> =
        observed.iter().map(|c| (c.name.as_str(), c)).collect();

    let mut diff = ChangefeedDiff::default();

    for feed in observed {
        match desired_map.get(feed.name.as_str()) {
            Some(wanted) if same_definition(wanted, feed) => {}
            _ => diff.to_drop.push(feed.name.clone()),
        }
    }

    for feed in desired {
        let unchanged = observed_map
            .get(feed.name.as_str())
            .is_some_and(|current| same_definition(feed, current));
        if !unchanged {
            diff.to_add.push(feed.clone());
        }
    }

    diff
}

fn same_definition(a: &ChangefeedSpec, b: &ChangefeedSpec) -> bool {
    a.name == b.name
        && a.mode == b.mode
        && a.format == b.format
        && a.virtual_timestamps == b.virtual_timestamps
        && a.retention_period == b.retention_period
}

/// Setting changes for an existing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsDiff {
    /// Settings to apply with `ALTER TABLE ... SET`.
    pub set: TableSettings,
    /// Whether TTL has to be removed.
    pub reset_ttl: bool,
}

impl SettingsDiff {
    /// Returns true if there are no differences.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && !self.reset_ttl
    }
}

/// Compares TTL, partitioning and replication.
///
/// Only settings present in `desired` are compared; an absent setting means
/// "leave as is", except for TTL, whose absence means "no expiration".
/// Uniform partitions and explicit split points only apply at creation time
/// and are ignored.
#[must_use]
pub fn settings_diff(desired: &TableSpec, observed: &TableSpec) -> SettingsDiff {
    let mut diff = SettingsDiff::default();

    match (&desired.ttl, &observed.ttl) {
        (Some(wanted), current) if current.as_ref() != Some(wanted) => {
            diff.set.ttl = Some(wanted.clone());
        }
        (None, Some(_)) => diff.reset_ttl = true,
        _ => {}
    }

    if let Some(wanted) = &desired.partitioning {
        let current = observed.partitioning.clone().unwrap_or_default();
        let changed = partitioning_diff(wanted, &current);
        if !changed.is_empty() {
            diff.set.partitioning = Some(changed);
        }
    }

    if let Some(ReplicationSpec {
        read_replicas_setting: Some(wanted),
    }) = &desired.replication
    {
        let current = observed
            .replication
            .as_ref()
            .and_then(|r| r.read_replicas_setting.as_ref());
        if current != Some(wanted) {
            diff.set.replication = Some(ReplicationSpec {
                read_replicas_setting: Some(wanted.clone()),
            });
        }
    }

    diff
}

/// Keeps the alterable partitioning fields of `wanted` that differ from `current`.
fn partitioning_diff(wanted: &PartitioningSpec, current: &PartitioningSpec) -> PartitioningSpec {
    fn changed<T: PartialEq + Copy>(wanted: Option<T>, current: Option<T>) -> Option<T> {
        wanted.filter(|w| current != Some(*w))
    }

    PartitioningSpec {
        uniform_partitions: None,
        min_partitions: changed(wanted.min_partitions, current.min_partitions),
        max_partitions: changed(wanted.max_partitions, current.max_partitions),
        by_load_enabled: changed(wanted.by_load_enabled, current.by_load_enabled),
        by_size_enabled: changed(wanted.by_size_enabled, current.by_size_enabled),
        by_size_threshold_bytes: changed(
            wanted.by_size_threshold_bytes,
            current.by_size_threshold_bytes,
        ),
        partition_at_keys: Vec::new(),
    }
}

/// Compares the topic-level settings present in `desired`.
///
/// An empty desired codec list leaves the topic's codecs alone.
pub fn topic_settings_diff(
    desired: &TopicSpecInput,
    observed: &TopicSpec,
    codecs: &CodecTable,
) -> Result<TopicSettings> {
    let mut settings = TopicSettings::default();

    if desired.partitions_count.is_some() && desired.partitions_count != observed.partitions_count
    {
        settings.partitions_count = desired.partitions_count;
    }
    if desired.retention_period.is_some() && desired.retention_period != observed.retention_period
    {
        settings.retention_period = desired.retention_period.clone();
    }
    if !desired.supported_codecs.is_empty() {
        let wanted = codecs.parse_list(&desired.supported_codecs)?;
        let wanted_set: HashSet<Codec> = wanted.iter().copied().collect();
        let current_set: HashSet<Codec> = observed.supported_codecs.iter().copied().collect();
        if wanted_set != current_set {
            settings.supported_codecs = wanted;
        }
    }

    let changed = !settings.is_empty();
    debug!(topic = %desired.path, changed, "Computed topic settings diff");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::TtlSpec;

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

    #[test]
    fn test_no_changes() {
        let table = users();
        let diff = table_diff(&table, &table).unwrap();
        assert!(diff.is_empty());
        assert!(settings_diff(&table, &table).is_empty());
    }

    #[test]
    fn test_detect_new_column() {
        let observed = users();
        let desired = users().column(ColumnSpec::new("email", "Utf8"));

        let added = column_diff(&desired.columns, &observed.columns).unwrap();
        assert_eq!(added, vec![ColumnSpec::new("email", "Utf8")]);
    }

    #[test]
    fn test_new_columns_keep_declaration_order() {
        let observed = users();
        let desired = users()
            .column(ColumnSpec::new("z", "Utf8"))
            .column(ColumnSpec::new("a", "Utf8"));

        let added = column_diff(&desired.columns, &observed.columns).unwrap();
        let names: Vec<&str> = added.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn test_dropped_columns_are_refused() {
        let observed = users()
            .column(ColumnSpec::new("email", "Utf8"))
            .column(ColumnSpec::new("phone", "Utf8"));
        let desired = users();

        match column_diff(&desired.columns, &observed.columns) {
            Err(ReconcileError::UnsupportedOperation { targets, .. }) => {
                assert_eq!(targets, strings(&["email", "phone"]));
            }
            other => panic!("Expected UnsupportedOperation, got {:?}", other),
        }
    }

    #[test]
    fn test_identical_indexes() {
        let idx = IndexSpec::new("idx", strings(&["a", "b"])).cover(strings(&["c", "d"]));
        let (add, drop) = index_diff(&[idx.clone()], &[idx]);
        assert!(add.is_empty());
        assert!(drop.is_empty());
    }

    #[test]
    fn test_detect_new_and_dropped_index() {
        let observed = vec![IndexSpec::new("old", strings(&["a"]))];
        let desired = vec![IndexSpec::new("new", strings(&["b"]))];

        let (add, drop) = index_diff(&desired, &observed);
        assert_eq!(add, desired);
        assert_eq!(drop, strings(&["old"]));
    }

    #[test]
    fn test_changed_index_is_only_added() {
        let observed = vec![IndexSpec::new("idx", strings(&["a"]))];
        let desired = vec![IndexSpec::new("idx", strings(&["a", "b"]))];

        let (add, drop) = index_diff(&desired, &observed);
        assert_eq!(add.len(), 1);
        assert!(drop.is_empty());
    }

    #[test]
    fn test_changefeed_changes() {
        let observed = vec![
            ChangefeedSpec::new("keep"),
            ChangefeedSpec::new("gone"),
            ChangefeedSpec::new("changed"),
        ];
        let desired = vec![
            ChangefeedSpec::new("keep"),
            ChangefeedSpec::new("changed").retention_period("PT48H"),
            ChangefeedSpec::new("fresh"),
        ];

        let diff = changefeed_diff(&desired, &observed);
        assert_eq!(diff.to_drop, strings(&["gone", "changed"]));
        let added: Vec<&str> = diff.to_add.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(added, vec!["changed", "fresh"]);
    }

    #[test]
    fn test_initial_scan_is_not_drift() {
        let mut wanted = ChangefeedSpec::new("f").retention_period("PT24H");
        wanted.initial_scan = true;
        let current = ChangefeedSpec::new("f").retention_period("PT24H");

        let diff = changefeed_diff(&[wanted], &[current]);
        assert_eq!(diff, ChangefeedDiff::default());
    }

    #[test]
    fn test_ttl_added_and_removed() {
        let plain = users();
        let with_ttl = users().ttl(TtlSpec::new("id", "PT1H"));

        let added = settings_diff(&with_ttl, &plain);
        assert_eq!(added.set.ttl, with_ttl.ttl);
        assert!(!added.reset_ttl);

        let removed = settings_diff(&plain, &with_ttl);
        assert!(removed.set.is_empty());
        assert!(removed.reset_ttl);
    }

    #[test]
    fn test_partitioning_only_changed_fields() {
        let observed = users().partitioning(PartitioningSpec {
            min_partitions: Some(1),
            max_partitions: Some(10),
            ..PartitioningSpec::default()
        });
        let desired = users().partitioning(PartitioningSpec {
            uniform_partitions: Some(4),
            min_partitions: Some(1),
            max_partitions: Some(20),
            ..PartitioningSpec::default()
        });

        let diff = settings_diff(&desired, &observed);
        assert_eq!(
            diff.set.partitioning,
            Some(PartitioningSpec {
                max_partitions: Some(20),
                ..PartitioningSpec::default()
            })
        );
    }

    #[test]
    fn test_replication_change() {
        let observed = users();
        let desired = users().replication(ReplicationSpec {
            read_replicas_setting: Some("PER_AZ:1".to_string()),
        });
        let diff = settings_diff(&desired, &observed);
        assert_eq!(diff.set.replication, desired.replication);
        assert!(settings_diff(&desired, &desired).is_empty());
    }

    #[test]
    fn test_topic_settings_diff() {
        let observed = TopicSpec {
            path: "events".to_string(),
            partitions_count: Some(2),
            retention_period: Some("PT24H".to_string()),
            supported_codecs: vec![Codec::Raw],
            consumers: Vec::new(),
        };
        let desired = TopicSpecInput {
            path: "events".to_string(),
            partitions_count: Some(4),
            retention_period: Some("PT24H".to_string()),
            supported_codecs: strings(&["raw", "zstd"]),
            consumers: Vec::new(),
        };

        let settings = topic_settings_diff(&desired, &observed, CodecTable::standard()).unwrap();
        assert_eq!(settings.partitions_count, Some(4));
        assert_eq!(settings.retention_period, None);
        assert_eq!(settings.supported_codecs, vec![Codec::Raw, Codec::Zstd]);

        let reordered = TopicSpecInput {
            path: "events".to_string(),
            supported_codecs: strings(&["raw", "gzip"]),
            ..TopicSpecInput::default()
        };
        let current = TopicSpec {
            supported_codecs: vec![Codec::Gzip, Codec::Raw],
            ..observed.clone()
        };
        assert!(topic_settings_diff(&reordered, &current, CodecTable::standard())
            .unwrap()
            .is_empty());

        let untouched = TopicSpecInput {
            path: "events".to_string(),
            ..TopicSpecInput::default()
        };
        assert!(topic_settings_diff(&untouched, &observed, CodecTable::standard())
            .unwrap()
            .is_empty());
    }
}
