//! In-memory statistics catalog
//!
//! A [Catalog] starts out empty (not loaded) and is loaded exactly once with a [Snapshot] of the
//! disclosure artifact. The snapshot is never modified afterwards, so request handlers read it
//! concurrently without locking.

use crate::artifact;
use crate::error::DisclosureError;
use crate::models::{DateWindow, DisclosureRecord};

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use std::sync::OnceLock;

/// Immutable, indexed copy of a disclosure artifact.
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Records in `(event_type, date)` order
    records: Vec<DisclosureRecord>,
    /// Position of each event type's records in `records`
    by_event_type: BTreeMap<String, Range<usize>>,
    /// Minimum group size recorded in the artifact
    min_group_size: Option<u64>,
}

impl Snapshot {
    /// Build a snapshot from a set of records.
    ///
    /// Records are sorted by `(event_type, date)`; the caller is responsible for keys being
    /// unique, as [artifact::read_artifact] guarantees.
    pub fn new(mut records: Vec<DisclosureRecord>, min_group_size: Option<u64>) -> Self {
        records.sort_by(|a, b| a.key().cmp(&b.key()));
        let mut by_event_type: BTreeMap<String, Range<usize>> = BTreeMap::new();
        for (index, record) in records.iter().enumerate() {
            match by_event_type.get_mut(&record.event_type) {
                Some(range) => range.end = index + 1,
                None => {
                    by_event_type.insert(record.event_type.clone(), index..index + 1);
                }
            }
        }
        Snapshot {
            records,
            by_event_type,
            min_group_size,
        }
    }

    /// Load a snapshot from a disclosure artifact.
    pub fn load(path: &Path) -> Result<Self, DisclosureError> {
        let artifact = artifact::read_artifact(path)?;
        Ok(Self::new(artifact.records, artifact.min_group_size))
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the snapshot holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Minimum group size recorded in the artifact
    pub fn min_group_size(&self) -> Option<u64> {
        self.min_group_size
    }

    /// Returns every record within `window`, ordered by `(event_type, date)`.
    pub fn list_all(&self, window: &DateWindow) -> Vec<&DisclosureRecord> {
        self.records
            .iter()
            .filter(|record| window.contains(record.date))
            .collect()
    }

    /// Returns the records of one event type within `window`, ordered by date.
    ///
    /// Fails with [DisclosureError::EventTypeNotFound] if no record has the event type. A window
    /// excluding every record of a known event type gives an empty list instead.
    pub fn list_by_event_type(
        &self,
        event_type: &str,
        window: &DateWindow,
    ) -> Result<Vec<&DisclosureRecord>, DisclosureError> {
        let range = self.by_event_type.get(event_type).ok_or_else(|| {
            DisclosureError::EventTypeNotFound {
                event_type: event_type.to_string(),
            }
        })?;
        Ok(self.records[range.clone()]
            .iter()
            .filter(|record| window.contains(record.date))
            .collect())
    }

    /// Returns the distinct event types, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        self.by_event_type.keys().map(String::as_str).collect()
    }
}

/// Holds the snapshot once it has been loaded.
#[derive(Debug, Default)]
pub struct Catalog {
    snapshot: OnceLock<Snapshot>,
}

impl Catalog {
    /// Returns a catalog that is not loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the snapshot. A catalog can only be loaded once.
    pub fn load(&self, snapshot: Snapshot) -> Result<&Snapshot, DisclosureError> {
        let mut installed = false;
        let loaded = self.snapshot.get_or_init(|| {
            installed = true;
            snapshot
        });
        if !installed {
            return Err(DisclosureError::Configuration {
                reason: "statistics are already loaded".to_string(),
            });
        }
        Ok(loaded)
    }

    /// Returns true once a snapshot has been installed.
    pub fn is_loaded(&self) -> bool {
        self.snapshot.get().is_some()
    }

    /// Returns the loaded snapshot, or [DisclosureError::ServiceUnavailable] if not yet loaded.
    pub fn snapshot(&self) -> Result<&Snapshot, DisclosureError> {
        self.snapshot.get().ok_or(DisclosureError::ServiceUnavailable)
    }
}
