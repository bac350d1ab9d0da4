//! Aggregation of raw events into disclosure records.
//!
//! Events are bucketed by [GroupKey], counted and averaged. A group is disclosed only if it holds
//! at least `min_group_size` (K) events; smaller groups are dropped entirely, never merged into
//! another group or reported with a placeholder value.

use crate::artifact;
use crate::cli::AggregateArgs;
use crate::error::DisclosureError;
use crate::events::{self, EventFile};
use crate::models::{DisclosureRecord, GroupAggregate, GroupKey, RawEvent};

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

/// Running statistics of one group.
///
/// The mean is kept as a running mean rather than a sum, so finite values near `f64::MAX` do
/// not overflow.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Accumulator {
    /// Number of events
    count: u64,
    /// Number of events carrying a usable value
    value_count: u64,
    /// Mean of usable values
    value_mean: f64,
}

impl Accumulator {
    fn add(&mut self, value: Option<f64>) {
        self.count += 1;
        if let Some(value) = value {
            self.value_count += 1;
            let n = self.value_count as f64;
            let mean = self.value_mean + (value - self.value_mean) / n;
            self.value_mean = if mean.is_finite() {
                mean
            } else {
                self.value_mean + (value / n - self.value_mean / n)
            };
        }
    }

    fn merge(&mut self, other: &Accumulator) {
        self.count += other.count;
        if other.value_count == 0 {
            return;
        }
        if self.value_count == 0 {
            self.value_count = other.value_count;
            self.value_mean = other.value_mean;
            return;
        }
        let a = self.value_count as f64;
        let b = other.value_count as f64;
        self.value_count += other.value_count;
        let n = self.value_count as f64;
        let mean = (self.value_mean * a + other.value_mean * b) / n;
        self.value_mean = if mean.is_finite() {
            mean
        } else {
            self.value_mean * (a / n) + other.value_mean * (b / n)
        };
    }

    fn finish(&self) -> GroupAggregate {
        GroupAggregate {
            event_count: self.count,
            avg_value: (self.value_count > 0).then_some(self.value_mean),
        }
    }
}

/// Partial aggregate over a set of raw events.
///
/// Partial aggregates of disjoint event sets may be merged. Merging in a fixed order gives the
/// same result whether partials were built sequentially or in parallel.
#[derive(Debug, Default)]
pub struct Groups {
    groups: HashMap<GroupKey, Accumulator>,
    events: u64,
    missing_values: u64,
}

impl Groups {
    /// Add one event to its group.
    pub fn add(&mut self, event: RawEvent) {
        let key = event.group_key();
        self.events += 1;
        if event.value.is_none() {
            self.missing_values += 1;
        }
        self.groups.entry(key).or_default().add(event.value);
    }

    /// Merge another partial aggregate into this one.
    pub fn merge(&mut self, other: Groups) {
        self.events += other.events;
        self.missing_values += other.missing_values;
        for (key, accumulator) in other.groups {
            self.groups.entry(key).or_default().merge(&accumulator);
        }
    }

    /// Number of distinct groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Returns true if there are no groups
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of events added
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Number of events added without a usable value
    pub fn missing_values(&self) -> u64 {
        self.missing_values
    }

    /// Returns the statistics of every group, ordered by key.
    pub fn into_aggregates(self) -> Vec<(GroupKey, GroupAggregate)> {
        let mut aggregates: Vec<_> = self
            .groups
            .into_iter()
            .map(|(key, accumulator)| (key, accumulator.finish()))
            .collect();
        aggregates.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
        aggregates
    }
}

impl FromIterator<RawEvent> for Groups {
    fn from_iter<I: IntoIterator<Item = RawEvent>>(iter: I) -> Self {
        let mut groups = Groups::default();
        for event in iter {
            groups.add(event);
        }
        groups
    }
}

/// Result of applying suppression to a set of groups.
#[derive(Debug, PartialEq)]
pub struct Disclosure {
    /// Records that may be disclosed, ordered by `(event_type, date)`
    pub records: Vec<DisclosureRecord>,
    /// Number of groups withheld for being smaller than the threshold
    pub suppressed_groups: usize,
}

/// Applies the minimum group size rule and the compliance tag.
#[derive(Clone, Debug)]
pub struct Aggregator {
    min_group_size: u64,
    compliance_tag: String,
}

impl Aggregator {
    /// Returns a new Aggregator.
    ///
    /// # Arguments
    ///
    /// * `min_group_size`: Minimum number of events a group needs to be disclosed. Must be at
    ///   least 1.
    /// * `compliance_tag`: Label attached to every disclosed record. Must not be blank.
    pub fn new(min_group_size: u64, compliance_tag: &str) -> Result<Self, DisclosureError> {
        if min_group_size < 1 {
            return Err(DisclosureError::Configuration {
                reason: "minimum group size must be at least 1".to_string(),
            });
        }
        if compliance_tag.trim().is_empty() {
            return Err(DisclosureError::Configuration {
                reason: "compliance tag must not be empty".to_string(),
            });
        }
        Ok(Aggregator {
            min_group_size,
            compliance_tag: compliance_tag.to_string(),
        })
    }

    /// Minimum group size (K)
    pub fn min_group_size(&self) -> u64 {
        self.min_group_size
    }

    /// Suppress small groups and tag the rest.
    pub fn disclose(&self, groups: Groups) -> Disclosure {
        let aggregates = groups.into_aggregates();
        let total = aggregates.len();
        let records: Vec<DisclosureRecord> = aggregates
            .into_iter()
            .filter(|(_, aggregate)| aggregate.event_count >= self.min_group_size)
            .map(|(key, aggregate)| DisclosureRecord::new(key, aggregate, &self.compliance_tag))
            .collect();
        Disclosure {
            suppressed_groups: total - records.len(),
            records,
        }
    }

    /// Aggregate events into disclosure records.
    pub fn aggregate<I>(&self, events: I) -> Vec<DisclosureRecord>
    where
        I: IntoIterator<Item = RawEvent>,
    {
        self.disclose(events.into_iter().collect()).records
    }
}

/// Summary of an aggregation run.
///
/// Only totals are reported: the keys and sizes of suppressed groups are not.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregationSummary {
    /// Number of input files read
    pub files: usize,
    /// Number of events read
    pub events: u64,
    /// Number of events without a usable value
    pub missing_values: u64,
    /// Number of distinct groups
    pub groups: usize,
    /// Number of groups suppressed
    pub suppressed_groups: usize,
    /// Number of records written
    pub disclosed_records: usize,
}

/// Aggregate one raw event file.
#[tracing::instrument(level = "DEBUG", skip(path), fields(path = %path.display()))]
fn aggregate_file(path: &Path) -> Result<Groups, DisclosureError> {
    let file = EventFile::open(path)?;
    debug!(rows = file.num_rows(), "opened raw event file");
    let mut groups = Groups::default();
    for event in file.events()? {
        groups.add(event?);
    }
    debug!(
        events = groups.events(),
        groups = groups.len(),
        "aggregated file"
    );
    Ok(groups)
}

/// Aggregate raw event files, optionally in parallel, then merge them in file order.
fn aggregate_files(
    files: &[PathBuf],
    use_rayon: bool,
    thread_limit: Option<usize>,
) -> Result<Groups, DisclosureError> {
    let partials = if use_rayon {
        let num_threads = thread_limit.unwrap_or_else(num_cpus::get);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|err| DisclosureError::Configuration {
                reason: format!("failed to build thread pool: {err}"),
            })?;
        pool.install(|| {
            files
                .par_iter()
                .map(|path| aggregate_file(path))
                .collect::<Result<Vec<_>, _>>()
        })?
    } else {
        files
            .iter()
            .map(|path| aggregate_file(path))
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut groups = Groups::default();
    for partial in partials {
        groups.merge(partial);
    }
    Ok(groups)
}

/// Run the aggregation job.
///
/// Reads every raw event under the input location, aggregates and suppresses groups, and replaces
/// the artifact at the output location. Any failure aborts the run and leaves the previous
/// artifact in place.
///
/// # Arguments
///
/// * `args`: Aggregation command line arguments
#[tracing::instrument(
    level = "INFO",
    skip(args),
    fields(input = %args.input.display(), output = %args.output.display())
)]
pub fn run(args: &AggregateArgs) -> Result<AggregationSummary, DisclosureError> {
    let aggregator = Aggregator::new(args.min_group_size, &args.compliance_tag)?;
    if args.thread_limit == Some(0) {
        return Err(DisclosureError::Configuration {
            reason: "thread limit must be at least 1".to_string(),
        });
    }

    let files = events::source_files(&args.input)?;
    info!(files = files.len(), "reading raw events");
    let groups = aggregate_files(&files, args.use_rayon, args.thread_limit)?;
    if groups.is_empty() {
        info!("no raw events found, writing an empty artifact");
    }

    let mut summary = AggregationSummary {
        files: files.len(),
        events: groups.events(),
        missing_values: groups.missing_values(),
        groups: groups.len(),
        ..Default::default()
    };
    let disclosure = aggregator.disclose(groups);
    summary.suppressed_groups = disclosure.suppressed_groups;
    summary.disclosed_records = disclosure.records.len();

    artifact::write_artifact(&args.output, &disclosure.records, aggregator.min_group_size())?;
    info!(
        events = summary.events,
        missing_values = summary.missing_values,
        groups = summary.groups,
        suppressed_groups = summary.suppressed_groups,
        disclosed_records = summary.disclosed_records,
        "aggregation complete"
    );
    Ok(summary)
}
