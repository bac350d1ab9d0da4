//! Disclosure artifact
//!
//! The artifact is a single Parquet file holding the records of one aggregation run, sorted by
//! `(event_type, date)`. The minimum group size used for the run is stored in the file's key/value
//! metadata so that readers can check every record against it.
//!
//! A run replaces the artifact by writing a sibling temporary file and renaming it over the
//! target, so readers see either the previous artifact or the new one.

use crate::error::{DisclosureError, StorageError};
use crate::models::{self, DisclosureRecord};

use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashSet;
use parquet::basic::Compression;
use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int32Type, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::format::KeyValue;
use parquet::record::{Field, Row};
use parquet::schema::parser::parse_message_type;

/// Key/value metadata key holding the minimum group size of the run.
pub const MIN_GROUP_SIZE_KEY: &str = "disclosure.min_group_size";

const EVENT_TYPE: &str = "event_type";
const DATE: &str = "date";
const EVENT_COUNT: &str = "event_count";
const AVG_VALUE: &str = "avg_value";
const COMPLIANCE_TAG: &str = "compliance_tag";

const COLUMNS: [&str; 5] = [EVENT_TYPE, DATE, EVENT_COUNT, AVG_VALUE, COMPLIANCE_TAG];

const SCHEMA: &str = "
message disclosure_record {
    REQUIRED BINARY event_type (UTF8);
    REQUIRED INT32 date (DATE);
    REQUIRED INT64 event_count;
    OPTIONAL DOUBLE avg_value;
    REQUIRED BINARY compliance_tag (UTF8);
}";

/// Contents of a disclosure artifact.
#[derive(Debug, PartialEq)]
pub struct Artifact {
    /// Records in `(event_type, date)` order
    pub records: Vec<DisclosureRecord>,
    /// Minimum group size recorded by the writer, if any
    pub min_group_size: Option<u64>,
}

/// Returns the path of the temporary file used while writing `path`.
fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("artifact"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write disclosure records as a Parquet artifact, replacing any existing artifact.
///
/// # Arguments
///
/// * `path`: Artifact location
/// * `records`: Records to write, in `(event_type, date)` order
/// * `min_group_size`: Minimum group size used to produce the records
pub fn write_artifact(
    path: &Path,
    records: &[DisclosureRecord],
    min_group_size: u64,
) -> Result<(), DisclosureError> {
    let event_counts = records
        .iter()
        .map(|record| i64::try_from(record.event_count))
        .collect::<Result<Vec<_>, _>>()?;

    let tmp_path = temporary_path(path);
    let result = encode(&tmp_path, records, &event_counts, min_group_size)
        .and_then(|()| fs::rename(&tmp_path, path).map_err(StorageError::from));
    if let Err(source) = result {
        // Best effort: the temporary file may not exist.
        let _ = fs::remove_file(&tmp_path);
        return Err(DisclosureError::OutputWrite {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Encode records into a Parquet file and flush it to disk.
fn encode(
    path: &Path,
    records: &[DisclosureRecord],
    event_counts: &[i64],
    min_group_size: u64,
) -> Result<(), StorageError> {
    let schema = Arc::new(parse_message_type(SCHEMA)?);
    let props = Arc::new(
        WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(vec![KeyValue::new(
                MIN_GROUP_SIZE_KEY.to_string(),
                min_group_size.to_string(),
            )]))
            .build(),
    );
    let file = File::create(path)?;
    let mut writer = SerializedFileWriter::new(file, schema, props)?;

    if !records.is_empty() {
        let mut row_group = writer.next_row_group()?;

        if let Some(mut column) = row_group.next_column()? {
            let values: Vec<ByteArray> = records
                .iter()
                .map(|record| ByteArray::from(record.event_type.as_str()))
                .collect();
            column
                .typed::<ByteArrayType>()
                .write_batch(&values, None, None)?;
            column.close()?;
        }

        if let Some(mut column) = row_group.next_column()? {
            let values: Vec<i32> = records
                .iter()
                .map(|record| models::epoch_days(record.date))
                .collect();
            column.typed::<Int32Type>().write_batch(&values, None, None)?;
            column.close()?;
        }

        if let Some(mut column) = row_group.next_column()? {
            column
                .typed::<Int64Type>()
                .write_batch(event_counts, None, None)?;
            column.close()?;
        }

        if let Some(mut column) = row_group.next_column()? {
            let values: Vec<f64> = records.iter().filter_map(|record| record.avg_value).collect();
            let def_levels: Vec<i16> = records
                .iter()
                .map(|record| i16::from(record.avg_value.is_some()))
                .collect();
            column
                .typed::<DoubleType>()
                .write_batch(&values, Some(&def_levels), None)?;
            column.close()?;
        }

        if let Some(mut column) = row_group.next_column()? {
            let values: Vec<ByteArray> = records
                .iter()
                .map(|record| ByteArray::from(record.compliance_tag.as_str()))
                .collect();
            column
                .typed::<ByteArrayType>()
                .write_batch(&values, None, None)?;
            column.close()?;
        }

        row_group.close()?;
    }

    let file = writer.into_inner()?;
    file.sync_all()?;
    Ok(())
}

/// Load and validate a disclosure artifact.
///
/// Fails if the file cannot be decoded, if a record has fewer events than the recorded minimum
/// group size (or fewer than one event when none is recorded), or if a `(event_type, date)` key
/// occurs more than once.
///
/// # Arguments
///
/// * `path`: Artifact location
pub fn read_artifact(path: &Path) -> Result<Artifact, DisclosureError> {
    let load_error = |source: StorageError| DisclosureError::ArtifactLoad {
        path: path.to_path_buf(),
        source,
    };
    let invalid = |reason: String| DisclosureError::ArtifactInvalid {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|err| load_error(err.into()))?;
    let reader = SerializedFileReader::new(file).map_err(|err| load_error(err.into()))?;

    let file_metadata = reader.metadata().file_metadata();
    for column in COLUMNS {
        if !file_metadata
            .schema()
            .get_fields()
            .iter()
            .any(|field| field.name() == column)
        {
            return Err(invalid(format!("missing column `{column}`")));
        }
    }
    let min_group_size = file_metadata
        .key_value_metadata()
        .and_then(|kvs| kvs.iter().find(|kv| kv.key == MIN_GROUP_SIZE_KEY))
        .and_then(|kv| kv.value.as_deref())
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| invalid(format!("invalid {MIN_GROUP_SIZE_KEY} `{value}`")))
        })
        .transpose()?;

    let rows = reader
        .get_row_iter(None)
        .map_err(|err| load_error(err.into()))?;
    let mut records = Vec::new();
    for (index, row) in rows.enumerate() {
        let row = row.map_err(|err| load_error(err.into()))?;
        let record =
            record_from_row(&row).map_err(|reason| invalid(format!("row {index}: {reason}")))?;
        records.push(record);
    }

    validate_records(&records, min_group_size.unwrap_or(1)).map_err(invalid)?;

    Ok(Artifact {
        records,
        min_group_size,
    })
}

/// Check that records honour the minimum group size and have unique keys.
fn validate_records(records: &[DisclosureRecord], min_group_size: u64) -> Result<(), String> {
    let mut keys = HashSet::with_capacity(records.len());
    for record in records {
        if record.event_count < min_group_size {
            return Err(format!(
                "record {}/{} has {} events, below the minimum group size {}",
                record.event_type,
                models::format_date(record.date),
                record.event_count,
                min_group_size
            ));
        }
        if !keys.insert(record.key()) {
            return Err(format!(
                "duplicate record {}/{}",
                record.event_type,
                models::format_date(record.date)
            ));
        }
    }
    Ok(())
}

/// Build a [DisclosureRecord] from a Parquet row.
fn record_from_row(row: &Row) -> Result<DisclosureRecord, String> {
    let mut event_type = None;
    let mut date = None;
    let mut event_count = None;
    let mut avg_value = None;
    let mut compliance_tag = None;
    for (name, field) in row.get_column_iter() {
        match (name.as_str(), field) {
            (EVENT_TYPE, Field::Str(value)) => event_type = Some(value.clone()),
            (DATE, Field::Date(days)) => {
                date = Some(
                    models::date_from_epoch_days(*days)
                        .map_err(|err| format!("`date` out of range: {err}"))?,
                )
            }
            (EVENT_COUNT, Field::Long(count)) => {
                event_count = Some(
                    u64::try_from(*count)
                        .map_err(|_| format!("`event_count` is negative: {count}"))?,
                )
            }
            (AVG_VALUE, Field::Double(value)) => avg_value = Some(Some(*value)),
            (AVG_VALUE, Field::Null) => avg_value = Some(None),
            (COMPLIANCE_TAG, Field::Str(value)) => compliance_tag = Some(value.clone()),
            (EVENT_TYPE | DATE | EVENT_COUNT | AVG_VALUE | COMPLIANCE_TAG, other) => {
                return Err(format!("`{name}` has unexpected value {other}"))
            }
            _ => (),
        }
    }
    let missing = |column: &str| format!("missing column `{column}`");
    Ok(DisclosureRecord {
        event_type: event_type.ok_or_else(|| missing(EVENT_TYPE))?,
        date: date.ok_or_else(|| missing(DATE))?,
        event_count: event_count.ok_or_else(|| missing(EVENT_COUNT))?,
        avg_value: avg_value.ok_or_else(|| missing(AVG_VALUE))?,
        compliance_tag: compliance_tag.ok_or_else(|| missing(COMPLIANCE_TAG))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    use time::macros::date;

    fn records() -> Vec<DisclosureRecord> {
        vec![
            test_utils::record("login", date!(2024 - 03 - 01), 20, Some(1.5)),
            test_utils::record("login", date!(2024 - 03 - 02), 15, None),
            test_utils::record("purchase", date!(2024 - 03 - 01), 31, Some(-4.25)),
        ]
    }

    #[test]
    fn temporary_path_is_sibling() {
        assert_eq!(
            PathBuf::from("/out/stats.parquet.tmp"),
            temporary_path(Path::new("/out/stats.parquet"))
        );
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.parquet");
        write_artifact(&path, &records(), 15).unwrap();
        assert!(!temporary_path(&path).exists());
        assert_eq!(
            Artifact {
                records: records(),
                min_group_size: Some(15),
            },
            read_artifact(&path).unwrap()
        );
    }

    #[test]
    fn write_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.parquet");
        write_artifact(&path, &[], 15).unwrap();
        let artifact = read_artifact(&path).unwrap();
        assert!(artifact.records.is_empty());
        assert_eq!(Some(15), artifact.min_group_size);
    }

    #[test]
    fn write_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.parquet");
        write_artifact(&path, &records(), 15).unwrap();
        let replacement = vec![test_utils::record(
            "refund",
            date!(2024 - 04 - 01),
            40,
            Some(2.0),
        )];
        write_artifact(&path, &replacement, 15).unwrap();
        assert_eq!(replacement, read_artifact(&path).unwrap().records);
    }

    #[test]
    fn write_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.parquet");
        let second = dir.path().join("second.parquet");
        write_artifact(&first, &records(), 15).unwrap();
        write_artifact(&second, &records(), 15).unwrap();
        assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
    }

    #[test]
    fn write_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("stats.parquet");
        assert!(matches!(
            write_artifact(&path, &records(), 15),
            Err(DisclosureError::OutputWrite { path: _, source: _ })
        ));
        assert!(!temporary_path(&path).exists());
    }

    #[test]
    fn failed_rename_preserves_previous_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = dir.path().join("stats.parquet");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"previous").unwrap();
        assert!(matches!(
            write_artifact(&path, &records(), 15),
            Err(DisclosureError::OutputWrite { path: _, source: _ })
        ));
        assert!(!temporary_path(&path).exists());
        assert_eq!(b"previous".to_vec(), fs::read(path.join("keep")).unwrap());
    }

    #[test]
    fn read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_artifact(&dir.path().join("absent.parquet")),
            Err(DisclosureError::ArtifactLoad { path: _, source: _ })
        ));
    }

    #[test]
    fn read_not_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.parquet");
        fs::write(&path, b"definitely not parquet").unwrap();
        assert!(matches!(
            read_artifact(&path),
            Err(DisclosureError::ArtifactLoad { path: _, source: _ })
        ));
    }

    #[test]
    fn read_raw_events_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.parquet");
        test_utils::write_events(&path, &[]);
        match read_artifact(&path) {
            Err(DisclosureError::ArtifactInvalid { path: _, reason }) => {
                assert_eq!("missing column `date`", reason)
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn read_rejects_records_below_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.parquet");
        // Written with a lower threshold than the one recorded.
        write_artifact(&path, &records(), 16).unwrap();
        match read_artifact(&path) {
            Err(DisclosureError::ArtifactInvalid { path: _, reason }) => assert_eq!(
                "record login/2024-03-02 has 15 events, below the minimum group size 16",
                reason
            ),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn read_rejects_duplicate_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.parquet");
        let mut records = records();
        records.push(records[0].clone());
        write_artifact(&path, &records, 15).unwrap();
        match read_artifact(&path) {
            Err(DisclosureError::ArtifactInvalid { path: _, reason }) => {
                assert_eq!("duplicate record login/2024-03-01", reason)
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn validate_without_recorded_threshold() {
        let mut records = records();
        assert_eq!(Ok(()), validate_records(&records, 1));
        records[0].event_count = 0;
        assert!(validate_records(&records, 1).is_err());
    }
}
