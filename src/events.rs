//! Raw event source
//!
//! Raw events are read from Parquet. The input location is either a single Parquet file or a
//! directory of Parquet part files, as written by most batch engines. Columns are looked up by
//! name and any additional columns are ignored.
//!
//! Missing values: a row whose `value` is null or not finite still counts as an event, but carries
//! no value into the group average.

use crate::error::DisclosureError;
use crate::models::RawEvent;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use time::OffsetDateTime;

const USER_ID: &str = "user_id";
const EVENT_TYPE: &str = "event_type";
const TIMESTAMP: &str = "timestamp";
const VALUE: &str = "value";

/// Columns every raw event file must provide.
pub const REQUIRED_COLUMNS: [&str; 4] = [USER_ID, EVENT_TYPE, TIMESTAMP, VALUE];

const NANOS_PER_DAY: i128 = 86_400 * 1_000_000_000;

/// Returns the Parquet files making up the raw event source, sorted by name.
///
/// # Arguments
///
/// * `input`: A Parquet file, or a directory containing Parquet files. Hidden files and files
///   starting with an underscore (e.g. `_SUCCESS` markers) are skipped.
pub fn source_files(input: &Path) -> Result<Vec<PathBuf>, DisclosureError> {
    let input_error = |err: std::io::Error| DisclosureError::InputRead {
        path: input.to_path_buf(),
        source: err.into(),
    };
    let metadata = fs::metadata(input).map_err(input_error)?;
    if metadata.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(input).map_err(input_error)? {
        let path = entry.map_err(input_error)?.path();
        let skipped = path
            .file_name()
            .and_then(|name| name.to_str())
            .map_or(true, |name| name.starts_with('.') || name.starts_with('_'));
        let is_parquet = path.extension().map_or(false, |ext| ext == "parquet");
        if !skipped && is_parquet && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// A single Parquet file of raw events.
pub struct EventFile {
    path: PathBuf,
    reader: SerializedFileReader<File>,
}

impl EventFile {
    /// Open a raw event file and check that it has the required columns.
    pub fn open(path: &Path) -> Result<Self, DisclosureError> {
        let file = File::open(path).map_err(|err| DisclosureError::InputRead {
            path: path.to_path_buf(),
            source: err.into(),
        })?;
        let reader = SerializedFileReader::new(file).map_err(|err| DisclosureError::InputRead {
            path: path.to_path_buf(),
            source: err.into(),
        })?;

        let root = reader.metadata().file_metadata().schema();
        for column in REQUIRED_COLUMNS {
            if !root.get_fields().iter().any(|field| field.name() == column) {
                return Err(DisclosureError::InputSchema {
                    path: path.to_path_buf(),
                    reason: format!("missing column `{column}`"),
                });
            }
        }

        Ok(EventFile {
            path: path.to_path_buf(),
            reader,
        })
    }

    /// Number of rows declared in the file footer
    pub fn num_rows(&self) -> i64 {
        self.reader.metadata().file_metadata().num_rows()
    }

    /// Returns an iterator over the events in the file.
    ///
    /// Each item fails if the row cannot be decoded or does not hold a valid event.
    pub fn events(
        &self,
    ) -> Result<impl Iterator<Item = Result<RawEvent, DisclosureError>> + '_, DisclosureError> {
        let rows = self
            .reader
            .get_row_iter(None)
            .map_err(|err| DisclosureError::InputRead {
                path: self.path.clone(),
                source: err.into(),
            })?;
        Ok(rows.enumerate().map(move |(index, row)| {
            let row = row.map_err(|err| DisclosureError::InputRead {
                path: self.path.clone(),
                source: err.into(),
            })?;
            event_from_row(&row).map_err(|reason| DisclosureError::InputSchema {
                path: self.path.clone(),
                reason: format!("row {index}: {reason}"),
            })
        }))
    }
}

/// Build a [RawEvent] from a Parquet row.
fn event_from_row(row: &Row) -> Result<RawEvent, String> {
    let mut user_id = None;
    let mut event_type = None;
    let mut timestamp = None;
    let mut value = None;
    for (name, field) in row.get_column_iter() {
        match name.as_str() {
            USER_ID => user_id = Some(field),
            EVENT_TYPE => event_type = Some(field),
            TIMESTAMP => timestamp = Some(field),
            VALUE => value = Some(field),
            _ => (),
        }
    }
    let missing = |column: &str| format!("missing column `{column}`");

    let user_id = match user_id.ok_or_else(|| missing(USER_ID))? {
        Field::Str(user_id) => user_id.clone(),
        other => other.to_string(),
    };
    let event_type = match event_type.ok_or_else(|| missing(EVENT_TYPE))? {
        Field::Str(event_type) => event_type.clone(),
        Field::Null => return Err("`event_type` is null".to_string()),
        other => return Err(format!("`event_type` must be a string, got {other}")),
    };
    let timestamp = field_timestamp(timestamp.ok_or_else(|| missing(TIMESTAMP))?)?;
    let value = field_value(value.ok_or_else(|| missing(VALUE))?)?;

    Ok(RawEvent {
        user_id,
        event_type,
        timestamp,
        value,
    })
}

/// Convert a timestamp field into an instant.
///
/// Plain 64-bit integers are interpreted as milliseconds since the Unix epoch.
fn field_timestamp(field: &Field) -> Result<OffsetDateTime, String> {
    let nanos = match field {
        Field::TimestampMillis(millis) | Field::Long(millis) => i128::from(*millis) * 1_000_000,
        Field::TimestampMicros(micros) => i128::from(*micros) * 1_000,
        Field::Date(days) => i128::from(*days) * NANOS_PER_DAY,
        Field::Null => return Err("`timestamp` is null".to_string()),
        other => return Err(format!("`timestamp` has unsupported value {other}")),
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .map_err(|err| format!("`timestamp` out of range: {err}"))
}

/// Convert a value field into a usable measurement.
///
/// Returns `None` for null and non-finite values.
fn field_value(field: &Field) -> Result<Option<f64>, String> {
    let value = match field {
        Field::Null => return Ok(None),
        Field::Byte(value) => f64::from(*value),
        Field::Short(value) => f64::from(*value),
        Field::Int(value) => f64::from(*value),
        Field::Long(value) => *value as f64,
        Field::UByte(value) => f64::from(*value),
        Field::UShort(value) => f64::from(*value),
        Field::UInt(value) => f64::from(*value),
        Field::ULong(value) => *value as f64,
        Field::Float(value) => f64::from(*value),
        Field::Double(value) => *value,
        other => return Err(format!("`value` must be numeric, got {other}")),
    };
    Ok(value.is_finite().then_some(value))
}
