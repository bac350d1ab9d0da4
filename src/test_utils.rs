use crate::models::{DisclosureRecord, RawEvent};

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use parquet::data_type::{ByteArray, ByteArrayType, DoubleType, Int64Type};
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use time::{Date, OffsetDateTime};

/// A raw event to write into a Parquet fixture.
pub(crate) struct TestEvent {
    pub user_id: String,
    pub event_type: String,
    pub timestamp: OffsetDateTime,
    pub value: Option<f64>,
}

impl TestEvent {
    pub(crate) fn new(
        user_id: &str,
        event_type: &str,
        timestamp: OffsetDateTime,
        value: Option<f64>,
    ) -> Self {
        TestEvent {
            user_id: user_id.to_string(),
            event_type: event_type.to_string(),
            timestamp,
            value,
        }
    }
}

impl From<&TestEvent> for RawEvent {
    fn from(event: &TestEvent) -> Self {
        RawEvent {
            user_id: event.user_id.clone(),
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            value: event.value,
        }
    }
}

/// Create `count` events of one type at one instant, with values 1, 2, ..., count.
pub(crate) fn group_events(
    event_type: &str,
    timestamp: OffsetDateTime,
    count: usize,
) -> Vec<TestEvent> {
    (1..=count)
        .map(|i| TestEvent::new(&format!("user-{i}"), event_type, timestamp, Some(i as f64)))
        .collect()
}

/// Create a DisclosureRecord.
pub(crate) fn record(
    event_type: &str,
    date: Date,
    event_count: u64,
    avg_value: Option<f64>,
) -> DisclosureRecord {
    DisclosureRecord {
        event_type: event_type.to_string(),
        date,
        event_count,
        avg_value,
        compliance_tag: "test tag".to_string(),
    }
}

/// Write raw events to a Parquet file using the upstream raw event schema.
pub(crate) fn write_events(path: &Path, events: &[TestEvent]) {
    let schema = Arc::new(
        parse_message_type(
            "message raw_events {
                REQUIRED BINARY user_id (UTF8);
                REQUIRED BINARY event_type (UTF8);
                REQUIRED INT64 timestamp (TIMESTAMP_MILLIS);
                OPTIONAL DOUBLE value;
            }",
        )
        .unwrap(),
    );
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
    if !events.is_empty() {
        let mut row_group = writer.next_row_group().unwrap();

        for column in [0, 1] {
            let mut col_writer = row_group.next_column().unwrap().unwrap();
            let values = events
                .iter()
                .map(|event| match column {
                    0 => ByteArray::from(event.user_id.as_str()),
                    _ => ByteArray::from(event.event_type.as_str()),
                })
                .collect::<Vec<_>>();
            col_writer
                .typed::<ByteArrayType>()
                .write_batch(&values, None, None)
                .unwrap();
            col_writer.close().unwrap();
        }

        let mut col_writer = row_group.next_column().unwrap().unwrap();
        let timestamps = events
            .iter()
            .map(|event| (event.timestamp.unix_timestamp_nanos() / 1_000_000) as i64)
            .collect::<Vec<_>>();
        col_writer
            .typed::<Int64Type>()
            .write_batch(&timestamps, None, None)
            .unwrap();
        col_writer.close().unwrap();

        let mut col_writer = row_group.next_column().unwrap().unwrap();
        let values = events
            .iter()
            .filter_map(|event| event.value)
            .collect::<Vec<_>>();
        let def_levels = events
            .iter()
            .map(|event| i16::from(event.value.is_some()))
            .collect::<Vec<_>>();
        col_writer
            .typed::<DoubleType>()
            .write_batch(&values, Some(&def_levels), None)
            .unwrap();
        col_writer.close().unwrap();

        assert!(row_group.next_column().unwrap().is_none());
        row_group.close().unwrap();
    }
    writer.close().unwrap();
}

/// Write a Parquet file that only has an `event_type` column.
pub(crate) fn write_event_types_only(path: &Path, event_types: &[&str]) {
    let schema = Arc::new(
        parse_message_type(
            "message partial {
                REQUIRED BINARY event_type (UTF8);
            }",
        )
        .unwrap(),
    );
    let props = Arc::new(WriterProperties::builder().build());
    let file = File::create(path).unwrap();
    let mut writer = SerializedFileWriter::new(file, schema, props).unwrap();
    let mut row_group = writer.next_row_group().unwrap();
    let mut col_writer = row_group.next_column().unwrap().unwrap();
    let values = event_types
        .iter()
        .map(|event_type| ByteArray::from(*event_type))
        .collect::<Vec<_>>();
    col_writer
        .typed::<ByteArrayType>()
        .write_batch(&values, None, None)
        .unwrap();
    col_writer.close().unwrap();
    row_group.close().unwrap();
    writer.close().unwrap();
}
