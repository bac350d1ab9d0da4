//! Data types and associated functions and methods

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{format_description::FormatItem, Date, OffsetDateTime, UtcOffset};
use validator::{Validate, ValidationError};

/// Calendar date format used on the wire: ISO-8601 `YYYY-MM-DD`.
const ISO_DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Default minimum group size (K).
pub const DEFAULT_MIN_GROUP_SIZE: u64 = 15;

/// One raw input record.
#[derive(Clone, Debug, PartialEq)]
pub struct RawEvent {
    /// Opaque user identifier. Never aggregated or disclosed.
    pub user_id: String,
    /// Category label
    pub event_type: String,
    /// Instant at which the event occurred
    pub timestamp: OffsetDateTime,
    /// Numeric measurement. `None` when null or non-finite in the source.
    pub value: Option<f64>,
}

impl RawEvent {
    /// Returns the group to which this event belongs.
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            event_type: self.event_type.clone(),
            date: self.timestamp.to_offset(UtcOffset::UTC).date(),
        }
    }
}

/// Composite grouping key: event type and UTC calendar date.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct GroupKey {
    pub event_type: String,
    pub date: Date,
}

/// Statistics of a single group.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupAggregate {
    /// Number of events in the group, including those without a usable value
    pub event_count: u64,
    /// Mean of the usable values, absent when no event carried one
    pub avg_value: Option<f64>,
}

/// A disclosed group statistic, tagged with the basis for its release.
///
/// This is the unit stored in the artifact and returned by the API.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DisclosureRecord {
    pub event_type: String,
    #[serde(with = "iso_date")]
    pub date: Date,
    pub event_count: u64,
    pub avg_value: Option<f64>,
    pub compliance_tag: String,
}

impl DisclosureRecord {
    /// Return a new DisclosureRecord from a group and its statistics.
    pub fn new(key: GroupKey, aggregate: GroupAggregate, compliance_tag: &str) -> Self {
        DisclosureRecord {
            event_type: key.event_type,
            date: key.date,
            event_count: aggregate.event_count,
            avg_value: aggregate.avg_value,
            compliance_tag: compliance_tag.to_string(),
        }
    }

    /// Returns the `(event_type, date)` key of this record.
    pub fn key(&self) -> (&str, Date) {
        (&self.event_type, self.date)
    }
}

/// Optional inclusive date window applied to list queries.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
#[validate(schema(function = "validate_date_window"))]
pub struct DateWindow {
    /// First date to include
    #[serde(default, with = "iso_date::option")]
    pub from: Option<Date>,
    /// Last date to include
    #[serde(default, with = "iso_date::option")]
    pub to: Option<Date>,
}

impl DateWindow {
    /// Returns true if `date` lies within the window.
    pub fn contains(&self, date: Date) -> bool {
        self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
    }
}

/// Validate that a date window is not inverted
fn validate_date_window(window: &DateWindow) -> Result<(), ValidationError> {
    if let (Some(from), Some(to)) = (window.from, window.to) {
        if from > to {
            let mut error = ValidationError::new("from must not be after to");
            error.add_param("from".into(), &format_date(from));
            error.add_param("to".into(), &format_date(to));
            return Err(error);
        }
    }
    Ok(())
}

/// Format a date as ISO-8601 `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    // The format only contains components every Date has.
    date.format(ISO_DATE).unwrap_or_else(|_| date.to_string())
}

/// Parse an ISO-8601 `YYYY-MM-DD` date.
pub fn parse_date(text: &str) -> Result<Date, time::error::Parse> {
    Date::parse(text, ISO_DATE)
}

/// Convert a count of days since 1970-01-01 into a date.
pub fn date_from_epoch_days(days: i32) -> Result<Date, time::error::ComponentRange> {
    Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY.saturating_add(days))
}

/// Convert a date into a count of days since 1970-01-01.
pub fn epoch_days(date: Date) -> i32 {
    date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY
}

/// Serde adapter for dates as ISO-8601 strings.
pub mod iso_date {
    use serde::{de, Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S: Serializer>(date: &Date, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Date, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_date(&text).map_err(|_| {
            de::Error::custom(format!("invalid date `{text}`, expected YYYY-MM-DD"))
        })
    }

    pub mod option {
        use serde::{de, Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S: Serializer>(
            date: &Option<Date>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match date {
                Some(date) => serializer.serialize_some(&super::super::format_date(*date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Date>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|text| {
                    super::super::parse_date(&text).map_err(|_| {
                        de::Error::custom(format!("invalid date `{text}`, expected YYYY-MM-DD"))
                    })
                })
                .transpose()
        }
    }
}
