//! Watermark types and calendar-day helpers.
//!
//! A watermark records, per domain and per pipeline stage, the last calendar
//! day that stage has durably completed. Dates are persisted as `YYYYMMDD`
//! strings; day boundaries are always derived from the calendar date, never
//! from string prefixes.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProcureError;

/// Pipeline stage a watermark tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Raw records ingested from the source
    Ingested,
    /// Embedding vectors generated for records
    Embedded,
    /// Records assigned their top-K categories
    Categorized,
}

impl Stage {
    /// All stages in dependency order.
    pub const ALL: [Stage; 3] = [Stage::Ingested, Stage::Embedded, Stage::Categorized];

    /// Stable name used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Ingested => "ingested",
            Stage::Embedded => "embedded",
            Stage::Categorized => "categorized",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = ProcureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingested" => Ok(Stage::Ingested),
            "embedded" => Ok(Stage::Embedded),
            "categorized" => Ok(Stage::Categorized),
            other => Err(ProcureError::InvalidInput(format!("unknown stage: {}", other))),
        }
    }
}

/// Persisted watermark row, one per (domain, stage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkRow {
    /// Domain (record type) this watermark belongs to
    pub domain: String,

    /// Stage tracked by this row
    pub stage: Stage,

    /// Last completed day, stored as `YYYYMMDD`
    #[serde(with = "yyyymmdd")]
    pub date: NaiveDate,

    /// When the row was last written (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl WatermarkRow {
    /// Create a row stamped with the current time.
    pub fn new(domain: impl Into<String>, stage: Stage, date: NaiveDate) -> Self {
        Self {
            domain: domain.into(),
            stage,
            date,
            updated_at: Utc::now(),
        }
    }

    /// Serialize to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProcureError> {
        serde_json::to_vec(self).map_err(ProcureError::from)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProcureError> {
        serde_json::from_slice(bytes).map_err(ProcureError::from)
    }
}

/// Parse a day given as `YYYYMMDD` or `YYYY-MM-DD`.
pub fn parse_day(s: &str) -> Result<NaiveDate, ProcureError> {
    let trimmed = s.trim();
    let format = if trimmed.contains('-') {
        "%Y-%m-%d"
    } else {
        "%Y%m%d"
    };
    NaiveDate::parse_from_str(trimmed, format)
        .map_err(|e| ProcureError::InvalidDate(format!("{} ({})", trimmed, e)))
}

/// Format a day as `YYYYMMDD`.
pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}

/// The calendar day after `day` (saturates at the maximum representable date).
pub fn next_day(day: NaiveDate) -> NaiveDate {
    day.succ_opt().unwrap_or(day)
}

/// Half-open UTC millisecond bounds `[day 00:00:00, day+1 00:00:00)`.
pub fn day_bounds_ms(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = next_day(day).and_time(chrono::NaiveTime::MIN).and_utc();
    (start.timestamp_millis(), end.timestamp_millis())
}

mod yyyymmdd {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_day(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(deserializer)?;
        super::parse_day(&s).map_err(serde::de::Error::custom)
    }
}
