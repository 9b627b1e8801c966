//! Telemetry point type and its wire shape.
//!
//! A point serializes as
//!
//! ```json
//! { "time": "2026-10-16T09:12:44.120Z", "tags": { "board_id": "abc24" },
//!   "measurement": "DCPS", "fields": { "current": 0.93 } }
//! ```

use crate::consts::DCPS_MEASUREMENT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which supply signal a point carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    /// Output current [A].
    Current,
    /// Output voltage [V].
    Voltage,
}

impl Signal {
    /// Both signals, current first.
    pub const ALL: [Signal; 2] = [Signal::Current, Signal::Voltage];

    /// Field name on the wire.
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Voltage => "voltage",
        }
    }

    fn from_field_name(name: &str) -> Option<Self> {
        match name {
            "current" => Some(Self::Current),
            "voltage" => Some(Self::Voltage),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// One immutable telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WirePoint", try_from = "WirePoint")]
pub struct TelemetryPoint {
    time: DateTime<Utc>,
    board_id: String,
    measurement: String,
    signal: Signal,
    value: f64,
}

impl TelemetryPoint {
    /// Create a `DCPS` point.
    pub fn new(time: DateTime<Utc>, board_id: impl Into<String>, signal: Signal, value: f64) -> Self {
        Self {
            time,
            board_id: board_id.into(),
            measurement: DCPS_MEASUREMENT.to_string(),
            signal,
            value,
        }
    }

    /// Sample time.
    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    /// `board_id` tag.
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Carried signal.
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Sampled value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

/// Tag set of a wire point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTags {
    /// Board the sample belongs to.
    pub board_id: String,
}

/// Serialized form of a [`TelemetryPoint`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePoint {
    /// RFC 3339 timestamp.
    pub time: DateTime<Utc>,
    /// Tags.
    pub tags: WireTags,
    /// Measurement name.
    pub measurement: String,
    /// Exactly one of `current` / `voltage`.
    pub fields: BTreeMap<String, f64>,
}

impl From<TelemetryPoint> for WirePoint {
    fn from(p: TelemetryPoint) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(p.signal.field_name().to_string(), p.value);
        Self {
            time: p.time,
            tags: WireTags {
                board_id: p.board_id,
            },
            measurement: p.measurement,
            fields,
        }
    }
}

impl TryFrom<WirePoint> for TelemetryPoint {
    type Error = String;

    fn try_from(w: WirePoint) -> Result<Self, Self::Error> {
        if w.fields.len() != 1 {
            return Err(format!("expected exactly one field, got {}", w.fields.len()));
        }
        let (name, value) = w
            .fields
            .into_iter()
            .next()
            .ok_or_else(|| "missing field".to_string())?;
        let signal = Signal::from_field_name(&name).ok_or_else(|| format!("unknown field '{name}'"))?;
        Ok(Self {
            time: w.time,
            board_id: w.tags.board_id,
            measurement: w.measurement,
            signal,
            value,
        })
    }
}
