use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::error::{GlucometerError, Result};

/// Glucose concentration unit reported by a meter.
///
/// The string forms are contractual: downstream ingestion matches them
/// byte for byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::MgDl => "mg/dL",
            Unit::MmolL => "mmol/L",
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Unit {
    type Err = GlucometerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mg/dl" => Ok(Unit::MgDl),
            "mmol/l" => Ok(Unit::MmolL),
            _ => Err(GlucometerError::InvalidUnit(s.to_string())),
        }
    }
}

/// Origin of a glucose measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureMethod {
    /// Self-test from a blood sample on a strip.
    #[default]
    BloodSample,
    /// Continuous glucose monitor sensor.
    Cgm,
}

/// A single blood glucose value in the meter's native unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlucoseReading {
    /// Device-local time, minute precision, no timezone.
    pub timestamp: NaiveDateTime,
    pub value: u32,
    #[serde(default)]
    pub measure_method: MeasureMethod,
}

impl GlucoseReading {
    /// Reading from a blood sample, the only kind strip meters produce.
    pub fn new(timestamp: NaiveDateTime, value: u32) -> Self {
        Self {
            timestamp,
            value,
            measure_method: MeasureMethod::BloodSample,
        }
    }

    pub fn with_method(mut self, measure_method: MeasureMethod) -> Self {
        self.measure_method = measure_method;
        self
    }
}

/// A blood ketone value, always in mmol/L.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KetoneReading {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// Every reading kind the exporters understand.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Glucose(GlucoseReading),
    Ketone(KetoneReading),
}

impl Reading {
    pub fn timestamp(&self) -> NaiveDateTime {
        match self {
            Reading::Glucose(r) => r.timestamp,
            Reading::Ketone(r) => r.timestamp,
        }
    }

    /// Tag used by [`StoredReading::kind`].
    pub fn kind(&self) -> &'static str {
        match self {
            Reading::Glucose(_) => KIND_GLUCOSE,
            Reading::Ketone(_) => KIND_KETONE,
        }
    }
}

impl From<GlucoseReading> for Reading {
    fn from(r: GlucoseReading) -> Self {
        Reading::Glucose(r)
    }
}

impl From<KetoneReading> for Reading {
    fn from(r: KetoneReading) -> Self {
        Reading::Ketone(r)
    }
}

pub const KIND_GLUCOSE: &str = "glucose";
pub const KIND_KETONE: &str = "ketone";

/// String-tagged form of a [`Reading`], as written to and read back from
/// JSON documents.
///
/// The tag is only checked when converting into a [`Reading`], so documents
/// produced by newer tools still parse and fail with a precise error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub kind: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure_method: Option<MeasureMethod>,
}

impl From<&Reading> for StoredReading {
    fn from(reading: &Reading) -> Self {
        match reading {
            Reading::Glucose(r) => StoredReading {
                kind: KIND_GLUCOSE.to_string(),
                timestamp: r.timestamp,
                value: f64::from(r.value),
                measure_method: Some(r.measure_method),
            },
            Reading::Ketone(r) => StoredReading {
                kind: KIND_KETONE.to_string(),
                timestamp: r.timestamp,
                value: r.value,
                measure_method: None,
            },
        }
    }
}

impl TryFrom<StoredReading> for Reading {
    type Error = GlucometerError;

    fn try_from(stored: StoredReading) -> Result<Self> {
        match stored.kind.as_str() {
            KIND_GLUCOSE => {
                let v = stored.value;
                if v.fract() != 0.0 || v < 0.0 || v > f64::from(u32::MAX) {
                    return Err(GlucometerError::malformed(
                        &[stored.kind.clone(), stored.timestamp.to_string(), v.to_string()],
                        "glucose value must be a non-negative integer",
                    ));
                }
                Ok(Reading::Glucose(GlucoseReading {
                    timestamp: stored.timestamp,
                    value: v as u32,
                    measure_method: stored.measure_method.unwrap_or_default(),
                }))
            }
            KIND_KETONE => Ok(Reading::Ketone(KetoneReading {
                timestamp: stored.timestamp,
                value: stored.value,
            })),
            other => Err(GlucometerError::UnsupportedReadingKind(other.to_string())),
        }
    }
}

/// Identity of the meter the readings came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterInfo {
    pub model: String,
    pub serial_number: String,
    /// Free-form firmware/software version lines.
    #[serde(default)]
    pub version_info: Vec<String>,
    pub native_unit: Unit,
}

impl MeterInfo {
    pub fn new(model: impl Into<String>, serial_number: impl Into<String>, native_unit: Unit) -> Self {
        Self {
            model: model.into(),
            serial_number: serial_number.into(),
            version_info: Vec::new(),
            native_unit,
        }
    }

    /// `<model>_<serial>` with all whitespace removed from both halves.
    ///
    /// ```
    /// use glucometer_core::models::{MeterInfo, Unit};
    ///
    /// let info = MeterInfo::new("Precision Neo", "AB 123", Unit::MgDl);
    /// assert_eq!(info.device_id(), "PrecisionNeo_AB123");
    /// ```
    pub fn device_id(&self) -> String {
        format!(
            "{}_{}",
            strip_whitespace(&self.model),
            strip_whitespace(&self.serial_number)
        )
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}
