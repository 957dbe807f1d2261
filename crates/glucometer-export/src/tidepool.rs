//! Tidepool ingestion-format export.
//!
//! Only the fields a meter can vouch for are produced. Upload metadata
//! (`time`, `timezoneOffset`, `uploadId`, `guid`) is added later by the
//! ingestion pipeline.
//!
//! See <http://developer.tidepool.org/data-model/device-data/>.

use std::borrow::Borrow;
use std::io::Write;

use glucometer_core::error::Result;
use glucometer_core::formatting::format_device_time;
use glucometer_core::models::{MeasureMethod, MeterInfo, Reading, StoredReading, Unit};
use serde::{Serialize, Serializer as _};
use serde_json::ser::PrettyFormatter;
use tracing::debug;

pub const TYPE_BLOOD_KETONE: &str = "bloodKetone";
pub const TYPE_SMBG: &str = "smbg";
/// Type tag written for CGM glucose readings.
///
/// Tidepool documents continuous glucose as `cbg`; the historical `cgb`
/// tag is kept until ingestion confirms which one it accepts.
pub const TYPE_CGM: &str = "cgb";

// ── Records ───────────────────────────────────────────────────────────────────

/// Numeric payload, integer or float as the reading itself is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordValue {
    Integer(u32),
    Float(f64),
}

/// One ingestion-format datum.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TidepoolRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock_drift_offset: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_offset: Option<i64>,
    pub device_id: String,
    pub device_time: String,
    #[serde(rename = "type")]
    pub value_type: &'static str,
    pub units: &'static str,
    pub value: RecordValue,
}

/// Output switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Add `clockDriftOffset: 0` and `conversionOffset: 0` to every record.
    pub include_offsets: bool,
    pub pretty: bool,
}

/// Build the record for one reading.
pub fn generate_record(identity: &MeterInfo, reading: &Reading) -> TidepoolRecord {
    generate_record_with(identity, reading, &ExportOptions::default())
}

pub fn generate_record_with(
    identity: &MeterInfo,
    reading: &Reading,
    options: &ExportOptions,
) -> TidepoolRecord {
    let (value_type, units, value) = match reading {
        Reading::Ketone(r) => (TYPE_BLOOD_KETONE, Unit::MmolL, RecordValue::Float(r.value)),
        Reading::Glucose(r) => {
            let value_type = match r.measure_method {
                MeasureMethod::Cgm => TYPE_CGM,
                MeasureMethod::BloodSample => TYPE_SMBG,
            };
            (value_type, identity.native_unit, RecordValue::Integer(r.value))
        }
    };

    let offset = options.include_offsets.then_some(0);
    TidepoolRecord {
        clock_drift_offset: offset,
        conversion_offset: offset,
        device_id: identity.device_id(),
        device_time: format_device_time(&reading.timestamp()),
        value_type,
        units: units.as_str(),
        value,
    }
}

// ── Serialization ─────────────────────────────────────────────────────────────

/// Serialize `readings` as a compact JSON array, in input order.
pub fn serialize<I>(identity: &MeterInfo, readings: I) -> Result<String>
where
    I: IntoIterator,
    I::Item: Borrow<Reading>,
{
    serialize_with(identity, readings, &ExportOptions::default())
}

pub fn serialize_with<I>(identity: &MeterInfo, readings: I, options: &ExportOptions) -> Result<String>
where
    I: IntoIterator,
    I::Item: Borrow<Reading>,
{
    let records: Vec<TidepoolRecord> = readings
        .into_iter()
        .map(|r| generate_record_with(identity, r.borrow(), options))
        .collect();

    debug!(
        "Serialized {} readings for {}",
        records.len(),
        identity.device_id()
    );

    let json = if options.pretty {
        serde_json::to_string_pretty(&records)?
    } else {
        serde_json::to_string(&records)?
    };
    Ok(json)
}

/// Serialize readings read back from a JSON document.
///
/// Fails with `UnsupportedReadingKind` on the first reading whose kind tag
/// is not modelled.
pub fn serialize_stored(
    identity: &MeterInfo,
    stored: Vec<StoredReading>,
    options: &ExportOptions,
) -> Result<String> {
    let readings = readings_from_stored(stored)?;
    serialize_with(identity, &readings, options)
}

/// Convert readings read back from a JSON document, failing on the first
/// unmodelled kind.
pub fn readings_from_stored(stored: Vec<StoredReading>) -> Result<Vec<Reading>> {
    stored.into_iter().map(Reading::try_from).collect()
}

/// Stream the JSON array to `writer` without collecting the records first.
pub fn write_json<W, I>(writer: W, identity: &MeterInfo, readings: I, options: &ExportOptions) -> Result<()>
where
    W: Write,
    I: IntoIterator,
    I::Item: Borrow<Reading>,
{
    let records = readings
        .into_iter()
        .map(|r| generate_record_with(identity, r.borrow(), options));

    if options.pretty {
        let mut ser = serde_json::Serializer::with_formatter(writer, PrettyFormatter::new());
        ser.collect_seq(records)?;
    } else {
        let mut ser = serde_json::Serializer::new(writer);
        ser.collect_seq(records)?;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
