use chrono::NaiveDateTime;

use crate::models::{MeasureMethod, MeterInfo, Reading};

/// Render a device timestamp as `YYYY-MM-DDTHH:MM:SS`.
///
/// Meters have no notion of timezone, so no offset suffix is appended.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use glucometer_core::formatting::format_device_time;
///
/// let ts = NaiveDate::from_ymd_opt(2017, 3, 4).unwrap().and_hms_opt(9, 5, 0).unwrap();
/// assert_eq!(format_device_time(&ts), "2017-03-04T09:05:00");
/// ```
pub fn format_device_time(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// One human-readable line per reading, e.g.
/// `2017-03-04 09:05  glucose   123 mg/dL  (blood sample)`.
///
/// `glucose_unit` labels glucose values; ketones are always mmol/L.
pub fn format_reading(reading: &Reading, glucose_unit: &str) -> String {
    let when = reading.timestamp().format("%Y-%m-%d %H:%M");
    match reading {
        Reading::Glucose(r) => {
            let method = match r.measure_method {
                MeasureMethod::BloodSample => "blood sample",
                MeasureMethod::Cgm => "CGM",
            };
            format!(
                "{}  glucose  {:>5} {}  ({})",
                when, r.value, glucose_unit, method
            )
        }
        Reading::Ketone(r) => format!("{}  ketone   {:>5.1} mmol/L", when, r.value),
    }
}

/// Multi-line description of a meter, as printed by the `info` command.
pub fn format_meter_info(info: &MeterInfo) -> String {
    let mut lines = vec![
        format!("Model: {}", info.model),
        format!("Serial number: {}", info.serial_number),
    ];
    lines.extend(info.version_info.iter().cloned());
    lines.push(format!("Native unit: {}", info.native_unit));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GlucoseReading, KetoneReading, Unit};
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2017, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_format_device_time_has_no_offset() {
        let s = format_device_time(&ts(23, 59));
        assert_eq!(s, "2017-03-04T23:59:00");
        assert!(!s.ends_with('Z'));
    }

    #[test]
    fn test_format_reading_glucose() {
        let r = Reading::Glucose(GlucoseReading::new(ts(9, 5), 123));
        assert_eq!(
            format_reading(&r, "mg/dL"),
            "2017-03-04 09:05  glucose    123 mg/dL  (blood sample)"
        );
    }

    #[test]
    fn test_format_reading_ketone() {
        let r = Reading::Ketone(KetoneReading {
            timestamp: ts(9, 5),
            value: 0.8,
        });
        assert_eq!(format_reading(&r, "mg/dL"), "2017-03-04 09:05  ketone     0.8 mmol/L");
    }

    #[test]
    fn test_format_meter_info() {
        let mut info = MeterInfo::new("FreeStyle Precision Neo", "X123", Unit::MgDl);
        info.version_info.push("Software version: 1.0".to_string());
        assert_eq!(
            format_meter_info(&info),
            "Model: FreeStyle Precision Neo\nSerial number: X123\nSoftware version: 1.0\nNative unit: mg/dL"
        );
    }
}
