//! FreeStyle Precision Neo meter.
//!
//! Also expected to work with FreeStyle Optium Neo meters, which share the
//! text protocol.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use glucometer_core::error::{GlucometerError, Result};
use glucometer_core::models::{MeterInfo, Unit};
use glucometer_core::settings::MalformedRecordPolicy;
use tracing::debug;

use crate::reader::{decode_readings_with, Readings};
use crate::transport::Transport;

pub const MODEL_NAME: &str = "FreeStyle Precision Neo";

const SERIAL_NUMBER_COMMAND: &[u8] = b"$serlnum?";
const SOFTWARE_VERSION_COMMAND: &[u8] = b"$swver?";
const DATE_COMMAND: &[u8] = b"$date?";
const TIME_COMMAND: &[u8] = b"$time?";

/// Driver owning the transport to one meter.
pub struct PrecisionNeo<T> {
    transport: T,
}

impl<T: Transport> PrecisionNeo<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Precision Neo meters always report mg/dL.
    pub fn glucose_unit(&self) -> Unit {
        Unit::MgDl
    }

    pub fn serial_number(&mut self) -> Result<String> {
        self.query_single(SERIAL_NUMBER_COMMAND)
    }

    pub fn software_version(&mut self) -> Result<String> {
        self.query_single(SOFTWARE_VERSION_COMMAND)
    }

    /// Identity of the meter, queried from the device.
    pub fn meter_info(&mut self) -> Result<MeterInfo> {
        let serial_number = self.serial_number()?;
        let version = self.software_version()?;
        Ok(MeterInfo {
            model: MODEL_NAME.to_string(),
            serial_number,
            version_info: vec![format!("Software version: {}", version)],
            native_unit: self.glucose_unit(),
        })
    }

    /// Current meter clock.
    ///
    /// `$date?` answers `MM,DD,YY` and `$time?` answers `HH,MM`.
    pub fn datetime(&mut self) -> Result<NaiveDateTime> {
        let date = self.query_single(DATE_COMMAND)?;
        let time = self.query_single(TIME_COMMAND)?;
        parse_clock(&date, &time)
    }

    /// Set the meter clock, then read it back.
    ///
    /// Seconds are dropped; the meter keeps minutes only.
    pub fn set_datetime(&mut self, when: NaiveDateTime) -> Result<NaiveDateTime> {
        let year = when.year() - 2000;
        if !(0..=99).contains(&year) {
            return Err(GlucometerError::ClockOutOfRange(when));
        }

        let date_command = format!("$date,{},{},{}", when.month(), when.day(), year);
        let time_command = format!("$time,{},{}", when.hour(), when.minute());
        self.exchange(date_command.as_bytes())?;
        self.exchange(time_command.as_bytes())?;

        self.datetime()
    }

    /// Lazily decode the stored glucose results.
    pub fn readings(&mut self, policy: MalformedRecordPolicy) -> Readings<'_, T> {
        decode_readings_with(&mut self.transport, policy)
    }

    /// Send a command answered by a single text record.
    fn query_single(&mut self, command: &[u8]) -> Result<String> {
        match self.exchange(command)? {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(GlucometerError::malformed(
                &[] as &[&str],
                format!("empty answer to {}", String::from_utf8_lossy(command)),
            )),
        }
    }

    /// Send `command` and read its whole response, returning the first
    /// record trimmed.
    fn exchange(&mut self, command: &[u8]) -> Result<Option<String>> {
        let command_name = String::from_utf8_lossy(command).into_owned();
        let transport_err = |source| GlucometerError::Transport {
            command: command_name.clone(),
            source,
        };

        self.transport.send(command).map_err(transport_err)?;

        let mut answer: Option<String> = None;
        for record in self.transport.receive_framed_records() {
            let record = record.map_err(transport_err)?;
            if answer.is_none() {
                answer = Some(String::from_utf8_lossy(&record).trim().to_string());
            } else {
                debug!("Ignoring extra record in answer to {}", command_name);
            }
        }
        Ok(answer)
    }
}

/// Combine the `$date?` and `$time?` answers into a timestamp.
fn parse_clock(date: &str, time: &str) -> Result<NaiveDateTime> {
    let fields: Vec<&str> = date.split(',').chain(time.split(',')).collect();
    if fields.len() != 5 {
        return Err(GlucometerError::malformed(
            &fields,
            format!("expected 5 clock fields, got {}", fields.len()),
        ));
    }

    let mut numbers = [0u32; 5];
    for (idx, field) in fields.iter().enumerate() {
        numbers[idx] = field.trim().parse().map_err(|_| {
            GlucometerError::malformed(&fields, format!("clock field {:?} is not a number", field))
        })?;
    }
    let [month, day, year, hour, minute] = numbers;
    if year > 99 {
        return Err(GlucometerError::malformed(&fields, "invalid meter clock"));
    }

    NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .ok_or_else(|| GlucometerError::malformed(&fields, "invalid meter clock"))
}
