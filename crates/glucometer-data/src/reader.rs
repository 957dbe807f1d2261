//! Record decoding for FreeStyle Precision Neo result dumps.
//!
//! The meter answers `$result?` with one comma-separated record per stored
//! event. Several event kinds share the stream; only glucose results (type
//! tag `7`) become [`Reading`]s. Decoding is lazy: [`Readings`] pulls one
//! record from the transport per step and never buffers the dump.

use chrono::{NaiveDate, NaiveDateTime};
use glucometer_core::error::{GlucometerError, Result};
use glucometer_core::models::{GlucoseReading, Reading};
pub use glucometer_core::settings::MalformedRecordPolicy;
use tracing::{debug, trace, warn};

use crate::transport::Transport;

/// Command dumping every stored result.
pub const RESULTS_COMMAND: &[u8] = b"$result?";

/// First field of a blood glucose record.
pub const GLUCOSE_RECORD_TAG: &str = "7";

pub const FIELD_DELIMITER: char = ',';

/// Number of fields in a result record: nine named fields followed by ten
/// reserved ones (see [`NeoRecord`]).
pub const NEO_RECORD_ARITY: usize = 19;

const RESERVED_FIELDS: usize = NEO_RECORD_ARITY - 9;

// ── NeoRecord ─────────────────────────────────────────────────────────────────

/// A result record with every field parsed, in wire order.
///
/// Only the date, time and value are understood; the rest is kept so that
/// nothing the meter sent is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeoRecord {
    pub record_type: i64,
    pub id: i64,
    pub month: i64,
    pub day: i64,
    /// Two-digit year, relative to 2000.
    pub year: i64,
    pub hour: i64,
    pub minute: i64,
    pub unknown: i64,
    pub value: i64,
    pub reserved: [i64; RESERVED_FIELDS],
}

impl NeoRecord {
    /// Parse already-split fields. Fails on wrong arity or any
    /// non-integer field.
    pub fn parse(fields: &[&str]) -> Result<Self> {
        if fields.len() != NEO_RECORD_ARITY {
            return Err(GlucometerError::malformed(
                fields,
                format!(
                    "expected {} fields, got {}",
                    NEO_RECORD_ARITY,
                    fields.len()
                ),
            ));
        }

        let mut numbers = [0i64; NEO_RECORD_ARITY];
        for (idx, field) in fields.iter().enumerate() {
            numbers[idx] = field.trim().parse().map_err(|_| {
                GlucometerError::malformed(
                    fields,
                    format!("field {} ({:?}) is not an integer", idx + 1, field),
                )
            })?;
        }

        let mut reserved = [0i64; RESERVED_FIELDS];
        reserved.copy_from_slice(&numbers[9..]);

        Ok(Self {
            record_type: numbers[0],
            id: numbers[1],
            month: numbers[2],
            day: numbers[3],
            year: numbers[4],
            hour: numbers[5],
            minute: numbers[6],
            unknown: numbers[7],
            value: numbers[8],
            reserved,
        })
    }

    /// Device time of the record, `None` if the fields are not a valid
    /// calendar date and clock time between 2000 and 2099.
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        if !(0..=99).contains(&self.year) {
            return None;
        }
        let year = i32::try_from(2000 + self.year).ok()?;
        let month = u32::try_from(self.month).ok()?;
        let day = u32::try_from(self.day).ok()?;
        let hour = u32::try_from(self.hour).ok()?;
        let minute = u32::try_from(self.minute).ok()?;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
    }
}

// ── Single-record decoding ────────────────────────────────────────────────────

/// Decode one raw record.
///
/// Returns `Ok(None)` for records that are not glucose results, which
/// are not an error.
pub fn decode_record(raw: &[u8]) -> Result<Option<Reading>> {
    if raw.is_empty() {
        return Ok(None);
    }

    let text = String::from_utf8_lossy(raw);
    let fields: Vec<&str> = text.split(FIELD_DELIMITER).collect();
    if fields[0].trim() != GLUCOSE_RECORD_TAG {
        return Ok(None);
    }

    let record = NeoRecord::parse(&fields)?;
    let timestamp = record
        .timestamp()
        .ok_or_else(|| GlucometerError::malformed(&fields, "invalid date or time"))?;
    let value = u32::try_from(record.value)
        .map_err(|_| GlucometerError::malformed(&fields, "glucose value out of range"))?;

    Ok(Some(Reading::Glucose(GlucoseReading::new(timestamp, value))))
}

// ── Lazy decode pass ──────────────────────────────────────────────────────────

/// Counters for one decode pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Raw records pulled from the transport.
    pub records: u64,
    /// Readings yielded.
    pub readings: u64,
    /// Records skipped because they were not glucose results.
    pub filtered: u64,
    /// Glucose records that failed to decode.
    pub malformed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    NotStarted,
    Streaming,
    Finished,
}

/// Lazy sequence of readings from one `$result?` query.
///
/// The command is sent on the first call to `next`. The sequence cannot be
/// restarted; decoding again means calling [`decode_readings`] again.
/// Transport failures end the pass after being yielded; malformed glucose
/// records are handled according to the [`MalformedRecordPolicy`].
pub struct Readings<'a, T: Transport + ?Sized> {
    transport: &'a mut T,
    policy: MalformedRecordPolicy,
    state: PassState,
    stats: DecodeStats,
}

/// Decode readings with the default policy ([`MalformedRecordPolicy::Abort`]).
pub fn decode_readings<T: Transport + ?Sized>(transport: &mut T) -> Readings<'_, T> {
    decode_readings_with(transport, MalformedRecordPolicy::default())
}

pub fn decode_readings_with<T: Transport + ?Sized>(
    transport: &mut T,
    policy: MalformedRecordPolicy,
) -> Readings<'_, T> {
    Readings {
        transport,
        policy,
        state: PassState::NotStarted,
        stats: DecodeStats::default(),
    }
}

impl<T: Transport + ?Sized> Readings<'_, T> {
    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    fn finish(&mut self) {
        self.state = PassState::Finished;
        debug!(
            "Decode pass finished: {} records, {} readings, {} filtered, {} malformed",
            self.stats.records, self.stats.readings, self.stats.filtered, self.stats.malformed
        );
    }

    fn transport_error(&mut self, source: std::io::Error) -> GlucometerError {
        if self.state == PassState::Streaming {
            self.transport.abandon();
        }
        self.finish();
        GlucometerError::Transport {
            command: String::from_utf8_lossy(RESULTS_COMMAND).into_owned(),
            source,
        }
    }
}

impl<T: Transport + ?Sized> Iterator for Readings<'_, T> {
    type Item = Result<Reading>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            PassState::Finished => return None,
            PassState::NotStarted => {
                self.state = PassState::Streaming;
                if let Err(source) = self.transport.send(RESULTS_COMMAND) {
                    return Some(Err(self.transport_error(source)));
                }
            }
            PassState::Streaming => {}
        }

        loop {
            let raw = match self.transport.next_record() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    self.finish();
                    return None;
                }
                Err(source) => return Some(Err(self.transport_error(source))),
            };
            self.stats.records += 1;

            match decode_record(&raw) {
                Ok(Some(reading)) => {
                    self.stats.readings += 1;
                    return Some(Ok(reading));
                }
                Ok(None) => {
                    self.stats.filtered += 1;
                    trace!(
                        "Skipping non-glucose record {:?}",
                        String::from_utf8_lossy(&raw)
                    );
                }
                Err(err) => {
                    self.stats.malformed += 1;
                    match self.policy {
                        MalformedRecordPolicy::Abort => {
                            self.transport.abandon();
                            self.finish();
                            return Some(Err(err));
                        }
                        MalformedRecordPolicy::Continue => return Some(Err(err)),
                        MalformedRecordPolicy::Skip => warn!("{}", err),
                    }
                }
            }
        }
    }
}

impl<T: Transport + ?Sized> std::iter::FusedIterator for Readings<'_, T> {}

impl<T: Transport + ?Sized> Drop for Readings<'_, T> {
    fn drop(&mut self) {
        if self.state == PassState::Streaming {
            debug!("Decode pass dropped before the end of the response");
            self.transport.abandon();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ReplayTransport;
    use glucometer_core::models::MeasureMethod;
    use std::io;

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// Glucose record for `20YY-MM-DD hh:mm` with `value`.
    fn glucose(id: u32, mm: u32, dd: u32, yy: u32, hh: u32, mi: u32, value: u32) -> String {
        format!(
            "7,{},{},{},{},{},{},0,{},0,0,0,0,0,0,0,0,0,0",
            id, mm, dd, yy, hh, mi, value
        )
    }

    fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn replay(records: &[String]) -> ReplayTransport {
        ReplayTransport::new().with_response(RESULTS_COMMAND, records)
    }

    /// Transport over a fixed record list that counts reads and panics when
    /// a record past `limit` is pulled.
    struct Scripted {
        records: Vec<io::Result<Vec<u8>>>,
        reads: usize,
        limit: usize,
        sent: Vec<Vec<u8>>,
        abandoned: bool,
    }

    impl Scripted {
        fn new(records: Vec<io::Result<Vec<u8>>>) -> Self {
            let limit = records.len();
            Self {
                records,
                reads: 0,
                limit,
                sent: Vec::new(),
                abandoned: false,
            }
        }
    }

    impl Transport for Scripted {
        fn send(&mut self, command: &[u8]) -> io::Result<()> {
            self.sent.push(command.to_vec());
            Ok(())
        }

        fn next_record(&mut self) -> io::Result<Option<Vec<u8>>> {
            assert!(self.reads < self.limit, "record {} read too early", self.reads);
            if self.reads >= self.records.len() {
                return Ok(None);
            }
            let item = std::mem::replace(&mut self.records[self.reads], Ok(Vec::new()));
            self.reads += 1;
            item.map(Some)
        }

        fn abandon(&mut self) {
            self.abandoned = true;
        }
    }

    // ── decode_record ─────────────────────────────────────────────────────────

    #[test]
    fn test_decode_record_valid() {
        let raw = glucose(3, 3, 4, 17, 10, 15, 123);
        let reading = decode_record(raw.as_bytes()).unwrap().unwrap();
        match reading {
            Reading::Glucose(g) => {
                assert_eq!(g.timestamp, ts(2017, 3, 4, 10, 15));
                assert_eq!(g.value, 123);
                assert_eq!(g.measure_method, MeasureMethod::BloodSample);
            }
            other => panic!("expected glucose, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_record_other_tags_skipped() {
        for raw in ["6,1,3,4,17,10,15,0,0", "10,garbage", "", "70,1"] {
            assert!(decode_record(raw.as_bytes()).unwrap().is_none(), "{raw}");
        }
    }

    #[test]
    fn test_decode_record_wrong_arity() {
        let err = decode_record(b"7,1,3,4,17,10,15,0,123").unwrap_err();
        match err {
            GlucometerError::MalformedRecord { fields, reason } => {
                assert_eq!(fields.len(), 9);
                assert_eq!(fields[0], "7");
                assert!(reason.contains("expected 19 fields"));
            }
            other => panic!("expected malformed record, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_record_non_numeric_field() {
        let raw = glucose(1, 3, 4, 17, 10, 15, 123).replace(",123,", ",HI,");
        let err = decode_record(raw.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("field 9"));
    }

    #[test]
    fn test_decode_record_invalid_calendar() {
        for raw in [
            glucose(1, 13, 4, 17, 10, 15, 100),
            glucose(1, 2, 30, 17, 10, 15, 100),
            glucose(1, 3, 32, 17, 10, 15, 100),
            glucose(1, 3, 4, 17, 25, 15, 100),
            glucose(1, 3, 4, 17, 10, 60, 100),
            glucose(1, 3, 4, 100, 10, 15, 100),
        ] {
            let err = decode_record(raw.as_bytes()).unwrap_err();
            assert!(err.to_string().contains("invalid date or time"), "{raw}");
        }
    }

    #[test]
    fn test_decode_record_leap_day() {
        let raw = glucose(1, 2, 29, 16, 0, 0, 88);
        let reading = decode_record(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(reading.timestamp(), ts(2016, 2, 29, 0, 0));
    }

    #[test]
    fn test_decode_record_negative_value() {
        let raw = "7,1,3,4,17,10,15,0,-5,0,0,0,0,0,0,0,0,0,0";
        let err = decode_record(raw.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_neo_record_preserves_reserved_fields() {
        let fields: Vec<String> = (0..19).map(|i| if i == 0 { "7".into() } else { i.to_string() }).collect();
        let refs: Vec<&str> = fields.iter().map(String::as_str).collect();
        let record = NeoRecord::parse(&refs).unwrap();
        assert_eq!(record.value, 8);
        assert_eq!(record.reserved, [9, 10, 11, 12, 13, 14, 15, 16, 17, 18]);
    }

    // ── decode_readings ───────────────────────────────────────────────────────

    #[test]
    fn test_decode_readings_filters_and_preserves_order() {
        let mut t = replay(&[
            glucose(2, 3, 5, 17, 8, 0, 140),
            "6,1,3,4,17,10,20,0,0,0,0,0,0,0,0,0,0,0,0".to_string(),
            glucose(1, 3, 4, 17, 22, 30, 95),
        ]);

        let readings: Vec<Reading> = decode_readings(&mut t).map(|r| r.unwrap()).collect();
        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].timestamp(), ts(2017, 3, 5, 8, 0));
        assert_eq!(readings[1].timestamp(), ts(2017, 3, 4, 22, 30));
        assert_eq!(t.commands_sent(), &[RESULTS_COMMAND.to_vec()]);
    }

    #[test]
    fn test_decode_readings_only_foreign_records() {
        let mut t = replay(&["1,2,3".to_string(), "9".to_string()]);
        let mut pass = decode_readings(&mut t);
        assert!(pass.next().is_none());
        assert_eq!(
            pass.stats(),
            DecodeStats {
                records: 2,
                readings: 0,
                filtered: 2,
                malformed: 0
            }
        );
    }

    #[test]
    fn test_decode_readings_is_lazy() {
        let mut t = Scripted::new(vec![
            Ok(glucose(1, 3, 4, 17, 10, 15, 123).into_bytes()),
            Ok(glucose(2, 3, 4, 17, 11, 15, 130).into_bytes()),
        ]);
        t.limit = 1;

        {
            let mut pass = decode_readings(&mut t);
            assert!(t_sent_nothing_yet(&pass));
            let first = pass.next().unwrap().unwrap();
            assert_eq!(first.timestamp(), ts(2017, 3, 4, 10, 15));
        }

        assert_eq!(t.reads, 1);
        assert!(t.abandoned);
    }

    fn t_sent_nothing_yet(pass: &Readings<'_, Scripted>) -> bool {
        pass.state == PassState::NotStarted && pass.transport.sent.is_empty()
    }

    #[test]
    fn test_decode_readings_not_abandoned_when_exhausted() {
        let mut t = Scripted::new(vec![Ok(glucose(1, 3, 4, 17, 10, 15, 123).into_bytes())]);
        t.limit = 2;
        assert_eq!(decode_readings(&mut t).count(), 1);
        assert!(!t.abandoned);
    }

    #[test]
    fn test_abort_policy_stops_at_malformed_record() {
        let mut t = replay(&[
            glucose(1, 3, 4, 17, 10, 15, 123),
            "7,2,3,4".to_string(),
            glucose(3, 3, 4, 17, 12, 15, 150),
        ]);

        let results: Vec<Result<Reading>> =
            decode_readings_with(&mut t, MalformedRecordPolicy::Abort).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(
            results[1],
            Err(GlucometerError::MalformedRecord { .. })
        ));
        assert_eq!(t.pending_records(), 0);
    }

    #[test]
    fn test_continue_policy_reports_and_keeps_going() {
        let mut t = replay(&[
            glucose(1, 3, 4, 17, 10, 15, 123),
            "7,2,3,4".to_string(),
            glucose(3, 3, 4, 17, 12, 15, 150),
        ]);

        let mut pass = decode_readings_with(&mut t, MalformedRecordPolicy::Continue);
        let results: Vec<Result<Reading>> = pass.by_ref().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(GlucometerError::MalformedRecord { fields, .. }) => {
                assert_eq!(fields, &["7", "2", "3", "4"])
            }
            other => panic!("expected malformed record, got {:?}", other),
        }
        match &results[2] {
            Ok(Reading::Glucose(g)) => assert_eq!(g.value, 150),
            other => panic!("expected reading, got {:?}", other),
        }
        assert_eq!(pass.stats().malformed, 1);
        assert_eq!(pass.stats().readings, 2);
    }

    #[test]
    fn test_skip_policy_drops_malformed_records() {
        let mut t = replay(&[
            "7,bad".to_string(),
            glucose(3, 3, 4, 17, 12, 15, 150),
        ]);

        let readings: Vec<Reading> = decode_readings_with(&mut t, MalformedRecordPolicy::Skip)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(readings.len(), 1);
    }

    #[test]
    fn test_transport_error_on_read_is_fatal() {
        let mut t = Scripted::new(vec![
            Ok(glucose(1, 3, 4, 17, 10, 15, 123).into_bytes()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
            Ok(glucose(2, 3, 4, 17, 11, 15, 130).into_bytes()),
        ]);
        t.limit = 2;

        let results: Vec<Result<Reading>> =
            decode_readings_with(&mut t, MalformedRecordPolicy::Continue).collect();
        assert_eq!(results.len(), 2);
        match &results[1] {
            Err(GlucometerError::Transport { command, source }) => {
                assert_eq!(command, "$result?");
                assert_eq!(source.kind(), io::ErrorKind::BrokenPipe);
            }
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[test]
    fn test_transport_error_mid_stream_abandons_response() {
        let mut t = Scripted::new(vec![
            Ok(glucose(1, 3, 4, 17, 10, 15, 123).into_bytes()),
            Err(io::Error::new(io::ErrorKind::TimedOut, "no answer")),
        ]);

        let mut pass = decode_readings(&mut t);
        assert!(matches!(pass.next(), Some(Ok(_))));
        assert!(matches!(pass.next(), Some(Err(GlucometerError::Transport { .. }))));
        assert!(pass.next().is_none());
        drop(pass);
        assert!(t.abandoned);
    }

    #[test]
    fn test_record_arity_covers_every_field() {
        let raw = glucose(1, 3, 4, 17, 10, 15, 123);
        assert_eq!(raw.split(FIELD_DELIMITER).count(), NEO_RECORD_ARITY);
        let fields: Vec<&str> = raw.split(FIELD_DELIMITER).collect();
        let record = NeoRecord::parse(&fields).unwrap();
        assert_eq!(record.value, 123);
        assert_eq!(record.reserved, [0; RESERVED_FIELDS]);
    }

    #[test]
    fn test_transport_error_on_send_is_fatal() {
        let mut t = ReplayTransport::new();
        let results: Vec<Result<Reading>> = decode_readings(&mut t).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(GlucometerError::Transport { .. })));
    }

    #[test]
    fn test_second_pass_requires_new_query() {
        let mut t = replay(&[glucose(1, 3, 4, 17, 10, 15, 123)]);
        assert_eq!(decode_readings(&mut t).count(), 1);
        assert_eq!(decode_readings(&mut t).count(), 1);
        assert_eq!(t.commands_sent().len(), 2);
    }

    #[test]
    fn test_decode_through_trait_object() {
        let mut boxed: Box<dyn Transport> = Box::new(replay(&[glucose(1, 3, 4, 17, 10, 15, 123)]));
        assert_eq!(decode_readings(&mut boxed).count(), 1);
    }
}
