//! Subcommand implementations.
//!
//! Every command writes its result to the `out` writer it is handed, so the
//! binary passes stdout while tests pass a buffer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use glucometer_core::error::GlucometerError;
use glucometer_core::formatting::{format_device_time, format_meter_info, format_reading};
use glucometer_core::models::{Reading, StoredReading};
use glucometer_core::settings::{Command, ExportArgs, InfoArgs, MalformedRecordPolicy, ReadingsArgs};
use glucometer_data::precision_neo::PrecisionNeo;
use glucometer_data::{ReplayTransport, Transport};
use glucometer_export::tidepool::{readings_from_stored, write_json, ExportOptions};
use tracing::{info, warn};

pub fn run(command: &Command, out: &mut dyn Write) -> Result<()> {
    match command {
        Command::Readings(args) => run_readings(args, out),
        Command::Info(args) => run_info(args, out),
        Command::Datetime(args) => run_datetime(args, out),
        Command::Export(args) => run_export(args, out),
    }
}

fn open_meter(capture: &Path) -> Result<PrecisionNeo<ReplayTransport>> {
    info!("Replaying capture {}", capture.display());
    Ok(PrecisionNeo::new(ReplayTransport::from_path(capture)?))
}

/// Drain a decode pass.
///
/// Under [`MalformedRecordPolicy::Continue`] malformed records are logged and
/// counted; any other error ends the command.
fn collect_readings<T: Transport>(
    meter: &mut PrecisionNeo<T>,
    policy: MalformedRecordPolicy,
) -> Result<Vec<Reading>> {
    let mut readings = Vec::new();
    let mut malformed = 0usize;

    for result in meter.readings(policy) {
        match result {
            Ok(reading) => readings.push(reading),
            Err(err) if err.is_record_level() && policy == MalformedRecordPolicy::Continue => {
                warn!("{}", err);
                malformed += 1;
            }
            Err(err) => return Err(err).context("decoding readings"),
        }
    }

    if malformed > 0 {
        warn!("{} malformed records were left out", malformed);
    }
    info!("Decoded {} readings", readings.len());
    Ok(readings)
}

fn run_readings(args: &ReadingsArgs, out: &mut dyn Write) -> Result<()> {
    let mut meter = open_meter(&args.capture)?;
    let unit = meter.glucose_unit();
    let readings = collect_readings(&mut meter, args.policy)?;

    if args.json {
        let stored: Vec<StoredReading> = readings.iter().map(StoredReading::from).collect();
        writeln!(out, "{}", serde_json::to_string_pretty(&stored)?)?;
    } else {
        for reading in &readings {
            writeln!(out, "{}", format_reading(reading, unit.as_str()))?;
        }
    }
    Ok(())
}

fn run_info(args: &InfoArgs, out: &mut dyn Write) -> Result<()> {
    let mut meter = open_meter(&args.capture)?;
    let info = meter.meter_info().context("querying meter identity")?;
    writeln!(out, "{}", format_meter_info(&info))?;
    Ok(())
}

fn run_datetime(args: &InfoArgs, out: &mut dyn Write) -> Result<()> {
    let mut meter = open_meter(&args.capture)?;
    let now = meter.datetime().context("querying meter clock")?;
    writeln!(out, "{}", format_device_time(&now))?;
    Ok(())
}

fn run_export(args: &ExportArgs, out: &mut dyn Write) -> Result<()> {
    let options = ExportOptions {
        include_offsets: args.with_offsets,
        pretty: args.pretty,
    };

    let (identity, readings) = match (&args.capture, &args.readings) {
        (Some(capture), _) => {
            let mut meter = open_meter(capture)?;
            let overridden = args.model.is_some() && args.serial.is_some() && args.unit.is_some();
            let base = if overridden {
                None
            } else {
                Some(meter.meter_info().context("querying meter identity")?)
            };
            let identity = args.resolve_meter_info(base)?;
            (identity, collect_readings(&mut meter, args.policy)?)
        }
        (None, Some(path)) => {
            let identity = args.resolve_meter_info(None)?;
            let stored = read_stored_readings(path)?;
            (identity, readings_from_stored(stored)?)
        }
        (None, None) => anyhow::bail!("export needs --capture or --readings"),
    };

    match &args.output {
        Some(path) => {
            let file =
                File::create(path).with_context(|| format!("creating {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            write_json(&mut writer, &identity, &readings, &options)?;
            writeln!(writer)?;
            writer
                .flush()
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Wrote {} readings to {}", readings.len(), path.display());
        }
        None => {
            write_json(&mut *out, &identity, &readings, &options)?;
            writeln!(out)?;
        }
    }
    Ok(())
}

fn read_stored_readings(path: &Path) -> Result<Vec<StoredReading>> {
    let content = std::fs::read_to_string(path).map_err(|source| GlucometerError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    let stored = serde_json::from_str(&content)
        .map_err(GlucometerError::from)
        .with_context(|| format!("parsing readings from {}", path.display()))?;
    Ok(stored)
}

// ── Tests ──────────────────────────────────────────────────────────────────────
