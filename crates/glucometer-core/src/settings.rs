use std::ffi::OsString;
use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};

use crate::error::{GlucometerError, Result};
use crate::models::{MeterInfo, Unit};

// ── Decode policy ──────────────────────────────────────────────────────────────

/// What a decode pass does with a glucose record it cannot decode.
///
/// Records carrying another type tag are never affected; they are always
/// skipped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MalformedRecordPolicy {
    /// Yield the error, then end the pass.
    #[default]
    Abort,
    /// Yield the error and keep decoding.
    Continue,
    /// Log the error and keep decoding without yielding it.
    Skip,
}

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Read glucometer dumps and export them for Tidepool ingestion
#[derive(Parser, Debug, Clone)]
#[command(
    name = "glucometer",
    about = "Read glucometer dumps and export them for Tidepool ingestion",
    version
)]
pub struct Settings {
    /// Logging level
    #[arg(
        long,
        global = true,
        env = "GLUCOMETER_LOG_LEVEL",
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"]
    )]
    pub log_level: String,

    /// Log file path (stderr when absent)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Decode the readings of a captured session and print them
    Readings(ReadingsArgs),
    /// Print the identity of the meter in a captured session
    Info(InfoArgs),
    /// Print the meter clock from a captured session
    Datetime(InfoArgs),
    /// Write readings as Tidepool ingestion JSON
    Export(ExportArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReadingsArgs {
    /// Captured device session to replay
    #[arg(long)]
    pub capture: PathBuf,

    /// Handling of glucose records that fail to decode
    #[arg(long, value_enum, default_value_t = MalformedRecordPolicy::Abort)]
    pub policy: MalformedRecordPolicy,

    /// Print readings as a JSON array instead of text lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Captured device session to replay
    #[arg(long)]
    pub capture: PathBuf,
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("source").required(true).args(["capture", "readings"])))]
pub struct ExportArgs {
    /// Captured device session to replay
    #[arg(long)]
    pub capture: Option<PathBuf>,

    /// JSON array of readings previously printed by `readings --json`
    #[arg(long)]
    pub readings: Option<PathBuf>,

    /// Meter model (overrides the captured identity)
    #[arg(long)]
    pub model: Option<String>,

    /// Meter serial number (overrides the captured identity)
    #[arg(long)]
    pub serial: Option<String>,

    /// Native glucose unit, mg/dL or mmol/L (overrides the captured identity)
    #[arg(long)]
    pub unit: Option<Unit>,

    /// Handling of glucose records that fail to decode
    #[arg(long, value_enum, default_value_t = MalformedRecordPolicy::Abort)]
    pub policy: MalformedRecordPolicy,

    /// Emit clockDriftOffset / conversionOffset fields
    #[arg(long)]
    pub with_offsets: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Output file (stdout when absent)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

impl ExportArgs {
    /// Apply `--model`, `--serial` and `--unit` on top of `base`.
    ///
    /// Without a base identity all three flags are required.
    pub fn resolve_meter_info(&self, base: Option<MeterInfo>) -> Result<MeterInfo> {
        let mut info = match base {
            Some(info) => info,
            None => {
                let missing: Vec<&str> = [
                    ("--model", self.model.is_none()),
                    ("--serial", self.serial.is_none()),
                    ("--unit", self.unit.is_none()),
                ]
                .iter()
                .filter(|(_, absent)| *absent)
                .map(|(flag, _)| *flag)
                .collect();
                if !missing.is_empty() {
                    return Err(GlucometerError::Config(format!(
                        "meter identity unknown, pass {}",
                        missing.join(", ")
                    )));
                }
                MeterInfo::new(String::new(), String::new(), Unit::MgDl)
            }
        };

        if let Some(model) = &self.model {
            info.model = model.clone();
        }
        if let Some(serial) = &self.serial {
            info.serial_number = serial.clone();
        }
        if let Some(unit) = self.unit {
            info.native_unit = unit;
        }
        Ok(info)
    }
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse an explicit argument list, enabling unit-testing without
    /// spawning subprocesses.
    pub fn from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Settings::try_parse_from(args).map_err(|e| GlucometerError::Config(e.to_string()))
    }

    /// Log level after applying `--debug`.
    pub fn effective_log_level(&self) -> &str {
        if self.debug {
            "DEBUG"
        } else {
            &self.log_level
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
