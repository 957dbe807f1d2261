//! Shared types for the glucometer workspace.
//!
//! Holds the reading and meter-identity models, the error taxonomy, CLI
//! settings and the text formatting used by the binary.

pub mod error;
pub mod formatting;
pub mod models;
pub mod settings;

pub use error::{GlucometerError, Result};
pub use models::{GlucoseReading, KetoneReading, MeasureMethod, MeterInfo, Reading, Unit};
