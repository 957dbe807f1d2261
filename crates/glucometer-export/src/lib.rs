//! Export of decoded readings to exchange formats.

pub mod tidepool;

pub use tidepool::{serialize, serialize_with, ExportOptions, TidepoolRecord};
