//! Device-side data layer.
//!
//! Talks to a meter through a [`transport::Transport`], decodes its result
//! records into typed readings and exposes the Precision Neo driver.

pub mod precision_neo;
pub mod reader;
pub mod transport;

pub use glucometer_core as core;
pub use reader::{decode_readings, decode_readings_with, Readings};
pub use transport::{ReplayTransport, Transport};
