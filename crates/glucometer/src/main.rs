mod bootstrap;
mod commands;

use anyhow::Result;
use clap::Parser;
use glucometer_core::settings::Settings;

fn main() -> Result<()> {
    let settings = Settings::parse();

    bootstrap::setup_logging(settings.effective_log_level(), settings.log_file.as_ref())?;

    tracing::info!("glucometer v{} starting", env!("CARGO_PKG_VERSION"));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::run(&settings.command, &mut out)
}
