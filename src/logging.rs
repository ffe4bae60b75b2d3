use std::{fs::File, path::Path};

use anyhow::Context;
use simplelog as sl;

/// Logs to the terminal at `level` and everything down to debug into `log_path`.
/// With `trace`, the file also receives every line read from the devices.
pub fn init(level: sl::LevelFilter, log_path: &Path) -> anyhow::Result<()> {
    let config = sl::ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(sl::LevelFilter::Off)
        .set_target_level(sl::LevelFilter::Off)
        .build();
    let file = File::create(log_path)
        .with_context(|| format!("could not create log file {}", log_path.display()))?;

    sl::CombinedLogger::init(vec![
        sl::TermLogger::new(level, config.clone(), sl::TerminalMode::Mixed, sl::ColorChoice::Auto),
        sl::WriteLogger::new(level.max(sl::LevelFilter::Debug), config, file),
    ])
    .context("a logger is already installed")
}
