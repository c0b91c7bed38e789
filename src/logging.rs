use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use color_eyre::eyre::Context;
use color_eyre::Result;
use env_logger::{Target, WriteStyle};
use log::LevelFilter;

/// Flushes the log when dropped; hold on to it for the lifetime of the process
#[must_use]
pub struct LogGuard;

impl Drop for LogGuard {
    fn drop(&mut self) {
        log::logger().flush();
    }
}

/// Sets up the progress log, written to `log_file` if given and to stderr otherwise.
/// Every record is tagged with `user`, since logs of several users may end up side by side.
pub fn setup_logging(verbose: bool, log_file: Option<&Path>, user: &str) -> Result<LogGuard> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let user = user.to_string();
    builder.format(move |buf, record| {
        writeln!(
            buf,
            "[{}] {:<5} {}: {}",
            buf.timestamp_seconds(),
            record.level(),
            user,
            record.args()
        )
    });

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("failed to open log file {:?}", path))?;

        builder
            .target(Target::Pipe(Box::new(file)))
            .write_style(WriteStyle::Never);
    }

    // Overwrite the defaults from env
    builder.parse_default_env();
    builder.try_init().wrap_err("failed to initialize logging")?;

    Ok(LogGuard)
}
