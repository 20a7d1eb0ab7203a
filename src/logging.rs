use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding the log filter (e.g. `SSTP_LOG=debug`)
pub const LOG_ENV: &str = "SSTP_LOG";

/// Install the stderr subscriber shared by both importers.
///
/// `SSTP_LOG` wins over `verbose` so a single module can be traced without
/// flooding the terminal.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing subscriber: {}", e))?;

    Ok(())
}
