//! Logging setup and the structured input-error channel.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Error code reported when a caller passes an invalid parameter.
pub const INPUT_ERROR_BAD_PARAM: &str = "EH0002";

/// Tracing target carrying input-error reports.
pub const INPUT_ERROR_TARGET: &str = "fvrepo::input";

/// Report a caller input error with its code and key/value context.
///
/// This is a pure side effect: the event goes to whatever subscriber is
/// installed, and nothing is returned to the caller.
pub fn report_input_error(code: &str, pairs: &[(&str, &str)]) {
    let context = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ");
    tracing::error!(target: INPUT_ERROR_TARGET, code, %context, "input parameter rejected");
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stderr so command output on stdout stays machine-readable. Returns an
/// error if a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install JSON subscriber: {e}"))?;
    } else {
        builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to install subscriber: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_without_subscriber_is_silent() {
        // No subscriber installed in unit tests; the call must not panic.
        report_input_error(INPUT_ERROR_BAD_PARAM, &[("param", "topK"), ("value", "4801")]);
        report_input_error(INPUT_ERROR_BAD_PARAM, &[]);
    }
}
