//! Tracing setup for hosts that load the library

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber filtered by `filter`.
///
/// Returns Ok(false) when a global subscriber was already set, which leaves
/// the host's own logging in place.
pub fn init_logging(filter: &str) -> Result<bool> {
    let filter = EnvFilter::try_new(filter)
        .with_context(|| format!("Invalid log filter '{}'", filter))?;

    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Logging initialized");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(init_logging("nen=notalevel").is_err());
    }

    #[test]
    fn test_second_init_is_harmless() {
        init_logging("warn").unwrap();
        assert!(!init_logging("debug").unwrap());
    }
}
