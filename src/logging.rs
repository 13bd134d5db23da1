//! Structured logging setup.
//!
//! The config log level sets the floor; the command-line verbosity tier is
//! applied on top:
//!
//! | tier | adds |
//! |------|------|
//! | 0    | info+ only, SSE noise suppressed |
//! | 1    | every request/response body |
//! | 2    | debug level globally |
//! | 3    | SSE noise and uninitialized-connection disconnects |
//! | 4    | every HTTP header, sorted |

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Cumulative verbosity tier from repeated `-v` flags, independent of the
/// log-level threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct Verbosity(u8);

impl Verbosity {
    pub fn new(tier: u8) -> Self {
        Self(tier.min(4))
    }

    pub fn tier(self) -> u8 {
        self.0
    }

    /// Tier 1: log every request and response body.
    pub fn log_bodies(self) -> bool {
        self.0 >= 1
    }

    /// Tier 2: debug level everywhere regardless of config.
    pub fn debug_everywhere(self) -> bool {
        self.0 >= 2
    }

    /// Tier 3: stop suppressing `/sse` noise and uninitialized disconnects.
    pub fn log_sse_noise(self) -> bool {
        self.0 >= 3
    }

    /// Tier 4: log every HTTP header in sorted order.
    pub fn log_headers(self) -> bool {
        self.0 >= 4
    }
}

/// Initialize tracing with the configured level, verbosity tier and writers.
pub fn init(
    cfg: &LoggingConfig,
    verbosity: Verbosity,
    log_file: Option<&Path>,
    also_stdout: bool,
) -> std::io::Result<()> {
    let level = if verbosity.debug_everywhere() {
        "debug"
    } else {
        cfg.level.as_str()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("dkmcp={level}").into());

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Arc::new(file))
                    .with_ansi(false)
                    .with_timer(tracing_subscriber::fmt::time::UtcTime::new(
                        kiters::timestamp::get_utc_formatter(),
                    )),
            )
        }
        None => None,
    };

    let stdout_layer = if log_file.is_none() || also_stdout {
        Some(
            tracing_subscriber::fmt::layer().with_timer(tracing_subscriber::fmt::time::UtcTime::new(
                kiters::timestamp::get_utc_formatter(),
            )),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_cumulative() {
        let quiet = Verbosity::new(0);
        assert!(!quiet.log_bodies());
        assert!(!quiet.log_sse_noise());

        let bodies = Verbosity::new(1);
        assert!(bodies.log_bodies());
        assert!(!bodies.debug_everywhere());

        let full = Verbosity::new(4);
        assert!(full.log_bodies());
        assert!(full.debug_everywhere());
        assert!(full.log_sse_noise());
        assert!(full.log_headers());
    }

    #[test]
    fn tier_is_capped() {
        assert_eq!(Verbosity::new(9).tier(), 4);
    }
}
