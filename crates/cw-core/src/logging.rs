//! Logging setup

use crate::config::LogLevel;
use tracing_subscriber::EnvFilter;

impl LogLevel {
    /// Directive understood by `EnvFilter`
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

/// Install the global fmt subscriber. `RUST_LOG` overrides `level`.
///
/// Calling this twice is harmless; the second subscriber is dropped.
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_directive()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directives() {
        assert_eq!(LogLevel::Off.as_directive(), "off");
        assert_eq!(LogLevel::default().as_directive(), "info");
    }

    #[test]
    fn test_init_twice() {
        init(LogLevel::Warn);
        init(LogLevel::Debug);
        tracing::info!("logging initialized");
    }
}
