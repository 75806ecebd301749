//! Tracing setup for the command-line tool.
//!
//! Output goes to stderr; stdout carries command output only.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter directives, e.g. `debug` or `meson_venv_installer=debug`.
pub const LOG_FILTER_VAR: &str = "INSTALLER_LOG";
/// Set to `1` or `true` for JSON lines.
pub const LOG_JSON_VAR: &str = "INSTALLER_LOG_JSON";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub filter: String,
    pub json: bool,
}

impl LogSettings {
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let filter = lookup(LOG_FILTER_VAR)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let json = lookup(LOG_JSON_VAR)
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self { filter, json }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(settings: &LogSettings) {
    let filter = EnvFilter::try_new(&settings.filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = if settings.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_environment() {
        let settings = LogSettings::from_lookup(|_| None);
        assert_eq!(settings.filter, "info");
        assert!(!settings.json);
    }

    #[test]
    fn test_reads_filter_and_json_flag() {
        let settings = LogSettings::from_lookup(|key| match key {
            LOG_FILTER_VAR => Some("meson_venv_installer=debug".into()),
            LOG_JSON_VAR => Some("1".into()),
            _ => None,
        });
        assert_eq!(settings.filter, "meson_venv_installer=debug");
        assert!(settings.json);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let settings = LogSettings::from_lookup(|_| None);
        init_tracing(&settings);
        init_tracing(&settings);
    }
}
