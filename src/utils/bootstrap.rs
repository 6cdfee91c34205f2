//! Bootstrap utilities for freshcycle binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the tracing filter directive.
pub const LOG_ENV_VAR: &str = "FRESHCYCLE_LOG";

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize tracing with the FRESHCYCLE_LOG environment variable.
///
/// Defaults to "info" level if FRESHCYCLE_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Same as [`init_tracing`] but emits one JSON object per line.
pub fn init_tracing_json() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Config file path from `--config <path>` or `-c <path>` on the command
/// line.
pub fn parse_config_path() -> Option<String> {
    config_path_from(std::env::args().skip(1))
}

fn config_path_from(args: impl IntoIterator<Item = String>) -> Option<String> {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_forms() {
        assert_eq!(
            config_path_from(args(&["--config", "prod.yaml"])),
            Some("prod.yaml".to_string())
        );
        assert_eq!(
            config_path_from(args(&["-v", "--config=dev.yaml"])),
            Some("dev.yaml".to_string())
        );
        assert_eq!(config_path_from(args(&["-c"])), None);
        assert_eq!(config_path_from(args(&[])), None);
    }
}
