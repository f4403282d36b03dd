//! Logging setup
//!
//! The console belongs to the OutputLine progress stream, so tracing goes
//! to a per-environment log file. The configured path supports an
//! {env_name} placeholder and `~` expansion; timestamps are UTC to line up
//! with the timestamps the rendered scripts print on the remote side.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{expand_home, LoggingConfig};

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Wire up the file layer for one run.
pub fn init_logging(config: &LoggingConfig, env_name: &str) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let log_path = resolve_log_path(&config.file, env_name)?;
    let log_dir = log_path
        .parent()
        .context("log file path has no parent directory")?;
    let log_filename = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .context("log file path has no file name")?;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(log_filename)
        .build(log_dir)
        .context("failed to create log file appender")?;

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_timer(fmt::time::ChronoUtc::new(
            "%Y-%m-%dT%H:%M:%S%.3fZ".to_string(),
        ))
        .with_target(true);

    // RUST_LOG wins when set; otherwise the configured level with the HTTP
    // stack quieted, so resolver chatter never buries provisioning events
    let directives = default_directives(&config.level)?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directives))
        .context("failed to build the log filter")?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    tracing::info!(env = %env_name, log = %log_path.display(), "logging to file");
    Ok(())
}

/// Expand the {env_name} placeholder and a leading `~` in the configured
/// log path.
fn resolve_log_path(template: &str, env_name: &str) -> Result<PathBuf> {
    let resolved = template.replace("{env_name}", env_name);
    expand_home(Path::new(&resolved))
}

/// Filter directives for a configured level: holodeck at the requested
/// level, the HTTP client stack at warn.
fn default_directives(level: &str) -> Result<String> {
    let normalized = match level.to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        other if LEVELS.contains(&other) => other.to_string(),
        other => {
            return Err(anyhow!(
                "unknown log level {other:?} (trace, debug, info, warn, error)"
            ));
        }
    };
    Ok(format!("{normalized},reqwest=warn,hyper=warn,rustls=warn"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_quiet_the_http_stack() {
        let directives = default_directives("debug").unwrap();
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=warn"));
        assert!(directives.contains("rustls=warn"));
    }

    #[test]
    fn test_level_aliases_and_case() {
        assert!(default_directives("WARNING").unwrap().starts_with("warn,"));
        assert!(default_directives("Info").unwrap().starts_with("info,"));
        assert!(default_directives("loud").is_err());
    }

    #[test]
    fn test_resolve_log_path_replaces_env_name() {
        let path = resolve_log_path("/tmp/holodeck-{env_name}.log", "ci-1").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/holodeck-ci-1.log"));
    }

    #[test]
    fn test_resolve_log_path_expands_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            resolve_log_path("~/logs/{env_name}.log", "ci-2").unwrap(),
            home.join("logs/ci-2.log")
        );
    }
}
