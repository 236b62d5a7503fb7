//! Logger setup
//! Routes the `log` facade through env_logger, with `RUST_LOG` taking
//! precedence over the configured level.

use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};
use log::info;

use crate::config::logging_config::LoggingConfig;

/// Installs the global logger. Safe to call more than once; later calls are ignored.
pub fn init(config: &LoggingConfig) {
    let env = Env::default().default_filter_or(config.level.as_str());
    let mut builder = Builder::from_env(env);

    let show_timestamps = config.show_timestamps;
    builder.format(move |buf, record| {
        if show_timestamps {
            write!(buf, "{} ", Local::now().to_rfc3339())?;
        }
        writeln!(buf, "[{}] {}: {}", record.level(), record.target(), record.args())
    });

    if builder.try_init().is_ok() {
        info!("Logging initialized at level {}", config.level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        init(&config);
        init(&LoggingConfig {
            level: "debug".to_string(),
            show_timestamps: false,
        });
        log::debug!("still logging");
    }
}
