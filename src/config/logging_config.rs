use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter, e.g. "info" or "ble_print_bridge_lib=debug". RUST_LOG overrides it.
    pub level: String,

    /// Prefix every line with a local RFC 3339 timestamp.
    pub show_timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            show_timestamps: true,
        }
    }
}
