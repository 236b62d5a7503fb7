use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DEFAULT_NOTIFICATION_TIMEOUT_MS, MAX_MTU, MIN_MTU, UNSUPPORTED_DEVICE_NAME_PATTERN,
};
use crate::core::bluetooth::{DeviceFilter, MtuNegotiator, ScanOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Regexes matched against device names. Matching devices are never listed.
    pub placeholder_name_patterns: Vec<String>,

    /// Only discover devices advertising one of these services. Empty means all.
    pub scan_services: Vec<Uuid>,

    /// Report repeated advertisements of the same device.
    pub allow_duplicates: bool,

    /// How long to wait for the battery notification after enabling notify.
    pub notification_timeout_ms: u64,

    /// MTU search range, clamped into [23, 511].
    pub mtu_min: u16,
    pub mtu_max: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            placeholder_name_patterns: vec![UNSUPPORTED_DEVICE_NAME_PATTERN.to_string()],
            scan_services: Vec::new(),
            allow_duplicates: false,
            notification_timeout_ms: DEFAULT_NOTIFICATION_TIMEOUT_MS,
            mtu_min: MIN_MTU,
            mtu_max: MAX_MTU,
        }
    }
}

impl SessionConfig {
    pub fn device_filter(&self) -> Result<DeviceFilter, regex::Error> {
        DeviceFilter::from_patterns(&self.placeholder_name_patterns)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            services: self.scan_services.clone(),
            allow_duplicates: self.allow_duplicates,
        }
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }

    pub fn mtu_negotiator(&self) -> MtuNegotiator {
        MtuNegotiator::with_range(self.mtu_min, self.mtu_max)
    }
}
