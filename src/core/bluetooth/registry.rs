//! Discovery list maintenance.
//!
//! The registry keeps the devices seen during a scan, newest first and
//! unique by id. Re-discovered devices are refreshed where they already sit.

use log::debug;
use regex::Regex;

use crate::core::bluetooth::constants::UNSUPPORTED_DEVICE_NAME_PATTERN;
use crate::core::bluetooth::types::Device;

/// Decides which scan results are worth listing
#[derive(Debug, Clone)]
pub struct DeviceFilter {
    placeholder_names: Vec<Regex>,
}

impl DeviceFilter {
    /// Compiles the placeholder-name patterns. Devices whose name matches any of them are dropped.
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let placeholder_names = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { placeholder_names })
    }

    pub fn accepts(&self, device: &Device) -> bool {
        device.connectable
            && !device.name.is_empty()
            && !self.placeholder_names.iter().any(|re| re.is_match(&device.name))
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            placeholder_names: vec![
                Regex::new(UNSUPPORTED_DEVICE_NAME_PATTERN).expect("built-in pattern is valid"),
            ],
        }
    }
}

/// Owns the discovery list. Mutated only through [`ingest`](Self::ingest).
#[derive(Debug, Clone, Default)]
pub struct DeviceDiscoveryRegistry {
    filter: DeviceFilter,
    devices: Vec<Device>,
}

impl DeviceDiscoveryRegistry {
    pub fn new(filter: DeviceFilter) -> Self {
        Self {
            filter,
            devices: Vec::new(),
        }
    }

    /// Merges a batch of scan results and returns the updated list.
    pub fn ingest<I>(&mut self, batch: I) -> &[Device]
    where
        I: IntoIterator<Item = Device>,
    {
        for device in batch {
            if !self.filter.accepts(&device) {
                continue;
            }
            match self.devices.iter().position(|d| d.id == device.id) {
                Some(index) => self.devices[index] = device,
                None => {
                    debug!("New device listed: {} ({})", device.name, device.id);
                    self.devices.insert(0, device);
                }
            }
        }
        &self.devices
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn get(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer(id: &str, name: &str) -> Device {
        Device::new(id, name, true)
    }

    #[test]
    fn test_refresh_keeps_single_entry() {
        let mut registry = DeviceDiscoveryRegistry::default();
        registry.ingest(vec![printer("A", "Printer")]);
        let list = registry.ingest(vec![printer("A", "Printer-v2")]);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Printer-v2");
    }

    #[test]
    fn test_new_devices_go_first_and_refresh_keeps_position() {
        let mut registry = DeviceDiscoveryRegistry::default();
        registry.ingest(vec![printer("A", "a"), printer("B", "b")]);
        registry.ingest(vec![printer("C", "c")]);
        let ids: Vec<_> = registry.devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["C", "B", "A"]);

        registry.ingest(vec![printer("B", "b-renamed").with_rssi(-40)]);
        let ids: Vec<_> = registry.devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["C", "B", "A"]);
        assert_eq!(registry.get("B").map(|d| d.name.as_str()), Some("b-renamed"));
        assert_eq!(registry.get("B").and_then(|d| d.rssi), Some(-40));
    }

    #[test]
    fn test_ingest_is_idempotent() {
        let batch = vec![printer("A", "a"), printer("B", "b"), printer("C", "c")];
        let mut registry = DeviceDiscoveryRegistry::default();
        let first = registry.ingest(batch.clone()).to_vec();
        let second = registry.ingest(batch).to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn test_filters_unusable_devices() {
        let mut registry = DeviceDiscoveryRegistry::default();
        let list = registry.ingest(vec![
            Device::new("1", "Beacon", false),
            Device::new("2", "", true),
            Device::new("3", "未知或不支持的设备 (3)", true),
            Device::new("4", "Label Printer", true),
        ]);
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "4");
    }

    #[test]
    fn test_custom_placeholder_patterns() {
        let filter = DeviceFilter::from_patterns(&["^Unknown", "(?i)n/a"]).unwrap();
        let mut registry = DeviceDiscoveryRegistry::new(filter);
        registry.ingest(vec![
            printer("1", "Unknown device"),
            printer("2", "N/A"),
            printer("3", "未知或不支持的设备"),
        ]);
        let ids: Vec<_> = registry.devices().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["3"]);
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        assert!(DeviceFilter::from_patterns(&["("]).is_err());
    }
}
