//! Defines shared data structures for the Bluetooth module.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{MAX_MTU, MIN_MTU};

/// Raw advertisement fields carried alongside a discovered device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementFields {
    /// The local name from the advertisement, which may differ from the cached name
    pub local_name: Option<String>,
    /// Service UUIDs listed in the advertisement
    pub service_uuids: Vec<Uuid>,
    /// Manufacturer specific data, company id included
    pub manufacturer_data: Option<Vec<u8>>,
}

/// Represents a discovered Bluetooth device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Platform-specific unique identifier for the device
    pub id: String,
    /// The name of the device, empty if the peer did not report one
    pub name: String,
    /// Whether the advertisement allows connections
    pub connectable: bool,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    pub advertisement: AdvertisementFields,
}

impl Device {
    /// Creates a new Device with empty advertisement fields
    pub fn new(id: impl Into<String>, name: impl Into<String>, connectable: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            connectable,
            rssi: None,
            advertisement: AdvertisementFields::default(),
        }
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// State of the single connection slot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting(String),
    Connected(String),
}

impl ConnectionState {
    /// The peer id, valid only when not disconnected
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Disconnected => None,
            Self::Connecting(id) | Self::Connected(id) => Some(id),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// Property flags of a characteristic relevant to the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

/// A service as listed by the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub uuid: Uuid,
}

/// A characteristic as listed by the stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// A located (service, characteristic) pair. Never cached across operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceEndpoint {
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub properties: CharacteristicProperties,
}

/// A value pushed by a peripheral after notify was enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CharacteristicValue {
    pub device_id: String,
    pub service_id: Uuid,
    pub characteristic_id: Uuid,
    pub value: Vec<u8>,
}

impl CharacteristicValue {
    /// True if this value came from `endpoint` on `device_id`
    pub fn is_from(&self, device_id: &str, endpoint: &ServiceEndpoint) -> bool {
        self.device_id == device_id
            && self.service_id == endpoint.service_id
            && self.characteristic_id == endpoint.characteristic_id
    }
}

/// Options passed to the stack when a scan starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Only report devices advertising one of these services; empty means all
    pub services: Vec<Uuid>,
    /// Report every advertisement instead of the first per device
    pub allow_duplicates: bool,
}

/// Negotiated maximum transmission unit of a link, always within `[MIN_MTU, MAX_MTU]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Mtu(u16);

impl Mtu {
    pub const MIN: Mtu = Mtu(MIN_MTU);
    pub const MAX: Mtu = Mtu(MAX_MTU);

    pub fn new(value: u16) -> Option<Self> {
        (MIN_MTU..=MAX_MTU).contains(&value).then_some(Self(value))
    }

    pub fn clamped(value: u16) -> Self {
        Self(value.clamp(MIN_MTU, MAX_MTU))
    }

    pub fn get(self) -> u16 {
        self.0
    }

    /// Chunk length used when splitting payloads
    pub fn chunk_len(self) -> usize {
        usize::from(self.0)
    }
}

/// State updates published to the UI collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SessionEvent {
    DevicesUpdated(Vec<Device>),
    SearchingChanged(bool),
    ConnectionChanged(ConnectionState),
    MtuNegotiated(u16),
}

/// Raw battery characteristic value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatteryReading {
    pub raw: Vec<u8>,
}

impl BatteryReading {
    pub fn new(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// Battery level in percent, the first byte of the value
    pub fn percent(&self) -> Option<u8> {
        self.raw.first().copied()
    }
}

impl std::fmt::Display for BatteryReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.percent() {
            Some(level) => write!(f, "{level}%"),
            None => write!(f, "unknown"),
        }
    }
}

/// Result of a battery read. Absence of the characteristic is not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BatteryLookup {
    Level(BatteryReading),
    NotFound,
}

/// Result of a payload transfer. Absence of a writable characteristic is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferOutcome {
    Delivered { chunks: usize, mtu: Mtu },
    NoWritableCharacteristic,
}

/// 16-bit form of a 128-bit UUID: characters 4..8 of its canonical string.
pub fn short_uuid(uuid: &Uuid) -> u16 {
    let bytes = uuid.as_bytes();
    u16::from_be_bytes([bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::{UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE};

    #[test]
    fn test_short_uuid_matches_string_slice() {
        assert_eq!(short_uuid(&UUID_BATTERY_SERVICE), 0x180F);
        assert_eq!(short_uuid(&UUID_BATTERY_LEVEL), 0x2A19);

        let vendor = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
        let text = vendor.hyphenated().to_string();
        assert_eq!(format!("{:04x}", short_uuid(&vendor)), &text[4..8]);
    }

    #[test]
    fn test_mtu_bounds() {
        assert_eq!(Mtu::new(22), None);
        assert_eq!(Mtu::new(23), Some(Mtu::MIN));
        assert_eq!(Mtu::new(511), Some(Mtu::MAX));
        assert_eq!(Mtu::new(512), None);
        assert_eq!(Mtu::clamped(1000), Mtu::MAX);
        assert_eq!(Mtu::clamped(0), Mtu::MIN);
    }

    #[test]
    fn test_battery_reading_display() {
        assert_eq!(BatteryReading::new(vec![87]).to_string(), "87%");
        assert_eq!(BatteryReading::new(vec![100, 1]).percent(), Some(100));
        assert_eq!(BatteryReading::new(Vec::new()).to_string(), "unknown");
    }

    #[test]
    fn test_connection_state_device_id() {
        assert_eq!(ConnectionState::Disconnected.device_id(), None);
        assert_eq!(ConnectionState::Connecting("A".into()).device_id(), Some("A"));
        assert!(ConnectionState::Connected("A".into()).is_connected());
        assert!(!ConnectionState::Connecting("A".into()).is_connected());
    }
}
