//! Capability interface of the BLE host stack.
//!
//! The session core never talks to hardware directly. Everything it needs
//! from the radio goes through [`BleStack`], which is implemented by
//! [`BluestStack`](crate::core::bluetooth::BluestStack) for real adapters and
//! by [`SimulatedStack`](crate::core::bluetooth::SimulatedStack) for tests.

use async_trait::async_trait;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::types::{
    CharacteristicInfo, CharacteristicValue, Device, ScanOptions, ServiceInfo,
};

/// Asynchronous BLE host stack. Each call suspends until the radio operation completes or fails.
#[async_trait]
pub trait BleStack: Send + Sync {
    /// Power up and claim the adapter.
    async fn adapter_open(&self) -> Result<(), BleError>;

    /// Release the adapter. Closes every link it owns.
    async fn adapter_close(&self) -> Result<(), BleError>;

    /// Start listening for advertisements.
    async fn scan_start(&self, options: &ScanOptions) -> Result<(), BleError>;

    /// Stop listening for advertisements.
    async fn scan_stop(&self) -> Result<(), BleError>;

    /// Subscribe to batches of discovered devices. Dropping the receiver unsubscribes.
    fn subscribe_devices(&self) -> broadcast::Receiver<Vec<Device>>;

    async fn connect(&self, device_id: &str) -> Result<(), BleError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), BleError>;

    /// Services of a connected peer, in the order the stack reports them.
    async fn list_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, BleError>;

    async fn list_characteristics(
        &self,
        device_id: &str,
        service_id: &Uuid,
    ) -> Result<Vec<CharacteristicInfo>, BleError>;

    /// Request a link MTU. Fails if the peer or the stack rejects the value.
    async fn set_mtu(&self, device_id: &str, mtu: u16) -> Result<(), BleError>;

    /// Write with response. Resolves once the peer acknowledged the write.
    async fn write_characteristic(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
        value: &[u8],
    ) -> Result<(), BleError>;

    async fn set_notify_enabled(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
        enabled: bool,
    ) -> Result<(), BleError>;

    /// Subscribe to pushed characteristic values. Dropping the receiver unsubscribes.
    fn subscribe_characteristic_values(&self) -> broadcast::Receiver<CharacteristicValue>;
}
