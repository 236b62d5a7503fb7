//! In-process BLE stack
//!
//! Provides a scripted set of peripherals that can be discovered, connected
//! to and written to entirely in-process. Every capability call is recorded
//! so tests can assert on the exact sequence the session issued, and
//! failures can be injected one call at a time.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use log::debug;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    ADAPTER_NOT_OPEN_CODE, EVENT_CHANNEL_CAPACITY, UUID_BATTERY_LEVEL, UUID_BATTERY_SERVICE,
};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::types::{
    CharacteristicInfo, CharacteristicProperties, CharacteristicValue, Device, ScanOptions,
    ServiceInfo,
};

/// Vendor print service exposed by the demo printer
pub const UUID_PRINT_SERVICE: Uuid = Uuid::from_u128(0x49535343_fe7d_4ae5_8fa9_9fafd205e455);
/// Writable characteristic of the demo printer
pub const UUID_PRINT_WRITE_CHAR: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);

/// A service and its characteristics, in reporting order
#[derive(Debug, Clone)]
pub struct SimulatedService {
    pub uuid: Uuid,
    pub characteristics: Vec<CharacteristicInfo>,
}

/// A peripheral the simulated radio can see
#[derive(Debug, Clone)]
pub struct SimulatedPeripheral {
    pub device: Device,
    pub services: Vec<SimulatedService>,
    /// Largest MTU the peer accepts. `None` rejects every request.
    pub mtu_limit: Option<u16>,
    /// Value pushed when notify is enabled on the battery level characteristic
    pub battery_level: Option<u8>,
}

impl SimulatedPeripheral {
    /// A bare peripheral with no services
    pub fn new(device: Device) -> Self {
        Self {
            device,
            services: Vec::new(),
            mtu_limit: None,
            battery_level: None,
        }
    }

    /// A label printer with a battery service and a writable print characteristic
    pub fn printer(id: &str, name: &str) -> Self {
        Self {
            device: Device::new(id, name, true),
            services: vec![
                SimulatedService {
                    uuid: UUID_BATTERY_SERVICE,
                    characteristics: vec![CharacteristicInfo {
                        uuid: UUID_BATTERY_LEVEL,
                        properties: CharacteristicProperties {
                            read: true,
                            write: false,
                            notify: true,
                        },
                    }],
                },
                SimulatedService {
                    uuid: UUID_PRINT_SERVICE,
                    characteristics: vec![CharacteristicInfo {
                        uuid: UUID_PRINT_WRITE_CHAR,
                        properties: CharacteristicProperties {
                            read: false,
                            write: true,
                            notify: false,
                        },
                    }],
                },
            ],
            mtu_limit: Some(185),
            battery_level: Some(87),
        }
    }

    pub fn with_services(mut self, services: Vec<SimulatedService>) -> Self {
        self.services = services;
        self
    }

    pub fn with_mtu_limit(mut self, mtu_limit: Option<u16>) -> Self {
        self.mtu_limit = mtu_limit;
        self
    }

    pub fn with_battery_level(mut self, level: Option<u8>) -> Self {
        self.battery_level = level;
        self
    }

    fn characteristic(&self, service_id: &Uuid, characteristic_id: &Uuid) -> Option<&CharacteristicInfo> {
        self.services
            .iter()
            .find(|s| s.uuid == *service_id)?
            .characteristics
            .iter()
            .find(|c| c.uuid == *characteristic_id)
    }
}

/// One recorded capability call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    AdapterOpen,
    AdapterClose,
    ScanStart,
    ScanStop,
    Connect(String),
    Disconnect(String),
    ListServices(String),
    ListCharacteristics(String, Uuid),
    SetMtu(String, u16),
    Write {
        device_id: String,
        characteristic_id: Uuid,
        value: Vec<u8>,
    },
    SetNotify {
        device_id: String,
        characteristic_id: Uuid,
        enabled: bool,
    },
}

/// One-shot failures consumed by the next matching call
#[derive(Debug, Default)]
struct Faults {
    adapter_open: Option<BleError>,
    adapter_close: Option<BleError>,
    scan_start: Option<BleError>,
    scan_stop: Option<BleError>,
    connect: Option<BleError>,
    disconnect: Option<BleError>,
    list_services: Option<BleError>,
    /// Fails the write with this index, counted from when the fault was armed
    write: Option<(usize, BleError)>,
}

#[derive(Debug, Default)]
struct Inner {
    peripherals: Vec<SimulatedPeripheral>,
    adapter_open: bool,
    scanning: bool,
    connected: HashSet<String>,
    calls: Vec<StackCall>,
    faults: Faults,
    writes_since_armed: usize,
    /// Device subscribers alive when each `scan_stop` was issued
    subscribers_at_scan_stop: Vec<usize>,
}

/// A [`BleStack`] backed by scripted peripherals
pub struct SimulatedStack {
    inner: Mutex<Inner>,
    devices_tx: broadcast::Sender<Vec<Device>>,
    values_tx: broadcast::Sender<CharacteristicValue>,
}

impl SimulatedStack {
    pub fn new() -> Self {
        let (devices_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (values_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            devices_tx,
            values_tx,
        }
    }

    pub fn with_peripheral(self, peripheral: SimulatedPeripheral) -> Self {
        self.lock().peripherals.push(peripheral);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_adapter_open(&self, err: BleError) {
        self.lock().faults.adapter_open = Some(err);
    }

    pub fn fail_adapter_close(&self, err: BleError) {
        self.lock().faults.adapter_close = Some(err);
    }

    pub fn fail_scan_start(&self, err: BleError) {
        self.lock().faults.scan_start = Some(err);
    }

    pub fn fail_scan_stop(&self, err: BleError) {
        self.lock().faults.scan_stop = Some(err);
    }

    pub fn fail_connect(&self, err: BleError) {
        self.lock().faults.connect = Some(err);
    }

    pub fn fail_disconnect(&self, err: BleError) {
        self.lock().faults.disconnect = Some(err);
    }

    pub fn fail_list_services(&self, err: BleError) {
        self.lock().faults.list_services = Some(err);
    }

    /// Fails the `index`-th write issued from now on (0-based)
    pub fn fail_write_at(&self, index: usize, err: BleError) {
        let mut inner = self.lock();
        inner.faults.write = Some((index, err));
        inner.writes_since_armed = 0;
    }

    /// Pushes a batch of scan results to every device subscriber
    pub fn announce(&self, batch: Vec<Device>) {
        let _ = self.devices_tx.send(batch);
    }

    /// Pushes a characteristic value to every value subscriber
    pub fn push_value(&self, value: CharacteristicValue) {
        let _ = self.values_tx.send(value);
    }

    /// Closes the link from the peer side without the session noticing
    pub fn drop_link(&self, device_id: &str) {
        self.lock().connected.remove(device_id);
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Payloads of every write call, in issue order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StackCall::Write { value, .. } => Some(value.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_adapter_open(&self) -> bool {
        self.lock().adapter_open
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    pub fn is_connected(&self, device_id: &str) -> bool {
        self.lock().connected.contains(device_id)
    }

    pub fn device_subscriber_count(&self) -> usize {
        self.devices_tx.receiver_count()
    }

    /// Device subscriber count observed by every `scan_stop` call, in order
    pub fn subscribers_at_scan_stop(&self) -> Vec<usize> {
        self.lock().subscribers_at_scan_stop.clone()
    }
}

impl Default for SimulatedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn require_connected(&self, device_id: &str) -> Result<&SimulatedPeripheral, BleError> {
        if !self.connected.contains(device_id) {
            return Err(BleError::transport(format!("device {device_id} is not connected")));
        }
        self.peripherals
            .iter()
            .find(|p| p.device.id == device_id)
            .ok_or_else(|| BleError::not_found(format!("no such device: {device_id}")))
    }
}

#[async_trait]
impl BleStack for SimulatedStack {
    async fn adapter_open(&self) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::AdapterOpen);
        if let Some(err) = inner.faults.adapter_open.take() {
            return Err(err);
        }
        if inner.adapter_open {
            return Err(BleError::adapter_already_open());
        }
        inner.adapter_open = true;
        Ok(())
    }

    async fn adapter_close(&self) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::AdapterClose);
        if let Some(err) = inner.faults.adapter_close.take() {
            return Err(err);
        }
        inner.adapter_open = false;
        inner.scanning = false;
        inner.connected.clear();
        Ok(())
    }

    async fn scan_start(&self, options: &ScanOptions) -> Result<(), BleError> {
        let batch = {
            let mut inner = self.lock();
            inner.calls.push(StackCall::ScanStart);
            if let Some(err) = inner.faults.scan_start.take() {
                return Err(err);
            }
            if !inner.adapter_open {
                return Err(BleError::from_code(
                    ADAPTER_NOT_OPEN_CODE,
                    "startBluetoothDevicesDiscovery:fail not init",
                ));
            }
            if inner.scanning {
                return Err(BleError::already_discovering());
            }
            inner.scanning = true;
            inner
                .peripherals
                .iter()
                .filter(|p| {
                    options.services.is_empty()
                        || p.services.iter().any(|s| options.services.contains(&s.uuid))
                })
                .map(|p| p.device.clone())
                .collect::<Vec<_>>()
        };
        debug!("Simulated scan started, {} peripherals in range", batch.len());
        if !batch.is_empty() {
            let _ = self.devices_tx.send(batch);
        }
        Ok(())
    }

    async fn scan_stop(&self) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::ScanStop);
        inner.subscribers_at_scan_stop.push(self.devices_tx.receiver_count());
        if let Some(err) = inner.faults.scan_stop.take() {
            return Err(err);
        }
        inner.scanning = false;
        Ok(())
    }

    fn subscribe_devices(&self) -> broadcast::Receiver<Vec<Device>> {
        self.devices_tx.subscribe()
    }

    async fn connect(&self, device_id: &str) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::Connect(device_id.to_string()));
        if let Some(err) = inner.faults.connect.take() {
            return Err(err);
        }
        let connectable = inner
            .peripherals
            .iter()
            .any(|p| p.device.id == device_id && p.device.connectable);
        if !connectable {
            return Err(BleError::from_code(10002, "createBLEConnection:fail no device"));
        }
        inner.connected.insert(device_id.to_string());
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::Disconnect(device_id.to_string()));
        if let Some(err) = inner.faults.disconnect.take() {
            return Err(err);
        }
        if !inner.connected.remove(device_id) {
            return Err(BleError::no_active_connection());
        }
        Ok(())
    }

    async fn list_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::ListServices(device_id.to_string()));
        if let Some(err) = inner.faults.list_services.take() {
            return Err(err);
        }
        let peripheral = inner.require_connected(device_id)?;
        Ok(peripheral
            .services
            .iter()
            .map(|s| ServiceInfo { uuid: s.uuid })
            .collect())
    }

    async fn list_characteristics(
        &self,
        device_id: &str,
        service_id: &Uuid,
    ) -> Result<Vec<CharacteristicInfo>, BleError> {
        let mut inner = self.lock();
        inner
            .calls
            .push(StackCall::ListCharacteristics(device_id.to_string(), *service_id));
        let peripheral = inner.require_connected(device_id)?;
        peripheral
            .services
            .iter()
            .find(|s| s.uuid == *service_id)
            .map(|s| s.characteristics.clone())
            .ok_or_else(|| BleError::not_found(format!("no such service: {service_id}")))
    }

    async fn set_mtu(&self, device_id: &str, mtu: u16) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::SetMtu(device_id.to_string(), mtu));
        let peripheral = inner.require_connected(device_id)?;
        match peripheral.mtu_limit {
            Some(limit) if mtu <= limit => Ok(()),
            _ => Err(BleError::rejected("setBLEMTU:fail")),
        }
    }

    async fn write_characteristic(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        let mut inner = self.lock();
        inner.calls.push(StackCall::Write {
            device_id: device_id.to_string(),
            characteristic_id: *characteristic_id,
            value: value.to_vec(),
        });
        let index = inner.writes_since_armed;
        inner.writes_since_armed += 1;
        if matches!(&inner.faults.write, Some((at, _)) if *at == index) {
            if let Some((_, err)) = inner.faults.write.take() {
                return Err(err);
            }
        }
        let peripheral = inner.require_connected(device_id)?;
        match peripheral.characteristic(service_id, characteristic_id) {
            Some(c) if c.properties.write => Ok(()),
            Some(_) => Err(BleError::transport("writeBLECharacteristicValue:fail property not support")),
            None => Err(BleError::not_found("writeBLECharacteristicValue:fail no characteristic")),
        }
    }

    async fn set_notify_enabled(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
        enabled: bool,
    ) -> Result<(), BleError> {
        let pushed = {
            let mut inner = self.lock();
            inner.calls.push(StackCall::SetNotify {
                device_id: device_id.to_string(),
                characteristic_id: *characteristic_id,
                enabled,
            });
            let peripheral = inner.require_connected(device_id)?;
            if peripheral.characteristic(service_id, characteristic_id).is_none() {
                return Err(BleError::not_found(
                    "notifyBLECharacteristicValueChange:fail no characteristic",
                ));
            }
            match peripheral.battery_level {
                Some(level) if enabled && *characteristic_id == UUID_BATTERY_LEVEL => {
                    Some(CharacteristicValue {
                        device_id: device_id.to_string(),
                        service_id: *service_id,
                        characteristic_id: *characteristic_id,
                        value: vec![level],
                    })
                }
                _ => None,
            }
        };
        if let Some(value) = pushed {
            let _ = self.values_tx.send(value);
        }
        Ok(())
    }

    fn subscribe_characteristic_values(&self) -> broadcast::Receiver<CharacteristicValue> {
        self.values_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::error::Idempotency;

    #[tokio::test]
    async fn test_adapter_open_twice_reports_idempotency() {
        let stack = SimulatedStack::new();
        stack.adapter_open().await.unwrap();
        let err = stack.adapter_open().await.unwrap_err();
        assert!(err.is(Idempotency::AdapterAlreadyOpen));
    }

    #[tokio::test]
    async fn test_scan_start_announces_peripherals() {
        let stack = SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P1", "Printer"));
        let mut rx = stack.subscribe_devices();
        stack.adapter_open().await.unwrap();
        stack.scan_start(&ScanOptions::default()).await.unwrap();

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, "P1");

        let err = stack.scan_start(&ScanOptions::default()).await.unwrap_err();
        assert!(err.is(Idempotency::AlreadyDiscovering));
    }

    #[tokio::test]
    async fn test_disconnect_without_link_reports_no_connection() {
        let stack = SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P1", "Printer"));
        let err = stack.disconnect("P1").await.unwrap_err();
        assert!(err.is(Idempotency::NoActiveConnection));
    }

    #[tokio::test]
    async fn test_write_fault_hits_requested_index() {
        let stack = SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P1", "Printer"));
        stack.connect("P1").await.unwrap();
        stack.fail_write_at(1, BleError::transport("boom"));

        let write = |v: u8| {
            let stack = &stack;
            async move {
                stack
                    .write_characteristic("P1", &UUID_PRINT_SERVICE, &UUID_PRINT_WRITE_CHAR, &[v])
                    .await
            }
        };
        assert!(write(0).await.is_ok());
        assert!(write(1).await.is_err());
        assert!(write(2).await.is_ok());
        assert_eq!(stack.writes(), vec![vec![0], vec![1], vec![2]]);
    }
}
