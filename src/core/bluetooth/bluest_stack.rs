//! [`BleStack`] implementation over the bluest crate
//! Advertisements and notifications are pumped by background tasks into
//! broadcast channels; everything else maps directly onto bluest calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bluest::error::ErrorKind as BluestErrorKind;
use bluest::{Adapter, AdvertisingDevice, Characteristic};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{ADAPTER_NOT_OPEN_CODE, EVENT_CHANNEL_CAPACITY};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::types::{
    AdvertisementFields, CharacteristicInfo, CharacteristicProperties, CharacteristicValue, Device,
    ScanOptions, ServiceInfo,
};

const ADAPTER_UNAVAILABLE_CODE: i32 = 10001;
const NO_DEVICE_CODE: i32 = 10002;

struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Host stack backed by the platform adapter
pub struct BluestStack {
    adapter: tokio::sync::Mutex<Option<Adapter>>,
    /// Every device seen by a scan, keyed by its platform id
    devices: Arc<Mutex<HashMap<String, bluest::Device>>>,
    scan_task: tokio::sync::Mutex<Option<ScanTask>>,
    /// Notify pumps keyed by (device id, characteristic id)
    notify_tokens: Mutex<HashMap<(String, Uuid), CancellationToken>>,
    /// Largest MTU each connected device accepts, computed on first request
    mtu_limits: Mutex<HashMap<String, u16>>,
    devices_tx: broadcast::Sender<Vec<Device>>,
    values_tx: broadcast::Sender<CharacteristicValue>,
}

impl BluestStack {
    pub fn new() -> Self {
        let (devices_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (values_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            adapter: tokio::sync::Mutex::new(None),
            devices: Arc::new(Mutex::new(HashMap::new())),
            scan_task: tokio::sync::Mutex::new(None),
            notify_tokens: Mutex::new(HashMap::new()),
            mtu_limits: Mutex::new(HashMap::new()),
            devices_tx,
            values_tx,
        }
    }

    async fn adapter(&self) -> Result<Adapter, BleError> {
        self.adapter
            .lock()
            .await
            .clone()
            .ok_or_else(|| BleError::from_code(ADAPTER_NOT_OPEN_CODE, "bluetooth adapter not opened"))
    }

    fn known_device(&self, device_id: &str) -> Result<bluest::Device, BleError> {
        lock(&self.devices)
            .get(device_id)
            .cloned()
            .ok_or_else(|| BleError::from_code(NO_DEVICE_CODE, format!("no device with id {device_id}")))
    }

    async fn characteristic(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
    ) -> Result<Characteristic, BleError> {
        let device = self.known_device(device_id)?;
        let service = device
            .discover_services_with_uuid(*service_id)
            .await
            .map_err(map_error)?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::not_found(format!("no service {service_id}")))?;
        service
            .discover_characteristics_with_uuid(*characteristic_id)
            .await
            .map_err(map_error)?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::not_found(format!("no characteristic {characteristic_id}")))
    }

    /// Largest single-packet write any writable characteristic of `device` can carry
    async fn link_mtu_limit(&self, device: &bluest::Device) -> Result<u16, BleError> {
        let mut write_lens = Vec::new();
        for service in device.services().await.map_err(map_error)? {
            for characteristic in service.characteristics().await.map_err(map_error)? {
                let props = characteristic.properties().await.map_err(map_error)?;
                if props.write || props.write_without_response {
                    write_lens.push(characteristic.max_write_len().map_err(map_error)?);
                }
            }
        }
        mtu_limit(write_lens)
            .ok_or_else(|| BleError::rejected("no writable characteristic to size the link"))
    }

    fn cancel_notifications(&self, device_id: Option<&str>) {
        lock(&self.notify_tokens).retain(|(id, _), token| {
            let keep = device_id.is_some_and(|d| d != id.as_str());
            if !keep {
                token.cancel();
            }
            keep
        });
    }

    /// Pumps advertisements into the device channel until cancelled
    async fn scan_loop(
        adapter: Adapter,
        options: ScanOptions,
        devices: Arc<Mutex<HashMap<String, bluest::Device>>>,
        devices_tx: broadcast::Sender<Vec<Device>>,
        started_tx: oneshot::Sender<Result<(), BleError>>,
        cancel_token: CancellationToken,
    ) {
        let mut scan_stream = match adapter.scan(&options.services).await {
            Ok(stream) => {
                let _ = started_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                let _ = started_tx.send(Err(map_error(e)));
                return;
            }
        };

        let mut seen = HashSet::new();
        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered) => {
                            let device = to_device(&discovered);
                            debug!("Found device - Device: {:?}, RSSI: {:?}", device.id, device.rssi);
                            let first_sighting = seen.insert(device.id.clone());
                            lock(&devices).insert(device.id.clone(), discovered.device);
                            if first_sighting || options.allow_duplicates {
                                let _ = devices_tx.send(vec![device]);
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
    }

    /// Pumps notifications of one characteristic into the value channel until cancelled
    async fn notify_loop(
        device_id: String,
        service_id: Uuid,
        characteristic: Characteristic,
        values_tx: broadcast::Sender<CharacteristicValue>,
        started_tx: oneshot::Sender<Result<(), BleError>>,
        cancel_token: CancellationToken,
    ) {
        let characteristic_id = characteristic.uuid();
        let mut notification_stream = match characteristic.notify().await {
            Ok(stream) => {
                let _ = started_tx.send(Ok(()));
                stream
            }
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = started_tx.send(Err(map_error(e)));
                return;
            }
        };

        loop {
            tokio::select! {
                result = notification_stream.next() => {
                    match result {
                        Some(Ok(value)) => {
                            debug!("Received value from {}: {:?}", characteristic_id, value);
                            let _ = values_tx.send(CharacteristicValue {
                                device_id: device_id.clone(),
                                service_id,
                                characteristic_id,
                                value,
                            });
                        }
                        Some(Err(e)) => {
                            error!("Error in notification stream: {}", e);
                            break;
                        }
                        None => break,
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        debug!("Notifications from {} stopped", characteristic_id);
    }
}

impl Default for BluestStack {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The MTU is the chunk length of a payload write, so a link carries at most
/// the longest write that fits one packet.
fn mtu_limit<I: IntoIterator<Item = usize>>(max_write_lens: I) -> Option<u16> {
    max_write_lens
        .into_iter()
        .filter(|len| *len > 0)
        .max()
        .map(|len| u16::try_from(len).unwrap_or(u16::MAX))
}

fn check_mtu(mtu: u16, limit: u16) -> Result<(), BleError> {
    if mtu > limit {
        return Err(BleError::rejected(format!("mtu {mtu} exceeds link limit {limit}")));
    }
    Ok(())
}

fn map_error(e: bluest::Error) -> BleError {
    let message = e.to_string();
    match e.kind() {
        BluestErrorKind::NotConnected => BleError::no_active_connection(),
        BluestErrorKind::AlreadyScanning => BleError::already_discovering(),
        BluestErrorKind::NotFound => BleError::not_found(message),
        BluestErrorKind::AdapterUnavailable => BleError::from_code(ADAPTER_UNAVAILABLE_CODE, message),
        _ => BleError::transport(message),
    }
}

fn to_device(discovered: &AdvertisingDevice) -> Device {
    let adv = &discovered.adv_data;
    let name = discovered
        .device
        .name()
        .ok()
        .or_else(|| adv.local_name.clone())
        .unwrap_or_default();
    let manufacturer_data = adv.manufacturer_data.as_ref().map(|m| {
        let mut bytes = m.company_id.to_le_bytes().to_vec();
        bytes.extend_from_slice(&m.data);
        bytes
    });

    Device {
        id: discovered.device.id().to_string(),
        name,
        connectable: adv.is_connectable,
        rssi: discovered.rssi,
        advertisement: AdvertisementFields {
            local_name: adv.local_name.clone(),
            service_uuids: adv.services.clone(),
            manufacturer_data,
        },
    }
}

#[async_trait]
impl BleStack for BluestStack {
    async fn adapter_open(&self) -> Result<(), BleError> {
        let mut slot = self.adapter.lock().await;
        if slot.is_some() {
            return Err(BleError::adapter_already_open());
        }

        let adapter = Adapter::default().await.ok_or_else(|| {
            BleError::from_code(ADAPTER_UNAVAILABLE_CODE, "Bluetooth adapter not found")
        })?;
        adapter.wait_available().await.map_err(map_error)?;
        info!("Bluetooth adapter is available.");
        *slot = Some(adapter);
        Ok(())
    }

    async fn adapter_close(&self) -> Result<(), BleError> {
        if let Err(e) = self.scan_stop().await {
            warn!("Failed to stop scan while closing adapter: {}", e);
        }
        self.cancel_notifications(None);

        let Some(adapter) = self.adapter.lock().await.take() else {
            return Ok(());
        };
        let devices: Vec<bluest::Device> = lock(&self.devices).drain().map(|(_, d)| d).collect();
        for device in devices {
            if device.is_connected().await {
                if let Err(e) = adapter.disconnect_device(&device).await {
                    warn!("Failed to release {} while closing adapter: {}", device.id(), e);
                }
            }
        }
        lock(&self.mtu_limits).clear();
        info!("Bluetooth adapter released.");
        Ok(())
    }

    async fn scan_start(&self, options: &ScanOptions) -> Result<(), BleError> {
        let adapter = self.adapter().await?;
        let mut scan_task = self.scan_task.lock().await;
        if scan_task.is_some() {
            return Err(BleError::already_discovering());
        }

        let cancel_token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel();
        let handle = tokio::spawn(Self::scan_loop(
            adapter,
            options.clone(),
            self.devices.clone(),
            self.devices_tx.clone(),
            started_tx,
            cancel_token.clone(),
        ));

        match started_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(BleError::transport("scan task ended before starting")),
        }
        info!("Starting bluetooth scan");
        *scan_task = Some(ScanTask { cancel_token, handle });
        Ok(())
    }

    async fn scan_stop(&self) -> Result<(), BleError> {
        let Some(task) = self.scan_task.lock().await.take() else {
            return Ok(());
        };
        task.cancel_token.cancel();
        if let Err(e) = task.handle.await {
            if !e.is_cancelled() {
                error!("Scan task finished with an unexpected join error: {:?}", e);
            }
        }
        info!("Bluetooth scan stopped.");
        Ok(())
    }

    fn subscribe_devices(&self) -> broadcast::Receiver<Vec<Device>> {
        self.devices_tx.subscribe()
    }

    async fn connect(&self, device_id: &str) -> Result<(), BleError> {
        let adapter = self.adapter().await?;
        let device = self.known_device(device_id)?;
        if !device.is_connected().await {
            adapter.connect_device(&device).await.map_err(map_error)?;
        }
        Ok(())
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), BleError> {
        let adapter = self.adapter().await?;
        let device = self.known_device(device_id)?;
        self.cancel_notifications(Some(device_id));
        lock(&self.mtu_limits).remove(device_id);
        if !device.is_connected().await {
            return Err(BleError::no_active_connection());
        }
        adapter.disconnect_device(&device).await.map_err(map_error)
    }

    async fn list_services(&self, device_id: &str) -> Result<Vec<ServiceInfo>, BleError> {
        let device = self.known_device(device_id)?;
        let services = device.services().await.map_err(map_error)?;
        Ok(services.iter().map(|s| ServiceInfo { uuid: s.uuid() }).collect())
    }

    async fn list_characteristics(
        &self,
        device_id: &str,
        service_id: &Uuid,
    ) -> Result<Vec<CharacteristicInfo>, BleError> {
        let device = self.known_device(device_id)?;
        let service = device
            .services()
            .await
            .map_err(map_error)?
            .into_iter()
            .find(|s| s.uuid() == *service_id)
            .ok_or_else(|| BleError::not_found(format!("no service {service_id}")))?;

        let mut infos = Vec::new();
        for characteristic in service.characteristics().await.map_err(map_error)? {
            let props = characteristic.properties().await.map_err(map_error)?;
            infos.push(CharacteristicInfo {
                uuid: characteristic.uuid(),
                properties: CharacteristicProperties {
                    read: props.read,
                    write: props.write,
                    notify: props.notify || props.indicate,
                },
            });
        }
        Ok(infos)
    }

    /// The platform negotiates the ATT MTU itself. A request is accepted if the
    /// negotiated link can carry it.
    async fn set_mtu(&self, device_id: &str, mtu: u16) -> Result<(), BleError> {
        let cached = lock(&self.mtu_limits).get(device_id).copied();
        let limit = match cached {
            Some(limit) => limit,
            None => {
                let device = self.known_device(device_id)?;
                let limit = self.link_mtu_limit(&device).await?;
                debug!("Link MTU limit of {} is {}", device_id, limit);
                lock(&self.mtu_limits).insert(device_id.to_string(), limit);
                limit
            }
        };
        check_mtu(mtu, limit)
    }

    async fn write_characteristic(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        let characteristic = self.characteristic(device_id, service_id, characteristic_id).await?;
        characteristic.write(value).await.map_err(map_error)
    }

    async fn set_notify_enabled(
        &self,
        device_id: &str,
        service_id: &Uuid,
        characteristic_id: &Uuid,
        enabled: bool,
    ) -> Result<(), BleError> {
        let key = (device_id.to_string(), *characteristic_id);
        if let Some(token) = lock(&self.notify_tokens).remove(&key) {
            token.cancel();
        }
        if !enabled {
            return Ok(());
        }

        let characteristic = self.characteristic(device_id, service_id, characteristic_id).await?;
        let cancel_token = CancellationToken::new();
        let (started_tx, started_rx) = oneshot::channel();
        tokio::spawn(Self::notify_loop(
            device_id.to_string(),
            *service_id,
            characteristic,
            self.values_tx.clone(),
            started_tx,
            cancel_token.clone(),
        ));

        match started_rx.await {
            Ok(Ok(())) => {
                lock(&self.notify_tokens).insert(key, cancel_token);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BleError::transport("notification task ended before starting")),
        }
    }

    fn subscribe_characteristic_values(&self) -> broadcast::Receiver<CharacteristicValue> {
        self.values_tx.subscribe()
    }
}
