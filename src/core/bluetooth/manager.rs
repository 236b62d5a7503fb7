//! Connection session for a single BLE peripheral
//! This module provides the main interface for bluetooth operations

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::constants::EVENT_CHANNEL_CAPACITY;
use crate::core::bluetooth::error::SessionError;
use crate::core::bluetooth::mtu::MtuNegotiator;
use crate::core::bluetooth::notification::NotificationAwaiter;
use crate::core::bluetooth::registry::DeviceDiscoveryRegistry;
use crate::core::bluetooth::resolver::{CharacteristicResolver, battery_level_readable, writable};
use crate::core::bluetooth::scanner::DiscoveryScanner;
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::transfer::{ChunkedTransfer, chunk_count};
use crate::core::bluetooth::types::{
    BatteryLookup, BatteryReading, ConnectionState, Device, Mtu, ServiceEndpoint, SessionEvent,
    TransferOutcome,
};

/// Owns the adapter, the discovery list and the single connection slot.
///
/// Every operation takes `&mut self`: the session is one thread of control
/// and no two stack operations it issues ever overlap. Wrap it in a mutex
/// to share it, as [`AppState`](crate::state::AppState) does.
pub struct ConnectionSession {
    stack: Arc<dyn BleStack>,
    config: SessionConfig,
    /// Bluetooth scanner
    scanner: DiscoveryScanner,
    /// Connection manager
    connection_manager: ConnectionManager,
    negotiator: MtuNegotiator,
    state: ConnectionState,
    /// Negotiated MTU of the current link, reset on disconnect
    mtu: Option<Mtu>,
    events: broadcast::Sender<SessionEvent>,
}

impl ConnectionSession {
    /// Creates a session over `stack`. The adapter is opened lazily by the first discovery.
    pub fn open(stack: Arc<dyn BleStack>, config: SessionConfig) -> Result<Self, SessionError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let registry = DeviceDiscoveryRegistry::new(config.device_filter()?);
        let scanner = DiscoveryScanner::new(stack.clone(), registry, events.clone());
        let connection_manager = ConnectionManager::new(stack.clone());
        let negotiator = config.mtu_negotiator();

        info!("Bluetooth session opened.");
        Ok(Self {
            stack,
            config,
            scanner,
            connection_manager,
            negotiator,
            state: ConnectionState::Disconnected,
            mtu: None,
            events,
        })
    }

    /// Subscribe to state updates (device list, searching flag, connection, MTU)
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn devices(&self) -> Vec<Device> {
        self.scanner.devices()
    }

    pub fn is_searching(&self) -> bool {
        self.scanner.is_searching()
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Returns the ID of the currently connected device
    pub fn connected_device_id(&self) -> Option<&str> {
        match &self.state {
            ConnectionState::Connected(id) => Some(id),
            _ => None,
        }
    }

    pub fn mtu(&self) -> Option<Mtu> {
        self.mtu
    }

    pub async fn start_discovery(&mut self) -> Result<(), SessionError> {
        let options = self.config.scan_options();
        self.scanner.start_scan(&options).await?;
        Ok(())
    }

    pub async fn stop_discovery(&mut self) -> Result<(), SessionError> {
        self.scanner.stop_scan().await?;
        Ok(())
    }

    /// Starts discovery if idle, stops it if searching. Returns the new searching flag.
    pub async fn toggle_discovery(&mut self) -> Result<bool, SessionError> {
        if self.is_searching() {
            self.stop_discovery().await?;
        } else {
            self.start_discovery().await?;
        }
        Ok(self.is_searching())
    }

    /// Connects to `target_id`, first releasing any other peer.
    ///
    /// A no-op if already connected to `target_id`. Discovery is stopped once
    /// the link is up.
    pub async fn request_connect(&mut self, target_id: &str) -> Result<(), SessionError> {
        match &self.state {
            ConnectionState::Connected(id) if id == target_id => {
                info!("Device {} already connected.", target_id);
                return Ok(());
            }
            ConnectionState::Connecting(id) => return Err(SessionError::Busy(id.clone())),
            _ => {}
        }

        if let Some(previous) = self.connected_device_id().map(str::to_owned) {
            info!("Releasing {} before connecting to {}", previous, target_id);
            self.connection_manager.disconnect(&previous).await?;
            self.reset_link();
        }

        self.set_state(ConnectionState::Connecting(target_id.to_string()));
        if let Err(e) = self.connection_manager.connect(target_id).await {
            self.set_state(ConnectionState::Disconnected);
            return Err(e.into());
        }
        self.set_state(ConnectionState::Connected(target_id.to_string()));

        if self.scanner.is_searching() {
            self.scanner.stop_scan().await?;
        }
        info!("Device {} connected and state stored in the session.", target_id);
        Ok(())
    }

    /// Disconnects from the current peer. A link that is already gone counts as success.
    /// Any other failure leaves the state untouched.
    pub async fn request_disconnect(&mut self) -> Result<(), SessionError> {
        let Some(device_id) = self.state.device_id().map(str::to_owned) else {
            debug!("No device connected, nothing to disconnect.");
            return Ok(());
        };

        self.connection_manager.disconnect(&device_id).await?;
        self.reset_link();
        Ok(())
    }

    /// Probes the widest MTU the current link accepts and remembers it.
    pub async fn negotiate_mtu(&mut self) -> Result<Mtu, SessionError> {
        let device_id = self.require_connected()?;
        let mtu = self.negotiator.negotiate(&*self.stack, &device_id).await;
        self.mtu = Some(mtu);
        let _ = self.events.send(SessionEvent::MtuNegotiated(mtu.get()));
        Ok(mtu)
    }

    /// First characteristic of the connected peer accepted by `predicate`.
    pub async fn find_endpoint<P>(&self, predicate: P) -> Result<Option<ServiceEndpoint>, SessionError>
    where
        P: Fn(&ServiceEndpoint) -> bool,
    {
        let device_id = self.require_connected()?;
        Ok(CharacteristicResolver::new()
            .find(&*self.stack, &device_id, predicate)
            .await?)
    }

    /// Enables notify on the battery level characteristic and waits for the first value.
    pub async fn read_battery_level(&mut self) -> Result<BatteryLookup, SessionError> {
        let device_id = self.require_connected()?;
        let Some(endpoint) = CharacteristicResolver::battery()
            .find(&*self.stack, &device_id, battery_level_readable)
            .await?
        else {
            info!("No battery characteristic on {}", device_id);
            return Ok(BatteryLookup::NotFound);
        };

        // Subscribe before enabling notify; the first push may arrive immediately
        let awaiter = NotificationAwaiter::new(self.stack.subscribe_characteristic_values())
            .with_timeout(self.config.notification_timeout());
        self.stack
            .set_notify_enabled(&device_id, &endpoint.service_id, &endpoint.characteristic_id, true)
            .await?;

        let value = awaiter
            .next_matching(|v| v.is_from(&device_id, &endpoint))
            .await;

        if let Err(e) = self
            .stack
            .set_notify_enabled(&device_id, &endpoint.service_id, &endpoint.characteristic_id, false)
            .await
        {
            warn!("Failed to disable battery notifications: {}", e);
        }

        let reading = BatteryReading::new(value?.value);
        info!("Battery level of {}: {}", device_id, reading);
        Ok(BatteryLookup::Level(reading))
    }

    /// Sends `payload` through the first writable characteristic, negotiating the MTU first
    /// if this link has none yet.
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<TransferOutcome, SessionError> {
        let device_id = self.require_connected()?;
        let mtu = match self.mtu {
            Some(mtu) => mtu,
            None => self.negotiate_mtu().await?,
        };

        let Some(endpoint) = CharacteristicResolver::new()
            .find(&*self.stack, &device_id, writable)
            .await?
        else {
            info!("No writable characteristic on {}", device_id);
            return Ok(TransferOutcome::NoWritableCharacteristic);
        };

        ChunkedTransfer::send(&*self.stack, &device_id, &endpoint, payload, mtu).await?;
        Ok(TransferOutcome::Delivered {
            chunks: chunk_count(payload.len(), mtu.chunk_len()),
            mtu,
        })
    }

    /// Best-effort teardown: stops discovery and releases the adapter, ignoring failures.
    pub async fn close(&mut self) {
        self.scanner.stop_scan_best_effort().await;
        if let Err(e) = self.stack.adapter_close().await {
            warn!("Ignoring failure to close adapter during teardown: {}", e);
        }
        self.reset_link();
        info!("Bluetooth session closed.");
    }

    fn require_connected(&self) -> Result<String, SessionError> {
        self.connected_device_id()
            .map(str::to_owned)
            .ok_or(SessionError::NotConnected)
    }

    fn reset_link(&mut self) {
        self.mtu = None;
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Connection state {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.events.send(SessionEvent::ConnectionChanged(self.state.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::error::BleError;
    use crate::core::bluetooth::simulated::{
        SimulatedPeripheral, SimulatedStack, StackCall, UUID_PRINT_WRITE_CHAR,
    };

    fn session(stack: &Arc<SimulatedStack>) -> ConnectionSession {
        ConnectionSession::open(stack.clone(), SessionConfig::default()).unwrap()
    }

    fn two_printers() -> Arc<SimulatedStack> {
        Arc::new(
            SimulatedStack::new()
                .with_peripheral(SimulatedPeripheral::printer("A", "Printer A"))
                .with_peripheral(SimulatedPeripheral::printer("B", "Printer B")),
        )
    }

    #[tokio::test]
    async fn test_connect_same_device_twice_is_noop() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        stack.clear_calls();

        session.request_connect("A").await.unwrap();
        assert!(stack.calls().is_empty());
        assert_eq!(session.state(), &ConnectionState::Connected("A".into()));
    }

    #[tokio::test]
    async fn test_switching_peer_disconnects_old_one_first() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        stack.clear_calls();

        session.request_connect("B").await.unwrap();
        assert_eq!(
            stack.calls(),
            vec![StackCall::Disconnect("A".into()), StackCall::Connect("B".into())]
        );
        assert_eq!(session.connected_device_id(), Some("B"));
    }

    #[tokio::test]
    async fn test_switch_tolerates_stale_link() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        stack.drop_link("A");

        session.request_connect("B").await.unwrap();
        assert_eq!(session.connected_device_id(), Some("B"));
    }

    #[tokio::test]
    async fn test_switch_aborts_on_disconnect_failure() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        stack.fail_disconnect(BleError::from_code(10008, "closeBLEConnection:fail"));
        stack.clear_calls();

        let err = session.request_connect("B").await.unwrap_err();
        assert_eq!(err.user_message(), "closeBLEConnection:fail");
        assert_eq!(stack.calls(), vec![StackCall::Disconnect("A".into())]);
        assert_eq!(session.connected_device_id(), Some("A"));
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let stack = two_printers();
        let mut session = session(&stack);
        stack.fail_connect(BleError::from_code(10012, "createBLEConnection:fail timeout"));

        let err = session.request_connect("A").await.unwrap_err();
        assert_eq!(err.user_message(), "createBLEConnection:fail timeout");
        assert_eq!(session.state(), &ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_when_link_already_gone() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        stack.drop_link("A");

        session.request_disconnect().await.unwrap();
        assert_eq!(session.state(), &ConnectionState::Disconnected);
        assert_eq!(session.mtu(), None);
    }

    #[tokio::test]
    async fn test_disconnect_while_disconnected_is_noop() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_disconnect().await.unwrap();
        assert!(stack.calls().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_failure_keeps_state() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        stack.fail_disconnect(BleError::transport("closeBLEConnection:fail busy"));

        assert!(session.request_disconnect().await.is_err());
        assert_eq!(session.connected_device_id(), Some("A"));
    }

    #[tokio::test]
    async fn test_mtu_resets_on_disconnect() {
        let stack = two_printers();
        let mut session = session(&stack);
        session.request_connect("A").await.unwrap();
        assert_eq!(session.negotiate_mtu().await.unwrap().get(), 185);
        assert_eq!(session.mtu().map(Mtu::get), Some(185));

        session.request_disconnect().await.unwrap();
        assert_eq!(session.mtu(), None);
    }

    #[tokio::test]
    async fn test_find_endpoint_on_connected_peer() {
        let stack = two_printers();
        let mut session = session(&stack);
        assert!(matches!(session.find_endpoint(writable).await, Err(SessionError::NotConnected)));

        session.request_connect("A").await.unwrap();
        let endpoint = session.find_endpoint(writable).await.unwrap().expect("writable endpoint");
        assert_eq!(endpoint.characteristic_id, UUID_PRINT_WRITE_CHAR);
        assert_eq!(session.find_endpoint(|_| false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_operations_need_a_connection() {
        let stack = two_printers();
        let mut session = session(&stack);
        assert!(matches!(session.negotiate_mtu().await, Err(SessionError::NotConnected)));
        assert!(matches!(session.send_payload(b"x").await, Err(SessionError::NotConnected)));
        assert!(matches!(session.read_battery_level().await, Err(SessionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_invalid_pattern_fails_open() {
        let stack = two_printers();
        let config = SessionConfig {
            placeholder_name_patterns: vec!["[".to_string()],
            ..SessionConfig::default()
        };
        assert!(matches!(
            ConnectionSession::open(stack, config),
            Err(SessionError::InvalidPattern(_))
        ));
    }
}
