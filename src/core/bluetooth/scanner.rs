use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, error, info, warn};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::error::{BleError, Idempotency};
use crate::core::bluetooth::registry::DeviceDiscoveryRegistry;
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::types::{Device, ScanOptions, SessionEvent};

/// Drives device discovery: adapter open, scan start/stop and the
/// device-found listener feeding the registry.
pub struct DiscoveryScanner {
    stack: Arc<dyn BleStack>,
    registry: Arc<Mutex<DeviceDiscoveryRegistry>>,
    events: broadcast::Sender<SessionEvent>,
    searching: bool,
    cancel_token: CancellationToken,
    listener_handle: Option<JoinHandle<()>>,
}

impl DiscoveryScanner {
    pub fn new(
        stack: Arc<dyn BleStack>,
        registry: DeviceDiscoveryRegistry,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            stack,
            registry: Arc::new(Mutex::new(registry)),
            events,
            searching: false,
            cancel_token: CancellationToken::new(),
            listener_handle: None,
        }
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    /// Snapshot of the discovery list, newest first
    pub fn devices(&self) -> Vec<Device> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .devices()
            .to_vec()
    }

    pub fn is_listening(&self) -> bool {
        self.listener_handle.is_some()
    }

    /// Opens the adapter, starts scanning and attaches the device listener.
    /// "Already open" and "already discovering" count as success.
    pub async fn start_scan(&mut self, options: &ScanOptions) -> Result<(), BleError> {
        self.set_searching(true);
        // Subscribe first so batches published while the scan spins up are not lost
        let receiver = self.stack.subscribe_devices();

        if let Err(e) = Self::tolerate_already_running(self.stack.adapter_open().await) {
            error!("Failed to open bluetooth adapter: {}", e);
            self.set_searching(false);
            return Err(e);
        }
        if let Err(e) = Self::tolerate_already_running(self.stack.scan_start(options).await) {
            error!("Failed to start discovery: {}", e);
            self.set_searching(false);
            return Err(e);
        }

        self.attach_listener(receiver).await;
        info!("Device scan task started.");
        Ok(())
    }

    /// Detaches the device listener, then halts the scan. If halting fails the
    /// listener is re-attached and the searching flag restored.
    pub async fn stop_scan(&mut self) -> Result<(), BleError> {
        info!("Stopping Bluetooth scan.");
        self.set_searching(false);
        self.detach_listener().await;

        if let Err(e) = self.stack.scan_stop().await {
            error!("Failed to stop discovery: {}", e);
            let receiver = self.stack.subscribe_devices();
            self.attach_listener(receiver).await;
            self.set_searching(true);
            return Err(e);
        }
        Ok(())
    }

    /// Detaches the listener and halts the scan without restoring anything on failure.
    /// Used on teardown, where the adapter is released right after.
    pub async fn stop_scan_best_effort(&mut self) {
        self.set_searching(false);
        self.detach_listener().await;

        if let Err(e) = self.stack.scan_stop().await {
            warn!("Ignoring failure to stop discovery: {}", e);
        }
    }

    fn tolerate_already_running(result: Result<(), BleError>) -> Result<(), BleError> {
        match result {
            Err(e)
                if e.is(Idempotency::AdapterAlreadyOpen) || e.is(Idempotency::AlreadyDiscovering) =>
            {
                warn!("Ignoring idempotent scan error: {}", e);
                Ok(())
            }
            other => other,
        }
    }

    fn set_searching(&mut self, searching: bool) {
        if self.searching != searching {
            self.searching = searching;
            let _ = self.events.send(SessionEvent::SearchingChanged(searching));
        }
    }

    async fn attach_listener(&mut self, receiver: broadcast::Receiver<Vec<Device>>) {
        if self.listener_handle.is_some() {
            self.detach_listener().await;
        }

        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let registry_for_task = self.registry.clone();
        let events_for_task = self.events.clone();

        let handle = tokio::spawn(Self::listen(
            receiver,
            registry_for_task,
            events_for_task,
            cancel_token_for_task,
        ));
        self.listener_handle = Some(handle);
    }

    async fn detach_listener(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.listener_handle.take() {
            match handle.await {
                Ok(()) => debug!("Device listener detached."),
                Err(e) if e.is_cancelled() => debug!("Device listener task was cancelled."),
                Err(e) => error!("Device listener finished with an unexpected join error: {:?}", e),
            }
        }
    }

    /// Feeds discovered batches into the registry until cancelled
    async fn listen(
        mut receiver: broadcast::Receiver<Vec<Device>>,
        registry: Arc<Mutex<DeviceDiscoveryRegistry>>,
        events: broadcast::Sender<SessionEvent>,
        cancel_token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                result = receiver.recv() => {
                    match result {
                        Ok(batch) => {
                            debug!("Found {} devices in batch", batch.len());
                            let devices = {
                                let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
                                registry.ingest(batch).to_vec()
                            };
                            let _ = events.send(SessionEvent::DevicesUpdated(devices));
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Device listener lagged, {} batches skipped", skipped);
                        }
                        Err(RecvError::Closed) => {
                            info!("Device stream has ended.");
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
}

impl Drop for DiscoveryScanner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
