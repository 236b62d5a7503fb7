//! Bluetooth connection handling
//! This module handles connecting to and disconnecting from a peripheral

use std::sync::Arc;

use log::{info, warn};

use crate::core::bluetooth::error::{BleError, Idempotency};
use crate::core::bluetooth::stack::BleStack;

/// Connection manager for the single peer link
#[derive(Clone)]
pub struct ConnectionManager {
    stack: Arc<dyn BleStack>,
}

impl ConnectionManager {
    pub fn new(stack: Arc<dyn BleStack>) -> Self {
        Self { stack }
    }

    /// Connect to the device. Failures are returned as-is; nothing is retried here.
    pub async fn connect(&self, device_id: &str) -> Result<(), BleError> {
        info!("Initiating connection to {}...", device_id);
        self.stack.connect(device_id).await?;
        info!("Connection to {} successful", device_id);
        Ok(())
    }

    /// Disconnect from the device. A link that is already closed counts as success.
    pub async fn disconnect(&self, device_id: &str) -> Result<(), BleError> {
        info!("Disconnecting from device {}", device_id);
        match self.stack.disconnect(device_id).await {
            Ok(()) => {
                info!("Successfully disconnected");
                Ok(())
            }
            Err(e) if e.is(Idempotency::NoActiveConnection) => {
                warn!("Device {} not connected: {}", device_id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
