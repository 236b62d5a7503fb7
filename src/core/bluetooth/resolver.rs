//! Locates a characteristic on a connected peer by predicate.

use log::{debug, info};

use crate::core::bluetooth::constants::{BATTERY_LEVEL_UUID16, BATTERY_SERVICE_UUID16};
use crate::core::bluetooth::error::BleError;
use crate::core::bluetooth::stack::BleStack;
use crate::core::bluetooth::types::{ServiceEndpoint, short_uuid};

/// Battery level characteristic that can be read
pub fn battery_level_readable(endpoint: &ServiceEndpoint) -> bool {
    short_uuid(&endpoint.characteristic_id) == BATTERY_LEVEL_UUID16 && endpoint.properties.read
}

/// Any characteristic accepting writes, in any service
pub fn writable(endpoint: &ServiceEndpoint) -> bool {
    endpoint.properties.write
}

/// Walks services in stack order, then their characteristics, and returns the first match.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharacteristicResolver {
    service_filter: Option<u16>,
}

impl CharacteristicResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only look inside services whose 16-bit UUID is `uuid16`.
    /// Other services are skipped without listing their characteristics.
    pub fn for_service(uuid16: u16) -> Self {
        Self {
            service_filter: Some(uuid16),
        }
    }

    /// Resolver for the standard battery lookup
    pub fn battery() -> Self {
        Self::for_service(BATTERY_SERVICE_UUID16)
    }

    /// Returns `Ok(None)` when nothing matches; only stack failures are errors.
    pub async fn find<P>(
        &self,
        stack: &dyn BleStack,
        device_id: &str,
        predicate: P,
    ) -> Result<Option<ServiceEndpoint>, BleError>
    where
        P: Fn(&ServiceEndpoint) -> bool,
    {
        let services = stack.list_services(device_id).await?;
        debug!("Device {} reports {} services", device_id, services.len());

        for service in services {
            if let Some(wanted) = self.service_filter {
                if short_uuid(&service.uuid) != wanted {
                    continue;
                }
            }
            for characteristic in stack.list_characteristics(device_id, &service.uuid).await? {
                let endpoint = ServiceEndpoint {
                    service_id: service.uuid,
                    characteristic_id: characteristic.uuid,
                    properties: characteristic.properties,
                };
                if predicate(&endpoint) {
                    info!(
                        "Matched characteristic {} in service {}",
                        endpoint.characteristic_id, endpoint.service_id
                    );
                    return Ok(Some(endpoint));
                }
            }
        }
        Ok(None)
    }
}
