//! UI-facing commands
//! Each command locks the session, runs one flow and turns the outcome into
//! the text shown to the user. Failures carry the stack's own message.

use log::{debug, info};

use crate::core::bluetooth::constants::{NO_BATTERY_SERVICE, NO_WRITABLE_CHARACTERISTIC, PRINT_OVER};
use crate::core::bluetooth::{BatteryLookup, Device, SessionError, TransferOutcome};
use crate::state::AppState;
use crate::utils::hex_preview;

fn display(e: SessionError) -> String {
    e.user_message()
}

/// Starts discovery if idle, stops it otherwise.
///
/// # Returns
/// The new searching flag
pub async fn toggle_search(app_state: &AppState) -> Result<bool, String> {
    let session_arc = app_state.session.clone();
    let mut session_guard = session_arc.lock().await;

    session_guard.toggle_discovery().await.map_err(display)
}

/// Current discovery list, newest first
pub async fn list_devices(app_state: &AppState) -> Vec<Device> {
    app_state.session.lock().await.devices()
}

/// Connects to a Bluetooth device
///
/// # Arguments
/// * `device_id` - The unique identifier of the device to connect to (platform-specific ID)
/// * `app_state` - The application state
pub async fn connect_to_device(device_id: &str, app_state: &AppState) -> Result<(), String> {
    let session_arc = app_state.session.clone();
    let mut session_guard = session_arc.lock().await;

    session_guard.request_connect(device_id).await.map_err(display)
}

/// Reads the battery level of the connected device.
///
/// # Returns
/// `"<n>%"`, or `"no battery service"` if the device has none
pub async fn read_battery(app_state: &AppState) -> Result<String, String> {
    let session_arc = app_state.session.clone();
    let mut session_guard = session_arc.lock().await;

    match session_guard.read_battery_level().await.map_err(display)? {
        BatteryLookup::Level(reading) => Ok(reading.to_string()),
        BatteryLookup::NotFound => Ok(NO_BATTERY_SERVICE.to_string()),
    }
}

/// Sends `payload` to the connected printer.
///
/// # Returns
/// `"print over"`, or `"no writable characteristic"` if nothing accepts writes
pub async fn print_payload(payload: &[u8], app_state: &AppState) -> Result<String, String> {
    debug!("Print payload ({} bytes): {}", payload.len(), hex_preview(payload, 16));
    let session_arc = app_state.session.clone();
    let mut session_guard = session_arc.lock().await;

    match session_guard.send_payload(payload).await.map_err(display)? {
        TransferOutcome::Delivered { chunks, mtu } => {
            info!("Payload delivered in {} chunks at MTU {}", chunks, mtu.get());
            Ok(PRINT_OVER.to_string())
        }
        TransferOutcome::NoWritableCharacteristic => Ok(NO_WRITABLE_CHARACTERISTIC.to_string()),
    }
}

/// Disconnects from the currently connected device
pub async fn disconnect(app_state: &AppState) -> Result<(), String> {
    let session_arc = app_state.session.clone();
    let mut session_guard = session_arc.lock().await;

    session_guard.request_disconnect().await.map_err(display)
}

/// Best-effort teardown of the session
pub async fn shutdown(app_state: &AppState) {
    app_state.session.lock().await.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::session_config::SessionConfig;
    use crate::core::bluetooth::{BleError, SimulatedPeripheral, SimulatedStack};

    fn app(stack: &Arc<SimulatedStack>) -> AppState {
        AppState::new(stack.clone(), SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_battery_reports_percent() {
        let stack = Arc::new(SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P", "Printer")));
        let app = app(&stack);
        connect_to_device("P", &app).await.unwrap();
        assert_eq!(read_battery(&app).await.unwrap(), "87%");
    }

    #[tokio::test]
    async fn test_battery_without_service() {
        let peripheral = SimulatedPeripheral::printer("P", "Printer").with_services(Vec::new());
        let stack = Arc::new(SimulatedStack::new().with_peripheral(peripheral));
        let app = app(&stack);
        connect_to_device("P", &app).await.unwrap();
        assert_eq!(read_battery(&app).await.unwrap(), NO_BATTERY_SERVICE);
    }

    #[tokio::test]
    async fn test_print_reports_canned_messages() {
        let stack = Arc::new(SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P", "Printer")));
        let app = app(&stack);
        connect_to_device("P", &app).await.unwrap();
        assert_eq!(print_payload(b"hello", &app).await.unwrap(), PRINT_OVER);
    }

    #[tokio::test]
    async fn test_errors_carry_stack_message() {
        let stack = Arc::new(SimulatedStack::new().with_peripheral(SimulatedPeripheral::printer("P", "Printer")));
        let app = app(&stack);
        stack.fail_connect(BleError::from_code(10003, "createBLEConnection:fail connection fail"));
        assert_eq!(
            connect_to_device("P", &app).await.unwrap_err(),
            "createBLEConnection:fail connection fail"
        );
        assert_eq!(read_battery(&app).await.unwrap_err(), "no device connected");
    }

    #[tokio::test]
    async fn test_toggle_search_flips_flag() {
        let stack = Arc::new(SimulatedStack::new());
        let app = app(&stack);
        assert!(toggle_search(&app).await.unwrap());
        assert!(!toggle_search(&app).await.unwrap());
        disconnect(&app).await.unwrap();
        shutdown(&app).await;
        assert!(!stack.is_adapter_open());
    }
}
