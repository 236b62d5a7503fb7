//! Constants used throughout the session core
//! This module contains all the constant values used by the bluetooth core,
//! such as UUIDs, the MTU search range, platform error codes and the canned
//! messages shown to the user.

use uuid::Uuid;

/// Standard Bluetooth Service UUIDs
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);

/// 16-bit forms of the UUIDs above, as produced by `short_uuid`
pub const BATTERY_SERVICE_UUID16: u16 = 0x180F;
pub const BATTERY_LEVEL_UUID16: u16 = 0x2A19;

/// Smallest ATT MTU every link supports
pub const MIN_MTU: u16 = 23;

/// Largest MTU the negotiator will probe
pub const MAX_MTU: u16 = 511;

/// Numeric code a disconnect returns when the link is already closed
pub const NO_CONNECTION_CODE: i32 = 10006;

/// Numeric code returned when the adapter has not been opened
pub const ADAPTER_NOT_OPEN_CODE: i32 = 10000;

/// Placeholder name the host stack gives to devices it cannot identify
pub const UNSUPPORTED_DEVICE_NAME_PATTERN: &str = "^未知或不支持的设备";

/// Messages shown when a lookup finds nothing or a flow completes
pub const NO_BATTERY_SERVICE: &str = "no battery service";
pub const NO_WRITABLE_CHARACTERISTIC: &str = "no writable characteristic";
pub const PRINT_OVER: &str = "print over";

/// Time to wait for the battery notification, in milliseconds
pub const DEFAULT_NOTIFICATION_TIMEOUT_MS: u64 = 5000;

/// Scan duration used by the CLI, in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 5;

/// Capacity of the broadcast channels carrying scan batches, values and events
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
