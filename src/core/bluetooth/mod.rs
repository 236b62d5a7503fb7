//! Bluetooth functionality for the print bridge
//! This module handles all bluetooth operations including scanning,
//! connecting, MTU negotiation, chunked writes and notifications.

mod bluest_stack;
mod connection;
pub mod constants;
pub mod error;
mod manager;
mod mtu;
mod notification;
mod registry;
mod resolver;
mod scanner;
pub mod simulated;
mod stack;
mod transfer;
pub mod types;

// Re-export types that should be publicly accessible
pub use bluest_stack::BluestStack;
pub use connection::ConnectionManager;
pub use error::{BleError, ErrorKind, Idempotency, NotificationError, SessionError, TransferError};
pub use manager::ConnectionSession;
pub use mtu::MtuNegotiator;
pub use notification::NotificationAwaiter;
pub use registry::{DeviceDiscoveryRegistry, DeviceFilter};
pub use resolver::{CharacteristicResolver, battery_level_readable, writable};
pub use scanner::DiscoveryScanner;
pub use simulated::{SimulatedPeripheral, SimulatedStack};
pub use stack::BleStack;
pub use transfer::{ChunkedTransfer, chunk_count};
pub use types::{
    BatteryLookup, BatteryReading, ConnectionState, Device, Mtu, ScanOptions, ServiceEndpoint,
    SessionEvent, TransferOutcome,
};
