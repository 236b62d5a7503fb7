//! Core functionality for the print bridge
//! This module contains the BLE session core, independent of any front end.

pub mod bluetooth;

// Re-export commonly used types
pub use bluetooth::{BleStack, ConnectionSession};
