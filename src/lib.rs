//! BLE print bridge library
//! Session core for talking to a BLE printer: discovery, a single
//! connection, battery reads and chunked payload writes.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;
