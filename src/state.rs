//! Application state management
//! This module defines the state shared by every command.

use std::sync::Arc;

use log::info;
use tokio::sync::Mutex;

use crate::config::session_config::SessionConfig;
use crate::core::bluetooth::{BleStack, ConnectionSession, SessionError};

/// Global application state
pub struct AppState {
    /// The connection session, serialized behind one lock
    pub session: Arc<Mutex<ConnectionSession>>,
}

impl AppState {
    /// Creates a new AppState over the given host stack
    pub fn new(stack: Arc<dyn BleStack>, config: SessionConfig) -> Result<Self, SessionError> {
        info!("Initializing ConnectionSession...");
        let session = ConnectionSession::open(stack, config)?;
        Ok(Self {
            session: Arc::new(Mutex::new(session)),
        })
    }
}
