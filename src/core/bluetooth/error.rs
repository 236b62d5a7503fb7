//! Error types for the bluetooth core.
//!
//! Call sites branch on [`ErrorKind`] and [`Idempotency`], never on message
//! text. The message carried by a stack error is the one the host stack
//! produced and is shown to the user verbatim.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::core::bluetooth::constants::NO_CONNECTION_CODE;

/// Coarse classification of a stack failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    /// The requested state is already reached.
    Idempotent,
    /// The peer or stack refused a value (e.g. an MTU probe).
    Rejected,
    /// A looked-up resource does not exist.
    NotFound,
    /// The radio operation itself failed.
    Transport,
}

/// The idempotency conditions the session treats as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Idempotency {
    AdapterAlreadyOpen,
    AlreadyDiscovering,
    NoActiveConnection,
}

/// A structured failure reported by a [`BleStack`](crate::core::bluetooth::BleStack).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BleError {
    #[error("{message}")]
    Idempotent {
        condition: Idempotency,
        message: String,
    },

    #[error("{message}")]
    Rejected { message: String },

    #[error("{message}")]
    NotFound { message: String },

    #[error("{message}")]
    Transport { code: Option<i32>, message: String },
}

impl BleError {
    pub fn adapter_already_open() -> Self {
        Self::Idempotent {
            condition: Idempotency::AdapterAlreadyOpen,
            message: "openBluetoothAdapter:fail already opened".to_string(),
        }
    }

    pub fn already_discovering() -> Self {
        Self::Idempotent {
            condition: Idempotency::AlreadyDiscovering,
            message: "startBluetoothDevicesDiscovery:fail already discovering devices".to_string(),
        }
    }

    pub fn no_active_connection() -> Self {
        Self::from_code(NO_CONNECTION_CODE, "closeBLEConnection:fail no connection")
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            code: None,
            message: message.into(),
        }
    }

    /// Builds an error from a numeric platform code.
    pub fn from_code(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            NO_CONNECTION_CODE => Self::Idempotent {
                condition: Idempotency::NoActiveConnection,
                message,
            },
            _ => Self::Transport {
                code: Some(code),
                message,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Idempotent { .. } => ErrorKind::Idempotent,
            Self::Rejected { .. } => ErrorKind::Rejected,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transport { .. } => ErrorKind::Transport,
        }
    }

    /// The numeric code, if the stack supplied one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Idempotent {
                condition: Idempotency::NoActiveConnection,
                ..
            } => Some(NO_CONNECTION_CODE),
            Self::Transport { code, .. } => *code,
            _ => None,
        }
    }

    /// True if this error reports exactly `condition`.
    pub fn is(&self, condition: Idempotency) -> bool {
        matches!(self, Self::Idempotent { condition: c, .. } if *c == condition)
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Idempotent { message, .. }
            | Self::Rejected { message }
            | Self::NotFound { message }
            | Self::Transport { message, .. } => message,
        }
    }
}

/// Failure of a chunked payload transfer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("chunk {index} of {total} failed: {source}")]
    ChunkFailed {
        index: usize,
        total: usize,
        #[source]
        source: BleError,
    },

    #[error("chunk size must be non-zero")]
    EmptyMtu,
}

/// Failure while waiting for a pushed notification value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("no notification received within {0:?}")]
    Timeout(Duration),

    #[error("notification source closed")]
    Closed,
}

/// Everything a [`ConnectionSession`](crate::core::bluetooth::ConnectionSession) operation can surface.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Ble(#[from] BleError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Notification(#[from] NotificationError),

    #[error("no device connected")]
    NotConnected,

    #[error("a connection attempt to {0} is already in progress")]
    Busy(String),

    #[error("invalid device name pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

impl SessionError {
    /// Text suitable for direct display. Stack failures keep the stack's own message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Ble(e) => e.message().to_string(),
            Self::Transfer(TransferError::ChunkFailed { source, .. }) => source.message().to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_maps_no_connection() {
        let err = BleError::from_code(NO_CONNECTION_CODE, "closeBLEConnection:fail");
        assert_eq!(err.kind(), ErrorKind::Idempotent);
        assert!(err.is(Idempotency::NoActiveConnection));
        assert_eq!(err.code(), Some(NO_CONNECTION_CODE));
    }

    #[test]
    fn test_from_code_other_is_transport() {
        let err = BleError::from_code(10012, "createBLEConnection:fail timeout");
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.code(), Some(10012));
        assert!(!err.is(Idempotency::NoActiveConnection));
        assert_eq!(err.to_string(), "createBLEConnection:fail timeout");
    }

    #[test]
    fn test_user_message_keeps_stack_text() {
        let err = SessionError::from(TransferError::ChunkFailed {
            index: 2,
            total: 5,
            source: BleError::transport("writeBLECharacteristicValue:fail"),
        });
        assert_eq!(err.user_message(), "writeBLECharacteristicValue:fail");
        assert_eq!(SessionError::NotConnected.user_message(), "no device connected");
    }
}
