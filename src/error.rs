//! Error types shared by the codec, the controllers and the manager

use thiserror::Error;

use crate::backlight::LightStatus;

/// Errors raised by the device layer
///
/// Only `ConfigDecode` is fatal, and only at startup. Everything else is
/// scoped to a single device or a single lighting effect.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Malformed byte template, payload or backlight document
    #[error("Config decode error: {0}")]
    ConfigDecode(String),

    /// No enumerable port matches the device name
    #[error("No {direction} port matches device '{device}'")]
    PortNotFound {
        device: String,
        direction: PortDirection,
    },

    /// Command addressed to a device that is not (or no longer) registered
    #[error("Device with alias '{0}' doesn't exist")]
    UnknownDevice(String),

    /// Command addressed to a device whose `active` flag is false
    #[error("Device with alias '{0}' is not active")]
    InactiveDevice(String),

    /// Neither the requested color nor the range fallback resolves
    #[error("No backlight mapping for device '{device}' key {key} color '{color}' ({status})")]
    ArgumentsNotFound {
        device: String,
        key: u8,
        color: String,
        status: LightStatus,
    },

    /// Device is listed but its output port is not bound right now
    #[error("Device '{0}' is not connected")]
    Disconnected(String),

    /// Driver-level failure (client creation, connect, send)
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Which side of a device a port belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortDirection::Input => write!(f, "input"),
            PortDirection::Output => write!(f, "output"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
