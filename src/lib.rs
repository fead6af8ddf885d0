//! MIDI Manipulator
//!
//! Drives MIDI pad/knob controllers as interactive front-ends: raw note and
//! control events become typed signals, lighting commands become the exact
//! bytes each device expects, and every configured device is kept alive
//! across hot-plug cycles and configuration reloads.

pub mod backlight;
pub mod config;
pub mod device;
pub mod error;
pub mod health;
pub mod manager;
pub mod midi;
pub mod model;
pub mod transport;

pub use backlight::{BacklightTables, LightStatus, RawBacklightConfig};
pub use config::{AppConfig, DeviceConfig};
pub use device::DeviceController;
pub use error::{Error, Result};
pub use health::{Check, CheckRegistry, HealthRegistry};
pub use manager::DeviceManager;
pub use model::{Command, Signal};
pub use transport::{MidiTransport, MidirTransport};
