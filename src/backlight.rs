//! Backlight codec
//!
//! Compiles the declarative lighting document into per-device lookup tables
//! once at startup, then turns `(device, key, color, on|off)` into the exact
//! bytes to send. Tables are immutable after `compile` and shared read-only
//! by every controller.

pub mod raw;
pub mod template;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
pub use raw::RawBacklightConfig;
use raw::{RawDeviceBacklight, RawKeyBacklight};
pub use template::ByteTemplate;

/// Which half of a color space / template pair is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LightStatus {
    On,
    Off,
}

impl fmt::Display for LightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LightStatus::On => write!(f, "on"),
            LightStatus::Off => write!(f, "off"),
        }
    }
}

/// Inclusive range of keys declared in one `keyboard_backlight` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRange {
    pub low: u8,
    pub high: u8,
}

impl KeyRange {
    pub fn keys(&self) -> impl Iterator<Item = u8> {
        self.low..=self.high
    }

    pub fn contains(&self, key: u8) -> bool {
        (self.low..=self.high).contains(&key)
    }
}

/// Compiled form of one key range
#[derive(Debug, Clone)]
struct RangeMapping {
    color_space: u32,
    key_shift: i32,
    on: ByteTemplate,
    off: ByteTemplate,
    on_fallback: String,
    off_fallback: String,
}

impl RangeMapping {
    fn template(&self, status: LightStatus) -> &ByteTemplate {
        match status {
            LightStatus::On => &self.on,
            LightStatus::Off => &self.off,
        }
    }

    fn fallback(&self, status: LightStatus) -> &str {
        match status {
            LightStatus::On => &self.on_fallback,
            LightStatus::Off => &self.off_fallback,
        }
    }
}

/// Lookup tables for one device
#[derive(Debug, Clone, Default)]
pub struct DeviceBacklight {
    time_offset: Duration,
    ranges: Vec<KeyRange>,
    mappings: Vec<RangeMapping>,
    /// key -> index into `mappings`; later ranges override earlier ones
    keys: HashMap<u8, usize>,
    /// (status, color space) -> color name -> payload
    colors: HashMap<(LightStatus, u32), HashMap<String, Vec<u8>>>,
}

impl DeviceBacklight {
    fn compile(raw: &RawDeviceBacklight) -> Result<Self> {
        let mut colors: HashMap<(LightStatus, u32), HashMap<String, Vec<u8>>> = HashMap::new();

        for space in &raw.color_spaces {
            for (status, entries) in [(LightStatus::On, &space.on), (LightStatus::Off, &space.off)] {
                let table = colors.entry((status, space.color_space_id)).or_default();
                for color in entries {
                    let payload = template::decode_payload(&color.payload).map_err(|e| {
                        Error::ConfigDecode(format!(
                            "device '{}' color '{}': {}",
                            raw.device_name, color.color_name, e
                        ))
                    })?;
                    table.insert(color.color_name.clone(), payload);
                }
            }
        }

        let mut ranges = Vec::with_capacity(raw.keyboard_backlight.len());
        let mut mappings = Vec::with_capacity(raw.keyboard_backlight.len());
        let mut keys = HashMap::new();

        for entry in &raw.keyboard_backlight {
            let range = compile_range(&raw.device_name, entry)?;
            let mapping = RangeMapping {
                color_space: entry.color_space,
                key_shift: entry.key_number_shift,
                on: ByteTemplate::parse(&entry.statuses.on.bytes)?,
                off: ByteTemplate::parse(&entry.statuses.off.bytes)?,
                on_fallback: entry.statuses.on.fallback_color.clone(),
                off_fallback: entry.statuses.off.fallback_color.clone(),
            };

            let idx = mappings.len();
            for key in range.keys() {
                keys.insert(key, idx);
            }
            ranges.push(range);
            mappings.push(mapping);
        }

        Ok(Self {
            time_offset: Duration::from_millis(raw.backlight_time_offset),
            ranges,
            mappings,
            keys,
            colors,
        })
    }

    fn payload(&self, status: LightStatus, color_space: u32, color: &str) -> Option<&[u8]> {
        self.colors
            .get(&(status, color_space))
            .and_then(|names| names.get(color))
            .map(Vec::as_slice)
    }
}

/// Validate a range and its key shift
fn compile_range(device: &str, entry: &RawKeyBacklight) -> Result<KeyRange> {
    let [low, high] = entry.key_range;
    if low > high {
        return Err(Error::ConfigDecode(format!(
            "device '{}': key range [{}, {}] is reversed",
            device, low, high
        )));
    }

    for bound in [low, high] {
        let shifted = i32::from(bound) - entry.key_number_shift;
        if !(0..=255).contains(&shifted) {
            return Err(Error::ConfigDecode(format!(
                "device '{}': key {} shifted by {} leaves the byte range",
                device, bound, entry.key_number_shift
            )));
        }
    }

    Ok(KeyRange { low, high })
}

/// Decoded backlight tables for every device of the document
#[derive(Debug, Clone, Default)]
pub struct BacklightTables {
    devices: HashMap<String, DeviceBacklight>,
}

impl BacklightTables {
    /// Compile the raw document
    ///
    /// Fails with `ConfigDecode` on the first malformed payload, template,
    /// range or duplicated device entry.
    pub fn compile(raw: &RawBacklightConfig) -> Result<Self> {
        let mut devices = HashMap::with_capacity(raw.devices.len());

        for device in &raw.devices {
            let compiled = DeviceBacklight::compile(device)?;
            debug!(
                device = %device.device_name,
                ranges = compiled.ranges.len(),
                keys = compiled.keys.len(),
                "Compiled backlight tables"
            );
            if devices.insert(device.device_name.clone(), compiled).is_some() {
                return Err(Error::ConfigDecode(format!(
                    "device '{}' is declared twice",
                    device.device_name
                )));
            }
        }

        Ok(Self { devices })
    }

    /// Produce the bytes lighting `key` of `device` with `color`
    ///
    /// An unknown color falls back to the range's fallback color for the same
    /// status. When neither resolves, `ArgumentsNotFound` is returned.
    pub fn encode(&self, device: &str, key: u8, color: &str, status: LightStatus) -> Result<Vec<u8>> {
        let not_found = || Error::ArgumentsNotFound {
            device: device.to_string(),
            key,
            color: color.to_string(),
            status,
        };

        let tables = self.devices.get(device).ok_or_else(not_found)?;
        let mapping = tables
            .keys
            .get(&key)
            .map(|&idx| &tables.mappings[idx])
            .ok_or_else(not_found)?;

        let payload = tables
            .payload(status, mapping.color_space, color)
            .or_else(|| tables.payload(status, mapping.color_space, mapping.fallback(status)))
            .ok_or_else(not_found)?;

        // Range compile guarantees the shifted key fits in a byte
        let wire_key = (i32::from(key) - mapping.key_shift) as u8;

        Ok(mapping.template(status).render(wire_key, payload))
    }

    /// Pause between blink halves and sweep steps; zero for unknown devices
    pub fn time_offset(&self, device: &str) -> Duration {
        self.devices
            .get(device)
            .map(|d| d.time_offset)
            .unwrap_or_default()
    }

    /// Declared key ranges in document order; empty for unknown devices
    pub fn key_ranges(&self, device: &str) -> &[KeyRange] {
        self.devices
            .get(device)
            .map(|d| d.ranges.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_device(&self, device: &str) -> bool {
        self.devices.contains_key(device)
    }
}
