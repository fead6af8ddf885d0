//! Backlight configuration document as it appears on disk

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root of the backlight document
///
/// JSON documents are accepted too, JSON being a subset of YAML.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawBacklightConfig {
    #[serde(rename = "device_light_configuration", default)]
    pub devices: Vec<RawDeviceBacklight>,
}

/// Lighting description of one device
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawDeviceBacklight {
    pub device_name: String,
    /// Pause between the two halves of a blink, and between sweep steps (ms)
    #[serde(default)]
    pub backlight_time_offset: u64,
    #[serde(default)]
    pub color_spaces: Vec<RawColorSpace>,
    #[serde(default)]
    pub keyboard_backlight: Vec<RawKeyBacklight>,
}

/// Named colors valid for the ranges that reference this id
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawColorSpace {
    pub color_space_id: u32,
    #[serde(default)]
    pub on: Vec<RawColor>,
    #[serde(default)]
    pub off: Vec<RawColor>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawColor {
    pub color_name: String,
    /// Hex string, whitespace between pairs is ignored
    pub payload: String,
}

/// Inclusive key range sharing one color space and one pair of templates
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawKeyBacklight {
    pub key_range: [u8; 2],
    pub color_space: u32,
    #[serde(default)]
    pub key_number_shift: i32,
    pub statuses: RawKeyBacklightStatuses,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawKeyBacklightStatuses {
    pub on: RawStatus,
    pub off: RawStatus,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawStatus {
    /// Free-form label kept for documentation purposes
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub fallback_color: String,
    /// Byte template, e.g. `"90 %key %payload"`
    pub bytes: String,
}

impl RawBacklightConfig {
    /// Load the backlight document from a file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read backlight config: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse backlight config: {}", path.display()))
    }

    /// Parse a backlight document held in memory
    pub fn parse(content: &str) -> Result<Self> {
        let config: RawBacklightConfig =
            serde_yaml::from_str(content).context("Invalid backlight document")?;
        Ok(config)
    }
}
