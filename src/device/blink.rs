//! Continuous blinking of registered keys

use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::backlight::{BacklightTables, LightStatus};

/// Colors a key alternates between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlinkingKey {
    pub on_color: String,
    pub off_color: String,
}

/// Keys currently blinking
///
/// Guarded by its own lock so the scheduler never contends with the key
/// event path.
#[derive(Debug, Default)]
pub struct BlinkSet {
    keys: Mutex<BTreeMap<u8, BlinkingKey>>,
}

impl BlinkSet {
    pub fn insert(&self, key: u8, blinking: BlinkingKey) {
        self.keys.lock().insert(key, blinking);
    }

    /// Returns false if the key was not blinking
    pub fn remove(&self, key: u8) -> bool {
        self.keys.lock().remove(&key).is_some()
    }

    pub fn contains(&self, key: u8) -> bool {
        self.keys.lock().contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<(u8, BlinkingKey)> {
        self.keys
            .lock()
            .iter()
            .map(|(key, blinking)| (*key, blinking.clone()))
            .collect()
    }
}

/// Alternating on/off phase; the first tick uses the on color
#[derive(Debug)]
pub struct BlinkPhase {
    on: bool,
}

impl Default for BlinkPhase {
    fn default() -> Self {
        Self { on: true }
    }
}

impl BlinkPhase {
    /// Bytes to send for this tick, then flip the phase
    ///
    /// Keys whose color resolves to nothing are skipped for this tick.
    pub fn tick(&mut self, set: &BlinkSet, tables: &BacklightTables, device: &str) -> Vec<Vec<u8>> {
        let on = self.on;
        self.on = !self.on;

        set.snapshot()
            .into_iter()
            .filter_map(|(key, blinking)| {
                let color = if on { &blinking.on_color } else { &blinking.off_color };
                tables.encode(device, key, color, LightStatus::On).ok()
            })
            .collect()
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}
