//! Clamped control accumulators
//!
//! Rotary encoders typically send one value for "turned right" and another
//! for "turned left". A declared control turns those into a bounded counter.

use std::collections::HashMap;

use crate::config::ControlConfig;

/// Accumulator state of one control key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Control {
    pub rotate: bool,
    pub min: u8,
    pub max: u8,
    pub value: u8,
    pub increment_trigger: u8,
    pub decrement_trigger: u8,
}

impl Control {
    fn from_config(config: &ControlConfig) -> Self {
        let [min, max] = config.value_range;
        Self {
            rotate: config.rotate,
            min,
            max,
            value: config.initial_value,
            increment_trigger: config.triggers.increment,
            decrement_trigger: config.triggers.decrement,
        }
    }
}

/// Per-key accumulators of one device
#[derive(Debug, Clone, Default)]
pub struct ControlAccumulator {
    controls: HashMap<u8, Control>,
}

impl ControlAccumulator {
    /// Fresh accumulators at their initial values
    pub fn from_config(configs: &[ControlConfig]) -> Self {
        let mut controls = HashMap::new();
        for config in configs {
            let control = Control::from_config(config);
            for &key in &config.keys {
                controls.insert(key, control);
            }
        }
        Self { controls }
    }

    /// Feed one raw control-change value
    ///
    /// Returns the effective value and whether a signal should be emitted.
    /// Undeclared and rotating controls pass the raw value through.
    pub fn apply(&mut self, key: u8, raw: u8) -> (u8, bool) {
        let control = match self.controls.get_mut(&key) {
            Some(control) if !control.rotate => control,
            _ => return (raw, true),
        };

        if raw == control.increment_trigger && control.value < control.max {
            control.value += 1;
            (control.value, true)
        } else if raw == control.decrement_trigger && control.value > control.min {
            control.value -= 1;
            (control.value, true)
        } else {
            (control.value, false)
        }
    }

    pub fn get(&self, key: u8) -> Option<&Control> {
        self.controls.get(&key)
    }
}
