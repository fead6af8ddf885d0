//! Per-key press / hold / release classification
//!
//! Raw events only record what happened; `scan` turns recorded transitions
//! (and elapsed time) into signals. The controller calls `handle` from the
//! transport callback and `scan` from its listener, both under one lock.

use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::controls::ControlAccumulator;
use crate::config::ControlConfig;
use crate::midi::MidiMessage;
use crate::model::{ControlSignal, NoteSignal, Signal};

/// Lifecycle of one key context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// Pressed, not yet announced
    Unclassified,
    Pushed,
    Hold,
    /// Released before the hold delta, pending emission
    Released,
    /// Released at or past the hold delta, pending emission
    ReleasedAfterHold,
    /// Accepted control value, pending emission
    ControlPushed,
}

#[derive(Debug, Clone, Copy)]
struct KeyContext {
    /// Press velocity, or effective control value
    velocity: u8,
    pressed_at: Instant,
    status: KeyStatus,
    /// NotePushed already emitted for this press
    announced: bool,
    /// NoteHold already emitted for this press
    hold_announced: bool,
}

/// Click buffer and control accumulators of one device
#[derive(Debug)]
pub struct KeyStateMachine {
    device: String,
    hold_delta: Duration,
    click_buffer: BTreeMap<u8, KeyContext>,
    controls: ControlAccumulator,
}

impl KeyStateMachine {
    pub fn new(device: impl Into<String>, hold_delta: Duration, controls: &[ControlConfig]) -> Self {
        Self {
            device: device.into(),
            hold_delta,
            click_buffer: BTreeMap::new(),
            controls: ControlAccumulator::from_config(controls),
        }
    }

    /// Record a raw event; returns true if a context changed
    pub fn handle(&mut self, message: &MidiMessage, now: Instant) -> bool {
        match *message {
            MidiMessage::NoteOn { key, velocity, .. } => {
                self.click_buffer.insert(
                    key,
                    KeyContext {
                        velocity,
                        pressed_at: now,
                        status: KeyStatus::Unclassified,
                        announced: false,
                        hold_announced: false,
                    },
                );
                true
            }
            MidiMessage::NoteOff { key, .. } => {
                let Some(context) = self.click_buffer.get_mut(&key) else {
                    return false;
                };
                match context.status {
                    KeyStatus::Unclassified | KeyStatus::Pushed => {
                        // A hold that elapsed between scans still counts as a hold
                        let held =
                            now.saturating_duration_since(context.pressed_at) >= self.hold_delta;
                        context.status = if held {
                            KeyStatus::ReleasedAfterHold
                        } else {
                            KeyStatus::Released
                        };
                        true
                    }
                    KeyStatus::Hold => {
                        context.status = KeyStatus::ReleasedAfterHold;
                        true
                    }
                    _ => false,
                }
            }
            MidiMessage::ControlChange { key, value, .. } => {
                let (value, accepted) = self.controls.apply(key, value);
                if accepted {
                    self.click_buffer.insert(
                        key,
                        KeyContext {
                            velocity: value,
                            pressed_at: now,
                            status: KeyStatus::ControlPushed,
                            announced: false,
                            hold_announced: false,
                        },
                    );
                }
                accepted
            }
        }
    }

    /// Promote contexts and collect the signals to emit, in key order
    ///
    /// Terminal contexts are removed once their signal is produced.
    pub fn scan(&mut self, namespace: &str, now: Instant) -> Vec<Signal> {
        let mut signals = Vec::new();
        let device = &self.device;
        let hold_delta = self.hold_delta;

        let note = |key: u8, velocity: u8| NoteSignal {
            device: device.clone(),
            namespace: namespace.to_string(),
            key_code: key,
            velocity,
        };

        self.click_buffer.retain(|&key, context| match context.status {
            KeyStatus::Unclassified => {
                signals.push(Signal::NotePushed(note(key, context.velocity)));
                context.status = KeyStatus::Pushed;
                context.announced = true;
                true
            }
            KeyStatus::Pushed => {
                if now.saturating_duration_since(context.pressed_at) >= hold_delta {
                    signals.push(Signal::NoteHold(note(key, context.velocity)));
                    context.status = KeyStatus::Hold;
                    context.hold_announced = true;
                }
                true
            }
            KeyStatus::Hold => true,
            KeyStatus::Released => {
                if !context.announced {
                    signals.push(Signal::NotePushed(note(key, context.velocity)));
                }
                signals.push(Signal::NoteReleased(note(key, context.velocity)));
                false
            }
            KeyStatus::ReleasedAfterHold => {
                if !context.announced {
                    signals.push(Signal::NotePushed(note(key, context.velocity)));
                }
                if !context.hold_announced {
                    signals.push(Signal::NoteHold(note(key, context.velocity)));
                }
                signals.push(Signal::NoteReleasedAfterHold(note(key, context.velocity)));
                false
            }
            KeyStatus::ControlPushed => {
                signals.push(Signal::ControlPushed(ControlSignal {
                    device: device.clone(),
                    namespace: namespace.to_string(),
                    key_code: key,
                    value: context.velocity,
                }));
                false
            }
        });

        signals
    }

    pub fn status(&self, key: u8) -> Option<KeyStatus> {
        self.click_buffer.get(&key).map(|c| c.status)
    }

    pub fn is_idle(&self) -> bool {
        self.click_buffer.is_empty()
    }

    pub fn controls(&self) -> &ControlAccumulator {
        &self.controls
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControlTriggers;
    use proptest::prelude::*;

    const HOLD: Duration = Duration::from_millis(1000);

    fn machine() -> KeyStateMachine {
        KeyStateMachine::new("pad", HOLD, &[])
    }

    fn on(key: u8, velocity: u8) -> MidiMessage {
        MidiMessage::NoteOn {
            channel: 0,
            key,
            velocity,
        }
    }

    fn off(key: u8) -> MidiMessage {
        MidiMessage::NoteOff {
            channel: 0,
            key,
            velocity: 0,
        }
    }

    fn codes(signals: &[Signal]) -> Vec<&'static str> {
        signals.iter().map(Signal::code).collect()
    }

    /// Press, scan every `step` until `held`, release, scan twice more
    fn press_and_release(held: Duration, step: Duration) -> Vec<Signal> {
        press_and_release_with(held, step, true)
    }

    /// Like `press_and_release`; `scan_at_release` controls whether a scan
    /// runs at the release instant before the note-off is recorded
    fn press_and_release_with(held: Duration, step: Duration, scan_at_release: bool) -> Vec<Signal> {
        let mut machine = machine();
        let start = Instant::now();
        let mut signals = Vec::new();

        machine.handle(&on(36, 90), start);
        let mut t = Duration::ZERO;
        while t < held {
            signals.extend(machine.scan("ns", start + t));
            t += step;
        }
        if scan_at_release {
            signals.extend(machine.scan("ns", start + held));
        }
        machine.handle(&off(36), start + held);
        signals.extend(machine.scan("ns", start + held));
        signals.extend(machine.scan("ns", start + held + step));

        assert!(machine.is_idle());
        signals
    }

    #[test]
    fn test_short_press() {
        let signals = press_and_release(Duration::from_millis(300), Duration::from_millis(5));
        assert_eq!(codes(&signals), vec!["NotePushed", "NoteReleased"]);
        assert_eq!(
            signals[1],
            Signal::NoteReleased(NoteSignal {
                device: "pad".to_string(),
                namespace: "ns".to_string(),
                key_code: 36,
                velocity: 90,
            })
        );
    }

    #[test]
    fn test_long_press() {
        let signals = press_and_release(Duration::from_millis(1500), Duration::from_millis(5));
        assert_eq!(
            codes(&signals),
            vec!["NotePushed", "NoteHold", "NoteReleasedAfterHold"]
        );
    }

    #[test]
    fn test_release_before_first_scan() {
        let mut machine = machine();
        let now = Instant::now();
        machine.handle(&on(1, 64), now);
        machine.handle(&off(1), now);

        let signals = machine.scan("ns", now);
        assert_eq!(codes(&signals), vec!["NotePushed", "NoteReleased"]);
        assert!(machine.is_idle());
    }

    #[test]
    fn test_release_past_hold_delta_between_scans() {
        let mut machine = machine();
        let start = Instant::now();
        machine.handle(&on(36, 90), start);

        let mut signals = machine.scan("ns", start);
        signals.extend(machine.scan("ns", start + Duration::from_millis(998)));
        machine.handle(&off(36), start + Duration::from_millis(1001));
        assert_eq!(machine.status(36), Some(KeyStatus::ReleasedAfterHold));
        signals.extend(machine.scan("ns", start + Duration::from_millis(1001)));

        assert_eq!(
            codes(&signals),
            vec!["NotePushed", "NoteHold", "NoteReleasedAfterHold"]
        );
        assert!(machine.is_idle());
    }

    #[test]
    fn test_long_press_without_any_scan() {
        let mut machine = machine();
        let start = Instant::now();
        machine.handle(&on(4, 70), start);
        machine.handle(&off(4), start + HOLD);

        let signals = machine.scan("ns", start + HOLD);
        assert_eq!(
            codes(&signals),
            vec!["NotePushed", "NoteHold", "NoteReleasedAfterHold"]
        );
        assert!(signals.iter().all(|s| s.key_code() == Some(4)));
        assert!(machine.is_idle());
    }

    #[test]
    fn test_note_off_without_press_is_ignored() {
        let mut machine = machine();
        assert!(!machine.handle(&off(5), Instant::now()));
        assert!(machine.scan("ns", Instant::now()).is_empty());
    }

    #[test]
    fn test_status_transitions() {
        let mut machine = machine();
        let start = Instant::now();
        machine.handle(&on(7, 10), start);
        assert_eq!(machine.status(7), Some(KeyStatus::Unclassified));
        machine.scan("ns", start);
        assert_eq!(machine.status(7), Some(KeyStatus::Pushed));
        machine.scan("ns", start + HOLD);
        assert_eq!(machine.status(7), Some(KeyStatus::Hold));
        machine.handle(&off(7), start + HOLD);
        assert_eq!(machine.status(7), Some(KeyStatus::ReleasedAfterHold));
        machine.scan("ns", start + HOLD);
        assert_eq!(machine.status(7), None);
    }

    #[test]
    fn test_control_pushed_is_one_shot() {
        let mut machine = KeyStateMachine::new(
            "pad",
            HOLD,
            &[ControlConfig {
                keys: vec![20],
                rotate: false,
                value_range: [0, 1],
                initial_value: 0,
                triggers: ControlTriggers {
                    increment: 1,
                    decrement: 127,
                },
            }],
        );
        let now = Instant::now();
        let cc = |value| MidiMessage::ControlChange {
            channel: 0,
            key: 20,
            value,
        };

        assert!(machine.handle(&cc(1), now));
        let signals = machine.scan("ns", now);
        assert_eq!(
            signals,
            vec![Signal::ControlPushed(ControlSignal {
                device: "pad".to_string(),
                namespace: "ns".to_string(),
                key_code: 20,
                value: 1,
            })]
        );
        assert!(machine.is_idle());

        // At the ceiling: rejected, nothing recorded
        assert!(!machine.handle(&cc(1), now));
        assert!(machine.scan("ns", now).is_empty());
    }

    #[test]
    fn test_keys_are_tracked_independently() {
        let mut machine = machine();
        let now = Instant::now();
        machine.handle(&on(2, 1), now);
        machine.handle(&on(1, 1), now);
        let signals = machine.scan("ns", now);
        let keys: Vec<_> = signals.iter().filter_map(Signal::key_code).collect();
        assert_eq!(keys, vec![1, 2]);
    }

    proptest! {
        #[test]
        fn short_press_yields_pushed_then_released(
            held_ms in 0u64..1000,
            step_ms in 1u64..50,
        ) {
            let signals = press_and_release(
                Duration::from_millis(held_ms),
                Duration::from_millis(step_ms),
            );
            prop_assert_eq!(codes(&signals), vec!["NotePushed", "NoteReleased"]);
        }

        #[test]
        fn long_press_yields_hold_sequence(
            held_ms in 1000u64..3000,
            step_ms in 1u64..50,
            scan_at_release in any::<bool>(),
        ) {
            let signals = press_and_release_with(
                Duration::from_millis(held_ms),
                Duration::from_millis(step_ms),
                scan_at_release,
            );
            prop_assert_eq!(
                codes(&signals),
                vec!["NotePushed", "NoteHold", "NoteReleasedAfterHold"]
            );
        }
    }
}
