//! Signals emitted to, and commands received from, the agent framework
//!
//! Both are closed enums tagged by a `code` field on the wire, so a new
//! variant has to be handled in every `match` before the crate compiles.

use serde::{Deserialize, Serialize};

/// Payload shared by every note lifecycle signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSignal {
    pub device: String,
    pub namespace: String,
    pub key_code: u8,
    pub velocity: u8,
}

/// Payload of a control-change signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSignal {
    pub device: String,
    pub namespace: String,
    pub key_code: u8,
    pub value: u8,
}

/// Payload of a namespace switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceChange {
    pub device: String,
    pub old_namespace: String,
    pub new_namespace: String,
}

/// Semantic event produced by a controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum Signal {
    /// Key went down
    NotePushed(NoteSignal),
    /// Key stayed down for at least the hold delta
    NoteHold(NoteSignal),
    /// Key released before the hold delta elapsed
    NoteReleased(NoteSignal),
    /// Key released after a hold
    NoteReleasedAfterHold(NoteSignal),
    /// Accepted control-change (one-shot, no hold concept)
    ControlPushed(ControlSignal),
    /// Active namespace of a device was switched
    NamespaceChanged(NamespaceChange),
}

impl Signal {
    /// Wire code of the signal
    pub fn code(&self) -> &'static str {
        match self {
            Signal::NotePushed(_) => "NotePushed",
            Signal::NoteHold(_) => "NoteHold",
            Signal::NoteReleased(_) => "NoteReleased",
            Signal::NoteReleasedAfterHold(_) => "NoteReleasedAfterHold",
            Signal::ControlPushed(_) => "ControlPushed",
            Signal::NamespaceChanged(_) => "NamespaceChanged",
        }
    }

    /// Human readable description, published alongside the code
    pub fn description(&self) -> &'static str {
        match self {
            Signal::NotePushed(_) => "Key with 'Note' type was pressed on a device",
            Signal::NoteHold(_) => "Key with 'Note' type is being held down",
            Signal::NoteReleased(_) => "Key with 'Note' type was released on a device",
            Signal::NoteReleasedAfterHold(_) => {
                "Key with 'Note' type was released on a device after hold"
            }
            Signal::ControlPushed(_) => "Key with 'Control' type changed its value",
            Signal::NamespaceChanged(_) => "Active namespace of a device was changed",
        }
    }

    /// Device that produced the signal
    pub fn device(&self) -> &str {
        match self {
            Signal::NotePushed(s)
            | Signal::NoteHold(s)
            | Signal::NoteReleased(s)
            | Signal::NoteReleasedAfterHold(s) => &s.device,
            Signal::ControlPushed(s) => &s.device,
            Signal::NamespaceChanged(s) => &s.device,
        }
    }

    /// Key the signal refers to, if any
    pub fn key_code(&self) -> Option<u8> {
        match self {
            Signal::NotePushed(s)
            | Signal::NoteHold(s)
            | Signal::NoteReleased(s)
            | Signal::NoteReleasedAfterHold(s) => Some(s.key_code),
            Signal::ControlPushed(s) => Some(s.key_code),
            Signal::NamespaceChanged(_) => None,
        }
    }
}

/// Light a single key with a named color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightCommand {
    pub key_code: u8,
    pub device_alias: String,
    pub color_name: String,
}

/// Switch the namespace attached to a device's signals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceCommand {
    pub namespace: String,
    pub device_alias: String,
}

/// Register a key in the blink set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartBlinkingCommand {
    pub key_code: u8,
    pub device_alias: String,
    pub on_color_name: String,
    pub off_color_name: String,
}

/// Remove a key from the blink set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopBlinkingCommand {
    pub key_code: u8,
    pub device_alias: String,
}

/// Command routed to one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum Command {
    #[serde(rename = "TurnLightOnCommand")]
    TurnLightOn(LightCommand),
    #[serde(rename = "TurnLightOffCommand")]
    TurnLightOff(LightCommand),
    /// on, wait time offset, off
    #[serde(rename = "SingleBlinkCommand")]
    SingleBlink(LightCommand),
    /// off, wait time offset, on
    #[serde(rename = "SingleReversedBlinkCommand")]
    SingleReversedBlink(LightCommand),
    #[serde(rename = "SetActiveNamespaceCommand")]
    SetActiveNamespace(NamespaceCommand),
    #[serde(rename = "StartBlinkingCommand")]
    StartBlinking(StartBlinkingCommand),
    #[serde(rename = "StopBlinkingCommand")]
    StopBlinking(StopBlinkingCommand),
}

impl Command {
    /// Device the command is addressed to
    pub fn device_alias(&self) -> &str {
        match self {
            Command::TurnLightOn(c)
            | Command::TurnLightOff(c)
            | Command::SingleBlink(c)
            | Command::SingleReversedBlink(c) => &c.device_alias,
            Command::SetActiveNamespace(c) => &c.device_alias,
            Command::StartBlinking(c) => &c.device_alias,
            Command::StopBlinking(c) => &c.device_alias,
        }
    }

    /// Wire code of the command
    pub fn code(&self) -> &'static str {
        match self {
            Command::TurnLightOn(_) => "TurnLightOnCommand",
            Command::TurnLightOff(_) => "TurnLightOffCommand",
            Command::SingleBlink(_) => "SingleBlinkCommand",
            Command::SingleReversedBlink(_) => "SingleReversedBlinkCommand",
            Command::SetActiveNamespace(_) => "SetActiveNamespaceCommand",
            Command::StartBlinking(_) => "StartBlinkingCommand",
            Command::StopBlinking(_) => "StopBlinkingCommand",
        }
    }
}
