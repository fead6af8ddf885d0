//! MIDI transport abstraction
//!
//! Controllers never hold on to driver port handles across reconnects: ports
//! are enumerated by display name, matched against the device name, and
//! bound again every time the device reappears.

#[cfg(test)]
pub mod fake;

use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::midi::format_hex;

/// Raw bytes of one incoming message, invoked on the driver's thread
pub type EventCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// Live input binding; dropping it unsubscribes
pub trait InputSubscription: Send {}

/// Bound output port
pub trait OutputPort: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Port enumeration and binding
pub trait MidiTransport: Send + Sync {
    /// Display names of the input ports currently present
    fn input_ports(&self) -> Vec<String>;

    /// Display names of the output ports currently present
    fn output_ports(&self) -> Vec<String>;

    /// Deliver every message of `port_name` to `callback` until the
    /// returned subscription is dropped
    fn subscribe(&self, port_name: &str, callback: EventCallback) -> Result<Box<dyn InputSubscription>>;

    fn open_output(&self, port_name: &str) -> Result<Box<dyn OutputPort>>;
}

/// Bidirectional, case-insensitive substring match between a configured
/// device name and a port display name
pub fn port_matches(device_name: &str, port_name: &str) -> bool {
    if device_name.is_empty() || port_name.is_empty() {
        return false;
    }
    let device = device_name.to_lowercase();
    let port = port_name.to_lowercase();
    port.contains(&device) || device.contains(&port)
}

/// First port matching the device name
pub fn find_port<'a>(device_name: &str, ports: &'a [String]) -> Option<&'a str> {
    ports
        .iter()
        .map(String::as_str)
        .find(|port| port_matches(device_name, port))
}

/// `midir` backed transport
///
/// A fresh client is created for every call so the port list always
/// reflects the current hardware.
#[derive(Debug, Clone)]
pub struct MidirTransport {
    client_name: String,
}

impl MidirTransport {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }

    fn input_client(&self) -> Result<MidiInput> {
        MidiInput::new(&format!("{}-Input", self.client_name))
            .map_err(|e| Error::Transport(format!("Failed to create MIDI input: {}", e)))
    }

    fn output_client(&self) -> Result<MidiOutput> {
        MidiOutput::new(&format!("{}-Output", self.client_name))
            .map_err(|e| Error::Transport(format!("Failed to create MIDI output: {}", e)))
    }
}

impl Default for MidirTransport {
    fn default() -> Self {
        Self::new("MIDI-Manipulator")
    }
}

impl MidiTransport for MidirTransport {
    fn input_ports(&self) -> Vec<String> {
        let Ok(midi_in) = self.input_client() else {
            return Vec::new();
        };
        midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect()
    }

    fn output_ports(&self) -> Vec<String> {
        let Ok(midi_out) = self.output_client() else {
            return Vec::new();
        };
        midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect()
    }

    fn subscribe(&self, port_name: &str, mut callback: EventCallback) -> Result<Box<dyn InputSubscription>> {
        let midi_in = self.input_client()?;
        let port = midi_in
            .ports()
            .into_iter()
            .find(|port| midi_in.port_name(port).map(|n| n == port_name).unwrap_or(false))
            .ok_or_else(|| Error::Transport(format!("Input port '{}' vanished", port_name)))?;

        info!("Connecting to input port: {}", port_name);

        let connection = midi_in
            .connect(
                &port,
                &self.client_name,
                move |_timestamp, data, _| callback(data),
                (),
            )
            .map_err(|e| Error::Transport(format!("Failed to connect to input port: {}", e)))?;

        Ok(Box::new(MidirSubscription {
            _connection: connection,
        }))
    }

    fn open_output(&self, port_name: &str) -> Result<Box<dyn OutputPort>> {
        let midi_out = self.output_client()?;
        let port = midi_out
            .ports()
            .into_iter()
            .find(|port| midi_out.port_name(port).map(|n| n == port_name).unwrap_or(false))
            .ok_or_else(|| Error::Transport(format!("Output port '{}' vanished", port_name)))?;

        info!("Connecting to output port: {}", port_name);

        let connection = midi_out
            .connect(&port, &self.client_name)
            .map_err(|e| Error::Transport(format!("Failed to connect to output port: {}", e)))?;

        Ok(Box::new(MidirOutput {
            port_name: port_name.to_string(),
            connection,
        }))
    }
}

struct MidirSubscription {
    _connection: MidiInputConnection<()>,
}

impl InputSubscription for MidirSubscription {}

struct MidirOutput {
    port_name: String,
    connection: MidiOutputConnection,
}

impl OutputPort for MidirOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.connection
            .send(bytes)
            .map_err(|e| Error::Transport(format!("Send to '{}' failed: {}", self.port_name, e)))?;
        debug!("Sent raw: {}", format_hex(bytes));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_matches_both_ways() {
        assert!(port_matches("MPD226", "MPD226 MIDI 1"));
        assert!(port_matches("Akai MPD226 Port A", "MPD226"));
        assert!(port_matches("mpd226", "MPD226 MIDI 1"));
        assert!(!port_matches("Launchpad", "MPD226 MIDI 1"));
        assert!(!port_matches("MPD226", ""));
    }

    #[test]
    fn test_find_port() {
        let ports = vec![
            "Midi Through Port-0".to_string(),
            "MPD226 MIDI 1".to_string(),
            "MPD226 MIDI 2".to_string(),
        ];
        assert_eq!(find_port("MPD226", &ports), Some("MPD226 MIDI 1"));
        assert_eq!(find_port("Launchpad", &ports), None);
    }
}
