//! In-memory transport for controller and manager tests

use parking_lot::Mutex;
use std::sync::Arc;

use super::{EventCallback, InputSubscription, MidiTransport, OutputPort};
use crate::error::{Error, Result};

type SharedCallback = Arc<Mutex<EventCallback>>;

#[derive(Default)]
struct FakeState {
    inputs: Vec<String>,
    outputs: Vec<String>,
    subscribers: Vec<(u64, String, SharedCallback)>,
    next_id: u64,
    sent: Vec<(String, Vec<u8>)>,
    opened: usize,
    send_attempts: usize,
    fail_sends: bool,
    fail_opens: bool,
}

/// Toggleable ports, injectable events, captured sends
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plug or unplug a device exposing one input and one output port
    pub fn set_present(&self, port_name: &str, present: bool) {
        let mut state = self.state.lock();
        state.inputs.retain(|p| p != port_name);
        state.outputs.retain(|p| p != port_name);
        if present {
            state.inputs.push(port_name.to_string());
            state.outputs.push(port_name.to_string());
        }
    }

    /// Deliver raw bytes to every subscriber of the port; returns the
    /// number of callbacks invoked
    pub fn inject(&self, port_name: &str, bytes: &[u8]) -> usize {
        let callbacks: Vec<SharedCallback> = self
            .state
            .lock()
            .subscribers
            .iter()
            .filter(|(_, port, _)| port == port_name)
            .map(|(_, _, cb)| cb.clone())
            .collect();

        for callback in &callbacks {
            let mut callback = callback.lock();
            (*callback)(bytes);
        }
        callbacks.len()
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// How many times an output port was opened
    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    /// Sends attempted on any opened output, failed ones included
    pub fn send_attempts(&self) -> usize {
        self.state.lock().send_attempts
    }

    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_sends = fail;
    }

    /// Keep ports listed but refuse to open outputs
    pub fn fail_opens(&self, fail: bool) {
        self.state.lock().fail_opens = fail;
    }
}

impl MidiTransport for FakeTransport {
    fn input_ports(&self) -> Vec<String> {
        self.state.lock().inputs.clone()
    }

    fn output_ports(&self) -> Vec<String> {
        self.state.lock().outputs.clone()
    }

    fn subscribe(&self, port_name: &str, callback: EventCallback) -> Result<Box<dyn InputSubscription>> {
        let mut state = self.state.lock();
        if !state.inputs.iter().any(|p| p == port_name) {
            return Err(Error::Transport(format!("Input port '{}' vanished", port_name)));
        }
        let id = state.next_id;
        state.next_id += 1;
        state
            .subscribers
            .push((id, port_name.to_string(), Arc::new(Mutex::new(callback))));

        Ok(Box::new(FakeSubscription {
            id,
            state: self.state.clone(),
        }))
    }

    fn open_output(&self, port_name: &str) -> Result<Box<dyn OutputPort>> {
        let mut state = self.state.lock();
        if !state.outputs.iter().any(|p| p == port_name) {
            return Err(Error::Transport(format!("Output port '{}' vanished", port_name)));
        }
        if state.fail_opens {
            return Err(Error::Transport(format!("Output port '{}' is busy", port_name)));
        }
        state.opened += 1;

        Ok(Box::new(FakeOutput {
            port_name: port_name.to_string(),
            state: self.state.clone(),
        }))
    }
}

struct FakeSubscription {
    id: u64,
    state: Arc<Mutex<FakeState>>,
}

impl InputSubscription for FakeSubscription {}

impl Drop for FakeSubscription {
    fn drop(&mut self) {
        self.state.lock().subscribers.retain(|(id, _, _)| *id != self.id);
    }
}

struct FakeOutput {
    port_name: String,
    state: Arc<Mutex<FakeState>>,
}

impl OutputPort for FakeOutput {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        state.send_attempts += 1;
        if state.fail_sends {
            return Err(Error::Transport("send failed".to_string()));
        }
        state.sent.push((self.port_name.clone(), bytes.to_vec()));
        Ok(())
    }
}
