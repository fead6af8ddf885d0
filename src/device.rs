//! Device controller
//!
//! One controller owns one physical device for its whole lifetime: it
//! watches for the device's ports, binds them when they appear, classifies
//! incoming events into signals, executes lighting commands and drives the
//! blink scheduler. Three tasks share the controller state:
//!
//! - the supervisor, ticking on the reconnect interval and reacting to
//!   presence edges only
//! - the listener, subscribed to the input port while connected and
//!   draining classified signals to the shared sink
//! - the blinker, toggling registered keys on the blinking period
//!
//! All of them observe the same shutdown channel.

pub mod blink;
pub mod controls;
pub mod keys;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::backlight::{BacklightTables, LightStatus};
use crate::config::DeviceConfig;
use crate::error::{Error, PortDirection, Result};
use crate::health::{Check, CheckRegistry};
use crate::midi::{format_hex, MidiMessage};
use crate::model::{Command, NamespaceChange, Signal};
use crate::transport::{find_port, InputSubscription, MidiTransport, OutputPort};

pub use blink::{BlinkPhase, BlinkSet, BlinkingKey};
pub use controls::{Control, ControlAccumulator};
pub use keys::{KeyStateMachine, KeyStatus};

/// How often pending key contexts are promoted while connected
const SCAN_INTERVAL: Duration = Duration::from_millis(5);

/// Color used by the startup sweep; resolves through the range fallbacks
const SWEEP_COLOR: &str = "none";

/// Collaborators shared by every controller of a manager
#[derive(Clone)]
pub struct DeviceContext {
    pub transport: Arc<dyn MidiTransport>,
    pub backlight: Arc<BacklightTables>,
    pub health: Arc<dyn CheckRegistry>,
    pub signals: mpsc::Sender<Signal>,
}

/// Outcome of one supervisor tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// Connected and still present
    Steady,
    /// Not connected and still absent
    Absent,
    /// Ports appeared and were bound
    Connected,
    /// Ports appeared but binding failed; retried next tick
    ConnectFailed,
    /// Ports vanished
    Disconnected,
}

/// Supervisor to listener notifications
#[derive(Debug)]
enum LinkEvent {
    Up { input_port: String },
    Down,
}

struct DeviceState {
    machine: KeyStateMachine,
    namespace: String,
}

struct Shared {
    config: DeviceConfig,
    context: DeviceContext,
    state: Mutex<DeviceState>,
    blink_set: BlinkSet,
    output: Mutex<Option<Box<dyn OutputPort>>>,
    connected: AtomicBool,
    stopped: AtomicBool,
    connections: AtomicU64,
    wake: Notify,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    shutdown: watch::Sender<bool>,
}

/// Controller of one configured device
pub struct DeviceController {
    shared: Arc<Shared>,
    link_rx: Mutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceController {
    pub fn new(config: DeviceConfig, context: DeviceContext) -> Self {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let state = DeviceState {
            machine: KeyStateMachine::new(
                config.device_name.clone(),
                config.hold_delta(),
                &config.accumulate_controls,
            ),
            namespace: config.namespace.clone(),
        };

        Self {
            shared: Arc::new(Shared {
                config,
                context,
                state: Mutex::new(state),
                blink_set: BlinkSet::default(),
                output: Mutex::new(None),
                connected: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                connections: AtomicU64::new(0),
                wake: Notify::new(),
                link_tx,
                shutdown,
            }),
            link_rx: Mutex::new(Some(link_rx)),
            runner: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.config.device_name
    }

    pub fn is_active(&self) -> bool {
        self.shared.config.active
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    pub fn namespace(&self) -> String {
        self.shared.state.lock().namespace.clone()
    }

    /// Number of successful (re)initialisations so far
    pub fn connection_count(&self) -> u64 {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn blink_set(&self) -> &BlinkSet {
        &self.shared.blink_set
    }

    /// Start the controller in the background
    ///
    /// Waits for the startup delay, then runs the supervisor, the listener
    /// and the blinker until `stop` is called.
    pub fn run(&self) {
        let Some(link_rx) = self.link_rx.lock().take() else {
            warn!(device = %self.name(), "Device controller already started");
            return;
        };

        let shared = self.shared.clone();
        let mut shutdown = shared.shutdown.subscribe();

        let handle = tokio::spawn(async move {
            if !sleep_or_shutdown(shared.config.startup_delay(), &mut shutdown).await {
                return;
            }

            info!(device = %shared.config.device_name, "🎹 Device controller started");

            let supervisor = tokio::spawn(supervise(shared.clone(), shutdown.clone()));
            let listener = tokio::spawn(listen(shared.clone(), link_rx, shutdown.clone()));
            let blinker = tokio::spawn(blink_loop(shared.clone(), shutdown));

            let _ = tokio::join!(supervisor, listener, blinker);
            debug!(device = %shared.config.device_name, "Device controller tasks finished");
        });

        *self.runner.lock() = Some(handle);
    }

    /// Stop every task and release the bound ports
    ///
    /// The controller is unusable afterwards; commands fail as
    /// `UnknownDevice`.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.shutdown.send_replace(true);

        let runner = self.runner.lock().take();
        if let Some(runner) = runner {
            let _ = runner.await;
        }

        self.shared.connected.store(false, Ordering::SeqCst);
        *self.shared.output.lock() = None;
        info!(device = %self.name(), "Device controller stopped");
    }

    /// Execute one command on this device
    pub async fn execute_command(&self, command: &Command) -> Result<()> {
        let shared = &self.shared;
        if self.is_stopped() {
            return Err(Error::UnknownDevice(self.name().to_string()));
        }

        debug!(device = %self.name(), code = command.code(), "Executing command");

        match command {
            Command::TurnLightOn(cmd) => shared.light(cmd.key_code, &cmd.color_name, LightStatus::On),
            Command::TurnLightOff(cmd) => shared.light(cmd.key_code, &cmd.color_name, LightStatus::Off),
            Command::SingleBlink(cmd) => {
                shared.light(cmd.key_code, &cmd.color_name, LightStatus::On)?;
                tokio::time::sleep(shared.time_offset()).await;
                shared.light(cmd.key_code, &cmd.color_name, LightStatus::Off)
            }
            Command::SingleReversedBlink(cmd) => {
                shared.light(cmd.key_code, &cmd.color_name, LightStatus::Off)?;
                tokio::time::sleep(shared.time_offset()).await;
                shared.light(cmd.key_code, &cmd.color_name, LightStatus::On)
            }
            Command::SetActiveNamespace(cmd) => {
                let old_namespace = {
                    let mut state = shared.state.lock();
                    std::mem::replace(&mut state.namespace, cmd.namespace.clone())
                };
                info!(
                    device = %self.name(),
                    "Namespace changed: {} -> {}", old_namespace, cmd.namespace
                );
                shared
                    .emit(Signal::NamespaceChanged(NamespaceChange {
                        device: self.name().to_string(),
                        old_namespace,
                        new_namespace: cmd.namespace.clone(),
                    }))
                    .await;
                Ok(())
            }
            Command::StartBlinking(cmd) => {
                shared.blink_set.insert(
                    cmd.key_code,
                    BlinkingKey {
                        on_color: cmd.on_color_name.clone(),
                        off_color: cmd.off_color_name.clone(),
                    },
                );
                Ok(())
            }
            Command::StopBlinking(cmd) => {
                if !shared.blink_set.remove(cmd.key_code) {
                    debug!(device = %self.name(), key = cmd.key_code, "Key was not blinking");
                }
                Ok(())
            }
        }
    }
}

impl Shared {
    fn name(&self) -> &str {
        &self.config.device_name
    }

    fn time_offset(&self) -> Duration {
        self.context.backlight.time_offset(self.name())
    }

    /// React to the current port presence; only edges cause work
    fn health_tick(self: &Arc<Self>) -> HealthTransition {
        let name = self.name();
        let inputs = self.context.transport.input_ports();
        let outputs = self.context.transport.output_ports();
        let present = find_port(name, &inputs).is_some() && find_port(name, &outputs).is_some();

        if self.connected.load(Ordering::SeqCst) {
            if present {
                return HealthTransition::Steady;
            }

            warn!(device = %name, "Device disconnected");
            self.connected.store(false, Ordering::SeqCst);
            *self.output.lock() = None;
            let _ = self.link_tx.send(LinkEvent::Down);
            self.context
                .health
                .register_fail(Check::device_disconnected(name, "device was disconnected"));
            return HealthTransition::Disconnected;
        }

        if !present {
            debug!(device = %name, "No hardware connection to device");
            self.context.health.register_fail(Check::device_disconnected(
                name,
                "No hardware connection to device",
            ));
            return HealthTransition::Absent;
        }

        match self.init_connection(&inputs, &outputs) {
            Ok(input_port) => {
                let _ = self.link_tx.send(LinkEvent::Up { input_port });
                self.context
                    .health
                    .register_success(Check::device_disconnected(name, ""));
                info!(device = %name, "✅ Device connected");
                HealthTransition::Connected
            }
            Err(e) => {
                warn!(device = %name, "Unable to connect device: {}", e);
                self.context
                    .health
                    .register_fail(Check::device_disconnected(name, e.to_string()));
                HealthTransition::ConnectFailed
            }
        }
    }

    /// Bind the ports and start from fresh key and control state
    fn init_connection(self: &Arc<Self>, inputs: &[String], outputs: &[String]) -> Result<String> {
        let name = self.name();

        let input_port = find_port(name, inputs).ok_or_else(|| Error::PortNotFound {
            device: name.to_string(),
            direction: PortDirection::Input,
        })?;
        info!(device = %name, port = %input_port, "Matched midi in port");

        let output_port = find_port(name, outputs).ok_or_else(|| Error::PortNotFound {
            device: name.to_string(),
            direction: PortDirection::Output,
        })?;
        info!(device = %name, port = %output_port, "Matched midi out port");

        let output = self.context.transport.open_output(output_port)?;

        self.state.lock().machine = KeyStateMachine::new(
            name,
            self.config.hold_delta(),
            &self.config.accumulate_controls,
        );
        *self.output.lock() = Some(output);
        self.connected.store(true, Ordering::SeqCst);
        self.connections.fetch_add(1, Ordering::SeqCst);

        let shared = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            shared.startup_illumination(&mut shutdown).await;
        });

        Ok(input_port.to_string())
    }

    /// Light every declared key on, then off, range by range
    async fn startup_illumination(&self, shutdown: &mut watch::Receiver<bool>) {
        let name = self.name();
        let tables = &self.context.backlight;
        let offset = tables.time_offset(name);

        for range in tables.key_ranges(name) {
            for status in [LightStatus::On, LightStatus::Off] {
                for key in range.keys() {
                    let Ok(bytes) = tables.encode(name, key, SWEEP_COLOR, status) else {
                        continue;
                    };
                    if let Err(e) = self.send_raw(&bytes) {
                        debug!(device = %name, "Startup illumination aborted: {}", e);
                        return;
                    }
                    if !sleep_or_shutdown(offset, shutdown).await {
                        return;
                    }
                }
            }
        }
    }

    fn subscribe(self: &Arc<Self>, input_port: &str) -> Result<Box<dyn InputSubscription>> {
        let weak = Arc::downgrade(self);
        self.context.transport.subscribe(
            input_port,
            Box::new(move |bytes| {
                if let Some(shared) = weak.upgrade() {
                    shared.on_raw(bytes);
                }
            }),
        )
    }

    /// Transport callback: record the event and wake the listener
    fn on_raw(&self, bytes: &[u8]) {
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        let Some(message) = MidiMessage::parse(bytes) else {
            trace!(device = %self.name(), "Ignored MIDI: {}", format_hex(bytes));
            return;
        };
        trace!(device = %self.name(), "Received: {}", message);

        let changed = self.state.lock().machine.handle(&message, Instant::now());
        if changed {
            self.wake.notify_one();
        }
    }

    /// Scan under the lock, emit outside of it
    async fn drain(&self) {
        let signals = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.machine.scan(&state.namespace, Instant::now())
        };

        for signal in signals {
            if !self.emit(signal).await {
                break;
            }
        }
    }

    /// Send one signal to the sink; returns false once the controller is stopping
    ///
    /// A full sink with no reader must not keep `stop` waiting, so the send
    /// races the shutdown channel.
    async fn emit(&self, signal: Signal) -> bool {
        let mut shutdown = self.shutdown.subscribe();
        if *shutdown.borrow() {
            debug!(device = %self.name(), code = signal.code(), "Controller stopping, signal dropped");
            return false;
        }

        debug!(device = %self.name(), code = signal.code(), "Emitting signal");
        tokio::select! {
            sent = self.context.signals.send(signal) => {
                if sent.is_err() {
                    warn!(device = %self.name(), "Signal sink closed, dropping signal");
                }
                true
            }
            _ = shutdown.changed() => {
                debug!(device = %self.name(), "Controller stopping, pending signals dropped");
                false
            }
        }
    }

    fn light(&self, key: u8, color: &str, status: LightStatus) -> Result<()> {
        let bytes = self.context.backlight.encode(self.name(), key, color, status)?;
        self.send_raw(&bytes)
    }

    fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut output = self.output.lock();
        let port = output
            .as_mut()
            .ok_or_else(|| Error::Disconnected(self.name().to_string()))?;
        trace!(device = %self.name(), "Sending {}", format_hex(bytes));
        port.send(bytes)
    }
}

/// Sleep unless shutdown is requested first; returns false on shutdown
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.changed() => false,
    }
}

async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(shared.config.reconnect_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                shared.health_tick();
            }
        }
    }
}

async fn listen(
    shared: Arc<Shared>,
    mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut subscription: Option<Box<dyn InputSubscription>> = None;
    let mut scan = tokio::time::interval(SCAN_INTERVAL);
    scan.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            Some(event) = link_rx.recv() => match event {
                LinkEvent::Up { input_port } => {
                    subscription = None;
                    match shared.subscribe(&input_port) {
                        Ok(sub) => {
                            debug!(device = %shared.name(), port = %input_port, "Listening");
                            subscription = Some(sub);
                        }
                        Err(e) => {
                            warn!(device = %shared.name(), "Failed to subscribe: {}", e);
                            shared.connected.store(false, Ordering::SeqCst);
                            *shared.output.lock() = None;
                            shared
                                .context
                                .health
                                .register_fail(Check::device_disconnected(shared.name(), e.to_string()));
                        }
                    }
                }
                LinkEvent::Down => {
                    subscription = None;
                    debug!(device = %shared.name(), "Stopped listening");
                }
            },
            _ = shared.wake.notified() => shared.drain().await,
            _ = scan.tick(), if subscription.is_some() => shared.drain().await,
        }
    }
}

async fn blink_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let period = shared.config.blinking_period();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut phase = BlinkPhase::default();

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let frames = phase.tick(&shared.blink_set, &shared.context.backlight, shared.name());
                for bytes in frames {
                    if let Err(e) = shared.send_raw(&bytes) {
                        trace!(device = %shared.name(), "Blink frame skipped: {}", e);
                    }
                }
            }
        }
    }
}
