//! Device manager: the fleet of controllers behind one signal stream
//!
//! Configuration changes replace the whole fleet. Every controller of the
//! previous generation is stopped before the new one is started, so no
//! controller ever runs with a stale configuration.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::backlight::BacklightTables;
use crate::config::DeviceConfig;
use crate::device::{DeviceContext, DeviceController};
use crate::error::{Error, Result};
use crate::health::CheckRegistry;
use crate::model::{Command, Signal};
use crate::transport::MidiTransport;

/// Capacity of the fan-in signal channel
pub const SIGNAL_BUFFER: usize = 1000;

pub struct DeviceManager {
    devices: RwLock<HashMap<String, Arc<DeviceController>>>,
    context: DeviceContext,
}

impl DeviceManager {
    /// Create an empty manager and the receiving end of its signal stream
    pub fn new(
        transport: Arc<dyn MidiTransport>,
        backlight: Arc<BacklightTables>,
        health: Arc<dyn CheckRegistry>,
    ) -> (Self, mpsc::Receiver<Signal>) {
        let (signals, rx) = mpsc::channel(SIGNAL_BUFFER);
        let manager = Self {
            devices: RwLock::new(HashMap::new()),
            context: DeviceContext {
                transport,
                backlight,
                health,
                signals,
            },
        };
        (manager, rx)
    }

    /// Replace the fleet with one fresh controller per configuration entry
    pub async fn update_devices(&self, configs: Vec<DeviceConfig>) {
        let mut devices = self.devices.write().await;

        for (name, controller) in devices.drain() {
            debug!(device = %name, "Stopping controller for reload");
            controller.stop().await;
        }

        for config in configs {
            let name = config.device_name.clone();
            if !self.context.backlight.has_device(&name) {
                warn!(device = %name, "No backlight configuration for device, lighting commands will fail");
            }

            let controller = Arc::new(DeviceController::new(config, self.context.clone()));
            controller.run();
            devices.insert(name, controller);
        }

        info!("🔄 Device fleet updated: {} device(s)", devices.len());
    }

    /// Route a command to the device it names
    pub async fn execute_on_device(&self, alias: &str, command: &Command) -> Result<()> {
        let controller = self
            .controller(alias)
            .await
            .ok_or_else(|| Error::UnknownDevice(alias.to_string()))?;

        if !controller.is_active() {
            return Err(Error::InactiveDevice(alias.to_string()));
        }

        controller.execute_command(command).await
    }

    /// Current controller registered under `alias`
    pub async fn controller(&self, alias: &str) -> Option<Arc<DeviceController>> {
        self.devices.read().await.get(alias).cloned()
    }

    pub async fn device_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.devices.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every controller
    pub async fn close(&self) {
        let mut devices = self.devices.write().await;
        for (_, controller) in devices.drain() {
            controller.stop().await;
        }
        info!("All device controllers stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backlight::tests::tables;
    use crate::health::HealthRegistry;
    use crate::model::{LightCommand, NamespaceCommand};
    use crate::transport::fake::FakeTransport;
    use std::time::Duration;

    fn manager() -> (DeviceManager, mpsc::Receiver<Signal>, FakeTransport) {
        let fake = FakeTransport::new();
        let (manager, rx) = DeviceManager::new(
            Arc::new(fake.clone()),
            Arc::new(tables()),
            Arc::new(HealthRegistry::new()),
        );
        (manager, rx, fake)
    }

    fn turn_on(alias: &str) -> Command {
        Command::TurnLightOn(LightCommand {
            key_code: 1,
            device_alias: alias.to_string(),
            color_name: "red".to_string(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_inactive_devices() {
        let (manager, _rx, _fake) = manager();
        let mut inactive = DeviceConfig::with_name("pad");
        inactive.active = false;
        manager.update_devices(vec![inactive]).await;

        assert_eq!(
            manager.execute_on_device("other", &turn_on("other")).await,
            Err(Error::UnknownDevice("other".to_string()))
        );
        assert_eq!(
            manager.execute_on_device("pad", &turn_on("pad")).await,
            Err(Error::InactiveDevice("pad".to_string()))
        );

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands_reach_device() {
        let (manager, _rx, fake) = manager();
        fake.set_present("pad MIDI 1", true);
        manager.update_devices(vec![DeviceConfig::with_name("pad")]).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        fake.clear_sent();

        manager.execute_on_device("pad", &turn_on("pad")).await.unwrap();
        assert_eq!(fake.sent(), vec![vec![0xB0, 0x01, 0x7F]]);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_invalidates_old_controllers() {
        let (manager, _rx, _fake) = manager();
        manager.update_devices(vec![DeviceConfig::with_name("pad")]).await;
        let old = manager.controller("pad").await.unwrap();

        manager.update_devices(vec![DeviceConfig::with_name("pad")]).await;
        let new = manager.controller("pad").await.unwrap();
        assert!(!Arc::ptr_eq(&old, &new));

        assert_eq!(
            old.execute_command(&turn_on("pad")).await,
            Err(Error::UnknownDevice("pad".to_string()))
        );
        assert!(!new.is_stopped());

        manager.close().await;
        assert!(new.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_replaces_fleet() {
        let (manager, _rx, _fake) = manager();
        manager
            .update_devices(vec![DeviceConfig::with_name("a"), DeviceConfig::with_name("b")])
            .await;
        assert_eq!(manager.device_names().await, vec!["a", "b"]);

        manager.update_devices(vec![DeviceConfig::with_name("c")]).await;
        assert_eq!(manager.device_names().await, vec!["c"]);

        manager.close().await;
        assert!(manager.device_names().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_unread_signals() {
        let (manager, _rx, fake) = manager();
        fake.set_present("pad MIDI 1", true);
        manager.update_devices(vec![DeviceConfig::with_name("pad")]).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        for _ in 0..5 {
            for key in 0..128u8 {
                fake.inject("pad MIDI 1", &[0x90, key, 100]);
                fake.inject("pad MIDI 1", &[0x80, key, 0]);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let closed = tokio::time::timeout(Duration::from_secs(30), manager.close()).await;
        assert!(closed.is_ok());
        assert!(manager.device_names().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_with_unread_signals() {
        let (manager, _rx, fake) = manager();
        fake.set_present("pad MIDI 1", true);
        manager.update_devices(vec![DeviceConfig::with_name("pad")]).await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        for _ in 0..5 {
            for key in 0..128u8 {
                fake.inject("pad MIDI 1", &[0x90, key, 100]);
                fake.inject("pad MIDI 1", &[0x80, key, 0]);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let reloaded = tokio::time::timeout(
            Duration::from_secs(30),
            manager.update_devices(vec![DeviceConfig::with_name("pad")]),
        )
        .await;
        assert!(reloaded.is_ok());
        assert_eq!(manager.device_names().await, vec!["pad"]);

        manager.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_signals_fan_in() {
        let (manager, mut rx, _fake) = manager();
        manager
            .update_devices(vec![DeviceConfig::with_name("a"), DeviceConfig::with_name("b")])
            .await;

        for alias in ["a", "b"] {
            manager
                .execute_on_device(
                    alias,
                    &Command::SetActiveNamespace(NamespaceCommand {
                        namespace: "live".to_string(),
                        device_alias: alias.to_string(),
                    }),
                )
                .await
                .unwrap();
        }

        let mut devices = vec![
            rx.recv().await.unwrap().device().to_string(),
            rx.recv().await.unwrap().device().to_string(),
        ];
        devices.sort();
        assert_eq!(devices, vec!["a", "b"]);

        manager.close().await;
    }
}
