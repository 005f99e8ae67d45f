//! A running virtual machine with lifecycle tracking.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::VirtualMachineConfiguration;
use crate::error::{Result, VzError};
use crate::traits::{MachineState, VirtualMachine, VmSubstrate};
use vzpod_error::CommonError;

/// Time allowed for discovering the guest's IP address after start.
pub const IP_ADDRESS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Resolves the guest's IP address after boot.
#[async_trait]
pub trait IpResolver: Send + Sync {
    /// Returns the guest's IP address.
    ///
    /// `interface` is the bridged host interface when the VM is bridged.
    ///
    /// # Errors
    ///
    /// Returns an error when no address could be discovered.
    async fn resolve(&self, interface: Option<&str>, mac_addr: &str) -> Result<String>;
}

/// Resolver using the host network: bridged packet capture first, ARP
/// table as the fallback.
#[derive(Debug, Default)]
pub struct HostIpResolver;

#[async_trait]
impl IpResolver for HostIpResolver {
    async fn resolve(&self, interface: Option<&str>, mac_addr: &str) -> Result<String> {
        if let Some(interface) = interface {
            match vzpod_net::capture_ip_on_interface(interface, mac_addr, IP_ADDRESS_LOOKUP_TIMEOUT)
                .await
            {
                Ok(ip) => return Ok(ip),
                Err(err) => {
                    tracing::warn!(error = %err, "Unable to capture IP on bridged interface");
                }
            }
        }

        Ok(vzpod_net::retrieve_ip_from_arp_table(mac_addr).await?)
    }
}

/// Resolver returning a fixed address, for tests and simulated guests.
#[derive(Debug, Clone)]
pub struct StaticIpResolver(pub String);

#[async_trait]
impl IpResolver for StaticIpResolver {
    async fn resolve(&self, _interface: Option<&str>, _mac_addr: &str) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// A constructed virtual machine plus everything the node tracks about it:
/// lifecycle timestamps, the discovered IP, and the overlay files to remove
/// on stop.
pub struct VmInstance {
    vm: Arc<dyn VirtualMachine>,
    resolver: Arc<dyn IpResolver>,

    mac_addr: String,
    network_interface: Option<String>,
    overlays: Option<(PathBuf, PathBuf)>,

    created_at: DateTime<Utc>,
    started_at: RwLock<Option<DateTime<Utc>>>,
    finished_at: RwLock<Option<DateTime<Utc>>>,
    ip_address: RwLock<Option<String>>,

    ip_lookup_cancel: CancellationToken,
}

impl VmInstance {
    /// Constructs the VM on the substrate and begins tracking its state.
    ///
    /// The configuration is validated against the substrate's capabilities
    /// before instantiation; an invalid configuration fails fast.
    ///
    /// # Errors
    ///
    /// Returns validation or substrate errors.
    pub fn new(
        substrate: &dyn VmSubstrate,
        config: &VirtualMachineConfiguration,
        resolver: Arc<dyn IpResolver>,
    ) -> Result<Arc<Self>> {
        config.validate(&substrate.capabilities())?;
        let vm = substrate.instantiate(config)?;

        let instance = Arc::new(Self {
            mac_addr: vzpod_net::normalize_mac_address(config.mac_address()),
            network_interface: config.network_interface().map(str::to_string),
            overlays: config
                .overlays()
                .map(|(block, aux)| (block.to_path_buf(), aux.to_path_buf())),
            resolver,
            created_at: Utc::now(),
            started_at: RwLock::new(None),
            finished_at: RwLock::new(None),
            ip_address: RwLock::new(None),
            ip_lookup_cancel: CancellationToken::new(),
            vm,
        });

        tokio::spawn(Self::handle_state_changes(Arc::clone(&instance)));

        Ok(instance)
    }

    /// Stamps lifecycle timestamps from the substrate's state stream.
    ///
    /// The value present at subscription time is not a transition and is
    /// skipped; the task ends at the first observed `Stopped`.
    async fn handle_state_changes(self: Arc<Self>) {
        let mut changes = self.vm.state_changes();
        changes.borrow_and_update();

        while changes.changed().await.is_ok() {
            let state = *changes.borrow_and_update();
            match state {
                MachineState::Running => {
                    let mut started_at = self
                        .started_at
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if started_at.is_none() {
                        *started_at = Some(Utc::now());
                        tracing::debug!("Virtual machine instance has started");
                    }
                }
                MachineState::Stopped => {
                    let mut finished_at = self
                        .finished_at
                        .write()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    if finished_at.is_none() {
                        *finished_at = Some(Utc::now());
                        tracing::debug!("Virtual machine instance has finished");
                    }
                    return;
                }
                MachineState::Starting | MachineState::Stopping => {}
            }
        }
    }

    /// Starts the VM and discovers its IP address.
    ///
    /// IP discovery is bounded at 60 s; on failure the VM is
    /// force-stopped and the error surfaced.
    ///
    /// # Errors
    ///
    /// Returns substrate start errors or the IP discovery failure.
    pub async fn start(&self) -> Result<()> {
        self.vm.start().await?;

        let lookup = async {
            self.resolver
                .resolve(self.network_interface.as_deref(), &self.mac_addr)
                .await
        };

        let result = tokio::select! {
            result = tokio::time::timeout(IP_ADDRESS_LOOKUP_TIMEOUT, lookup) => {
                result.map_err(|_| {
                    VzError::from(CommonError::timeout("IP address lookup"))
                })?
            }
            () = self.ip_lookup_cancel.cancelled() => {
                Err(CommonError::Cancelled.into())
            }
        };

        match result {
            Ok(ip) => {
                *self
                    .ip_address
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(ip);
                Ok(())
            }
            Err(err) => {
                // The guest is unreachable; kill it rather than leak it.
                let _ = self.vm.stop().await;
                Err(VzError::Substrate(format!(
                    "failed to retrieve IP address: {err}"
                )))
            }
        }
    }

    /// Stops the VM and removes its overlay files.
    ///
    /// A VM that already reached `Stopped` is not stopped again; overlay
    /// removal always runs.
    ///
    /// # Errors
    ///
    /// Returns the stop error, or the first overlay-removal failure.
    pub async fn stop(&self) -> Result<()> {
        if self.ip_address().is_none() {
            // Unblock a start() still waiting on IP discovery.
            self.ip_lookup_cancel.cancel();
        }

        let mut result = Ok(());
        if self.vm.state() != MachineState::Stopped {
            tracing::debug!("Force stopping VM");
            result = self.vm.stop().await;
        }

        if let Some((block, aux)) = &self.overlays {
            tracing::debug!(
                block = %block.display(),
                aux = %aux.display(),
                "Removing overlay files"
            );
            for path in [block, aux] {
                if let Err(err) = std::fs::remove_file(path) {
                    if err.kind() != std::io::ErrorKind::NotFound && result.is_ok() {
                        result = Err(err.into());
                    }
                }
            }
        }

        result
    }

    /// Returns the substrate's current state.
    #[must_use]
    pub fn state(&self) -> MachineState {
        self.vm.state()
    }

    /// Returns the discovered IP address, if any.
    #[must_use]
    pub fn ip_address(&self) -> Option<String> {
        self.ip_address
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the time the substrate first reported `Running`.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        *self
            .started_at
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Returns the time the substrate reported `Stopped`.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self
            .finished_at
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MacPlatformConfigurationOptions, PlatformConfiguration};
    use crate::mock::MockSubstrate;
    use base64::Engine as _;

    fn config(dir: &std::path::Path, overlay: bool) -> VirtualMachineConfiguration {
        let disk = dir.join("disk.img");
        let aux = dir.join("aux.img");
        std::fs::write(&disk, b"disk").unwrap();
        std::fs::write(&aux, b"aux").unwrap();
        let engine = base64::engine::general_purpose::STANDARD;
        let platform = PlatformConfiguration::new(
            &MacPlatformConfigurationOptions {
                block_storage_path: disk,
                auxiliary_storage_path: aux,
                hardware_model_data: engine.encode(b"hw"),
                machine_identifier_data: engine.encode(b"mid"),
            },
            overlay,
            "U1",
        )
        .unwrap();
        VirtualMachineConfiguration::new(platform, 4, 12 << 30, "", &[])
    }

    #[tokio::test]
    async fn test_start_discovers_ip_and_stamps_started_at() {
        let dir = tempfile::tempdir().unwrap();
        let substrate = MockSubstrate::new();
        let instance = VmInstance::new(
            &substrate,
            &config(dir.path(), false),
            Arc::new(StaticIpResolver("192.168.64.3".to_string())),
        )
        .unwrap();

        instance.start().await.unwrap();
        assert_eq!(instance.state(), MachineState::Running);
        assert_eq!(instance.ip_address().as_deref(), Some("192.168.64.3"));

        // The state watcher runs on its own task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(instance.started_at().is_some());
        assert!(instance.finished_at().is_none());
    }

    #[tokio::test]
    async fn test_stop_removes_overlays_and_stamps_finished_at() {
        let dir = tempfile::tempdir().unwrap();
        let substrate = MockSubstrate::new();
        let cfg = config(dir.path(), true);
        let (block, aux) = cfg.overlays().map(|(b, a)| (b.to_path_buf(), a.to_path_buf())).unwrap();
        let instance = VmInstance::new(
            &substrate,
            &cfg,
            Arc::new(StaticIpResolver("192.168.64.3".to_string())),
        )
        .unwrap();

        instance.start().await.unwrap();
        assert!(block.exists());
        assert!(aux.exists());

        instance.stop().await.unwrap();
        assert_eq!(instance.state(), MachineState::Stopped);
        assert!(!block.exists());
        assert!(!aux.exists());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(instance.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_failed_ip_discovery_stops_vm() {
        struct FailingResolver;
        #[async_trait]
        impl IpResolver for FailingResolver {
            async fn resolve(&self, _: Option<&str>, _: &str) -> Result<String> {
                Err(CommonError::timeout("no packets").into())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let substrate = MockSubstrate::new();
        let instance = VmInstance::new(
            &substrate,
            &config(dir.path(), false),
            Arc::new(FailingResolver),
        )
        .unwrap();

        assert!(instance.start().await.is_err());
        assert_eq!(instance.state(), MachineState::Stopped);
        assert!(instance.ip_address().is_none());
    }
}
