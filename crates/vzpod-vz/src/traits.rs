//! Substrate traits the native virtualization framework is consumed through.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::VirtualMachineConfiguration;
use crate::error::Result;

/// The execution state of a virtual machine, as reported by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// The VM is starting.
    Starting,
    /// The VM is running.
    Running,
    /// The VM is stopping.
    Stopping,
    /// The VM is stopped. Terminal.
    Stopped,
}

impl MachineState {
    /// Returns the state name for logging.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }
}

/// The host's CPU and memory window for virtual machines.
#[derive(Debug, Clone, Copy)]
pub struct VmCapabilities {
    /// Minimum allowed CPU count.
    pub min_cpu_count: u32,
    /// Maximum allowed CPU count.
    pub max_cpu_count: u32,
    /// Minimum allowed memory size in bytes.
    pub min_memory_size: u64,
    /// Maximum allowed memory size in bytes.
    pub max_memory_size: u64,
}

/// A constructed virtual machine.
#[async_trait]
pub trait VirtualMachine: Send + Sync {
    /// Returns the current state.
    fn state(&self) -> MachineState;

    /// Returns a receiver observing every state change.
    fn state_changes(&self) -> watch::Receiver<MachineState>;

    /// Starts the virtual machine.
    async fn start(&self) -> Result<()>;

    /// Force-stops the virtual machine without giving the guest a chance
    /// to shut down cleanly.
    async fn stop(&self) -> Result<()>;
}

/// Factory and capability surface of the virtualization substrate.
pub trait VmSubstrate: Send + Sync {
    /// Returns the host's CPU/memory capability window.
    fn capabilities(&self) -> VmCapabilities;

    /// Constructs a virtual machine from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns a substrate error when construction fails.
    fn instantiate(&self, config: &VirtualMachineConfiguration) -> Result<Arc<dyn VirtualMachine>>;
}
