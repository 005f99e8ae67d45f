//! The per-pod virtual machine record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest as _, Sha256};

use crate::spec::EnvVar;
use vzpod_vz::{MachineState, VmInstance};

/// Runtime name for macOS virtual machines.
pub const MACOS_RUNTIME: &str = "vz";

/// Runtime name for containerized workloads.
pub const CONTAINER_RUNTIME: &str = "docker";

/// The derived lifecycle state of a macOS virtual machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualMachineState {
    /// Record exists, image not yet fetched.
    Preparing,
    /// Image fetched, instance constructed, start in flight.
    Starting,
    /// The substrate reports running.
    Running,
    /// Stop in flight.
    Terminating,
    /// Stopped cleanly. Terminal.
    Terminated,
    /// A terminal error occurred. Sticky.
    Failed,
}

/// A lifecycle exec action with its timeout.
#[derive(Debug, Clone)]
pub struct ExecAction {
    /// Command to execute.
    pub command: Vec<String>,
    /// Maximum duration to wait for the command.
    pub timeout: Duration,
}

/// A macOS virtual machine record: environment, the substrate instance
/// once constructed, and a sticky terminal error.
#[derive(Clone, Default)]
pub struct MacVirtualMachine {
    env: Vec<EnvVar>,
    instance: Option<Arc<VmInstance>>,
    error: Option<String>,
}

impl MacVirtualMachine {
    /// Creates a record in the `Preparing` state.
    #[must_use]
    pub fn new(env: Vec<EnvVar>) -> Self {
        Self {
            env,
            instance: None,
            error: None,
        }
    }

    /// Returns the VM's environment variables.
    #[must_use]
    pub fn env(&self) -> &[EnvVar] {
        &self.env
    }

    /// Returns the constructed instance, if any.
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<VmInstance>> {
        self.instance.as_ref()
    }

    /// Attaches the constructed instance.
    pub fn set_instance(&mut self, instance: Arc<VmInstance>) {
        self.instance = Some(instance);
    }

    /// Returns the sticky terminal error, if set.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Sets the sticky terminal error.
    pub fn set_error(&mut self, error: impl ToString) {
        self.error = Some(error.to_string());
    }

    /// Derives the lifecycle state.
    ///
    /// Failures are sticky: once the error is set the state reports
    /// `Failed` regardless of the substrate.
    #[must_use]
    pub fn state(&self) -> VirtualMachineState {
        if self.error.is_some() {
            return VirtualMachineState::Failed;
        }

        let Some(instance) = &self.instance else {
            return VirtualMachineState::Preparing;
        };

        match instance.state() {
            MachineState::Starting => VirtualMachineState::Starting,
            MachineState::Running => VirtualMachineState::Running,
            MachineState::Stopping => VirtualMachineState::Terminating,
            MachineState::Stopped => VirtualMachineState::Terminated,
        }
    }

    /// Returns the VM's IP address, empty until discovered.
    #[must_use]
    pub fn ip_address(&self) -> String {
        self.instance
            .as_ref()
            .and_then(|instance| instance.ip_address())
            .unwrap_or_default()
    }

    /// Returns the start time.
    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.instance.as_ref().and_then(|instance| instance.started_at())
    }

    /// Returns the finish time.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.instance.as_ref().and_then(|instance| instance.finished_at())
    }
}

impl std::fmt::Debug for MacVirtualMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacVirtualMachine")
            .field("state", &self.state())
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

/// Synthesizes a stable container ID for status reporting:
/// `<runtime>://sha256(<uppercased "containers/<name>">)`.
#[must_use]
pub fn container_id(runtime: &str, container_name: &str) -> String {
    let resource_id = format!("containers/{container_name}").to_uppercase();
    let mut hasher = Sha256::new();
    hasher.update(resource_id.as_bytes());
    format!("{runtime}://{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_starts_preparing() {
        let vm = MacVirtualMachine::new(vec![]);
        assert_eq!(vm.state(), VirtualMachineState::Preparing);
        assert_eq!(vm.ip_address(), "");
        assert!(vm.started_at().is_none());
    }

    #[test]
    fn test_error_is_sticky() {
        let mut vm = MacVirtualMachine::new(vec![]);
        vm.set_error("registry unreachable");
        assert_eq!(vm.state(), VirtualMachineState::Failed);
        assert_eq!(vm.error(), Some("registry unreachable"));
    }

    #[test]
    fn test_container_id_is_stable_per_name() {
        let a = container_id(MACOS_RUNTIME, "macos");
        let b = container_id(MACOS_RUNTIME, "macos");
        let c = container_id(CONTAINER_RUNTIME, "macos");
        assert_eq!(a, b);
        assert!(a.starts_with("vz://"));
        assert!(c.starts_with("docker://"));
        assert_eq!(a.split("://").nth(1), c.split("://").nth(1));
        assert_ne!(a, container_id(MACOS_RUNTIME, "other"));
    }
}
