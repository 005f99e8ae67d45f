//! In-process substrate used by tests and simulated environments.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::config::VirtualMachineConfiguration;
use crate::error::{Result, VzError};
use crate::traits::{MachineState, VirtualMachine, VmCapabilities, VmSubstrate};

/// Substrate whose machines transition instantly through their lifecycle.
pub struct MockSubstrate {
    capabilities: VmCapabilities,
    fail_start: bool,
}

impl Default for MockSubstrate {
    fn default() -> Self {
        Self {
            capabilities: VmCapabilities {
                min_cpu_count: 1,
                max_cpu_count: 16,
                min_memory_size: 1 << 30,
                max_memory_size: 64 << 30,
            },
            fail_start: false,
        }
    }
}

impl MockSubstrate {
    /// Creates a substrate with a generous capability window.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a substrate with an explicit capability window.
    #[must_use]
    pub fn with_capabilities(capabilities: VmCapabilities) -> Self {
        Self {
            capabilities,
            fail_start: false,
        }
    }

    /// Makes every instantiated machine fail its `start`.
    #[must_use]
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }
}

impl VmSubstrate for MockSubstrate {
    fn capabilities(&self) -> VmCapabilities {
        self.capabilities
    }

    fn instantiate(&self, _config: &VirtualMachineConfiguration) -> Result<Arc<dyn VirtualMachine>> {
        Ok(Arc::new(MockVm::new(self.fail_start)))
    }
}

/// A machine that obeys start/stop immediately.
pub struct MockVm {
    state_tx: watch::Sender<MachineState>,
    fail_start: bool,
}

impl MockVm {
    fn new(fail_start: bool) -> Self {
        let (state_tx, _) = watch::channel(MachineState::Stopped);
        Self {
            state_tx,
            fail_start,
        }
    }
}

#[async_trait]
impl VirtualMachine for MockVm {
    fn state(&self) -> MachineState {
        *self.state_tx.borrow()
    }

    fn state_changes(&self) -> watch::Receiver<MachineState> {
        self.state_tx.subscribe()
    }

    async fn start(&self) -> Result<()> {
        if self.fail_start {
            return Err(VzError::Substrate("mock start failure".to_string()));
        }
        let _ = self.state_tx.send(MachineState::Starting);
        let _ = self.state_tx.send(MachineState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let _ = self.state_tx.send(MachineState::Stopping);
        let _ = self.state_tx.send(MachineState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_vm_lifecycle() {
        let vm = MockVm::new(false);
        assert_eq!(vm.state(), MachineState::Stopped);
        vm.start().await.unwrap();
        assert_eq!(vm.state(), MachineState::Running);
        vm.stop().await.unwrap();
        assert_eq!(vm.state(), MachineState::Stopped);
    }

    #[tokio::test]
    async fn test_failing_start() {
        let vm = MockVm::new(true);
        assert!(vm.start().await.is_err());
        assert_eq!(vm.state(), MachineState::Stopped);
    }
}
