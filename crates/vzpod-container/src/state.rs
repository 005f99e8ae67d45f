//! Container records and the container-stats shape.

use chrono::{DateTime, Utc};

/// The status of an auxiliary container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Waiting to be created.
    Waiting,
    /// Created but not started.
    Created,
    /// Running.
    Running,
    /// Paused.
    Paused,
    /// Restarting.
    Restarting,
    /// Killed by the host for exceeding its memory.
    OOMKilled,
    /// Terminated and not restartable.
    Dead,
    /// The runtime reported something unrecognized.
    Unknown,
}

/// Current and past state of a container.
#[derive(Debug, Clone)]
pub struct ContainerState {
    /// Translated status.
    pub status: ContainerStatus,
    /// Start time; `None` until the runtime reports one.
    pub started_at: Option<DateTime<Utc>>,
    /// Finish time; `None` while running.
    pub finished_at: Option<DateTime<Utc>>,
    /// Exit code of the last run.
    pub exit_code: i64,
    /// Runtime- or manager-reported error message.
    pub error: String,
}

impl Default for ContainerState {
    fn default() -> Self {
        Self {
            status: ContainerStatus::Waiting,
            started_at: None,
            finished_at: None,
            exit_code: 0,
            error: String::new(),
        }
    }
}

/// A single container with its runtime identity and state.
#[derive(Debug, Clone)]
pub struct Container {
    /// Runtime-assigned ID; empty until creation was accepted.
    pub id: String,
    /// Container name from the pod spec.
    pub name: String,
    /// Translated state.
    pub state: ContainerState,
}

/// CPU counters of one container or VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuStats {
    /// Instantaneous usage in nano-cores.
    pub usage_nano_cores: Option<u64>,
    /// Cumulative usage in core-nanoseconds.
    pub usage_core_nano_seconds: Option<u64>,
}

/// Memory counters of one container or VM.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStats {
    /// Total memory in use.
    pub usage_bytes: Option<u64>,
    /// Resident set size.
    pub rss_bytes: Option<u64>,
    /// Working set, the amount not reclaimable under pressure.
    pub working_set_bytes: Option<u64>,
}

/// The standard container-stats sample.
#[derive(Debug, Clone)]
pub struct ContainerStats {
    /// Container name.
    pub name: String,
    /// Sample time.
    pub timestamp: DateTime<Utc>,
    /// CPU counters.
    pub cpu: CpuStats,
    /// Memory counters.
    pub memory: MemoryStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_waiting() {
        let state = ContainerState::default();
        assert_eq!(state.status, ContainerStatus::Waiting);
        assert!(state.started_at.is_none());
        assert!(state.error.is_empty());
    }
}
