//! The per-host pod engine.
//!
//! Translates control-plane pod intent into fanned-out work across the VM
//! resource manager and the container manager, tracks the joint state as
//! one virtualization group per pod, synthesizes pod status, mediates
//! exec/attach/logs streams, and tears groups down respecting grace
//! periods and lifecycle hooks.
//!
//! Collaborators the hosting harness provides: a [`TokenSource`] and
//! [`ConfigMapSource`] for projected-volume credentials, an optional
//! [`PodDeleter`] for the post-hook fast delete, and a [`PodLister`] for
//! the stats aggregator.

mod config;
mod credentials;
mod engine;
mod error;
mod resource;
mod stats;
mod status;
mod vm;
mod vm_data;
mod volumes;

pub mod spec;

pub use config::NodeConfig;
pub use credentials::{
    extract_pod_credentials, ConfigMap, ConfigMapSource, PodDeleter, TokenSource,
};
pub use engine::{VirtualizationGroup, VzEngine, DEFAULT_DELETE_GRACE_PERIOD_SECONDS};
pub use error::{CoreError, Result};
pub use resource::{
    container_id, ExecAction, MacVirtualMachine, VirtualMachineState, CONTAINER_RUNTIME,
    MACOS_RUNTIME,
};
pub use stats::{
    gather_resource_metrics, PodLister, PodMetricsProvider, PodReference, PodStats, StatsSummary,
};
pub use status::build_pod_status;
pub use vm::{MacVmClient, VirtualMachineParams, MAX_VIRTUAL_MACHINES};
pub use volumes::{create_container_mounts, Mount};
