//! Virtualization substrate boundary.
//!
//! The native virtualization framework only exists on the host OS and is
//! consumed behind a narrow trait surface: construct a VM from a validated
//! [`VirtualMachineConfiguration`], start it, stop it, observe its state
//! stream, and query the host's CPU/memory capability window. Everything
//! above (overlay cloning, IP discovery, lifecycle timestamps) is plain
//! Rust in [`VmInstance`] and works against any [`VmSubstrate`]
//! implementation, including the in-process [`mock`] used by tests.

mod clonefile;
mod error;
mod instance;
mod validator;

pub mod config;
pub mod mock;
pub mod traits;

pub use clonefile::FileCloner;
pub use config::{
    AudioDeviceConfiguration, GraphicsConfiguration, KeyboardConfiguration,
    MacPlatformConfigurationOptions, Mount, NetworkAttachment, NetworkDeviceConfiguration,
    PlatformConfiguration, PointingDeviceConfiguration, SharedDirectory,
    StorageDeviceConfiguration, VirtualMachineConfiguration,
};
pub use error::{Result, VzError};
pub use instance::{HostIpResolver, IpResolver, StaticIpResolver, VmInstance, IP_ADDRESS_LOOKUP_TIMEOUT};
pub use traits::{MachineState, VirtualMachine, VmCapabilities, VmSubstrate};
pub use validator::{validate_cpu_count, validate_memory_size};
