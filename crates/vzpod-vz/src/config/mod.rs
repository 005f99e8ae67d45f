//! Virtual machine configuration model.
//!
//! Data-only descriptions of the platform and devices a VM boots with. The
//! substrate turns a validated [`VirtualMachineConfiguration`] into a live
//! machine; nothing here touches the native framework.

mod platform;
mod vm_config;

pub use platform::{MacPlatformConfigurationOptions, PlatformConfiguration};
pub use vm_config::{
    AudioDeviceConfiguration, GraphicsConfiguration, KeyboardConfiguration, Mount,
    NetworkAttachment, NetworkDeviceConfiguration, PointingDeviceConfiguration, SharedDirectory,
    StorageDeviceConfiguration, VirtualMachineConfiguration,
};
