//! Resource-request validation against the substrate's capability window.

use crate::error::{Result, VzError};
use crate::traits::VmCapabilities;

/// Validates a requested CPU count.
///
/// # Errors
///
/// Returns a configuration error carrying the nearest allowed value in its
/// message when the request falls outside the window.
pub fn validate_cpu_count(caps: &VmCapabilities, cpu_count: u32) -> Result<u32> {
    if cpu_count > caps.max_cpu_count {
        return Err(VzError::Configuration(format!(
            "cpu count {} is greater than the maximum allowed cpu count {}",
            cpu_count, caps.max_cpu_count
        )));
    }
    if cpu_count < caps.min_cpu_count {
        return Err(VzError::Configuration(format!(
            "cpu count {} is less than the minimum allowed cpu count {}",
            cpu_count, caps.min_cpu_count
        )));
    }
    Ok(cpu_count)
}

/// Validates a requested memory size in bytes.
///
/// # Errors
///
/// Returns a configuration error when the request falls outside the window.
pub fn validate_memory_size(caps: &VmCapabilities, memory_size: u64) -> Result<u64> {
    if memory_size > caps.max_memory_size {
        return Err(VzError::Configuration(format!(
            "memory size {} is greater than the maximum allowed memory size {}",
            memory_size, caps.max_memory_size
        )));
    }
    if memory_size < caps.min_memory_size {
        return Err(VzError::Configuration(format!(
            "memory size {} is less than the minimum allowed memory size {}",
            memory_size, caps.min_memory_size
        )));
    }
    Ok(memory_size)
}
