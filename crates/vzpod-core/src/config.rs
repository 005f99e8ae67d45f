//! Node configuration consumed by the engine.

use std::path::PathBuf;
use std::time::Duration;

use vzpod_ssh::SshCredentials;

/// Everything the hosting binary resolves from flags and environment and
/// hands to the core as one struct.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node name registered with the control plane.
    pub node_name: String,
    /// This node's IP, reported as the pods' host IP.
    pub internal_ip: String,
    /// Root of the on-disk cache (`blobs/`, `mounts/`).
    pub cache_path: PathBuf,
    /// Bridged host interface identifier; empty selects NAT.
    pub network_interface: String,
    /// SSH user for guest exec.
    pub ssh_user: Option<String>,
    /// SSH password for guest exec.
    pub ssh_password: Option<String>,
    /// Container runtime endpoint override.
    pub docker_host: Option<String>,
    /// Startup timeout of the hosting harness.
    pub startup_timeout: Duration,
    /// Keep the node schedulable without removing the provider taint.
    pub disable_taint: bool,
    /// Concurrency of the harness's pod sync workers.
    pub pod_sync_workers: usize,
    /// Full resync period of the harness's informers.
    pub full_resync_period: Duration,
    /// Port the node's HTTP surface listens on.
    pub kubelet_port: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            internal_ip: String::new(),
            cache_path: std::env::temp_dir().join("vzpod"),
            network_interface: String::new(),
            ssh_user: None,
            ssh_password: None,
            docker_host: None,
            startup_timeout: Duration::from_secs(120),
            disable_taint: false,
            pod_sync_workers: 10,
            full_resync_period: Duration::from_secs(60),
            kubelet_port: 10250,
        }
    }
}

impl NodeConfig {
    /// Overlays the environment onto the config: `VZ_BRIDGE_INTERFACE`,
    /// `VZ_SSH_USER`, `VZ_SSH_PASSWORD`, `DOCKER_HOST`, `KUBELET_PORT`,
    /// `VKUBELET_POD_IP`.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        if let Ok(interface) = std::env::var("VZ_BRIDGE_INTERFACE") {
            self.network_interface = interface;
        }
        if let Ok(user) = std::env::var("VZ_SSH_USER") {
            self.ssh_user = Some(user);
        }
        if let Ok(password) = std::env::var("VZ_SSH_PASSWORD") {
            self.ssh_password = Some(password);
        }
        if let Ok(host) = std::env::var("DOCKER_HOST") {
            self.docker_host = Some(host);
        }
        if let Ok(port) = std::env::var("KUBELET_PORT") {
            if let Ok(port) = port.parse() {
                self.kubelet_port = port;
            }
        }
        if let Ok(ip) = std::env::var("VKUBELET_POD_IP") {
            self.internal_ip = ip;
        }
        self
    }

    /// Returns the SSH credentials when both parts are configured.
    #[must_use]
    pub fn ssh_credentials(&self) -> Option<SshCredentials> {
        match (&self.ssh_user, &self.ssh_password) {
            (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
                Some(SshCredentials {
                    user: user.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_credentials_require_both_parts() {
        let mut config = NodeConfig::default();
        assert!(config.ssh_credentials().is_none());

        config.ssh_user = Some("admin".to_string());
        assert!(config.ssh_credentials().is_none());

        config.ssh_password = Some("hunter2".to_string());
        let credentials = config.ssh_credentials().unwrap();
        assert_eq!(credentials.user, "admin");
    }

    #[test]
    fn test_defaults() {
        let config = NodeConfig::default();
        assert_eq!(config.kubelet_port, 10250);
        assert_eq!(config.pod_sync_workers, 10);
        assert!(config.network_interface.is_empty());
    }
}
