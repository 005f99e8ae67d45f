//! The macOS VM resource manager.

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use crate::error::{CoreError, Result};
use crate::resource::{ExecAction, MacVirtualMachine};
use crate::spec::{EnvVar, PodKey};
use crate::vm_data::{VmData, VmInfo};
use crate::volumes::Mount;
use vzpod_container::{ContainerStats, CpuStats, MemoryStats};
use vzpod_error::CommonError;
use vzpod_event::EventRecorder;
use vzpod_image::DownloadManager;
use vzpod_ssh::{dial_guest, ExecIO, SshCredentials};
use vzpod_vz::{
    IpResolver, MacPlatformConfigurationOptions, PlatformConfiguration,
    VirtualMachineConfiguration, VmInstance, VmSubstrate,
};

/// Maximum number of virtual machines that can run at once. This is a
/// kernel-level limitation enforced within the virtualization framework.
pub const MAX_VIRTUAL_MACHINES: i32 = 2;

/// Poll interval of the admission gate.
const ADMISSION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a graceful shutdown to finish.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// In-guest command for a graceful shutdown. The network interface goes
/// down first and the shutdown is disowned so the SSH connection is not
/// severed mid-command. Requires passwordless sudo in the guest.
const GRACEFUL_SHUTDOWN_COMMAND: &[&str] = &[
    "sh",
    "-c",
    "sudo -n true && ((nohup sudo ipconfig set en0 none; sudo shutdown -h now) > /dev/null 2>&1 & disown)",
];

/// In-guest script emitting the stats JSON blob. Requires `top`, `sysctl`,
/// `vm_stat`, `awk`, `bc`, `printf`, and `date` in the guest.
const STATS_SCRIPT: &[&str] = &[
    r#"cpuUsageNanoCores=$(top -l 1 | awk '/CPU usage/ {print ($3+$5)*10000000}' | sed 's/%//g')"#,
    r#"cpuUsageNanoCores=$(printf "%.0f" "$cpuUsageNanoCores")"#,
    r#"cpuUsageCoreNanoSeconds=$(echo "$(sysctl -n hw.ncpu) * $(( $(date +%s) - $(sysctl -n kern.boottime | awk -F'[ ,]' '{print $4}') )) * 1000000000" | bc -l)"#,
    r#"cpuUsageCoreNanoSeconds=$(printf "%.0f" "$cpuUsageCoreNanoSeconds")"#,
    r#"memoryUsageBytes=$(vm_stat | awk '/Pages active/ {active=$3} /Pages wired down/ {wired=$4} END {print (active+wired)*4096}')"#,
    r#"memoryRssBytes=$(vm_stat | awk '/Pages active/ {print $3*4096}')"#,
    r#"memoryWorkingSetBytes=$(vm_stat | awk '/Pages active/ {active=$3} /Pages speculative/ {speculative=$4} END {print (active-speculative)*4096}')"#,
    r#"echo "{\"cpuUsageNanoCores\": $cpuUsageNanoCores, \"cpuUsageCoreNanoSeconds\": $cpuUsageCoreNanoSeconds, \"memoryUsageBytes\": $memoryUsageBytes, \"memoryRssBytes\": $memoryRssBytes, \"memoryWorkingSetBytes\": $memoryWorkingSetBytes}""#,
];

/// Parameters for creating a virtual machine.
#[derive(Debug, Clone)]
pub struct VirtualMachineParams {
    /// Pod UID; names the overlay clones.
    pub uid: String,
    /// macOS image reference.
    pub image: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Name of the VM's container in the pod spec.
    pub container_name: String,
    /// Requested vCPU count.
    pub cpu: u32,
    /// Requested memory size in bytes.
    pub memory_size: u64,
    /// Mounts exposed as shared directories.
    pub mounts: Vec<Mount>,
    /// Guest environment variables.
    pub env: Vec<EnvVar>,
    /// Post-start exec hook.
    pub post_start: Option<ExecAction>,
    /// Bypass the local image cache.
    pub ignore_image_cache: bool,
}

/// Manages the full VM lifecycle for pods and offers exec/stats into the
/// guest.
///
/// Cheap to clone; all clones share the same record map and download
/// manager.
#[derive(Clone)]
pub struct MacVmClient {
    download_manager: Arc<DownloadManager>,
    data: Arc<VmData>,

    substrate: Arc<dyn VmSubstrate>,
    ip_resolver: Arc<dyn IpResolver>,
    network_interface: String,
    ssh_credentials: Option<SshCredentials>,
}

impl MacVmClient {
    /// Creates a VM manager.
    ///
    /// `network_interface` selects bridged networking when non-empty.
    /// Missing SSH credentials make exec (and everything built on it)
    /// fail with `InvalidInput`.
    pub fn new(
        substrate: Arc<dyn VmSubstrate>,
        ip_resolver: Arc<dyn IpResolver>,
        network_interface: impl Into<String>,
        cache_path: impl Into<PathBuf>,
        ssh_credentials: Option<SshCredentials>,
    ) -> Self {
        Self {
            download_manager: Arc::new(DownloadManager::new(cache_path)),
            data: Arc::new(VmData::new()),
            substrate,
            ip_resolver,
            network_interface: network_interface.into(),
            ssh_credentials,
        }
    }

    /// Replaces the download manager; tests inject fetchers through this.
    #[must_use]
    pub fn with_download_manager(mut self, download_manager: DownloadManager) -> Self {
        self.download_manager = Arc::new(download_manager);
        self
    }

    /// Validates requested resources against the substrate's capability
    /// window.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the violated bound.
    pub fn validate_resources(&self, cpu: u32, memory_size: u64) -> Result<()> {
        let caps = self.substrate.capabilities();
        vzpod_vz::validate_cpu_count(&caps, cpu)?;
        vzpod_vz::validate_memory_size(&caps, memory_size)?;
        Ok(())
    }

    /// Accepts a VM create and runs the pipeline asynchronously.
    ///
    /// The record is inserted in `Preparing` before returning; image
    /// download, admission, instance construction, start, IP discovery,
    /// and the post-start hook run on a detached task. A terminal error is
    /// stored into the record, from which the state reports `Failed`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a record for the pod already exists.
    pub fn create_virtual_machine(
        &self,
        cancel: CancellationToken,
        recorder: Arc<dyn EventRecorder>,
        params: VirtualMachineParams,
    ) -> Result<()> {
        let key = PodKey::new(&params.namespace, &params.name);
        let (_, loaded) = self.data.get_or_create(
            &key,
            VmInfo {
                image_ref: params.image.clone(),
                download_cancel: None,
                vm: MacVirtualMachine::new(params.env.clone()),
            },
        );
        if loaded {
            return Err(CommonError::invalid_input("virtual machine already exists").into());
        }

        recorder.pulling_image(&params.image, &params.container_name);

        let client = self.clone();
        tokio::spawn(async move {
            let result = client.run_creation(&cancel, &recorder, &params, &key).await;
            if let Err(err) = &result {
                tracing::debug!(pod = %key, error = %err, "Virtual machine creation failed");
            }
            // The download handle is gone either way; a failure makes the
            // record's state report Failed from here on.
            let updated = client.data.update(&key, |info| {
                info.download_cancel = None;
                if let Err(err) = &result {
                    info.vm.set_error(err);
                }
            });
            if !updated {
                tracing::debug!(pod = %key, "Virtual machine info expired");
            }
        });

        Ok(())
    }

    async fn run_creation(
        &self,
        cancel: &CancellationToken,
        recorder: &Arc<dyn EventRecorder>,
        params: &VirtualMachineParams,
        key: &PodKey,
    ) -> Result<()> {
        tracing::debug!(pod = %key, image = params.image, "Creating virtual machine");

        let download_cancel = cancel.child_token();
        if !self.data.update(key, |info| {
            info.download_cancel = Some(download_cancel.clone());
        }) {
            tracing::debug!(pod = %key, "Virtual machine info expired");
            return Ok(());
        }

        let download = match self
            .download_manager
            .download(
                &download_cancel,
                Arc::clone(recorder),
                &params.image,
                params.ignore_image_cache,
            )
            .await
        {
            Ok(download) => download,
            Err(err) => {
                if !err.is_cancelled() {
                    // Cancelled downloads exit quietly so cluster events
                    // are not spammed during teardown.
                    recorder.back_off_pull_image(&params.image, &params.container_name, &err);
                }
                return Err(err.into());
            }
        };
        recorder.pulled_image(
            &params.image,
            &params.container_name,
            &format!("{:.3}s", download.duration.as_secs_f64()),
        );

        self.wait_for_creation_proceed(cancel).await?;

        let instance = match self.create_instance(&download.config, params) {
            Ok(instance) => instance,
            Err(err) => {
                recorder.failed_to_create_container(&params.container_name, &err);
                return Err(err.into());
            }
        };
        self.data.update(key, |info| {
            info.vm.set_instance(Arc::clone(&instance));
        });
        recorder.created_container(&params.container_name);

        if let Err(err) = instance.start().await {
            recorder.failed_to_start_container(&params.container_name, &err);
            return Err(err.into());
        }
        recorder.started_container(&params.container_name);

        if let Some(action) = &params.post_start {
            tracing::info!(pod = %key, "Virtual machine is running, executing post-start command");
            if let Err(err) = self.exec_post_start(cancel, key, action).await {
                recorder.failed_post_start_hook(&params.container_name, &action.command, &err);
            }
        }

        Ok(())
    }

    /// Blocks until the host can admit a new VM.
    ///
    /// Admission compares the number of VMs that already left `Preparing`
    /// against the cap; pods beyond it wait here, typically for a
    /// terminating VM to finish and drop its record.
    async fn wait_for_creation_proceed(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if self.data.active_count() < MAX_VIRTUAL_MACHINES {
                return Ok(());
            }
            tracing::debug!("Waiting for resources to be available");
            tokio::select! {
                () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
                () = tokio::time::sleep(ADMISSION_POLL_INTERVAL) => {}
            }
        }
    }

    /// Builds the platform and device configuration (with overlays) and
    /// constructs the instance on the substrate.
    fn create_instance(
        &self,
        options: &MacPlatformConfigurationOptions,
        params: &VirtualMachineParams,
    ) -> vzpod_vz::Result<Arc<VmInstance>> {
        tracing::debug!(
            cpu = params.cpu,
            memory = params.memory_size,
            interface = self.network_interface,
            "Building virtual machine configuration"
        );

        let platform = PlatformConfiguration::new(options, true, &params.uid)?;

        let vz_mounts: Vec<vzpod_vz::Mount> = params
            .mounts
            .iter()
            .map(|mount| vzpod_vz::Mount {
                name: mount.name.clone(),
                host_path: mount.host_path.clone(),
                container_path: mount.container_path.clone(),
                read_only: mount.read_only,
            })
            .collect();

        let config = VirtualMachineConfiguration::new(
            platform,
            params.cpu,
            params.memory_size,
            &self.network_interface,
            &vz_mounts,
        );

        VmInstance::new(
            self.substrate.as_ref(),
            &config,
            Arc::clone(&self.ip_resolver),
        )
    }

    async fn exec_post_start(
        &self,
        cancel: &CancellationToken,
        key: &PodKey,
        action: &ExecAction,
    ) -> Result<()> {
        let exec = self.exec_in_virtual_machine(
            cancel,
            &key.namespace,
            &key.name,
            &action.command,
            ExecIO::discarding(),
        );
        let result = match tokio::time::timeout(action.timeout, exec).await {
            Ok(result) => result,
            Err(_) => Err(CommonError::timeout("post-start hook").into()),
        };

        if cancel.is_cancelled() {
            return Err(CommonError::Cancelled.into());
        }
        result
    }

    /// Stops and deletes the VM of a pod.
    ///
    /// Cancels an in-flight download, attempts a graceful in-guest
    /// shutdown when the VM is running and grace allows, force-stops
    /// otherwise, removes the overlays, and drops the record. A missing
    /// record counts as already deleted.
    ///
    /// # Errors
    ///
    /// Returns stop or overlay-removal failures; the record is removed
    /// regardless.
    pub async fn delete_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<()> {
        let key = PodKey::new(namespace, name);
        let Some(info) = self.data.get(&key) else {
            tracing::debug!(pod = %key, "Virtual machine not found");
            return Ok(());
        };

        if let Some(download_cancel) = &info.download_cancel {
            download_cancel.cancel();
        }

        let result = match info.vm.instance() {
            Some(instance) => {
                self.stop_virtual_machine(&key, instance, grace_period_seconds)
                    .await
            }
            None => Ok(()),
        };

        self.data.remove(&key);
        result
    }

    async fn stop_virtual_machine(
        &self,
        key: &PodKey,
        instance: &Arc<VmInstance>,
        grace_period_seconds: i64,
    ) -> Result<()> {
        if instance.state() == vzpod_vz::MachineState::Running && grace_period_seconds > 0 {
            tracing::info!(pod = %key, "Stopping virtual machine gracefully");
            let deadline = Duration::from_secs(grace_period_seconds.unsigned_abs());
            let shutdown = self.graceful_shutdown(key, instance);
            match tokio::time::timeout(deadline, shutdown).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(pod = %key, error = %err, "Failed to gracefully shutdown VM, will force stop it instead");
                }
                Err(_) => {
                    tracing::warn!(pod = %key, "Graceful shutdown timed out, will force stop");
                }
            }
        }

        instance.stop().await.map_err(Into::into)
    }

    /// Issues the in-guest shutdown sequence, then polls the instance's
    /// finish timestamp.
    async fn graceful_shutdown(&self, key: &PodKey, instance: &Arc<VmInstance>) -> Result<()> {
        let command: Vec<String> = GRACEFUL_SHUTDOWN_COMMAND
            .iter()
            .map(|part| (*part).to_string())
            .collect();

        self.exec_in_virtual_machine(
            &CancellationToken::new(),
            &key.namespace,
            &key.name,
            &command,
            ExecIO::discarding(),
        )
        .await?;

        loop {
            if instance.finished_at().is_some() {
                return Ok(());
            }
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// Returns the VM record of a pod.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown pods.
    pub fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<MacVirtualMachine> {
        let key = PodKey::new(namespace, name);
        self.data
            .get(&key)
            .map(|info| info.vm)
            .ok_or_else(|| CommonError::not_found("virtual machine").into())
    }

    /// Returns every VM record keyed by pod.
    #[must_use]
    pub fn list_virtual_machines(&self) -> std::collections::HashMap<PodKey, MacVirtualMachine> {
        self.data
            .list()
            .into_iter()
            .map(|(key, info)| (key, info.vm))
            .collect()
    }

    /// Executes a command inside the pod's VM over SSH.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown pods, `InvalidInput` when the VM has
    /// no IP yet or SSH credentials are missing, and transport errors
    /// otherwise.
    pub async fn exec_in_virtual_machine(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
        cmd: &[String],
        io: ExecIO,
    ) -> Result<()> {
        let key = PodKey::new(namespace, name);
        let info = self
            .data
            .get(&key)
            .ok_or_else(|| CoreError::from(CommonError::not_found("virtual machine")))?;

        let ip = info.vm.ip_address();
        if ip.is_empty() {
            return Err(
                CommonError::invalid_input("virtual machine does not have an IP address").into(),
            );
        }

        let credentials = self.ssh_credentials.clone().ok_or_else(|| {
            CoreError::from(CommonError::invalid_input(
                "VZ_SSH_USER and VZ_SSH_PASSWORD env variables are required",
            ))
        })?;

        let connection = dial_guest(&format!("{ip}:22"), &credentials, cancel).await?;

        let env: Vec<(String, String)> = info
            .vm
            .env()
            .iter()
            .map(|env| (env.name.clone(), env.value.clone()))
            .collect();
        let result = connection.exec(&env, cmd, io, cancel).await;

        if let Err(err) = connection.close().await {
            tracing::warn!(error = %err, "Failed to close SSH connection");
        }

        result.map_err(Into::into)
    }

    /// Collects the VM's CPU and memory counters via the in-guest stats
    /// script.
    ///
    /// The container name of the returned sample is left empty; the
    /// engine fills in the VM container's name.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the guest cannot run the script or its
    /// output does not parse.
    pub async fn virtual_machine_stats(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
    ) -> Result<ContainerStats> {
        let command: Vec<String> = STATS_SCRIPT.iter().map(|line| (*line).to_string()).collect();

        let buffer = SharedBuffer::default();
        let io = ExecIO {
            tty: false,
            stdin: None,
            stdout: Some(Box::new(buffer.clone())),
            stderr: Some(Box::new(tokio::io::sink())),
            resize: None,
        };

        self.exec_in_virtual_machine(cancel, namespace, name, &command, io)
            .await
            .map_err(|err| {
                CoreError::from(CommonError::unavailable(format!(
                    "error executing stats script: {err}"
                )))
            })?;

        let output = buffer.take();
        let parsed: VmStatsData = serde_json::from_slice(&output).map_err(|err| {
            CoreError::from(CommonError::unavailable(format!(
                "error parsing stats output: {err}"
            )))
        })?;

        let timestamp = Utc::now();
        Ok(ContainerStats {
            name: String::new(),
            timestamp,
            cpu: CpuStats {
                usage_nano_cores: Some(parsed.cpu_usage_nano_cores),
                usage_core_nano_seconds: Some(parsed.cpu_usage_core_nano_seconds),
            },
            memory: MemoryStats {
                usage_bytes: Some(parsed.memory_usage_bytes),
                rss_bytes: Some(parsed.memory_rss_bytes),
                working_set_bytes: Some(parsed.memory_working_set_bytes),
            },
        })
    }
}

/// The fixed JSON schema the in-guest stats script emits.
#[derive(Debug, Deserialize)]
struct VmStatsData {
    #[serde(rename = "cpuUsageNanoCores")]
    cpu_usage_nano_cores: u64,
    #[serde(rename = "cpuUsageCoreNanoSeconds")]
    cpu_usage_core_nano_seconds: u64,
    #[serde(rename = "memoryUsageBytes")]
    memory_usage_bytes: u64,
    #[serde(rename = "memoryRssBytes")]
    memory_rss_bytes: u64,
    #[serde(rename = "memoryWorkingSetBytes")]
    memory_working_set_bytes: u64,
}

/// An in-memory `AsyncWrite` accumulating exec output.
#[derive(Clone, Default)]
struct SharedBuffer(Arc<StdMutex<Vec<u8>>>);

impl SharedBuffer {
    fn take(&self) -> Vec<u8> {
        std::mem::take(
            &mut *self
                .0
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

impl AsyncWrite for SharedBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
