//! The pod engine: create, delete, status, stream routing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::Future;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::credentials::{extract_pod_credentials, ConfigMap, ConfigMapSource, PodDeleter, TokenSource};
use crate::error::{CoreError, Result};
use crate::resource::{ExecAction, MacVirtualMachine};
use crate::spec::{ContainerSpec, Pod, PodKey, PodPhase, PodStatus};
use crate::status::build_pod_status;
use crate::vm::{MacVmClient, VirtualMachineParams};
use crate::volumes::create_container_mounts;
use vzpod_container::{Container, ContainerParams, ContainerStats, DockerClient, LogOptions};
use vzpod_error::CommonError;
use vzpod_event::{EventRecorder, ObjectReference};
use vzpod_ssh::ExecIO;

/// Grace period used when the engine deletes a group on its own (terminal
/// state auto-cleanup, forget-pod recovery).
pub const DEFAULT_DELETE_GRACE_PERIOD_SECONDS: i64 = 10;

/// Directory under the cache root holding materialized pod mounts.
const POD_MOUNTS_DIR: &str = "mounts";

/// Timeout for post-start exec hooks. The control plane carries no
/// per-hook timeout, so a fixed one applies.
const POST_START_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// The aggregate per-pod record: one VM plus the auxiliary containers.
#[derive(Debug, Clone, Default)]
pub struct VirtualizationGroup {
    /// The VM record; absent only for partially torn-down groups.
    pub vm: Option<MacVirtualMachine>,
    /// Auxiliary container records.
    pub containers: Vec<Container>,
}

type DeleteOutcome = std::result::Result<(), Arc<CoreError>>;

/// Per-group bookkeeping the engine owns.
struct GroupExtras {
    /// Scoped mount root, `<cache>/mounts/<pod-uid>`.
    root_dir: PathBuf,
    /// Cancellation root of the group's async work.
    cancel: CancellationToken,
    /// Single-shot flag protecting teardown.
    delete_started: AtomicBool,
    /// Broadcast slot so concurrent deleters observe the same outcome.
    delete_tx: watch::Sender<Option<DeleteOutcome>>,
}

impl GroupExtras {
    fn new(root_dir: PathBuf) -> Self {
        let (delete_tx, _) = watch::channel(None);
        Self {
            root_dir,
            cancel: CancellationToken::new(),
            delete_started: AtomicBool::new(false),
            delete_tx,
        }
    }
}

/// Translates control-plane pod intent into fanned-out work across the VM
/// and container managers and synthesizes pod status back.
///
/// Cheap to clone; all clones share the same group records.
#[derive(Clone)]
pub struct VzEngine {
    vm_client: MacVmClient,
    container_client: Option<DockerClient>,
    recorder: Arc<dyn EventRecorder>,
    token_source: Arc<dyn TokenSource>,
    config_map_source: Arc<dyn ConfigMapSource>,
    pod_deleter: Option<Arc<dyn PodDeleter>>,

    cache_path: PathBuf,
    host_ip: String,

    extras: Arc<StdMutex<HashMap<PodKey, Arc<GroupExtras>>>>,
}

impl VzEngine {
    /// Creates the engine and purges stale pod mounts left by a previous
    /// process.
    pub fn new(
        vm_client: MacVmClient,
        container_client: Option<DockerClient>,
        recorder: Arc<dyn EventRecorder>,
        token_source: Arc<dyn TokenSource>,
        config_map_source: Arc<dyn ConfigMapSource>,
        cache_path: impl Into<PathBuf>,
        host_ip: impl Into<String>,
    ) -> Self {
        let cache_path = cache_path.into();
        let _ = std::fs::remove_dir_all(cache_path.join(POD_MOUNTS_DIR));

        Self {
            vm_client,
            container_client,
            recorder,
            token_source,
            config_map_source,
            pod_deleter: None,
            cache_path,
            host_ip: host_ip.into(),
            extras: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Attaches the fast-delete collaborator.
    #[must_use]
    pub fn with_pod_deleter(mut self, deleter: Arc<dyn PodDeleter>) -> Self {
        self.pod_deleter = Some(deleter);
        self
    }

    fn pod_mount_root(&self, pod: &Pod) -> PathBuf {
        self.cache_path.join(POD_MOUNTS_DIR).join(&pod.metadata.uid)
    }

    fn scoped_recorder(&self, pod: &Pod) -> Arc<dyn EventRecorder> {
        Arc::clone(&self.recorder).with_object_ref(ObjectReference {
            namespace: pod.metadata.namespace.clone(),
            name: pod.metadata.name.clone(),
            uid: pod.metadata.uid.clone(),
        })
    }

    /// Accepts a pod and fans out creation of its VM and auxiliary
    /// containers.
    ///
    /// Credentials and mounts are prepared first; the VM task and every
    /// container task are then accepted concurrently. Failure of any
    /// branch tears the whole group down before returning.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for empty pods, pods with auxiliary
    /// containers without a container runtime, invalid resource requests,
    /// or duplicate creates.
    pub async fn create_pod(&self, pod: &Pod) -> Result<()> {
        let key = PodKey::from(pod);
        tracing::debug!(pod = %key, "Received create pod request");

        if pod.spec.containers.is_empty() {
            return Err(CommonError::invalid_input("pod has no containers").into());
        }
        if pod.spec.containers.len() > 1 && self.container_client.is_none() {
            return Err(CommonError::invalid_input("regular containers are not supported").into());
        }

        let (config_maps, token) = extract_pod_credentials(
            pod,
            self.token_source.as_ref(),
            self.config_map_source.as_ref(),
        )
        .await?;

        let extras = Arc::new(GroupExtras::new(self.pod_mount_root(pod)));
        {
            let mut groups = self
                .extras
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if groups.contains_key(&key) {
                return Err(
                    CommonError::invalid_input("virtualization group already exists").into(),
                );
            }
            groups.insert(key.clone(), Arc::clone(&extras));
        }

        let recorder = self.scoped_recorder(pod);
        let result = self
            .fan_out_create(pod, &extras, &recorder, &config_maps, token.as_deref())
            .await;

        if let Err(err) = result {
            // Roll the group back before surfacing the failure.
            self.extras
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&key);
            extras.cancel.cancel();
            if let Err(cleanup_err) = std::fs::remove_dir_all(&extras.root_dir) {
                if cleanup_err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(error = %cleanup_err, "Failed to clean up pod volume root");
                }
            }
            return Err(err);
        }

        Ok(())
    }

    async fn fan_out_create(
        &self,
        pod: &Pod,
        extras: &Arc<GroupExtras>,
        recorder: &Arc<dyn EventRecorder>,
        config_maps: &HashMap<String, ConfigMap>,
        token: Option<&str>,
    ) -> Result<()> {
        type BranchFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
        let mut branches: Vec<BranchFuture<'_>> = Vec::with_capacity(pod.spec.containers.len());

        // The first container is, by convention, the VM.
        let vm_container = &pod.spec.containers[0];
        branches.push(Box::pin(async move {
            let cpu = vm_container.resources.cpu_request()?;
            let memory_size = vm_container.resources.memory_request()?;
            self.vm_client
                .validate_resources(cpu, memory_size)
                .map_err(|err| CommonError::invalid_input(err.to_string()))?;

            let mounts = create_container_mounts(
                &extras.root_dir,
                vm_container,
                pod,
                token,
                config_maps,
            )?;

            self.vm_client.create_virtual_machine(
                extras.cancel.child_token(),
                Arc::clone(recorder),
                VirtualMachineParams {
                    uid: pod.metadata.uid.clone(),
                    image: vm_container.image.clone(),
                    namespace: pod.metadata.namespace.clone(),
                    name: pod.metadata.name.clone(),
                    container_name: vm_container.name.clone(),
                    cpu,
                    memory_size,
                    mounts,
                    env: vm_container.env.clone(),
                    post_start: post_start_action(vm_container),
                    ignore_image_cache: vm_container.image_pull_policy
                        == crate::spec::PullPolicy::Always,
                },
            )
        }));

        for container in &pod.spec.containers[1..] {
            // Checked by create_pod; auxiliary containers imply a runtime.
            let Some(container_client) = &self.container_client else {
                continue;
            };
            branches.push(Box::pin(async move {
                let mounts =
                    create_container_mounts(&extras.root_dir, container, pod, token, config_maps)?;

                container_client
                    .create_container(
                        extras.cancel.child_token(),
                        Arc::clone(recorder),
                        ContainerParams {
                            pod_namespace: pod.metadata.namespace.clone(),
                            pod_name: pod.metadata.name.clone(),
                            name: container.name.clone(),
                            image: container.image.clone(),
                            image_pull_policy: match container.image_pull_policy {
                                crate::spec::PullPolicy::Always => {
                                    vzpod_container::PullPolicy::Always
                                }
                                crate::spec::PullPolicy::IfNotPresent => {
                                    vzpod_container::PullPolicy::IfNotPresent
                                }
                                crate::spec::PullPolicy::Never => {
                                    vzpod_container::PullPolicy::Never
                                }
                            },
                            mounts: mounts
                                .into_iter()
                                .map(|mount| vzpod_container::Mount {
                                    host_path: mount.host_path,
                                    container_path: mount.container_path,
                                    read_only: mount.read_only,
                                })
                                .collect(),
                            env: container
                                .env
                                .iter()
                                .map(|env| (env.name.clone(), env.value.clone()))
                                .collect(),
                            command: container.command.clone(),
                            args: container.args.clone(),
                            working_dir: container.working_dir.clone(),
                            tty: container.tty,
                            stdin: container.stdin,
                            stdin_once: container.stdin_once,
                            post_start: post_start_action(container).map(|action| {
                                vzpod_container::ExecAction {
                                    command: action.command,
                                    timeout: action.timeout,
                                }
                            }),
                        },
                    )
                    .map_err(Into::into)
            }));
        }

        futures::future::try_join_all(branches).await?;
        Ok(())
    }

    /// Handles a pod delete: pre-stop hooks, group teardown, fast delete.
    ///
    /// Fire-and-forget; runs on a detached task so the control-plane
    /// request returns immediately.
    pub fn delete_pod(&self, pod: Pod) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.handle_delete_pod(pod).await;
        });
    }

    async fn handle_delete_pod(&self, pod: Pod) {
        let key = PodKey::from(&pod);
        let grace_period = pod.metadata.deletion_grace_period_seconds.unwrap_or(0);

        // No reason to run pre-stop hooks when grace is 0 or the pod never
        // ran.
        let running = pod
            .status
            .as_ref()
            .is_some_and(|status| status.phase == PodPhase::Running);
        let mut can_delete_fast = true;
        if running && grace_period > 0 {
            can_delete_fast = self.handle_pre_stop_hooks(&pod, grace_period).await.is_ok();
        }

        if let Err(err) = self
            .delete_virtualization_group(&key.namespace, &key.name, grace_period)
            .await
        {
            tracing::error!(pod = %key, error = %err, "Failed to delete virtualization group");
            return;
        }

        if !can_delete_fast {
            // Leave the pod to the normal grace so operators can observe
            // the failed hooks.
            return;
        }

        if let Some(deleter) = &self.pod_deleter {
            // The group is drained; accelerate the control-plane delete.
            if let Err(err) = deleter.delete_pod_fast(&key.namespace, &key.name).await {
                tracing::warn!(pod = %key, error = %err, "Failed to fast-delete pod");
            }
        }
    }

    /// Runs every container's pre-stop exec hook concurrently under a
    /// combined grace timeout.
    async fn handle_pre_stop_hooks(&self, pod: &Pod, grace_period_seconds: i64) -> Result<()> {
        let recorder = self.scoped_recorder(pod);
        let cancel = CancellationToken::new();

        type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
        let mut hooks: Vec<HookFuture<'_>> = Vec::new();
        for container in &pod.spec.containers {
            let Some(command) = pre_stop_command(container) else {
                continue;
            };
            let recorder = Arc::clone(&recorder);
            let cancel = cancel.clone();
            hooks.push(Box::pin(async move {
                let result = self
                    .execute_container_command(
                        &cancel,
                        &pod.metadata.namespace,
                        &pod.metadata.name,
                        &container.name,
                        &command,
                        ExecIO::discarding(),
                    )
                    .await;
                if let Err(err) = &result {
                    recorder.failed_pre_stop_hook(&container.name, &command, err);
                }
                result
            }));
        }
        if hooks.is_empty() {
            return Ok(());
        }

        let deadline = Duration::from_secs(grace_period_seconds.unsigned_abs());
        let result =
            match tokio::time::timeout(deadline, futures::future::try_join_all(hooks)).await {
                Ok(result) => result.map(|_| ()),
                Err(_) => Err(CommonError::timeout("pre-stop hooks").into()),
            };
        cancel.cancel();
        result
    }

    /// Tears down a virtualization group.
    ///
    /// The first caller starts the teardown; concurrent callers share the
    /// same outcome. The VM and the containers are removed concurrently;
    /// a double not-found collapses to a single one. The record is
    /// removed, the group token cancelled, and the mount root deleted
    /// regardless of branch failures.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown groups or the (shared) teardown
    /// failure.
    pub async fn delete_virtualization_group(
        &self,
        namespace: &str,
        name: &str,
        grace_period_seconds: i64,
    ) -> Result<()> {
        let key = PodKey::new(namespace, name);
        let Some(extras) = self
            .extras
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .cloned()
        else {
            return Err(CommonError::not_found("virtualization group").into());
        };

        if !extras.delete_started.swap(true, Ordering::SeqCst) {
            let engine = self.clone();
            let task_extras = Arc::clone(&extras);
            let task_key = key.clone();
            tokio::spawn(async move {
                let result = engine
                    .run_group_delete(&task_key, grace_period_seconds)
                    .await;

                engine
                    .extras
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&task_key);

                // The group token falls only after the VM and containers
                // are gone, so their teardown is not self-cancelled.
                task_extras.cancel.cancel();

                if let Err(err) = std::fs::remove_dir_all(&task_extras.root_dir) {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(error = %err, "Failed to clean up pod volume root");
                    }
                }

                let _ = task_extras.delete_tx.send(Some(result.map_err(Arc::new)));
            });
        }

        let mut done_rx = extras.delete_tx.subscribe();
        let outcome = done_rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| CoreError::from(CommonError::internal("delete task dropped")))?;
        match outcome.as_ref() {
            Some(Ok(())) => Ok(()),
            Some(Err(err)) => Err(CoreError::Shared(Arc::clone(err))),
            None => Err(CommonError::internal("delete finished without outcome").into()),
        }
    }

    async fn run_group_delete(&self, key: &PodKey, grace_period_seconds: i64) -> Result<()> {
        let vm_branch =
            self.vm_client
                .delete_virtual_machine(&key.namespace, &key.name, grace_period_seconds);
        let container_branch = async {
            match &self.container_client {
                Some(client) => Some(
                    client
                        .remove_containers(&key.namespace, &key.name, grace_period_seconds)
                        .await,
                ),
                None => None,
            }
        };

        let (vm_result, container_result) = tokio::join!(vm_branch, container_branch);

        match (vm_result, container_result) {
            (Err(vm_err), Some(Err(container_err))) => {
                if vm_err.is_not_found() && container_err.is_not_found() {
                    Err(CommonError::not_found("virtualization group").into())
                } else {
                    Err(CoreError::Joined(vec![vm_err, container_err.into()]))
                }
            }
            (Err(vm_err), _) => {
                if vm_err.is_not_found() {
                    Ok(())
                } else {
                    Err(vm_err)
                }
            }
            (Ok(()), Some(Err(container_err))) => {
                if container_err.is_not_found() {
                    Ok(())
                } else {
                    Err(container_err.into())
                }
            }
            (Ok(()), _) => Ok(()),
        }
    }

    /// Retrieves the joint group record for a pod.
    ///
    /// # Errors
    ///
    /// Returns a single `NotFound` when both the VM and the containers
    /// are unknown, or the first non-not-found branch error (the group is
    /// then partial).
    pub async fn get_virtualization_group(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualizationGroup> {
        let container_result = match &self.container_client {
            Some(client) => client
                .get_containers(namespace, name)
                .await
                .map_err(CoreError::from),
            None => Err(CommonError::not_found("container client not available").into()),
        };
        let vm_result = self.vm_client.get_virtual_machine(namespace, name);

        let container_not_found = container_result
            .as_ref()
            .is_err_and(CoreError::is_not_found);
        let vm_not_found = vm_result.as_ref().is_err_and(CoreError::is_not_found);
        if container_not_found && vm_not_found {
            return Err(CommonError::not_found("virtualization group").into());
        }

        let mut errors = Vec::new();
        let containers = match container_result {
            Ok(containers) => containers,
            Err(err) => {
                if !err.is_not_found() {
                    errors.push(err);
                }
                Vec::new()
            }
        };
        let vm = match vm_result {
            Ok(vm) => Some(vm),
            Err(err) => {
                if !err.is_not_found() {
                    errors.push(err);
                }
                None
            }
        };

        if !errors.is_empty() {
            return Err(if errors.len() == 1 {
                errors.remove(0)
            } else {
                CoreError::Joined(errors)
            });
        }

        Ok(VirtualizationGroup { vm, containers })
    }

    /// Lists every tracked group, merging the VM and container views by
    /// pod key.
    pub async fn list_virtualization_groups(&self) -> HashMap<PodKey, VirtualizationGroup> {
        let vms = self.vm_client.list_virtual_machines();
        let containers = match &self.container_client {
            Some(client) => client.list_containers().await,
            None => HashMap::new(),
        };

        let mut groups: HashMap<PodKey, VirtualizationGroup> = HashMap::new();
        for (key, vm) in vms {
            groups.entry(key).or_default().vm = Some(vm);
        }
        for ((namespace, name), pod_containers) in containers {
            groups
                .entry(PodKey::new(namespace, name))
                .or_default()
                .containers = pod_containers;
        }
        groups
    }

    /// Synthesizes a pod status from the group state.
    ///
    /// Pods that reached `Failed` or `Succeeded` without a pending
    /// deletion are auto-deleted with the default grace so resources do
    /// not leak once the control plane stops polling.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown groups.
    pub async fn get_pod_status(&self, pod: &Pod) -> Result<PodStatus> {
        let key = PodKey::from(pod);
        let group = self
            .get_virtualization_group(&key.namespace, &key.name)
            .await?;

        let status = build_pod_status(&group, pod, &self.host_ip);

        if pod.metadata.deletion_timestamp.is_none()
            && matches!(status.phase, PodPhase::Failed | PodPhase::Succeeded)
        {
            // A terminal pod is never queried again by design; reclaim it.
            let engine = self.clone();
            tokio::spawn(async move {
                if let Err(err) = engine
                    .delete_virtualization_group(
                        &key.namespace,
                        &key.name,
                        DEFAULT_DELETE_GRACE_PERIOD_SECONDS,
                    )
                    .await
                {
                    tracing::debug!(pod = %key, error = %err, "Failed to auto-delete terminal virtualization group");
                }
            });
        }

        Ok(status)
    }

    /// Opens a container's log stream.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for the VM container; the VM has no log
    /// stream.
    pub fn container_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        opts: &LogOptions,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>> {
        if let Some(client) = &self.container_client {
            if client.is_container_present(namespace, pod_name, container_name) {
                return Ok(Box::new(client.container_logs(
                    namespace,
                    pod_name,
                    container_name,
                    opts,
                )));
            }
        }

        Err(CommonError::invalid_input(
            "container logs are not supported for macOS virtual machines",
        )
        .into())
    }

    /// Executes a command in a container, routing to the container
    /// manager when the container is known and to the VM otherwise.
    ///
    /// # Errors
    ///
    /// Returns the routed manager's error.
    pub async fn execute_container_command(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        cmd: &[String],
        io: ExecIO,
    ) -> Result<()> {
        if let Some(client) = &self.container_client {
            if client.is_container_present(namespace, pod_name, container_name) {
                return client
                    .exec_in_container(cancel, namespace, pod_name, container_name, cmd, io)
                    .await
                    .map_err(Into::into);
            }
        }

        self.vm_client
            .exec_in_virtual_machine(cancel, namespace, pod_name, cmd, io)
            .await
    }

    /// Attaches to a container, or opens an interactive shell into the VM
    /// when the container is not known to the container manager.
    ///
    /// # Errors
    ///
    /// Returns the routed manager's error.
    pub async fn attach_to_container(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        io: ExecIO,
    ) -> Result<()> {
        if let Some(client) = &self.container_client {
            if client.is_container_present(namespace, pod_name, container_name) {
                return client
                    .attach_to_container(cancel, namespace, pod_name, container_name, io)
                    .await
                    .map_err(Into::into);
            }
        }

        self.vm_client
            .exec_in_virtual_machine(cancel, namespace, pod_name, &[], io)
            .await
    }

    /// Collects stats for every container of a pod: the VM (first
    /// container) via the in-guest script, the rest from the container
    /// runtime.
    ///
    /// # Errors
    ///
    /// Returns the first collection failure.
    pub async fn get_virtualization_group_stats(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        name: &str,
        containers: &[ContainerSpec],
    ) -> Result<Vec<ContainerStats>> {
        let Some(vm_container) = containers.first() else {
            return Err(CommonError::invalid_input("pod has no containers").into());
        };

        let mut vm_stats = self
            .vm_client
            .virtual_machine_stats(cancel, namespace, name)
            .await?;
        vm_stats.name = vm_container.name.clone();

        let mut stats = vec![vm_stats];
        for container in &containers[1..] {
            let client = self
                .container_client
                .as_ref()
                .ok_or_else(|| CoreError::from(CommonError::not_found("container client")))?;
            stats.push(
                client
                    .container_stats(namespace, name, &container.name)
                    .await?,
            );
        }

        Ok(stats)
    }
}

/// Extracts a container's post-start exec action with the fixed timeout.
fn post_start_action(container: &ContainerSpec) -> Option<ExecAction> {
    let exec = container.lifecycle.as_ref()?.post_start.as_ref()?.exec.as_ref()?;
    Some(ExecAction {
        command: exec.command.clone(),
        timeout: POST_START_COMMAND_TIMEOUT,
    })
}

/// Extracts a container's pre-stop exec command.
fn pre_stop_command(container: &ContainerSpec) -> Option<Vec<String>> {
    let exec = container.lifecycle.as_ref()?.pre_stop.as_ref()?.exec.as_ref()?;
    Some(exec.command.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ExecHandler, Lifecycle, LifecycleHandler};

    #[test]
    fn test_post_start_action_extraction() {
        let container = ContainerSpec {
            lifecycle: Some(Lifecycle {
                post_start: Some(LifecycleHandler {
                    exec: Some(ExecHandler {
                        command: vec!["echo".to_string(), "hello".to_string()],
                    }),
                }),
                pre_stop: None,
            }),
            ..ContainerSpec::default()
        };

        let action = post_start_action(&container).unwrap();
        assert_eq!(action.command, vec!["echo", "hello"]);
        assert_eq!(action.timeout, POST_START_COMMAND_TIMEOUT);
        assert!(pre_stop_command(&container).is_none());
    }

    #[test]
    fn test_hookless_container() {
        let container = ContainerSpec::default();
        assert!(post_start_action(&container).is_none());
        assert!(pre_stop_command(&container).is_none());
    }
}
