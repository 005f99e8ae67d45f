//! The Docker-backed container manager.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions,
    StatsOptions,
};
use bollard::exec::{CreateExecOptions, ResizeExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, RemoveImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::data::{ContainerData, ContainerInfo};
use crate::error::{ContainerError, Result};
use crate::state::{Container, ContainerState, ContainerStats, ContainerStatus, CpuStats, MemoryStats};
use vzpod_error::CommonError;
use vzpod_event::EventRecorder;
use vzpod_image::BackoffPolicy;
use vzpod_ssh::ExecIO;

/// Prefix identifying containers managed by this node.
pub const CONTAINER_NAME_PREFIX: &str = "vzpod";

/// Poll interval while waiting for a container to run before post-start.
const POST_START_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Image pull policy from the pod spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullPolicy {
    /// Remove the local image, then pull.
    Always,
    /// Pull when the image is absent locally.
    IfNotPresent,
    /// Never pull.
    Never,
}

/// A lifecycle exec action with its timeout.
#[derive(Debug, Clone)]
pub struct ExecAction {
    /// Command to execute inside the container.
    pub command: Vec<String>,
    /// Maximum duration to wait for the command.
    pub timeout: Duration,
}

/// A host path bind-mounted into the container.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Host side of the bind.
    pub host_path: PathBuf,
    /// Container side of the bind.
    pub container_path: PathBuf,
    /// Read-only bind.
    pub read_only: bool,
}

/// Everything needed to create one auxiliary container.
#[derive(Debug, Clone)]
pub struct ContainerParams {
    /// Pod namespace.
    pub pod_namespace: String,
    /// Pod name.
    pub pod_name: String,
    /// Container name within the pod.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Pull policy.
    pub image_pull_policy: PullPolicy,
    /// Bind mounts.
    pub mounts: Vec<Mount>,
    /// Environment variables.
    pub env: Vec<(String, String)>,
    /// Entrypoint override.
    pub command: Vec<String>,
    /// Arguments.
    pub args: Vec<String>,
    /// Working directory.
    pub working_dir: String,
    /// Allocate a TTY.
    pub tty: bool,
    /// Keep stdin open.
    pub stdin: bool,
    /// Close stdin after the first attach.
    pub stdin_once: bool,
    /// Post-start exec hook.
    pub post_start: Option<ExecAction>,
}

/// Log streaming options.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Follow the stream.
    pub follow: bool,
    /// Number of trailing lines; all when `None`.
    pub tail: Option<i64>,
    /// Only lines newer than this many seconds.
    pub since_seconds: Option<i64>,
    /// Only lines newer than this instant; ignored when `since_seconds`
    /// is set.
    pub since_time: Option<DateTime<Utc>>,
    /// Prefix lines with timestamps.
    pub timestamps: bool,
}

/// Manages auxiliary containers through the Docker API.
///
/// Cheap to clone; all clones share the same record map and runtime
/// connection.
#[derive(Clone)]
pub struct DockerClient {
    client: Docker,
    data: Arc<ContainerData>,
    backoff: BackoffPolicy,
}

impl DockerClient {
    /// Creates a manager and removes containers dangling from a previous
    /// crash (anything named `vzpod_*`, force + volumes).
    ///
    /// # Errors
    ///
    /// Returns a runtime error when the dangling-container listing fails.
    pub async fn new(client: Docker) -> Result<Self> {
        let dangling = list_managed_containers(&client).await?;
        for (key, ids) in dangling {
            for id in ids {
                tracing::info!(
                    namespace = key.0,
                    pod = key.1,
                    id,
                    "Removing dangling container"
                );
                let _ = client
                    .remove_container(
                        &id,
                        Some(RemoveContainerOptions {
                            force: true,
                            v: true,
                            ..Default::default()
                        }),
                    )
                    .await;
            }
        }

        Ok(Self {
            client,
            data: Arc::new(ContainerData::new()),
            backoff: BackoffPolicy::default(),
        })
    }

    /// Accepts a container create and runs the pipeline asynchronously.
    ///
    /// The record is inserted before returning; pull, create, start, and
    /// the optional post-start hook run on a detached task that stores a
    /// terminal error into the record on failure. The recorder carries
    /// the pod's object reference.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a record for the container already
    /// exists.
    pub fn create_container(
        &self,
        cancel: CancellationToken,
        recorder: Arc<dyn EventRecorder>,
        params: ContainerParams,
    ) -> Result<()> {
        let (_, loaded) = self.data.get_or_create(
            &params.pod_namespace,
            &params.pod_name,
            &params.name,
            ContainerInfo::default(),
        );
        if loaded {
            return Err(CommonError::invalid_input(format!(
                "container {} already exists",
                params.name
            ))
            .into());
        }

        let client = self.clone();
        tokio::spawn(async move {
            if let Err(err) = client.handle_creation(&cancel, &recorder, &params).await {
                tracing::debug!(container = params.name, error = %err, "Container creation failed");
                let info = client
                    .data
                    .get(&params.pod_namespace, &params.pod_name, &params.name)
                    .unwrap_or_default();
                client.data.set(
                    &params.pod_namespace,
                    &params.pod_name,
                    &params.name,
                    info.with_error(&err),
                );
            }
        });

        Ok(())
    }

    async fn handle_creation(
        &self,
        cancel: &CancellationToken,
        recorder: &Arc<dyn EventRecorder>,
        params: &ContainerParams,
    ) -> Result<()> {
        tracing::debug!(container = params.name, image = params.image, "Creating container");

        match params.image_pull_policy {
            PullPolicy::Always => {
                tracing::debug!(image = params.image, "Removing existing image due to pull policy");
                // Images still used by running containers survive removal.
                let _ = self
                    .client
                    .remove_image(
                        &params.image,
                        Some(RemoveImageOptions {
                            force: false,
                            noprune: false,
                        }),
                        None,
                    )
                    .await;
                self.pull_image(cancel, recorder, &params.image, &params.name)
                    .await?;
            }
            PullPolicy::IfNotPresent => {
                self.pull_image(cancel, recorder, &params.image, &params.name)
                    .await?;
            }
            PullPolicy::Never => {}
        }

        let container_name =
            underlying_container_name(&params.pod_namespace, &params.pod_name, &params.name);
        let config = container_config(params);
        let created = match self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name,
                    platform: None,
                }),
                config,
            )
            .await
        {
            Ok(created) => created,
            Err(err) => {
                recorder.failed_to_create_container(&params.name, &err);
                return Err(err.into());
            }
        };

        let info = ContainerInfo::default().with_id(&created.id);
        self.data
            .set(&params.pod_namespace, &params.pod_name, &params.name, info);
        recorder.created_container(&params.name);

        if let Err(err) = self
            .client
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            recorder.failed_to_start_container(&params.name, &err);
            return Err(err.into());
        }
        recorder.started_container(&params.name);

        if let Some(action) = &params.post_start {
            if let Err(err) = self
                .exec_post_start(cancel, &created.id, params, action)
                .await
            {
                recorder.failed_post_start_hook(&params.name, &action.command, &err);
            }
        }

        Ok(())
    }

    /// Pulls an image, retrying with the pull backoff schedule.
    async fn pull_image(
        &self,
        cancel: &CancellationToken,
        recorder: &Arc<dyn EventRecorder>,
        image: &str,
        container_name: &str,
    ) -> Result<()> {
        recorder.pulling_image(image, container_name);
        let started = std::time::Instant::now();

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(CommonError::Cancelled.into());
            }

            let mut stream = self.client.create_image(
                Some(CreateImageOptions {
                    from_image: image.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            );

            let mut pull_err = None;
            while let Some(progress) = stream.next().await {
                match progress {
                    Ok(info) => {
                        if let Some(status) = info.status {
                            tracing::debug!(image, status, "Pull progress");
                        }
                    }
                    Err(err) => {
                        pull_err = Some(err);
                        break;
                    }
                }
            }

            match pull_err {
                None => break,
                Some(err) => {
                    recorder.failed_to_pull_image(image, container_name, &err);

                    attempt += 1;
                    if attempt >= self.backoff.max_attempts {
                        recorder.back_off_pull_image(image, container_name, &err);
                        return Err(err.into());
                    }

                    let delay = self.backoff.delay(attempt - 1);
                    tokio::select! {
                        () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        recorder.pulled_image(
            image,
            container_name,
            &format!("{:.3}s", started.elapsed().as_secs_f64()),
        );
        Ok(())
    }

    /// Polls inspect until the container runs, then execs the hook with
    /// its timeout.
    async fn exec_post_start(
        &self,
        cancel: &CancellationToken,
        container_id: &str,
        params: &ContainerParams,
        action: &ExecAction,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
                () = tokio::time::sleep(POST_START_POLL_INTERVAL) => {}
            }

            let inspect = self.client.inspect_container(container_id, None).await?;
            let running = inspect
                .state
                .as_ref()
                .and_then(|state| state.running)
                .unwrap_or(false);
            if !running {
                continue;
            }

            tracing::info!(
                container = params.name,
                "Container is running, executing post-start command"
            );
            let exec = self.exec_in_container(
                cancel,
                &params.pod_namespace,
                &params.pod_name,
                &params.name,
                &action.command,
                ExecIO::discarding(),
            );
            return match tokio::time::timeout(action.timeout, exec).await {
                Ok(result) => result,
                Err(_) => Err(CommonError::timeout("post-start hook").into()),
            };
        }
    }

    /// Best-effort removal of every known container of a pod.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the pod has no container records, or the
    /// joined removal failures.
    pub async fn remove_containers(
        &self,
        namespace: &str,
        pod_name: &str,
        _grace_period_seconds: i64,
    ) -> Result<()> {
        let Some(infos) = self.data.remove_all(namespace, pod_name) else {
            return Err(CommonError::not_found("containers").into());
        };

        let mut errors = Vec::new();
        for info in infos.values() {
            if info.id.is_empty() {
                // The runtime never accepted this one.
                continue;
            }
            if let Err(err) = self
                .client
                .remove_container(
                    &info.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                errors.push(ContainerError::from(err));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ContainerError::Joined(errors))
        }
    }

    /// Returns the wrapped container objects for a pod.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the pod has no container records.
    pub async fn get_containers(&self, namespace: &str, pod_name: &str) -> Result<Vec<Container>> {
        let Some(infos) = self.data.get_all(namespace, pod_name) else {
            return Err(CommonError::not_found("containers").into());
        };
        Ok(self.wrap_containers(infos).await)
    }

    /// Returns container objects for every tracked pod.
    pub async fn list_containers(&self) -> HashMap<(String, String), Vec<Container>> {
        let snapshot = self.data.all();
        let mut result = HashMap::with_capacity(snapshot.len());
        for (key, infos) in snapshot {
            result.insert(key, self.wrap_containers(infos).await);
        }
        result
    }

    async fn wrap_containers(&self, infos: HashMap<String, ContainerInfo>) -> Vec<Container> {
        let mut containers = Vec::with_capacity(infos.len());
        for (name, info) in infos {
            let mut container = Container {
                id: info.id.clone(),
                name,
                state: ContainerState::default(),
            };

            if let Some(error) = info.error {
                container.state.error = error;
            } else if !info.id.is_empty() {
                match self.client.inspect_container(&info.id, None).await {
                    Ok(inspect) => {
                        container.state = container_state_from_docker(inspect.state.as_ref());
                    }
                    Err(err) => {
                        tracing::warn!(id = info.id, error = %err, "Failed to inspect container");
                        container.state.error = err.to_string();
                    }
                }
            }

            containers.push(container);
        }
        containers
    }

    /// Returns true when the container is tracked for the pod.
    #[must_use]
    pub fn is_container_present(&self, namespace: &str, pod_name: &str, container_name: &str) -> bool {
        self.data.get(namespace, pod_name, container_name).is_some()
    }

    /// Opens the container's log stream with stdout and stderr
    /// demultiplexed into one ordered pipe. Stream failures end the pipe.
    pub fn container_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        opts: &LogOptions,
    ) -> impl AsyncRead + Send + Unpin {
        let since = opts
            .since_seconds
            .map(|seconds| Utc::now().timestamp() - seconds)
            .or_else(|| opts.since_time.map(|time| time.timestamp()))
            .unwrap_or(0);

        let docker_opts = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            since,
            timestamps: opts.timestamps,
            follow: opts.follow,
            tail: opts
                .tail
                .map_or_else(|| "all".to_string(), |lines| lines.to_string()),
            ..Default::default()
        };

        let mut stream = self.client.logs(
            &underlying_container_name(namespace, pod_name, container_name),
            Some(docker_opts),
        );

        let (reader, mut writer) = tokio::io::duplex(64 * 1024);
        tokio::spawn(async move {
            while let Some(output) = stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message })
                    | Ok(LogOutput::StdErr { message })
                    | Ok(LogOutput::Console { message }) => {
                        if writer.write_all(&message).await.is_err() {
                            break;
                        }
                    }
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "Log stream failed");
                        break;
                    }
                }
            }
            let _ = writer.shutdown().await;
        });

        reader
    }

    /// Executes a command in a container of a pod.
    ///
    /// With a TTY, stdin and output are pumped on independent tasks and
    /// terminal resizes are forwarded to the exec's resize endpoint.
    /// Without one, stdin is copied synchronously, the write half closed
    /// to flush, and output drained.
    ///
    /// # Errors
    ///
    /// Returns runtime errors, or `Cancelled` when the token fires.
    pub async fn exec_in_container(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        cmd: &[String],
        mut io: ExecIO,
    ) -> Result<()> {
        let is_tty = io.tty;
        let _console_size = io.console_size().await;

        let exec = self
            .client
            .create_exec(
                &underlying_container_name(namespace, pod_name, container_name),
                CreateExecOptions::<String> {
                    cmd: Some(cmd.to_vec()),
                    attach_stdin: Some(io.stdin.is_some()),
                    attach_stdout: Some(io.stdout.is_some()),
                    attach_stderr: Some(io.stderr.is_some()),
                    tty: Some(is_tty),
                    ..Default::default()
                },
            )
            .await?;

        if is_tty {
            if let Some(mut resize) = io.resize.take() {
                let client = self.client.clone();
                let exec_id = exec.id.clone();
                let resize_cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = resize_cancel.cancelled() => break,
                            size = resize.recv() => match size {
                                Some(size) => {
                                    let result = client
                                        .resize_exec(&exec_id, ResizeExecOptions {
                                            height: size.height,
                                            width: size.width,
                                        })
                                        .await;
                                    if let Err(err) = result {
                                        tracing::error!(error = %err, "Failed to resize terminal");
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        }

        let results = self
            .client
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: is_tty,
                    ..Default::default()
                }),
            )
            .await?;

        match results {
            StartExecResults::Attached { output, input } => {
                self.handle_container_io(cancel, is_tty, io, output, input)
                    .await
            }
            StartExecResults::Detached => Ok(()),
        }
    }

    /// Attaches to a container's main process.
    ///
    /// # Errors
    ///
    /// Returns runtime errors, or `Cancelled` when the token fires.
    pub async fn attach_to_container(
        &self,
        cancel: &CancellationToken,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        mut io: ExecIO,
    ) -> Result<()> {
        let name = underlying_container_name(namespace, pod_name, container_name);
        let is_tty = io.tty;

        if is_tty {
            if let Some(mut resize) = io.resize.take() {
                let client = self.client.clone();
                let target = name.clone();
                let resize_cancel = cancel.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = resize_cancel.cancelled() => break,
                            size = resize.recv() => match size {
                                Some(size) => {
                                    let result = client
                                        .resize_container_tty(&target, ResizeContainerTtyOptions {
                                            height: size.height,
                                            width: size.width,
                                        })
                                        .await;
                                    if let Err(err) = result {
                                        tracing::error!(error = %err, "Failed to resize terminal");
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        }

        let results = self
            .client
            .attach_container(
                &name,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(io.stdin.is_some()),
                    stdout: Some(io.stdout.is_some()),
                    stderr: Some(io.stderr.is_some()),
                    stream: Some(is_tty),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        self.handle_container_io(cancel, true, io, results.output, results.input)
            .await
    }

    /// Pumps the hijacked connection's streams.
    async fn handle_container_io(
        &self,
        cancel: &CancellationToken,
        asynchronous: bool,
        io: ExecIO,
        mut output: impl futures::Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>>
            + Send
            + Unpin
            + 'static,
        mut input: std::pin::Pin<Box<dyn tokio::io::AsyncWrite + Send>>,
    ) -> Result<()> {
        let ExecIO {
            stdin,
            mut stdout,
            mut stderr,
            ..
        } = io;

        if asynchronous {
            // Stdin runs on its own task; whichever side finishes first
            // settles the call.
            if let Some(mut stdin) = stdin {
                tokio::spawn(async move {
                    if let Err(err) = tokio::io::copy(&mut stdin, &mut input).await {
                        tracing::debug!(error = %err, "Stdin copy ended");
                    }
                    let _ = input.shutdown().await;
                });
            }
        } else if let Some(mut stdin) = stdin {
            tokio::io::copy(&mut stdin, &mut input).await?;
            // Close the write half to flush the command's stdin.
            input.shutdown().await?;
        }

        loop {
            tokio::select! {
                () = cancel.cancelled() => return Err(CommonError::Cancelled.into()),
                chunk = output.next() => {
                    let Some(chunk) = chunk else { break };
                    match chunk? {
                        LogOutput::StdOut { message } | LogOutput::Console { message } => {
                            if let Some(out) = stdout.as_mut() {
                                out.write_all(&message).await?;
                            }
                        }
                        LogOutput::StdErr { message } => {
                            match (stderr.as_mut(), stdout.as_mut()) {
                                (Some(err_out), _) => err_out.write_all(&message).await?,
                                (None, Some(out)) => out.write_all(&message).await?,
                                (None, None) => {}
                            }
                        }
                        LogOutput::StdIn { .. } => {}
                    }
                }
            }
        }

        if let Some(out) = stdout.as_mut() {
            out.flush().await?;
        }
        if let Some(err_out) = stderr.as_mut() {
            err_out.flush().await?;
        }
        Ok(())
    }

    /// Samples the container's CPU and memory counters.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for untracked containers or runtime errors.
    pub async fn container_stats(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
    ) -> Result<ContainerStats> {
        if !self.is_container_present(namespace, pod_name, container_name) {
            return Err(CommonError::not_found(format!("container {container_name}")).into());
        }

        let name = underlying_container_name(namespace, pod_name, container_name);
        let mut stream = self.client.stats(
            &name,
            Some(StatsOptions {
                stream: false,
                one_shot: true,
            }),
        );
        let sample = stream
            .next()
            .await
            .ok_or_else(|| CommonError::unavailable("no stats sample"))??;

        let usage = sample.memory_stats.usage;
        Ok(ContainerStats {
            name: container_name.to_string(),
            timestamp: Utc::now(),
            cpu: CpuStats {
                usage_nano_cores: None,
                usage_core_nano_seconds: Some(sample.cpu_stats.cpu_usage.total_usage),
            },
            memory: MemoryStats {
                usage_bytes: usage,
                rss_bytes: usage,
                working_set_bytes: usage,
            },
        })
    }
}

/// Builds the underlying Docker container name for a pod container.
#[must_use]
pub(crate) fn underlying_container_name(namespace: &str, pod_name: &str, container_name: &str) -> String {
    format!("{CONTAINER_NAME_PREFIX}_{namespace}_{pod_name}_{container_name}")
}

/// Extracts `(namespace, pod)` from an underlying container name.
fn extract_pod_key(container_name: &str) -> Option<(String, String)> {
    let name = container_name
        .trim_start_matches('/')
        .strip_prefix(&format!("{CONTAINER_NAME_PREFIX}_"))?;
    let mut parts = name.splitn(3, '_');
    let namespace = parts.next()?;
    let pod = parts.next()?;
    parts.next()?;
    Some((namespace.to_string(), pod.to_string()))
}

/// Lists managed containers (by name prefix) grouped by pod key.
async fn list_managed_containers(
    client: &Docker,
) -> Result<HashMap<(String, String), Vec<String>>> {
    let filters = HashMap::from([(
        "name".to_string(),
        vec![format!("{CONTAINER_NAME_PREFIX}_")],
    )]);
    let containers = client
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await?;

    let mut result: HashMap<(String, String), Vec<String>> = HashMap::new();
    for container in containers {
        let Some(id) = container.id else { continue };
        for name in container.names.unwrap_or_default() {
            match extract_pod_key(&name) {
                Some(key) => result.entry(key).or_default().push(id.clone()),
                None => {
                    tracing::warn!(name, "Unrecognized managed container name");
                }
            }
        }
    }
    Ok(result)
}

/// Builds the Docker container config from pod container parameters.
fn container_config(params: &ContainerParams) -> Config<String> {
    let env = params
        .env
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();

    let volumes = params
        .mounts
        .iter()
        .map(|mount| {
            (
                mount.container_path.to_string_lossy().into_owned(),
                HashMap::new(),
            )
        })
        .collect();

    let binds = params
        .mounts
        .iter()
        .map(|mount| {
            format!(
                "{}:{}:{}",
                mount.host_path.display(),
                mount.container_path.display(),
                if mount.read_only { "ro" } else { "rw" }
            )
        })
        .collect();

    Config {
        hostname: Some(params.pod_name.clone()),
        env: Some(env),
        entrypoint: (!params.command.is_empty()).then(|| params.command.clone()),
        cmd: (!params.args.is_empty()).then(|| params.args.clone()),
        image: Some(params.image.clone()),
        volumes: Some(volumes),
        working_dir: (!params.working_dir.is_empty()).then(|| params.working_dir.clone()),
        tty: Some(params.tty),
        open_stdin: Some(params.stdin),
        stdin_once: Some(params.stdin_once),
        host_config: Some(HostConfig {
            binds: Some(binds),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Parses a Docker RFC 3339 timestamp; the zero time and parse failures
/// collapse to `None` with a warning.
fn parse_docker_time(value: Option<&String>) -> Option<DateTime<Utc>> {
    let value = value?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => {
            let parsed = parsed.with_timezone(&Utc);
            (parsed.timestamp() > 0).then_some(parsed)
        }
        Err(err) => {
            tracing::warn!(value, error = %err, "Failed to parse container timestamp");
            None
        }
    }
}

/// Translates the runtime's container state into the manager's.
fn container_state_from_docker(
    state: Option<&bollard::models::ContainerState>,
) -> ContainerState {
    let Some(state) = state else {
        return ContainerState {
            status: ContainerStatus::Unknown,
            ..ContainerState::default()
        };
    };

    let status = if state.running.unwrap_or(false) {
        ContainerStatus::Running
    } else if state.paused.unwrap_or(false) {
        ContainerStatus::Paused
    } else if state.restarting.unwrap_or(false) {
        ContainerStatus::Restarting
    } else if state.oom_killed.unwrap_or(false) {
        ContainerStatus::OOMKilled
    } else if state.dead.unwrap_or(false) {
        ContainerStatus::Dead
    } else if state.status == Some(bollard::models::ContainerStateStatusEnum::CREATED) {
        ContainerStatus::Created
    } else {
        ContainerStatus::Unknown
    };

    ContainerState {
        status,
        started_at: parse_docker_time(state.started_at.as_ref()),
        finished_at: parse_docker_time(state.finished_at.as_ref()),
        exit_code: state.exit_code.unwrap_or(0),
        error: state.error.clone().unwrap_or_default(),
    }
}
