//! The pod model the engine consumes and the status types it produces.
//!
//! A serde-compatible subset of the orchestrator's JSON forms, restricted
//! to the fields this node reads. By convention the first container of a
//! pod is the VM container; all others are auxiliary containers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use vzpod_error::CommonError;

/// Identity of a pod: namespace plus name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PodKey {
    /// Pod namespace.
    pub namespace: String,
    /// Pod name.
    pub name: String,
}

impl PodKey {
    /// Creates a key from namespace and name.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl From<&Pod> for PodKey {
    fn from(pod: &Pod) -> Self {
        Self::new(&pod.metadata.namespace, &pod.metadata.name)
    }
}

/// A pod as handed over by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    /// Identity and lifecycle metadata.
    pub metadata: ObjectMeta,
    /// Desired state.
    pub spec: PodSpec,
    /// Last status the control plane knew; consulted on delete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PodStatus>,
}

/// Pod metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    #[serde(default)]
    pub namespace: String,
    /// Stable UID.
    #[serde(default)]
    pub uid: String,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set when the pod is pending deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    /// Grace period granted for deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_grace_period_seconds: Option<i64>,
}

/// Pod desired state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    /// Containers; the first is the VM container.
    pub containers: Vec<ContainerSpec>,
    /// Volume definitions.
    #[serde(default)]
    pub volumes: Vec<Volume>,
    /// Service account used for token projections.
    #[serde(default)]
    pub service_account_name: String,
    /// Whether the service account token is mounted; `None` means yes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub automount_service_account_token: Option<bool>,
}

/// One container of a pod.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Entrypoint override.
    #[serde(default)]
    pub command: Vec<String>,
    /// Arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub working_dir: String,
    /// Environment variables.
    #[serde(default)]
    pub env: Vec<EnvVar>,
    /// Resource requests.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Volume mounts.
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    /// Lifecycle hooks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<Lifecycle>,
    /// Pull policy.
    #[serde(default)]
    pub image_pull_policy: PullPolicy,
    /// Allocate a TTY.
    #[serde(default)]
    pub tty: bool,
    /// Keep stdin open.
    #[serde(default)]
    pub stdin: bool,
    /// Close stdin after the first attach.
    #[serde(default)]
    pub stdin_once: bool,
}

/// A name/value environment variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name.
    pub name: String,
    /// Variable value.
    #[serde(default)]
    pub value: String,
}

/// Image pull policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullPolicy {
    /// Always pull, removing the local image first.
    Always,
    /// Pull when absent locally.
    #[default]
    IfNotPresent,
    /// Never pull.
    Never,
}

/// Requested resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Requests by resource name (`cpu`, `memory`).
    #[serde(default)]
    pub requests: HashMap<String, String>,
}

impl ResourceRequirements {
    /// Extracts the CPU request as a whole count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the request is missing or not a whole
    /// number of CPUs.
    pub fn cpu_request(&self) -> Result<u32> {
        let quantity = self
            .requests
            .get("cpu")
            .ok_or_else(|| CommonError::invalid_input("missing cpu request"))?;
        quantity
            .parse::<u32>()
            .map_err(|_| CommonError::invalid_input(format!("failed to parse CPU request {quantity}")).into())
    }

    /// Extracts the memory request in bytes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the request is missing or unparsable.
    pub fn memory_request(&self) -> Result<u64> {
        let quantity = self
            .requests
            .get("memory")
            .ok_or_else(|| CommonError::invalid_input("missing memory request"))?;
        parse_memory_quantity(quantity).ok_or_else(|| {
            CommonError::invalid_input(format!("failed to parse memory request {quantity}")).into()
        })
    }
}

/// Parses a memory quantity (`12Gi`, `512Mi`, `1500M`, plain bytes).
fn parse_memory_quantity(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    let split = quantity.find(|c: char| !c.is_ascii_digit())?;
    if split == 0 {
        return None;
    }
    let (number, suffix) = quantity.split_at(split);
    let value = number.parse::<u64>().ok()?;
    let multiplier: u64 = match suffix {
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "k" | "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

/// A container's mount of a pod volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Volume name.
    pub name: String,
    /// Mount path inside the container.
    pub mount_path: String,
    /// Sub-path within the volume.
    #[serde(default)]
    pub sub_path: String,
    /// Read-only mount.
    #[serde(default)]
    pub read_only: bool,
}

/// Lifecycle hooks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lifecycle {
    /// Executed right after start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_start: Option<LifecycleHandler>,
    /// Executed before teardown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_stop: Option<LifecycleHandler>,
}

/// One lifecycle hook; only exec handlers are supported.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleHandler {
    /// Exec action.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecHandler>,
}

/// An exec hook's command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecHandler {
    /// Command vector.
    #[serde(default)]
    pub command: Vec<String>,
}

/// A pod volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    /// Volume name, referenced by mounts.
    pub name: String,
    /// Host path source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathVolumeSource>,
    /// Pod-lifetime scratch directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
    /// Projected sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projected: Option<ProjectedVolumeSource>,
}

/// A host path volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostPathVolumeSource {
    /// Host directory path.
    pub path: String,
}

/// An empty scratch directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyDirVolumeSource {}

/// A projected volume's sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectedVolumeSource {
    /// Projection entries.
    #[serde(default)]
    pub sources: Vec<VolumeProjection>,
}

/// One projection entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeProjection {
    /// A service account token file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_token: Option<ServiceAccountTokenProjection>,
    /// Config map key-paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapProjection>,
    /// Downward API items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downward_api: Option<DownwardApiProjection>,
}

/// A projected service account token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountTokenProjection {
    /// File name the token is materialized under.
    pub path: String,
    /// Requested token audience.
    #[serde(default)]
    pub audience: String,
    /// Requested token lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_seconds: Option<i64>,
}

/// A projected config map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigMapProjection {
    /// Config map name.
    pub name: String,
    /// Keys to materialize.
    #[serde(default)]
    pub items: Vec<KeyToPath>,
}

/// One key of a config map and the file it lands in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyToPath {
    /// Config map key.
    pub key: String,
    /// File name.
    pub path: String,
    /// File mode override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

/// Projected downward API items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownwardApiProjection {
    /// Items to materialize.
    #[serde(default)]
    pub items: Vec<DownwardApiItem>,
}

/// One downward API item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownwardApiItem {
    /// File name.
    pub path: String,
    /// Field selector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_ref: Option<FieldRef>,
    /// File mode override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u32>,
}

/// A field selector, e.g. `metadata.namespace`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRef {
    /// Selected field path.
    pub field_path: String,
}

// ---------------------------------------------------------------------------
// Status types the engine synthesizes.
// ---------------------------------------------------------------------------

/// Pod lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    /// Accepted, not all containers running.
    Pending,
    /// VM running and all auxiliary containers running.
    Running,
    /// The VM terminated cleanly.
    Succeeded,
    /// The VM or a container failed terminally.
    Failed,
    /// State could not be determined.
    Unknown,
}

/// Synthesized pod status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    /// Phase.
    pub phase: PodPhase,
    /// Conditions.
    #[serde(default)]
    pub conditions: Vec<PodCondition>,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Machine-readable reason.
    #[serde(default)]
    pub reason: String,
    /// Host IP.
    #[serde(default)]
    pub host_ip: String,
    /// Pod (VM) IP.
    #[serde(default)]
    pub pod_ip: String,
    /// First container start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Per-container statuses, VM container first.
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

/// Pod condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodConditionType {
    /// The pod has been scheduled to this node.
    PodScheduled,
    /// All containers have started at least once.
    Initialized,
    /// The pod can serve.
    Ready,
}

/// One pod condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCondition {
    /// Condition type.
    #[serde(rename = "type")]
    pub condition_type: PodConditionType,
    /// `true` rendered as "True".
    pub status: bool,
    /// Time of the last transition.
    pub last_transition_time: DateTime<Utc>,
}

/// Status of one container in a pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStatus {
    /// Container name.
    pub name: String,
    /// Current state.
    pub state: ContainerStateView,
    /// Ready to serve.
    pub ready: bool,
    /// Started at least once.
    pub started: bool,
    /// Restart count; this node never restarts containers.
    pub restart_count: u32,
    /// Image reference.
    pub image: String,
    /// Image ID; unset.
    #[serde(default)]
    pub image_id: String,
    /// Synthesized container ID.
    pub container_id: String,
}

/// A container state: exactly one variant set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStateView {
    /// Waiting with a reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<ContainerStateWaiting>,
    /// Running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<ContainerStateRunning>,
    /// Terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<ContainerStateTerminated>,
}

/// Waiting details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerStateWaiting {
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

/// Running details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateRunning {
    /// Start time.
    pub started_at: DateTime<Utc>,
}

/// Terminated details.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStateTerminated {
    /// Exit code.
    pub exit_code: i32,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Finish time.
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_quantities() {
        assert_eq!(parse_memory_quantity("12Gi"), Some(12 << 30));
        assert_eq!(parse_memory_quantity("512Mi"), Some(512 << 20));
        assert_eq!(parse_memory_quantity("1500M"), Some(1_500_000_000));
        assert_eq!(parse_memory_quantity("64Ki"), Some(64 << 10));
        assert_eq!(parse_memory_quantity("2Ti"), Some(2 << 40));
        assert_eq!(parse_memory_quantity("Gi"), None);
        assert_eq!(parse_memory_quantity("12Qx"), None);
    }

    #[test]
    fn test_resource_requests() {
        let resources = ResourceRequirements {
            requests: HashMap::from([
                ("cpu".to_string(), "4".to_string()),
                ("memory".to_string(), "12Gi".to_string()),
            ]),
        };
        assert_eq!(resources.cpu_request().unwrap(), 4);
        assert_eq!(resources.memory_request().unwrap(), 12 << 30);

        let empty = ResourceRequirements::default();
        assert!(empty.cpu_request().is_err());
        assert!(empty.memory_request().is_err());
    }

    #[test]
    fn test_pod_deserializes_from_control_plane_json() {
        let json = r#"{
            "metadata": {
                "name": "p1",
                "namespace": "e2e",
                "uid": "U1",
                "creationTimestamp": "2026-08-02T10:00:00Z"
            },
            "spec": {
                "containers": [
                    {
                        "name": "macos",
                        "image": "localhost:5000/macos:latest",
                        "resources": {"requests": {"cpu": "4", "memory": "12Gi"}}
                    },
                    {
                        "name": "sidecar",
                        "image": "sidecar:1.27.1",
                        "imagePullPolicy": "Always",
                        "lifecycle": {"postStart": {"exec": {"command": ["echo", "hello"]}}}
                    }
                ],
                "volumes": [
                    {
                        "name": "token",
                        "projected": {
                            "sources": [
                                {"serviceAccountToken": {"path": "token", "audience": "api", "expirationSeconds": 3600}}
                            ]
                        }
                    }
                ]
            }
        }"#;

        let pod: Pod = serde_json::from_str(json).unwrap();
        assert_eq!(pod.metadata.uid, "U1");
        assert_eq!(pod.spec.containers.len(), 2);
        assert_eq!(pod.spec.containers[0].name, "macos");
        assert_eq!(
            pod.spec.containers[1].image_pull_policy,
            PullPolicy::Always
        );
        let hook = pod.spec.containers[1]
            .lifecycle
            .as_ref()
            .unwrap()
            .post_start
            .as_ref()
            .unwrap()
            .exec
            .as_ref()
            .unwrap();
        assert_eq!(hook.command, vec!["echo", "hello"]);

        let projection = pod.spec.volumes[0].projected.as_ref().unwrap();
        let token = projection.sources[0].service_account_token.as_ref().unwrap();
        assert_eq!(token.audience, "api");
        assert_eq!(token.expiration_seconds, Some(3600));
    }

    #[test]
    fn test_pod_key_from_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: "p1".to_string(),
                namespace: "e2e".to_string(),
                ..ObjectMeta::default()
            },
            spec: PodSpec::default(),
            status: None,
        };
        let key = PodKey::from(&pod);
        assert_eq!(key.to_string(), "e2e/p1");
    }
}
