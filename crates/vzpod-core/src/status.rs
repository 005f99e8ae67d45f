//! Pod status synthesis from the virtualization group.
//!
//! For fixed inputs (VM state, container states, timestamps) everything
//! here is a pure function of its arguments.

use chrono::{DateTime, Utc};

use crate::engine::VirtualizationGroup;
use crate::resource::{
    container_id, MacVirtualMachine, VirtualMachineState, CONTAINER_RUNTIME, MACOS_RUNTIME,
};
use crate::spec::{
    ContainerStateRunning, ContainerStateTerminated, ContainerStateView, ContainerStateWaiting,
    ContainerStatus, Pod, PodCondition, PodConditionType, PodPhase, PodStatus,
};
use vzpod_container::{Container, ContainerStatus as AuxContainerStatus};

/// Builds the pod status from the group's joint state.
///
/// The first container derives its status from the VM; the others from
/// their runtime records. A missing VM record behaves like one still in
/// `Preparing`.
#[must_use]
pub fn build_pod_status(group: &VirtualizationGroup, pod: &Pod, host_ip: &str) -> PodStatus {
    let default_vm = MacVirtualMachine::default();
    let vm = group.vm.as_ref().unwrap_or(&default_vm);
    let pod_creation_time = pod
        .metadata
        .creation_timestamp
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH);

    let pod_ip = vm.ip_address();
    let mut first_container_start_time: Option<DateTime<Utc>> = None;
    let mut last_update_time: Option<DateTime<Utc>> = None;
    let mut container_statuses = Vec::with_capacity(pod.spec.containers.len());

    for (index, container) in pod.spec.containers.iter().enumerate() {
        if index == 0 {
            let state = vm.state();
            let started = !pod_ip.is_empty();
            let ready = state == VirtualMachineState::Running;

            if let Some(started_at) = vm.started_at() {
                first_container_start_time = Some(started_at);
                last_update_time = Some(started_at);
            }
            if let Some(finished_at) = vm.finished_at() {
                last_update_time = Some(finished_at);
            }

            container_statuses.push(ContainerStatus {
                name: container.name.clone(),
                state: vm_to_container_state(vm, pod_creation_time),
                ready,
                started,
                restart_count: 0,
                image: container.image.clone(),
                image_id: String::new(),
                container_id: container_id(MACOS_RUNTIME, &container.name),
            });
            continue;
        }

        let Some(record) = find_container(&container.name, &group.containers) else {
            continue;
        };

        let running = record.state.status == AuxContainerStatus::Running;

        container_statuses.push(ContainerStatus {
            name: container.name.clone(),
            state: container_to_container_state(record, pod_creation_time),
            ready: running,
            started: running,
            restart_count: 0,
            image: container.image.clone(),
            image_id: String::new(),
            container_id: container_id(CONTAINER_RUNTIME, &container.name),
        });

        if let Some(started_at) = record.state.started_at {
            if first_container_start_time.map_or(true, |first| started_at < first) {
                first_container_start_time = Some(started_at);
            }
            if last_update_time.map_or(true, |last| started_at > last) {
                last_update_time = Some(started_at);
            }
        }
        if let Some(finished_at) = record.state.finished_at {
            if last_update_time.map_or(true, |last| finished_at > last) {
                last_update_time = Some(finished_at);
            }
        }
    }

    PodStatus {
        phase: pod_phase(group),
        conditions: pod_conditions(
            group,
            pod_creation_time,
            first_container_start_time.unwrap_or(pod_creation_time),
            last_update_time.unwrap_or(pod_creation_time),
        ),
        message: String::new(),
        reason: String::new(),
        host_ip: host_ip.to_string(),
        pod_ip,
        start_time: first_container_start_time,
        container_statuses,
    }
}

/// Translates the VM state into a container state view.
fn vm_to_container_state(vm: &MacVirtualMachine, pod_creation_time: DateTime<Utc>) -> ContainerStateView {
    let start_time = vm.started_at().unwrap_or(pod_creation_time);
    let finish_time = vm.finished_at().unwrap_or(pod_creation_time);

    match vm.state() {
        VirtualMachineState::Preparing => ContainerStateView {
            waiting: Some(ContainerStateWaiting {
                reason: "Downloading".to_string(),
                message: "VM is downloading image from the registry".to_string(),
            }),
            ..ContainerStateView::default()
        },
        VirtualMachineState::Starting => ContainerStateView {
            waiting: Some(ContainerStateWaiting {
                reason: "Starting".to_string(),
                message: "VM is starting".to_string(),
            }),
            ..ContainerStateView::default()
        },
        VirtualMachineState::Running => ContainerStateView {
            running: Some(ContainerStateRunning {
                started_at: start_time,
            }),
            ..ContainerStateView::default()
        },
        VirtualMachineState::Terminating | VirtualMachineState::Terminated => ContainerStateView {
            terminated: Some(ContainerStateTerminated {
                exit_code: 0,
                reason: "Completed".to_string(),
                message: "VM is stopped".to_string(),
                started_at: start_time,
                finished_at: finish_time,
            }),
            ..ContainerStateView::default()
        },
        VirtualMachineState::Failed => ContainerStateView {
            terminated: Some(ContainerStateTerminated {
                exit_code: 1,
                reason: "Error".to_string(),
                message: format!("VM has failed: {}", vm.error().unwrap_or("unknown error")),
                started_at: start_time,
                finished_at: finish_time,
            }),
            ..ContainerStateView::default()
        },
    }
}

/// Translates an auxiliary container record into a container state view.
fn container_to_container_state(
    container: &Container,
    pod_creation_time: DateTime<Utc>,
) -> ContainerStateView {
    let start_time = container.state.started_at.unwrap_or(pod_creation_time);
    let finish_time = container.state.finished_at.unwrap_or(pod_creation_time);

    match container.state.status {
        AuxContainerStatus::Waiting => {
            if container.state.error.is_empty() {
                ContainerStateView {
                    waiting: Some(ContainerStateWaiting {
                        reason: "ContainerCreating".to_string(),
                        message: String::new(),
                    }),
                    ..ContainerStateView::default()
                }
            } else {
                // Mirror the usual behavior for container errors during
                // the pre-running stage.
                ContainerStateView {
                    waiting: Some(ContainerStateWaiting {
                        reason: "Error".to_string(),
                        message: container.state.error.clone(),
                    }),
                    ..ContainerStateView::default()
                }
            }
        }
        AuxContainerStatus::Created => ContainerStateView {
            waiting: Some(ContainerStateWaiting {
                reason: "ContainerCreated".to_string(),
                message: "Container has been created".to_string(),
            }),
            ..ContainerStateView::default()
        },
        AuxContainerStatus::Running => ContainerStateView {
            running: Some(ContainerStateRunning {
                started_at: start_time,
            }),
            ..ContainerStateView::default()
        },
        AuxContainerStatus::Paused => ContainerStateView {
            waiting: Some(ContainerStateWaiting {
                reason: "ContainerPaused".to_string(),
                message: "Container is paused".to_string(),
            }),
            ..ContainerStateView::default()
        },
        AuxContainerStatus::Restarting => ContainerStateView {
            waiting: Some(ContainerStateWaiting {
                reason: "ContainerRestarting".to_string(),
                message: "Container is restarting".to_string(),
            }),
            ..ContainerStateView::default()
        },
        AuxContainerStatus::OOMKilled => ContainerStateView {
            terminated: Some(ContainerStateTerminated {
                exit_code: 137,
                reason: "OOMKilled".to_string(),
                message: "Container was killed due to out of memory".to_string(),
                started_at: start_time,
                finished_at: finish_time,
            }),
            ..ContainerStateView::default()
        },
        AuxContainerStatus::Dead => ContainerStateView {
            terminated: Some(ContainerStateTerminated {
                exit_code: container.state.exit_code as i32,
                reason: "ContainerDead".to_string(),
                message: container.state.error.clone(),
                started_at: start_time,
                finished_at: finish_time,
            }),
            ..ContainerStateView::default()
        },
        AuxContainerStatus::Unknown => ContainerStateView {
            terminated: Some(ContainerStateTerminated {
                exit_code: container.state.exit_code as i32,
                reason: "Unknown".to_string(),
                message: container.state.error.clone(),
                started_at: start_time,
                finished_at: finish_time,
            }),
            ..ContainerStateView::default()
        },
    }
}

/// Finds a container record by name.
fn find_container<'a>(name: &str, containers: &'a [Container]) -> Option<&'a Container> {
    containers.iter().find(|container| container.name == name)
}

/// Determines the pod phase from the group's joint state.
fn pod_phase(group: &VirtualizationGroup) -> PodPhase {
    let default_vm = MacVirtualMachine::default();
    let vm = group.vm.as_ref().unwrap_or(&default_vm);
    let has_ip = !vm.ip_address().is_empty();

    match vm.state() {
        VirtualMachineState::Preparing | VirtualMachineState::Starting => return PodPhase::Pending,
        VirtualMachineState::Terminated => return PodPhase::Succeeded,
        VirtualMachineState::Failed => return PodPhase::Failed,
        VirtualMachineState::Terminating | VirtualMachineState::Running => {
            // With no auxiliary containers the VM is the single source of
            // truth.
            if group.containers.is_empty() {
                return if has_ip { PodPhase::Running } else { PodPhase::Pending };
            }
        }
    }

    let mut all_containers_running = true;
    for container in &group.containers {
        match container.state.status {
            AuxContainerStatus::Waiting | AuxContainerStatus::Created => return PodPhase::Pending,
            AuxContainerStatus::Running => {}
            AuxContainerStatus::OOMKilled | AuxContainerStatus::Unknown => return PodPhase::Failed,
            _ => all_containers_running = false,
        }
    }

    if !has_ip {
        return PodPhase::Pending;
    }
    if all_containers_running {
        return PodPhase::Running;
    }

    PodPhase::Unknown
}

/// Derives the pod conditions with the same truth table as the phase.
fn pod_conditions(
    group: &VirtualizationGroup,
    pod_creation_time: DateTime<Utc>,
    first_container_start_time: DateTime<Utc>,
    last_update_time: DateTime<Utc>,
) -> Vec<PodCondition> {
    let default_vm = MacVirtualMachine::default();
    let vm = group.vm.as_ref().unwrap_or(&default_vm);

    let scheduled = PodCondition {
        condition_type: PodConditionType::PodScheduled,
        status: true,
        last_transition_time: pod_creation_time,
    };

    let mut initialized = false;
    let mut ready = false;

    match vm.state() {
        VirtualMachineState::Preparing
        | VirtualMachineState::Starting
        | VirtualMachineState::Failed => {}
        VirtualMachineState::Terminated => {
            initialized = true;
        }
        VirtualMachineState::Terminating | VirtualMachineState::Running => {
            let mut all_containers_running = true;
            for container in &group.containers {
                match container.state.status {
                    AuxContainerStatus::Waiting
                    | AuxContainerStatus::Created
                    | AuxContainerStatus::OOMKilled
                    | AuxContainerStatus::Unknown => all_containers_running = false,
                    AuxContainerStatus::Running => {}
                    _ => all_containers_running = false,
                }
            }
            if all_containers_running {
                initialized = true;
                ready = true;
            }
        }
    }

    vec![
        scheduled,
        PodCondition {
            condition_type: PodConditionType::Initialized,
            status: initialized,
            last_transition_time: first_container_start_time,
        },
        PodCondition {
            condition_type: PodConditionType::Ready,
            status: ready,
            last_transition_time: last_update_time,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ContainerSpec, ObjectMeta, PodSpec};
    use vzpod_container::ContainerState;

    fn pod(container_names: &[&str]) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: "p1".to_string(),
                namespace: "e2e".to_string(),
                uid: "U1".to_string(),
                creation_timestamp: Some(Utc::now()),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: container_names
                    .iter()
                    .map(|name| ContainerSpec {
                        name: (*name).to_string(),
                        image: format!("{name}:latest"),
                        ..ContainerSpec::default()
                    })
                    .collect(),
                ..PodSpec::default()
            },
            status: None,
        }
    }

    fn aux_container(name: &str, status: AuxContainerStatus) -> Container {
        Container {
            id: format!("id-{name}"),
            name: name.to_string(),
            state: ContainerState {
                status,
                ..ContainerState::default()
            },
        }
    }

    fn preparing_group() -> VirtualizationGroup {
        VirtualizationGroup {
            vm: Some(MacVirtualMachine::default()),
            containers: Vec::new(),
        }
    }

    fn failed_group(message: &str) -> VirtualizationGroup {
        let mut vm = MacVirtualMachine::default();
        vm.set_error(message);
        VirtualizationGroup {
            vm: Some(vm),
            containers: Vec::new(),
        }
    }

    #[test]
    fn test_preparing_vm_is_pending_and_downloading() {
        let status = build_pod_status(&preparing_group(), &pod(&["macos"]), "10.0.0.1");

        assert_eq!(status.phase, PodPhase::Pending);
        assert_eq!(status.host_ip, "10.0.0.1");
        assert_eq!(status.pod_ip, "");
        let waiting = status.container_statuses[0].state.waiting.as_ref().unwrap();
        assert_eq!(waiting.reason, "Downloading");
        assert!(!status.container_statuses[0].ready);
        assert!(!status.container_statuses[0].started);
        assert!(status.container_statuses[0]
            .container_id
            .starts_with("vz://"));
    }

    #[test]
    fn test_failed_vm_is_failed_with_message() {
        let status = build_pod_status(
            &failed_group("registry unreachable"),
            &pod(&["macos"]),
            "10.0.0.1",
        );

        assert_eq!(status.phase, PodPhase::Failed);
        let terminated = status.container_statuses[0]
            .state
            .terminated
            .as_ref()
            .unwrap();
        assert_eq!(terminated.exit_code, 1);
        assert_eq!(terminated.reason, "Error");
        assert!(terminated.message.contains("registry unreachable"));
    }

    #[test]
    fn test_missing_vm_behaves_like_preparing() {
        let group = VirtualizationGroup {
            vm: None,
            containers: vec![aux_container("sidecar", AuxContainerStatus::Running)],
        };
        let status = build_pod_status(&group, &pod(&["macos", "sidecar"]), "10.0.0.1");
        assert_eq!(status.phase, PodPhase::Pending);
    }

    #[test]
    fn test_aux_container_states() {
        let cases = [
            (AuxContainerStatus::Waiting, "ContainerCreating"),
            (AuxContainerStatus::Created, "ContainerCreated"),
            (AuxContainerStatus::Paused, "ContainerPaused"),
            (AuxContainerStatus::Restarting, "ContainerRestarting"),
        ];
        for (aux_status, reason) in cases {
            let group = VirtualizationGroup {
                vm: Some(MacVirtualMachine::default()),
                containers: vec![aux_container("sidecar", aux_status)],
            };
            let status = build_pod_status(&group, &pod(&["macos", "sidecar"]), "");
            let waiting = status.container_statuses[1].state.waiting.as_ref().unwrap();
            assert_eq!(waiting.reason, reason);
        }
    }

    #[test]
    fn test_waiting_container_with_error_reports_error_reason() {
        let mut container = aux_container("sidecar", AuxContainerStatus::Waiting);
        container.state.error = "image pull failed".to_string();
        let group = VirtualizationGroup {
            vm: Some(MacVirtualMachine::default()),
            containers: vec![container],
        };
        let status = build_pod_status(&group, &pod(&["macos", "sidecar"]), "");
        let waiting = status.container_statuses[1].state.waiting.as_ref().unwrap();
        assert_eq!(waiting.reason, "Error");
        assert_eq!(waiting.message, "image pull failed");
    }

    #[test]
    fn test_oom_killed_container_reports_137() {
        let mut container = aux_container("sidecar", AuxContainerStatus::OOMKilled);
        container.state.exit_code = 137;
        let group = VirtualizationGroup {
            vm: Some(MacVirtualMachine::default()),
            containers: vec![container],
        };
        let status = build_pod_status(&group, &pod(&["macos", "sidecar"]), "");
        let terminated = status.container_statuses[1]
            .state
            .terminated
            .as_ref()
            .unwrap();
        assert_eq!(terminated.exit_code, 137);
        assert_eq!(terminated.reason, "OOMKilled");
    }

    #[test]
    fn test_dead_container_carries_exit_code() {
        let mut container = aux_container("sidecar", AuxContainerStatus::Dead);
        container.state.exit_code = 3;
        container.state.error = "segfault".to_string();
        let group = VirtualizationGroup {
            vm: Some(MacVirtualMachine::default()),
            containers: vec![container],
        };
        let status = build_pod_status(&group, &pod(&["macos", "sidecar"]), "");
        let terminated = status.container_statuses[1]
            .state
            .terminated
            .as_ref()
            .unwrap();
        assert_eq!(terminated.exit_code, 3);
        assert_eq!(terminated.reason, "ContainerDead");
        assert_eq!(terminated.message, "segfault");
    }

    #[test]
    fn test_unlisted_container_is_skipped() {
        let status = build_pod_status(&preparing_group(), &pod(&["macos", "sidecar"]), "");
        // The sidecar has no record yet; only the VM status appears.
        assert_eq!(status.container_statuses.len(), 1);
    }

    #[test]
    fn test_phase_failed_wins_over_pending_aux() {
        // An OOMKilled aux container fails the pod even while another
        // container is still waiting... but waiting is checked first in
        // the table, so waiting wins.
        let group = VirtualizationGroup {
            vm: Some(MacVirtualMachine::default()),
            containers: vec![aux_container("sidecar", AuxContainerStatus::OOMKilled)],
        };
        // Preparing VM short-circuits to Pending regardless of containers.
        assert_eq!(pod_phase(&group), PodPhase::Pending);
    }

    #[test]
    fn test_conditions_shape() {
        let status = build_pod_status(&preparing_group(), &pod(&["macos"]), "");
        assert_eq!(status.conditions.len(), 3);
        assert_eq!(
            status.conditions[0].condition_type,
            PodConditionType::PodScheduled
        );
        assert!(status.conditions[0].status);
        assert_eq!(
            status.conditions[1].condition_type,
            PodConditionType::Initialized
        );
        assert!(!status.conditions[1].status);
        assert_eq!(status.conditions[2].condition_type, PodConditionType::Ready);
        assert!(!status.conditions[2].status);
    }

    #[test]
    fn test_status_is_deterministic() {
        let group = VirtualizationGroup {
            vm: Some(MacVirtualMachine::default()),
            containers: vec![aux_container("sidecar", AuxContainerStatus::Running)],
        };
        let pod = pod(&["macos", "sidecar"]);
        let a = build_pod_status(&group, &pod, "10.0.0.1");
        let b = build_pod_status(&group, &pod, "10.0.0.1");
        assert_eq!(
            serde_json::to_value(&a).unwrap(),
            serde_json::to_value(&b).unwrap()
        );
    }
}
