//! Engine lifecycle tests against the mock substrate.
//!
//! Drives create/status/delete through the whole pipeline with a fake
//! artifact fetcher standing in for the registry and an instantly-booting
//! mock substrate standing in for the virtualization framework.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio_util::sync::CancellationToken;

use vzpod_core::spec::{ContainerSpec, ObjectMeta, Pod, PodKey, PodPhase, PodSpec};
use vzpod_core::{
    ConfigMap, ConfigMapSource, MacVmClient, TokenSource, VzEngine,
};
use vzpod_error::CommonError;
use vzpod_event::{EventRecorder, LogEventRecorder};
use vzpod_image::{ArtifactFetcher, DownloadManager, ImageError};
use vzpod_vz::mock::MockSubstrate;
use vzpod_vz::{MacPlatformConfigurationOptions, StaticIpResolver};

/// Fetcher producing a ready-made artifact from a temp directory.
struct FakeFetcher {
    artifact_dir: PathBuf,
    fail: bool,
}

#[async_trait]
impl ArtifactFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _cancel: CancellationToken,
        _recorder: Arc<dyn EventRecorder>,
        reference: &str,
        _ignore_existing: bool,
    ) -> Result<MacPlatformConfigurationOptions, ImageError> {
        if self.fail {
            return Err(ImageError::RegistryStatus {
                status: 500,
                url: reference.to_string(),
            });
        }
        let engine = base64::engine::general_purpose::STANDARD;
        Ok(MacPlatformConfigurationOptions {
            block_storage_path: self.artifact_dir.join("disk.img"),
            auxiliary_storage_path: self.artifact_dir.join("aux.img"),
            hardware_model_data: engine.encode(b"hardware-model"),
            machine_identifier_data: engine.encode(b"machine-id"),
        })
    }
}

struct NoTokens;

#[async_trait]
impl TokenSource for NoTokens {
    async fn request_token(
        &self,
        _namespace: &str,
        _service_account: &str,
        _audience: Option<&str>,
        _expiration_seconds: Option<i64>,
    ) -> Result<String, vzpod_core::CoreError> {
        Ok("test-token".to_string())
    }
}

struct NoConfigMaps;

#[async_trait]
impl ConfigMapSource for NoConfigMaps {
    async fn get_config_map(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<ConfigMap, vzpod_core::CoreError> {
        Err(CommonError::not_found(format!("config map {name}")).into())
    }
}

struct Harness {
    engine: Arc<VzEngine>,
    _artifact_dir: tempfile::TempDir,
    _cache_dir: tempfile::TempDir,
}

fn harness(fail_fetch: bool) -> Harness {
    let artifact_dir = tempfile::tempdir().unwrap();
    std::fs::write(artifact_dir.path().join("disk.img"), b"disk image").unwrap();
    std::fs::write(artifact_dir.path().join("aux.img"), b"aux image").unwrap();
    let cache_dir = tempfile::tempdir().unwrap();

    let download_manager = DownloadManager::with_fetcher(Arc::new(FakeFetcher {
        artifact_dir: artifact_dir.path().to_path_buf(),
        fail: fail_fetch,
    }));
    let vm_client = MacVmClient::new(
        Arc::new(MockSubstrate::new()),
        Arc::new(StaticIpResolver("192.168.64.3".to_string())),
        "",
        cache_dir.path(),
        None,
    )
    .with_download_manager(download_manager);

    let engine = Arc::new(VzEngine::new(
        vm_client,
        None,
        Arc::new(LogEventRecorder),
        Arc::new(NoTokens),
        Arc::new(NoConfigMaps),
        cache_dir.path(),
        "10.0.0.1",
    ));

    Harness {
        engine,
        _artifact_dir: artifact_dir,
        _cache_dir: cache_dir,
    }
}

fn vm_pod(name: &str, uid: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: name.to_string(),
            namespace: "e2e".to_string(),
            uid: uid.to_string(),
            creation_timestamp: Some(chrono::Utc::now()),
            ..ObjectMeta::default()
        },
        spec: PodSpec {
            containers: vec![ContainerSpec {
                name: "macos".to_string(),
                image: "localhost:5000/macos:latest".to_string(),
                resources: vzpod_core::spec::ResourceRequirements {
                    requests: HashMap::from([
                        ("cpu".to_string(), "4".to_string()),
                        ("memory".to_string(), "12Gi".to_string()),
                    ]),
                },
                ..ContainerSpec::default()
            }],
            ..PodSpec::default()
        },
        status: None,
    }
}

async fn wait_for_phase(engine: &Arc<VzEngine>, pod: &Pod, phase: PodPhase, timeout: Duration) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(status) = engine.get_pod_status(pod).await {
            if status.phase == phase {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pod {} did not reach {phase:?} in time",
            pod.metadata.name
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_single_vm_pod_happy_path() {
    let harness = harness(false);
    let pod = vm_pod("p1", "uid-happy");

    harness.engine.create_pod(&pod).await.unwrap();
    wait_for_phase(&harness.engine, &pod, PodPhase::Running, Duration::from_secs(5)).await;

    let status = harness.engine.get_pod_status(&pod).await.unwrap();
    assert_eq!(status.pod_ip, "192.168.64.3");
    assert_eq!(status.host_ip, "10.0.0.1");
    assert!(status.container_statuses[0].ready);
    assert!(status.container_statuses[0].started);
    assert!(status.container_statuses[0].state.running.is_some());
}

#[tokio::test]
async fn test_duplicate_create_fails_without_destroying_group() {
    let harness = harness(false);
    let pod = vm_pod("p1", "uid-dup");

    harness.engine.create_pod(&pod).await.unwrap();
    let err = harness.engine.create_pod(&pod).await.unwrap_err();
    assert!(err.is_invalid_input());

    wait_for_phase(&harness.engine, &pod, PodPhase::Running, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn test_empty_pod_is_rejected() {
    let harness = harness(false);
    let mut pod = vm_pod("p1", "U1");
    pod.spec.containers.clear();
    assert!(harness.engine.create_pod(&pod).await.unwrap_err().is_invalid_input());
}

#[tokio::test]
async fn test_aux_containers_require_container_runtime() {
    let harness = harness(false);
    let mut pod = vm_pod("p1", "U1");
    pod.spec.containers.push(ContainerSpec {
        name: "sidecar".to_string(),
        image: "sidecar:1.27.1".to_string(),
        ..ContainerSpec::default()
    });
    assert!(harness.engine.create_pod(&pod).await.unwrap_err().is_invalid_input());
}

#[tokio::test]
async fn test_invalid_resources_are_rejected() {
    let harness = harness(false);
    let mut pod = vm_pod("p1", "U1");
    pod.spec.containers[0]
        .resources
        .requests
        .insert("cpu".to_string(), "64".to_string());

    let err = harness.engine.create_pod(&pod).await.unwrap_err();
    assert!(err.is_invalid_input());
    // The rejected pod left no group behind.
    assert!(harness
        .engine
        .get_virtualization_group("e2e", "p1")
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_delete_removes_group_and_overlays() {
    let harness = harness(false);
    let pod = vm_pod("p1", "uid-del");

    harness.engine.create_pod(&pod).await.unwrap();
    wait_for_phase(&harness.engine, &pod, PodPhase::Running, Duration::from_secs(5)).await;

    let overlay = std::env::temp_dir().join("vzpod_file_disk.img.uid-del");
    assert!(overlay.exists());

    harness
        .engine
        .delete_virtualization_group("e2e", "p1", 0)
        .await
        .unwrap();

    assert!(!overlay.exists());
    assert!(harness
        .engine
        .get_virtualization_group("e2e", "p1")
        .await
        .unwrap_err()
        .is_not_found());

    // Teardown is monotonic: repeated deletes observe the gone group.
    assert!(harness
        .engine
        .delete_virtualization_group("e2e", "p1", 0)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_concurrent_deletes_share_one_outcome() {
    let harness = harness(false);
    let pod = vm_pod("p1", "uid-shared");

    harness.engine.create_pod(&pod).await.unwrap();
    wait_for_phase(&harness.engine, &pod, PodPhase::Running, Duration::from_secs(5)).await;

    let mut deletes = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&harness.engine);
        deletes.push(tokio::spawn(async move {
            engine.delete_virtualization_group("e2e", "p1", 0).await
        }));
    }
    for handle in deletes {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_admission_cap_holds_third_pod() {
    let harness = harness(false);
    let pods = [
        vm_pod("p1", "uid-adm1"),
        vm_pod("p2", "uid-adm2"),
        vm_pod("p3", "uid-adm3"),
    ];

    // Fill both VM slots before the third pod arrives.
    harness.engine.create_pod(&pods[0]).await.unwrap();
    wait_for_phase(&harness.engine, &pods[0], PodPhase::Running, Duration::from_secs(10)).await;
    harness.engine.create_pod(&pods[1]).await.unwrap();
    wait_for_phase(&harness.engine, &pods[1], PodPhase::Running, Duration::from_secs(10)).await;

    harness.engine.create_pod(&pods[2]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    // The third pod stays short of a VM while both slots are taken.
    let status = harness.engine.get_pod_status(&pods[2]).await.unwrap();
    assert_eq!(status.phase, PodPhase::Pending);

    harness
        .engine
        .delete_virtualization_group("e2e", "p1", 0)
        .await
        .unwrap();

    wait_for_phase(&harness.engine, &pods[2], PodPhase::Running, Duration::from_secs(10)).await;
}

#[tokio::test]
async fn test_failed_fetch_fails_pod_and_auto_cleans() {
    let harness = harness(true);
    let pod = vm_pod("p1", "uid-failed");

    harness.engine.create_pod(&pod).await.unwrap();
    wait_for_phase(&harness.engine, &pod, PodPhase::Failed, Duration::from_secs(5)).await;

    // Observing the terminal phase triggers the async auto-delete.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let gone = harness
            .engine
            .get_virtualization_group("e2e", "p1")
            .await
            .err()
            .is_some_and(|err| err.is_not_found());
        if gone {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "group was not auto-deleted");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_list_virtualization_groups() {
    let harness = harness(false);
    let pod = vm_pod("p1", "uid-list");
    harness.engine.create_pod(&pod).await.unwrap();

    let groups = harness.engine.list_virtualization_groups().await;
    assert!(groups.contains_key(&PodKey::new("e2e", "p1")));
    assert!(groups[&PodKey::new("e2e", "p1")].vm.is_some());
}
