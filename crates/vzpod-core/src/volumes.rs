//! Materializing pod volumes into host directories.

use std::path::{Path, PathBuf};

use crate::credentials::ConfigMap;
use crate::error::Result;
use crate::spec::{ContainerSpec, Pod, Volume};
use std::collections::HashMap;

/// Permissions for materialized pod volume files and directories.
#[cfg(unix)]
const POD_VOL_PERMS: u32 = 0o755;

/// A universal mount point handed to the VM and container managers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    /// Volume name from the pod spec.
    pub name: String,
    /// Materialized host path.
    pub host_path: PathBuf,
    /// Path inside the guest or container.
    pub container_path: PathBuf,
    /// Read-only mount.
    pub read_only: bool,
}

/// Builds the mounts for one container from the pod's volumes.
///
/// - Host-path volumes are created (0755) and used verbatim.
/// - Empty-dir volumes live under `<pod_root>/<mount-name>`.
/// - Projected volumes are emulated under `<pod_root>/<mount-name>`:
///   the service account token as one file, config map key-paths with
///   their modes, and downward API items (`metadata.namespace` only).
/// - Any other volume source is skipped.
///
/// # Errors
///
/// Returns I/O errors from directory or file creation, or an error when a
/// referenced config map was not fetched.
pub fn create_container_mounts(
    pod_vol_root: &Path,
    container: &ContainerSpec,
    pod: &Pod,
    service_account_token: Option<&str>,
    config_maps: &HashMap<String, ConfigMap>,
) -> Result<Vec<Mount>> {
    let mut mounts = Vec::new();

    for mount_spec in &container.volume_mounts {
        let Some(volume) = find_pod_volume(pod, &mount_spec.name) else {
            tracing::debug!(
                volume = mount_spec.name,
                "Container volume mount not found in pod spec"
            );
            continue;
        };

        let container_path = if mount_spec.sub_path.is_empty() {
            PathBuf::from(&mount_spec.mount_path)
        } else {
            Path::new(&mount_spec.mount_path).join(&mount_spec.sub_path)
        };

        let host_path = if let Some(host_path) = &volume.host_path {
            let path = PathBuf::from(&host_path.path);
            create_dir_all(&path)?;
            path
        } else if volume.empty_dir.is_some() {
            let path = pod_vol_root.join(&mount_spec.name);
            create_dir_all(&path)?;
            path
        } else if let Some(projected) = &volume.projected {
            let path = pod_vol_root.join(&mount_spec.name);
            create_dir_all(&path)?;

            for source in &projected.sources {
                if let Some(token_projection) = &source.service_account_token {
                    write_file(
                        &path.join(&token_projection.path),
                        service_account_token.unwrap_or_default().as_bytes(),
                        None,
                    )?;
                }
                if let Some(cm_projection) = &source.config_map {
                    let config_map = config_maps.get(&cm_projection.name).ok_or_else(|| {
                        vzpod_error::CommonError::not_found(format!(
                            "config map {}",
                            cm_projection.name
                        ))
                    })?;
                    for key_to_path in &cm_projection.items {
                        let value = config_map
                            .data
                            .get(&key_to_path.key)
                            .map(String::as_str)
                            .unwrap_or_default();
                        write_file(
                            &path.join(&key_to_path.path),
                            value.as_bytes(),
                            key_to_path.mode,
                        )?;
                    }
                }
                if let Some(downward) = &source.downward_api {
                    for item in &downward.items {
                        let is_namespace = item
                            .field_ref
                            .as_ref()
                            .is_some_and(|field| field.field_path == "metadata.namespace");
                        if is_namespace {
                            write_file(
                                &path.join(&item.path),
                                pod.metadata.namespace.as_bytes(),
                                item.mode,
                            )?;
                        }
                    }
                }
            }

            path
        } else {
            continue;
        };

        mounts.push(Mount {
            name: mount_spec.name.clone(),
            host_path,
            container_path,
            read_only: mount_spec.read_only,
        });
    }

    Ok(mounts)
}

/// Finds a volume by name in the pod spec.
fn find_pod_volume<'a>(pod: &'a Pod, name: &str) -> Option<&'a Volume> {
    pod.spec.volumes.iter().find(|volume| volume.name == name)
}

fn create_dir_all(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(POD_VOL_PERMS))?;
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    std::fs::write(path, contents)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = mode.unwrap_or(POD_VOL_PERMS);
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{
        ConfigMapProjection, DownwardApiItem, DownwardApiProjection, EmptyDirVolumeSource,
        FieldRef, HostPathVolumeSource, KeyToPath, ObjectMeta, PodSpec, ProjectedVolumeSource,
        ServiceAccountTokenProjection, VolumeMount, VolumeProjection,
    };

    fn pod_with(volumes: Vec<Volume>, mounts: Vec<VolumeMount>) -> (Pod, ContainerSpec) {
        let container = ContainerSpec {
            name: "macos".to_string(),
            volume_mounts: mounts,
            ..ContainerSpec::default()
        };
        let pod = Pod {
            metadata: ObjectMeta {
                name: "p1".to_string(),
                namespace: "e2e".to_string(),
                uid: "U1".to_string(),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                containers: vec![container.clone()],
                volumes,
                ..PodSpec::default()
            },
            status: None,
        };
        (pod, container)
    }

    #[test]
    fn test_host_path_mount() {
        let dir = tempfile::tempdir().unwrap();
        let host = dir.path().join("shared");
        let (pod, container) = pod_with(
            vec![Volume {
                name: "shared".to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: host.to_string_lossy().into_owned(),
                }),
                ..Volume::default()
            }],
            vec![VolumeMount {
                name: "shared".to_string(),
                mount_path: "/mnt/shared".to_string(),
                ..VolumeMount::default()
            }],
        );

        let mounts = create_container_mounts(
            &dir.path().join("root"),
            &container,
            &pod,
            None,
            &HashMap::new(),
        )
        .unwrap();

        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].host_path, host);
        assert_eq!(mounts[0].container_path, PathBuf::from("/mnt/shared"));
        assert!(host.is_dir());
    }

    #[test]
    fn test_empty_dir_mount_under_pod_root() {
        let dir = tempfile::tempdir().unwrap();
        let (pod, container) = pod_with(
            vec![Volume {
                name: "scratch".to_string(),
                empty_dir: Some(EmptyDirVolumeSource {}),
                ..Volume::default()
            }],
            vec![VolumeMount {
                name: "scratch".to_string(),
                mount_path: "/tmp/scratch".to_string(),
                ..VolumeMount::default()
            }],
        );

        let root = dir.path().join("root");
        let mounts =
            create_container_mounts(&root, &container, &pod, None, &HashMap::new()).unwrap();
        assert_eq!(mounts[0].host_path, root.join("scratch"));
        assert!(root.join("scratch").is_dir());
    }

    #[test]
    fn test_projected_mount_materializes_sources() {
        let dir = tempfile::tempdir().unwrap();
        let (pod, container) = pod_with(
            vec![Volume {
                name: "creds".to_string(),
                projected: Some(ProjectedVolumeSource {
                    sources: vec![
                        VolumeProjection {
                            service_account_token: Some(ServiceAccountTokenProjection {
                                path: "token".to_string(),
                                ..ServiceAccountTokenProjection::default()
                            }),
                            ..VolumeProjection::default()
                        },
                        VolumeProjection {
                            config_map: Some(ConfigMapProjection {
                                name: "settings".to_string(),
                                items: vec![KeyToPath {
                                    key: "ca.crt".to_string(),
                                    path: "ca.crt".to_string(),
                                    mode: Some(0o600),
                                }],
                            }),
                            ..VolumeProjection::default()
                        },
                        VolumeProjection {
                            downward_api: Some(DownwardApiProjection {
                                items: vec![DownwardApiItem {
                                    path: "namespace".to_string(),
                                    field_ref: Some(FieldRef {
                                        field_path: "metadata.namespace".to_string(),
                                    }),
                                    mode: None,
                                }],
                            }),
                            ..VolumeProjection::default()
                        },
                    ],
                }),
                ..Volume::default()
            }],
            vec![VolumeMount {
                name: "creds".to_string(),
                mount_path: "/var/run/secrets".to_string(),
                read_only: true,
                ..VolumeMount::default()
            }],
        );

        let config_maps = HashMap::from([(
            "settings".to_string(),
            ConfigMap {
                data: HashMap::from([("ca.crt".to_string(), "CERTDATA".to_string())]),
            },
        )]);

        let root = dir.path().join("root");
        let mounts = create_container_mounts(
            &root,
            &container,
            &pod,
            Some("the-token"),
            &config_maps,
        )
        .unwrap();

        assert!(mounts[0].read_only);
        let creds = root.join("creds");
        assert_eq!(std::fs::read_to_string(creds.join("token")).unwrap(), "the-token");
        assert_eq!(std::fs::read_to_string(creds.join("ca.crt")).unwrap(), "CERTDATA");
        assert_eq!(std::fs::read_to_string(creds.join("namespace")).unwrap(), "e2e");
    }

    #[test]
    fn test_projected_mount_missing_config_map_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (pod, container) = pod_with(
            vec![Volume {
                name: "creds".to_string(),
                projected: Some(ProjectedVolumeSource {
                    sources: vec![VolumeProjection {
                        config_map: Some(ConfigMapProjection {
                            name: "absent".to_string(),
                            items: vec![],
                        }),
                        ..VolumeProjection::default()
                    }],
                }),
                ..Volume::default()
            }],
            vec![VolumeMount {
                name: "creds".to_string(),
                mount_path: "/var/run/secrets".to_string(),
                ..VolumeMount::default()
            }],
        );

        let result = create_container_mounts(
            &dir.path().join("root"),
            &container,
            &pod,
            None,
            &HashMap::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_volume_sources_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (pod, container) = pod_with(
            vec![Volume {
                name: "pvc".to_string(),
                ..Volume::default()
            }],
            vec![
                VolumeMount {
                    name: "pvc".to_string(),
                    mount_path: "/data".to_string(),
                    ..VolumeMount::default()
                },
                VolumeMount {
                    name: "unreferenced".to_string(),
                    mount_path: "/other".to_string(),
                    ..VolumeMount::default()
                },
            ],
        );

        let mounts = create_container_mounts(
            &dir.path().join("root"),
            &container,
            &pod,
            None,
            &HashMap::new(),
        )
        .unwrap();
        assert!(mounts.is_empty());
    }
}
