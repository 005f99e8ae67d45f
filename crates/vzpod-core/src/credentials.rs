//! Projected-volume credentials and control-plane collaborators.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::spec::{ConfigMapProjection, Pod, ServiceAccountTokenProjection};

/// A fetched config map's data.
#[derive(Debug, Clone, Default)]
pub struct ConfigMap {
    /// Key/value payload.
    pub data: HashMap<String, String>,
}

/// Fetches config maps from the control plane.
#[async_trait]
pub trait ConfigMapSource: Send + Sync {
    /// Fetches one config map.
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;
}

/// Requests service account tokens from the control plane.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Requests a bearer token for the service account.
    async fn request_token(
        &self,
        namespace: &str,
        service_account: &str,
        audience: Option<&str>,
        expiration_seconds: Option<i64>,
    ) -> Result<String>;
}

/// Issues the accelerated grace-0 pod delete after successful pre-stop
/// hooks.
#[async_trait]
pub trait PodDeleter: Send + Sync {
    /// Deletes the pod from the control plane with zero grace.
    async fn delete_pod_fast(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Extracts the credentials a pod's projected volumes need: the fetched
/// config maps and, when a token projection exists, a freshly requested
/// service account token.
///
/// Both are skipped entirely when the pod disables service-account token
/// automounting.
///
/// # Errors
///
/// Returns collaborator errors from the config map fetch or the token
/// request.
pub async fn extract_pod_credentials(
    pod: &Pod,
    token_source: &dyn TokenSource,
    config_map_source: &dyn ConfigMapSource,
) -> Result<(HashMap<String, ConfigMap>, Option<String>)> {
    let mut config_maps = HashMap::new();
    let mut token = None;

    if pod.spec.automount_service_account_token.unwrap_or(true) {
        let (token_projection, cm_projection) = find_projections(pod);

        if let Some(projection) = cm_projection {
            let config_map = config_map_source
                .get_config_map(&pod.metadata.namespace, &projection.name)
                .await?;
            config_maps.insert(projection.name.clone(), config_map);
        }

        if let Some(projection) = token_projection {
            let audience = (!projection.audience.is_empty()).then_some(projection.audience.as_str());
            token = Some(
                token_source
                    .request_token(
                        &pod.metadata.namespace,
                        &pod.spec.service_account_name,
                        audience,
                        projection.expiration_seconds,
                    )
                    .await?,
            );
        }
    }

    Ok((config_maps, token))
}

/// Finds the first service-account-token and config-map projections among
/// the pod's projected volumes.
fn find_projections(
    pod: &Pod,
) -> (
    Option<&ServiceAccountTokenProjection>,
    Option<&ConfigMapProjection>,
) {
    let mut token_projection = None;
    let mut cm_projection = None;

    for volume in &pod.spec.volumes {
        let Some(projected) = &volume.projected else {
            continue;
        };
        for source in &projected.sources {
            if token_projection.is_none() {
                token_projection = source.service_account_token.as_ref();
            }
            if cm_projection.is_none() {
                cm_projection = source.config_map.as_ref();
            }
            if token_projection.is_some() && cm_projection.is_some() {
                return (token_projection, cm_projection);
            }
        }
    }

    (token_projection, cm_projection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ObjectMeta, PodSpec, ProjectedVolumeSource, Volume, VolumeProjection};
    use std::sync::atomic::{AtomicU32, Ordering};
    use vzpod_error::CommonError;

    struct FakeTokens {
        requests: AtomicU32,
    }

    #[async_trait]
    impl TokenSource for FakeTokens {
        async fn request_token(
            &self,
            namespace: &str,
            service_account: &str,
            audience: Option<&str>,
            expiration_seconds: Option<i64>,
        ) -> Result<String> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(format!(
                "token:{namespace}:{service_account}:{}:{}",
                audience.unwrap_or("-"),
                expiration_seconds.unwrap_or(0)
            ))
        }
    }

    struct FakeConfigMaps;

    #[async_trait]
    impl ConfigMapSource for FakeConfigMaps {
        async fn get_config_map(&self, _namespace: &str, name: &str) -> Result<ConfigMap> {
            if name == "settings" {
                Ok(ConfigMap {
                    data: HashMap::from([("key".to_string(), "value".to_string())]),
                })
            } else {
                Err(CommonError::not_found(format!("config map {name}")).into())
            }
        }
    }

    fn pod(volumes: Vec<Volume>, automount: Option<bool>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: "p1".to_string(),
                namespace: "e2e".to_string(),
                uid: "U1".to_string(),
                ..ObjectMeta::default()
            },
            spec: PodSpec {
                service_account_name: "builder".to_string(),
                automount_service_account_token: automount,
                volumes,
                ..PodSpec::default()
            },
            status: None,
        }
    }

    fn projected_volume() -> Volume {
        Volume {
            name: "creds".to_string(),
            projected: Some(ProjectedVolumeSource {
                sources: vec![
                    VolumeProjection {
                        service_account_token: Some(ServiceAccountTokenProjection {
                            path: "token".to_string(),
                            audience: "api".to_string(),
                            expiration_seconds: Some(3600),
                        }),
                        ..VolumeProjection::default()
                    },
                    VolumeProjection {
                        config_map: Some(ConfigMapProjection {
                            name: "settings".to_string(),
                            items: vec![],
                        }),
                        ..VolumeProjection::default()
                    },
                ],
            }),
            ..Volume::default()
        }
    }

    #[tokio::test]
    async fn test_extracts_token_and_config_map() {
        let tokens = FakeTokens {
            requests: AtomicU32::new(0),
        };
        let pod = pod(vec![projected_volume()], None);

        let (config_maps, token) = extract_pod_credentials(&pod, &tokens, &FakeConfigMaps)
            .await
            .unwrap();

        assert_eq!(token.as_deref(), Some("token:e2e:builder:api:3600"));
        assert!(config_maps.contains_key("settings"));
        assert_eq!(tokens.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_automount_disabled_skips_everything() {
        let tokens = FakeTokens {
            requests: AtomicU32::new(0),
        };
        let pod = pod(vec![projected_volume()], Some(false));

        let (config_maps, token) = extract_pod_credentials(&pod, &tokens, &FakeConfigMaps)
            .await
            .unwrap();

        assert!(token.is_none());
        assert!(config_maps.is_empty());
        assert_eq!(tokens.requests.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_projections_means_no_credentials() {
        let tokens = FakeTokens {
            requests: AtomicU32::new(0),
        };
        let pod = pod(vec![], None);

        let (config_maps, token) = extract_pod_credentials(&pod, &tokens, &FakeConfigMaps)
            .await
            .unwrap();
        assert!(token.is_none());
        assert!(config_maps.is_empty());
    }
}
