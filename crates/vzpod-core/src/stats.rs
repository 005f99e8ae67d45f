//! Pod stats aggregation and the Prometheus resource-metrics surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tokio_util::sync::CancellationToken;

use crate::engine::VzEngine;
use crate::error::{CoreError, Result};
use crate::spec::{Pod, PodPhase};
use vzpod_container::ContainerStats;
use vzpod_error::CommonError;

/// Identity of the pod a stats record belongs to.
#[derive(Debug, Clone)]
pub struct PodReference {
    /// Pod name.
    pub name: String,
    /// Pod namespace.
    pub namespace: String,
    /// Pod UID.
    pub uid: String,
}

/// Stats of one pod: the VM container plus auxiliary containers.
#[derive(Debug, Clone)]
pub struct PodStats {
    /// Pod identity.
    pub pod_ref: PodReference,
    /// Pod start time.
    pub start_time: Option<DateTime<Utc>>,
    /// Per-container samples, VM container first.
    pub containers: Vec<ContainerStats>,
}

/// Node-level stats summary.
#[derive(Debug, Clone)]
pub struct StatsSummary {
    /// This node's name.
    pub node_name: String,
    /// Per-pod stats.
    pub pods: Vec<PodStats>,
}

/// Lists the pods assigned to this node; backed by the harness's informer
/// cache.
pub trait PodLister: Send + Sync {
    /// Returns the node's pods.
    fn list_pods(&self) -> Vec<Pod>;
}

/// Collects per-pod stats and renders them as resource metrics.
pub struct PodMetricsProvider {
    node_name: String,
    pod_lister: Arc<dyn PodLister>,
    engine: Arc<VzEngine>,
    metrics_lock: tokio::sync::Mutex<()>,
}

impl PodMetricsProvider {
    /// Creates a provider for this node.
    pub fn new(
        node_name: impl Into<String>,
        pod_lister: Arc<dyn PodLister>,
        engine: Arc<VzEngine>,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            pod_lister,
            engine,
            metrics_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Collects stats for every running pod concurrently.
    ///
    /// Scrapes are serialized; the guest stats script is not reentrant
    /// per VM.
    ///
    /// # Errors
    ///
    /// Returns the first per-pod collection failure.
    pub async fn get_stats_summary(&self, cancel: &CancellationToken) -> Result<StatsSummary> {
        let _guard = self.metrics_lock.lock().await;
        tracing::debug!("Acquired metrics lock");

        if cancel.is_cancelled() {
            return Err(CommonError::Cancelled.into());
        }

        let pods = self.pod_lister.list_pods();
        let collections = pods
            .iter()
            .filter(|pod| {
                pod.status
                    .as_ref()
                    .is_some_and(|status| status.phase == PodPhase::Running)
            })
            .map(|pod| async move {
                let containers = self
                    .engine
                    .get_virtualization_group_stats(
                        cancel,
                        &pod.metadata.namespace,
                        &pod.metadata.name,
                        &pod.spec.containers,
                    )
                    .await
                    .map_err(|err| {
                        CoreError::from(CommonError::internal(format!(
                            "failed to get virtualization group stats for pod {}/{}: {err}",
                            pod.metadata.namespace, pod.metadata.name
                        )))
                    })?;

                Ok::<_, CoreError>(PodStats {
                    pod_ref: PodReference {
                        name: pod.metadata.name.clone(),
                        namespace: pod.metadata.namespace.clone(),
                        uid: pod.metadata.uid.clone(),
                    },
                    start_time: pod.metadata.creation_timestamp,
                    containers,
                })
            });

        let pods = futures::future::try_join_all(collections).await?;

        Ok(StatsSummary {
            node_name: self.node_name.clone(),
            pods,
        })
    }
}

/// Renders a summary as Prometheus resource metrics.
///
/// The registry is rebuilt on every scrape so no series leak for
/// containers that no longer exist:
/// `container_cpu_usage_seconds_total` (counter, core-seconds),
/// `container_memory_working_set_bytes` (gauge), both labeled by
/// `(container, pod, namespace)`, plus `scrape_error`.
///
/// # Errors
///
/// Returns an internal error when metric registration or encoding fails.
pub fn gather_resource_metrics(summary: &StatsSummary) -> Result<Vec<u8>> {
    let registry = Registry::new();

    let cpu = GaugeVec::new(
        Opts::new(
            "container_cpu_usage_seconds_total",
            "Cumulative cpu time consumed by the container in core-seconds",
        ),
        &["container", "pod", "namespace"],
    )
    .map_err(internal)?;
    let memory = GaugeVec::new(
        Opts::new(
            "container_memory_working_set_bytes",
            "Current working set of the container in bytes",
        ),
        &["container", "pod", "namespace"],
    )
    .map_err(internal)?;
    let scrape_error = prometheus::Gauge::new(
        "scrape_error",
        "1 if there was an error while getting container metrics, 0 otherwise",
    )
    .map_err(internal)?;

    registry.register(Box::new(cpu.clone())).map_err(internal)?;
    registry.register(Box::new(memory.clone())).map_err(internal)?;
    registry
        .register(Box::new(scrape_error.clone()))
        .map_err(internal)?;
    scrape_error.set(0.0);

    for pod in &summary.pods {
        for container in &pod.containers {
            let labels = [
                container.name.as_str(),
                pod.pod_ref.name.as_str(),
                pod.pod_ref.namespace.as_str(),
            ];
            if let Some(core_nanoseconds) = container.cpu.usage_core_nano_seconds {
                cpu.with_label_values(&labels)
                    .set(core_nanoseconds as f64 / 1e9);
            }
            if let Some(working_set) = container.memory.working_set_bytes {
                memory.with_label_values(&labels).set(working_set as f64);
            }
        }
    }

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(internal)?;
    Ok(buffer)
}

fn internal(err: prometheus::Error) -> CoreError {
    CommonError::internal(format!("metrics: {err}")).into()
}
