//! The two-level container record map: pod key to container name to info.

use std::collections::HashMap;
use std::sync::RwLock;

/// What the manager remembers about one container.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    /// Runtime-assigned ID; empty until creation was accepted.
    pub id: String,
    /// Terminal error of the async create pipeline, if any.
    pub error: Option<String>,
}

impl ContainerInfo {
    /// Returns a copy carrying the runtime ID.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Returns a copy carrying an error message.
    #[must_use]
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

type PodKey = (String, String);

/// Concurrent map of container records, keyed by pod then container name.
#[derive(Default)]
pub struct ContainerData {
    data: RwLock<HashMap<PodKey, HashMap<String, ContainerInfo>>>,
}

impl ContainerData {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the existing info, or inserts `info` for the container.
    /// The boolean reports whether a record already existed.
    pub fn get_or_create(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        info: ContainerInfo,
    ) -> (ContainerInfo, bool) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let containers = data
            .entry((namespace.to_string(), pod_name.to_string()))
            .or_default();
        match containers.get(container_name) {
            Some(existing) => (existing.clone(), true),
            None => {
                containers.insert(container_name.to_string(), info.clone());
                (info, false)
            }
        }
    }

    /// Replaces the info for a container.
    pub fn set(&self, namespace: &str, pod_name: &str, container_name: &str, info: ContainerInfo) {
        let mut data = self
            .data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        data.entry((namespace.to_string(), pod_name.to_string()))
            .or_default()
            .insert(container_name.to_string(), info);
    }

    /// Returns the info for a container, if tracked.
    #[must_use]
    pub fn get(&self, namespace: &str, pod_name: &str, container_name: &str) -> Option<ContainerInfo> {
        self.data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(namespace.to_string(), pod_name.to_string()))
            .and_then(|containers| containers.get(container_name))
            .cloned()
    }

    /// Returns all container infos for a pod, if tracked.
    #[must_use]
    pub fn get_all(&self, namespace: &str, pod_name: &str) -> Option<HashMap<String, ContainerInfo>> {
        self.data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&(namespace.to_string(), pod_name.to_string()))
            .cloned()
    }

    /// Removes and returns all container infos for a pod.
    #[must_use]
    pub fn remove_all(&self, namespace: &str, pod_name: &str) -> Option<HashMap<String, ContainerInfo>> {
        self.data
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&(namespace.to_string(), pod_name.to_string()))
    }

    /// Returns a snapshot of everything tracked.
    #[must_use]
    pub fn all(&self) -> HashMap<PodKey, HashMap<String, ContainerInfo>> {
        self.data
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reports_existing() {
        let data = ContainerData::new();
        let (_, loaded) = data.get_or_create("ns", "pod", "sidecar", ContainerInfo::default());
        assert!(!loaded);
        let (_, loaded) =
            data.get_or_create("ns", "pod", "sidecar", ContainerInfo::default().with_id("x"));
        assert!(loaded);
        // The second insert did not overwrite.
        assert_eq!(data.get("ns", "pod", "sidecar").unwrap().id, "");
    }

    #[test]
    fn test_set_and_get() {
        let data = ContainerData::new();
        data.set("ns", "pod", "sidecar", ContainerInfo::default().with_id("abc"));
        assert_eq!(data.get("ns", "pod", "sidecar").unwrap().id, "abc");
        assert!(data.get("ns", "pod", "other").is_none());
        assert!(data.get("ns", "other", "sidecar").is_none());
    }

    #[test]
    fn test_remove_all() {
        let data = ContainerData::new();
        data.set("ns", "pod", "a", ContainerInfo::default().with_id("1"));
        data.set("ns", "pod", "b", ContainerInfo::default().with_id("2"));

        let removed = data.remove_all("ns", "pod").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(data.get_all("ns", "pod").is_none());
        assert!(data.remove_all("ns", "pod").is_none());
    }
}
