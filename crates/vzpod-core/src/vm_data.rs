//! The per-pod VM record map with its admission counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::RwLock;

use tokio_util::sync::CancellationToken;

use crate::resource::MacVirtualMachine;
use crate::spec::PodKey;

/// What the VM manager tracks per pod.
#[derive(Clone)]
pub(crate) struct VmInfo {
    /// Image reference the VM was created from.
    pub image_ref: String,
    /// Cancellation handle of the in-flight download, if any.
    pub download_cancel: Option<CancellationToken>,
    /// The VM record.
    pub vm: MacVirtualMachine,
}

/// Concurrent map of VM records.
///
/// The counter is maintained alongside every insert and remove; the
/// admission gate reads it without touching the map.
#[derive(Default)]
pub(crate) struct VmData {
    map: RwLock<HashMap<PodKey, VmInfo>>,
    counter: AtomicI32,
}

impl VmData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the record for a pod.
    pub fn get(&self, key: &PodKey) -> Option<VmInfo> {
        self.map
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Returns the existing record, or inserts `info`. The boolean reports
    /// whether a record already existed.
    pub fn get_or_create(&self, key: &PodKey, info: VmInfo) -> (VmInfo, bool) {
        let mut map = self
            .map
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match map.get(key) {
            Some(existing) => (existing.clone(), true),
            None => {
                map.insert(key.clone(), info.clone());
                self.counter.fetch_add(1, Ordering::SeqCst);
                (info, false)
            }
        }
    }

    /// Applies `update` to the record; returns false when the record is
    /// gone (e.g. torn down while an async pipeline was still running).
    pub fn update(&self, key: &PodKey, update: impl FnOnce(&mut VmInfo)) -> bool {
        let mut map = self
            .map
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match map.get_mut(key) {
            Some(info) => {
                update(info);
                true
            }
            None => false,
        }
    }

    /// Removes the record for a pod.
    pub fn remove(&self, key: &PodKey) {
        let mut map = self
            .map
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if map.remove(key).is_some() {
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Returns a snapshot of every record.
    pub fn list(&self) -> HashMap<PodKey, VmInfo> {
        self.map
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of records; safe to call concurrently.
    pub fn count(&self) -> i32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Returns the number of records whose VM left `Preparing` (an
    /// instance was constructed). The admission gate compares this
    /// against the VM cap.
    pub fn active_count(&self) -> i32 {
        let map = self
            .map
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.values().filter(|info| info.vm.instance().is_some()).count() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(image: &str) -> VmInfo {
        VmInfo {
            image_ref: image.to_string(),
            download_cancel: None,
            vm: MacVirtualMachine::new(vec![]),
        }
    }

    #[test]
    fn test_counter_tracks_inserts_and_removes() {
        let data = VmData::new();
        assert_eq!(data.count(), 0);

        let (_, loaded) = data.get_or_create(&PodKey::new("ns", "a"), info("img"));
        assert!(!loaded);
        let (_, loaded) = data.get_or_create(&PodKey::new("ns", "b"), info("img"));
        assert!(!loaded);
        assert_eq!(data.count(), 2);

        // Duplicate insert neither replaces nor bumps the counter.
        let (existing, loaded) = data.get_or_create(&PodKey::new("ns", "a"), info("other"));
        assert!(loaded);
        assert_eq!(existing.image_ref, "img");
        assert_eq!(data.count(), 2);

        data.remove(&PodKey::new("ns", "a"));
        assert_eq!(data.count(), 1);
        // Removing an absent record leaves the counter alone.
        data.remove(&PodKey::new("ns", "a"));
        assert_eq!(data.count(), 1);
    }

    #[test]
    fn test_update_on_missing_record() {
        let data = VmData::new();
        assert!(!data.update(&PodKey::new("ns", "gone"), |_| {}));

        data.get_or_create(&PodKey::new("ns", "a"), info("img"));
        assert!(data.update(&PodKey::new("ns", "a"), |info| {
            info.vm.set_error("boom");
        }));
        let stored = data.get(&PodKey::new("ns", "a")).unwrap();
        assert_eq!(stored.vm.error(), Some("boom"));
    }
}
