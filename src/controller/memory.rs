//! In-memory KubeClient
//!
//! Stores applied objects and CorazaWaf statuses in process so the full
//! reconcile loop can run without an API server. Applies can be made to fail
//! per kind to exercise failure isolation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::KubeClient;
use crate::workload::DesiredObject;
use crate::Error;

type ObjectKey = (String, String, String);

/// KubeClient backed by in-process maps
#[derive(Default)]
pub struct InMemoryKubeClient {
    objects: Mutex<BTreeMap<ObjectKey, serde_json::Value>>,
    statuses: Mutex<BTreeMap<(String, String), serde_json::Value>>,
    applied: Mutex<Vec<String>>,
    failing_kinds: Mutex<BTreeSet<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryKubeClient {
    /// Create an empty client
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every apply of the given kind fail until cleared
    pub fn fail_applies_of(&self, kind: &str) {
        lock(&self.failing_kinds).insert(kind.to_string());
    }

    /// Let every apply succeed again
    pub fn clear_failures(&self) {
        lock(&self.failing_kinds).clear();
    }

    /// Stored manifest of an object
    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<serde_json::Value> {
        lock(&self.objects)
            .get(&(kind.to_string(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Change a stored object in place, as an out-of-band client would
    ///
    /// Returns false if the object does not exist.
    pub fn edit_object(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
        edit: impl FnOnce(&mut serde_json::Value),
    ) -> bool {
        let mut objects = lock(&self.objects);
        match objects.get_mut(&(kind.to_string(), namespace.to_string(), name.to_string())) {
            Some(object) => {
                edit(object);
                true
            }
            None => false,
        }
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Current status of a CorazaWaf
    pub fn status(&self, namespace: &str, name: &str) -> Option<serde_json::Value> {
        lock(&self.statuses)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// `Kind/name` of every successful apply, in order
    pub fn applied(&self) -> Vec<String> {
        lock(&self.applied).clone()
    }

    /// Forget the apply log
    pub fn reset_applied(&self) {
        lock(&self.applied).clear();
    }
}

#[async_trait]
impl KubeClient for InMemoryKubeClient {
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<serde_json::Value>, Error> {
        Ok(self.object(kind, namespace, name))
    }

    async fn apply(&self, object: &DesiredObject) -> Result<(), Error> {
        if lock(&self.failing_kinds).contains(&object.kind) {
            return Err(Error::internal(format!("{} apply rejected", object.kind)));
        }

        lock(&self.objects).insert(
            (
                object.kind.clone(),
                object.namespace.clone(),
                object.name.clone(),
            ),
            object.manifest.clone(),
        );
        lock(&self.applied).push(format!("{}/{}", object.kind, object.name));
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        let status_patch = patch
            .get("status")
            .ok_or_else(|| Error::internal("status patch has no status object"))?;

        let mut statuses = lock(&self.statuses);
        let status = statuses
            .entry((namespace.to_string(), name.to_string()))
            .or_insert_with(|| serde_json::json!({}));
        merge_patch(status, status_patch);
        Ok(())
    }
}

/// Apply a JSON merge patch: null removes a key, objects merge recursively
fn merge_patch(target: &mut serde_json::Value, patch: &serde_json::Value) {
    let Some(patch_map) = patch.as_object() else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = serde_json::json!({});
    }
    if let Some(target_map) = target.as_object_mut() {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(
                    target_map
                        .entry(key.clone())
                        .or_insert(serde_json::Value::Null),
                    value,
                );
            }
        }
    }
}
