//! Namespaced output store shared by all components of a workflow run.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;

use crate::reference;
use crate::value::Value;

/// Accumulates component outputs under `"<component>.<key>"`.
///
/// Clones share the same map. Reads may happen concurrently; every write
/// goes through the single write lock.
#[derive(Debug, Clone, Default)]
pub struct OutputStore {
    outputs: Arc<RwLock<HashMap<String, Value>>>,
}

impl OutputStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.outputs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.outputs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the value stored under a full `"<component>.<key>"` key.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// Resolves the references inside `value` against the current outputs.
    pub fn resolve(&self, value: &Value) -> Value {
        reference::resolve(value, &self.read())
    }

    /// Merges `outputs` of `component`, overwriting existing keys.
    pub fn merge(&self, component: &str, outputs: &HashMap<String, Value>) {
        let mut store = self.write();
        for (key, value) in outputs {
            store.insert(format!("{}.{}", component, key), value.clone());
        }
    }

    /// Merges `outputs` of `component` unless `token` is already cancelled.
    ///
    /// The check happens under the write lock, so no output lands after the
    /// cancellation has been observed by a merge.
    ///
    /// # Returns
    /// `true` if the outputs were merged.
    pub fn merge_unless_cancelled(
        &self,
        token: &CancellationToken,
        component: &str,
        outputs: &HashMap<String, Value>,
    ) -> bool {
        let mut store = self.write();
        if token.is_cancelled() {
            return false;
        }
        for (key, value) in outputs {
            store.insert(format!("{}.{}", component, key), value.clone());
        }
        true
    }

    /// Returns a copy of every stored output.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.read().clone()
    }

    /// Number of stored outputs.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Removes every stored output.
    pub fn clear(&self) {
        self.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), Value::from(*v))).collect()
    }

    #[test]
    fn test_merge_namespaces_keys() {
        let store = OutputStore::new();
        store.merge("Task1", &outputs(&[("result", "A"), ("note", "n")]));

        assert_eq!(store.get("Task1.result"), Some(Value::from("A")));
        assert_eq!(store.len(), 2);
        assert_eq!(store.resolve(&Value::from("{Task1.note}")), Value::from("n"));
    }

    #[test]
    fn test_later_write_overwrites() {
        let store = OutputStore::new();
        store.merge("Task", &outputs(&[("x", "first")]));
        store.merge("Task", &outputs(&[("x", "second")]));

        assert_eq!(store.get("Task.x"), Some(Value::from("second")));
    }

    #[test]
    fn test_cancelled_merge_is_dropped() {
        let store = OutputStore::new();
        let token = CancellationToken::new();

        assert!(store.merge_unless_cancelled(&token, "A", &outputs(&[("x", "1")])));
        token.cancel();
        assert!(!store.merge_unless_cancelled(&token, "B", &outputs(&[("y", "2")])));

        assert_eq!(store.get("A.x"), Some(Value::from("1")));
        assert_eq!(store.get("B.y"), None);
    }

    #[test]
    fn test_clones_share_state_across_threads() {
        let store = OutputStore::new();

        std::thread::scope(|scope| {
            for i in 0..8 {
                let store = store.clone();
                scope.spawn(move || {
                    for j in 0..50 {
                        let mut out = HashMap::new();
                        out.insert(format!("k{j}"), Value::from(j));
                        store.merge(&format!("T{i}"), &out);
                    }
                });
            }
        });

        assert_eq!(store.len(), 400);
        store.clear();
        assert!(store.is_empty());
    }
}
