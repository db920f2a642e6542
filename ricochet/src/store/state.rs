//! The state bag: process-local key/value state driven by response
//! transitions.
//!
//! Matching reads a point-in-time copy; mutation happens only at the
//! dispatcher's transition step, which serializes through the single lock
//! here. Transitioning a key that does not exist creates it; removing a key
//! that does not exist is a no-op.

use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct StateBag {
    inner: Mutex<HashMap<String, String>>,
}

impl StateBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state, for matching and templating.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.lock().expect("state lock poisoned").clone()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().expect("state lock poisoned").get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner
            .lock()
            .expect("state lock poisoned")
            .insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().expect("state lock poisoned").remove(key);
    }

    pub fn clear(&self) {
        self.inner.lock().expect("state lock poisoned").clear();
    }

    /// Apply one response's transitions and removals atomically.
    pub fn apply(&self, transitions: &HashMap<String, String>, removals: &[String]) {
        let mut state = self.inner.lock().expect("state lock poisoned");
        for (key, value) in transitions {
            state.insert(key.clone(), value.clone());
        }
        for key in removals {
            state.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_create_and_removals_are_noops_for_missing_keys() {
        let bag = StateBag::new();

        let mut transitions = HashMap::new();
        transitions.insert("session".to_string(), "open".to_string());
        bag.apply(&transitions, &["never-existed".to_string()]);

        assert_eq!(bag.get("session"), Some("open".to_string()));
        assert_eq!(bag.get("never-existed"), None);
    }

    #[test]
    fn apply_is_atomic_per_response() {
        let bag = StateBag::new();
        bag.set("a", "1");

        let mut transitions = HashMap::new();
        transitions.insert("b".to_string(), "2".to_string());
        bag.apply(&transitions, &["a".to_string()]);

        let state = bag.snapshot();
        assert_eq!(state.get("a"), None);
        assert_eq!(state.get("b"), Some(&"2".to_string()));
    }
}
