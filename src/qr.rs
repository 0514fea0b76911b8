use std::collections::HashMap;
use std::sync::Mutex;

/// Last-known pairing code per user, already encoded for display by the
/// sidecar. An entry exists only while the session is waiting for a scan.
#[derive(Default)]
pub struct QrStore {
    codes: Mutex<HashMap<String, String>>,
}

impl QrStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: &str, encoded: String) {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes.insert(user_id.to_string(), encoded);
    }

    pub fn get(&self, user_id: &str) -> Option<String> {
        let codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes.get(user_id).cloned()
    }

    pub fn remove(&self, user_id: &str) {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes.remove(user_id);
    }

    pub fn contains(&self, user_id: &str) -> bool {
        let codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes.contains_key(user_id)
    }

    pub fn clear(&self) {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes.clear();
    }
}
