//! Tracks which node server (if any) currently holds `IAmManager`
//! privileges: only the privileged server may clear
//! statistics, acknowledge a controller restart, or receive the `ns` half of
//! a `statistics` reply.

use std::sync::Mutex;

pub struct PrivilegedServer {
    base_key: Mutex<Option<String>>,
}

impl PrivilegedServer {
    pub fn new() -> Self {
        Self { base_key: Mutex::new(None) }
    }

    /// `base_key` claims manager privileges. First claimant wins; a second
    /// claimant while one is already held is a no-op (the caller logs this
    /// as informational, not an error).
    pub fn claim(&self, base_key: &str) -> bool {
        let mut guard = self.base_key.lock().expect("mutex poisoned");
        if guard.is_none() {
            *guard = Some(base_key.to_string());
            true
        } else {
            false
        }
    }

    pub fn is(&self, base_key: &str) -> bool {
        self.base_key.lock().expect("mutex poisoned").as_deref() == Some(base_key)
    }

    /// Revoke privileges if currently held by `base_key`. Called when that
    /// server's `ServerRecord` transitions to `Dead`.
    pub fn revoke_if(&self, base_key: &str) {
        let mut guard = self.base_key.lock().expect("mutex poisoned");
        if guard.as_deref() == Some(base_key) {
            *guard = None;
        }
    }
}

impl Default for PrivilegedServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_claimant_wins_second_is_noop() {
        let p = PrivilegedServer::new();
        assert!(p.claim("abc12"));
        assert!(!p.claim("xyz99"));
        assert!(p.is("abc12"));
        assert!(!p.is("xyz99"));
    }

    #[test]
    fn revoke_only_clears_if_still_held_by_that_key() {
        let p = PrivilegedServer::new();
        p.claim("abc12");
        p.revoke_if("xyz99");
        assert!(p.is("abc12"));
        p.revoke_if("abc12");
        assert!(!p.is("abc12"));
        assert!(p.claim("xyz99"));
    }
}
