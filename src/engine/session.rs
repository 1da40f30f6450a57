//! Per-user variable store.
//!
//! Process-wide state with an explicit lifecycle: empty at start, a user's map
//! is created on the first write, nothing is ever dropped implicitly. Each user
//! has their own mutex, so turns for different users never contend, and a
//! lock is only held for a single read or write (never across a macro call).

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub(crate) type UserVars = HashMap<String, String>;

/// What [`crate::Engine::thaw_user`] does with a frozen snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThawAction {
    /// Restore the snapshot and delete it.
    Thaw,
    /// Delete the snapshot without restoring it.
    Discard,
    /// Restore the snapshot and keep it for later.
    Keep,
}

#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    users: DashMap<String, Arc<Mutex<UserVars>>>,
    frozen: DashMap<String, UserVars>,
}

impl SessionStore {
    fn user(&self, user: &str) -> Option<Arc<Mutex<UserVars>>> {
        self.users.get(user).map(|entry| Arc::clone(entry.value()))
    }

    fn user_or_create(&self, user: &str) -> Arc<Mutex<UserVars>> {
        Arc::clone(self.users.entry(user.to_string()).or_default().value())
    }

    pub fn get(&self, user: &str, name: &str) -> Option<String> {
        self.user(user)?.lock().get(name).cloned()
    }

    pub fn set(&self, user: &str, name: &str, value: &str) {
        self.user_or_create(user).lock().insert(name.to_string(), value.to_string());
    }

    pub fn get_all(&self, user: &str) -> Option<UserVars> {
        Some(self.user(user)?.lock().clone())
    }

    pub fn reset(&self, user: &str) {
        self.users.remove(user);
        self.frozen.remove(user);
    }

    pub fn reset_all(&self) {
        self.users.clear();
        self.frozen.clear();
    }

    /// Snapshot a user's variables. Returns `false` if the user has none.
    pub fn freeze(&self, user: &str) -> bool {
        let Some(vars) = self.get_all(user) else {
            warn!(user, "can't freeze variables of unknown user");
            return false;
        };
        self.frozen.insert(user.to_string(), vars);
        true
    }

    /// Apply `action` to a frozen snapshot. Returns `false` if there is none.
    pub fn thaw(&self, user: &str, action: ThawAction) -> bool {
        let snapshot = match action {
            ThawAction::Thaw | ThawAction::Discard => self.frozen.remove(user).map(|(_, vars)| vars),
            ThawAction::Keep => self.frozen.get(user).map(|vars| vars.value().clone()),
        };
        let Some(snapshot) = snapshot else {
            warn!(user, "can't thaw variables: nothing frozen");
            return false;
        };
        if action != ThawAction::Discard {
            *self.user_or_create(user).lock() = snapshot;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let store = SessionStore::default();
        assert_eq!(store.get("u1", "name"), None);
        store.set("u1", "name", "Ada");
        assert_eq!(store.get("u1", "name").as_deref(), Some("Ada"));
        assert_eq!(store.get("u2", "name"), None);
    }

    #[test]
    fn reset_user_and_all() {
        let store = SessionStore::default();
        store.set("u1", "a", "1");
        store.set("u2", "a", "2");
        store.reset("u1");
        assert!(store.get_all("u1").is_none());
        assert_eq!(store.get("u2", "a").as_deref(), Some("2"));
        store.reset_all();
        assert!(store.get_all("u2").is_none());
    }

    #[test]
    fn freeze_and_thaw() {
        let store = SessionStore::default();
        assert!(!store.freeze("nobody"));

        store.set("u1", "mood", "happy");
        assert!(store.freeze("u1"));
        store.set("u1", "mood", "grumpy");

        assert!(store.thaw("u1", ThawAction::Keep));
        assert_eq!(store.get("u1", "mood").as_deref(), Some("happy"));

        store.set("u1", "mood", "grumpy");
        assert!(store.thaw("u1", ThawAction::Discard));
        assert_eq!(store.get("u1", "mood").as_deref(), Some("grumpy"));
        assert!(!store.thaw("u1", ThawAction::Thaw));

        assert!(store.freeze("u1"));
        store.set("u1", "mood", "sleepy");
        assert!(store.thaw("u1", ThawAction::Thaw));
        assert_eq!(store.get("u1", "mood").as_deref(), Some("grumpy"));
        assert!(!store.thaw("u1", ThawAction::Thaw));
    }

    #[test]
    fn concurrent_users_do_not_interfere() {
        let store = Arc::new(SessionStore::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    let user = format!("user{i}");
                    for n in 0..100 {
                        store.set(&user, "n", &n.to_string());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        for i in 0..8 {
            assert_eq!(store.get(&format!("user{i}"), "n").as_deref(), Some("99"));
        }
    }
}
