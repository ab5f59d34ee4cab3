use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }
}

/// The broker shared key space. Keys with a TTL are expired lazily when read
/// and purged on every write.
#[derive(Debug, Clone, Default)]
pub struct Keyspace {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl Keyspace {
    pub fn get(&self, key: &str) -> Option<String> {
        let mut entries = self
            .entries
            .lock()
            .expect("Unable to acquire lock on keyspace");
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Insert or replace `key`, `ttl_secs == 0` means the key never expires.
    pub fn set(&self, key: String, value: String, ttl_secs: u32) {
        let now = Instant::now();
        let expires_at = if ttl_secs == 0 {
            None
        } else {
            Some(now + Duration::from_secs(ttl_secs as u64))
        };

        self.insert(key, value, expires_at, now);
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self
            .entries
            .lock()
            .expect("Unable to acquire lock on keyspace");
        let now = Instant::now();

        match entries.remove(key) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("Unable to acquire lock on keyspace")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, key: String, value: String, expires_at: Option<Instant>, now: Instant) {
        let mut entries = self
            .entries
            .lock()
            .expect("Unable to acquire lock on keyspace");

        entries.retain(|_, entry| !entry.is_expired(now));
        entries.insert(key, Entry { value, expires_at });
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, Instant};

    use super::Keyspace;

    #[test]
    fn should_get_what_was_set() {
        let keyspace = Keyspace::default();
        keyspace.set("sess:1".to_string(), "alice".to_string(), 0);

        assert_eq!(keyspace.get("sess:1"), Some("alice".to_string()));
        assert_eq!(keyspace.get("sess:2"), None);
    }

    #[test]
    fn should_expire_keys_lazily() {
        let keyspace = Keyspace::default();
        let now = Instant::now();
        keyspace.insert(
            "sess:old".to_string(),
            "bob".to_string(),
            Some(now - Duration::from_millis(1)),
            now - Duration::from_secs(1),
        );

        assert_eq!(keyspace.len(), 1);
        assert_eq!(keyspace.get("sess:old"), None);
        assert!(keyspace.is_empty());
    }

    #[test]
    fn should_purge_expired_keys_on_write() {
        let keyspace = Keyspace::default();
        let now = Instant::now();
        keyspace.insert(
            "sess:old".to_string(),
            "bob".to_string(),
            Some(now),
            now - Duration::from_secs(1),
        );

        keyspace.set("sess:new".to_string(), "carol".to_string(), 60);

        assert_eq!(keyspace.len(), 1);
        assert_eq!(keyspace.get("sess:new"), Some("carol".to_string()));
    }

    #[test]
    fn delete_reports_whether_a_live_key_existed() {
        let keyspace = Keyspace::default();
        keyspace.set("sess:1".to_string(), "alice".to_string(), 0);

        assert!(keyspace.delete("sess:1"));
        assert!(!keyspace.delete("sess:1"));
    }
}
