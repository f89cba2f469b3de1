//! In-process store implementation.
//!
//! Backs the [`KvStore`] trait with a mutex-guarded map of
//! (value, expiry) entries. Expiry is enforced by check-and-evict on each
//! access, so a key that outlived its TTL reads as absent even if no
//! sweeper ever ran.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::{KvStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Counter(u64),
    Set(HashSet<String>),
    List(VecDeque<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Counter(_) => "counter",
            Value::Set(_) => "set",
            Value::List(_) => "list",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Mutex-guarded in-process [`KvStore`].
///
/// Shared across worker threads behind an `Arc`. Every trait method takes
/// the lock once, so each operation is atomic with respect to concurrent
/// callers.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_kind(key: &str, want: &str, got: &'static str) -> StoreError {
        StoreError::WrongKind {
            key: key.to_string(),
            reason: format!("expected {want}, found {got}"),
        }
    }
}

fn lock_entries<'a>(
    entries: &'a Mutex<HashMap<String, Entry>>,
) -> Result<std::sync::MutexGuard<'a, HashMap<String, Entry>>, StoreError> {
    entries.lock().map_err(|_| StoreError::Unavailable {
        reason: "store mutex poisoned".to_string(),
    })
}

/// Evict the entry at `key` if it expired, then return a live reference.
fn live_entry<'a>(
    map: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Option<&'a mut Entry> {
    if map.get(key).is_some_and(|e| e.expired(now)) {
        map.remove(key);
    }
    map.get_mut(key)
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        match live_entry(&mut map, key, Instant::now()) {
            None => Ok(None),
            Some(entry) => match &entry.value {
                Value::Text(s) => Ok(Some(s.clone())),
                other => Err(Self::wrong_kind(key, "text", other.kind())),
            },
        }
    }

    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut map = lock_entries(&self.entries)?;
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut map = lock_entries(&self.entries)?;
        map.remove(key);
        Ok(())
    }

    fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        let now = Instant::now();
        match live_entry(&mut map, key, now) {
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Counter(1),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(1)
            }
            Some(entry) => match &mut entry.value {
                Value::Counter(n) => {
                    *n += 1;
                    Ok(*n)
                }
                other => Err(Self::wrong_kind(key, "counter", other.kind())),
            },
        }
    }

    fn read_counter(&self, key: &str) -> Result<u64, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        match live_entry(&mut map, key, Instant::now()) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Counter(n) => Ok(*n),
                other => Err(Self::wrong_kind(key, "counter", other.kind())),
            },
        }
    }

    fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<usize, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        let now = Instant::now();
        match live_entry(&mut map, key, now) {
            None => {
                let mut set = HashSet::new();
                set.insert(member.to_string());
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(set),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(1)
            }
            Some(entry) => match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member.to_string());
                    entry.expires_at = Some(now + ttl);
                    Ok(set.len())
                }
                other => Err(Self::wrong_kind(key, "set", other.kind())),
            },
        }
    }

    fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        match live_entry(&mut map, key, Instant::now()) {
            None => Ok(false),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.contains(member)),
                other => Err(Self::wrong_kind(key, "set", other.kind())),
            },
        }
    }

    fn set_len(&self, key: &str) -> Result<usize, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        match live_entry(&mut map, key, Instant::now()) {
            None => Ok(0),
            Some(entry) => match &entry.value {
                Value::Set(set) => Ok(set.len()),
                other => Err(Self::wrong_kind(key, "set", other.kind())),
            },
        }
    }

    fn list_push(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut map = lock_entries(&self.entries)?;
        let now = Instant::now();
        match live_entry(&mut map, key, now) {
            None => {
                let mut list = VecDeque::new();
                list.push_back(value.to_string());
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(list),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(())
            }
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    list.push_back(value.to_string());
                    entry.expires_at = Some(now + ttl);
                    Ok(())
                }
                other => Err(Self::wrong_kind(key, "list", other.kind())),
            },
        }
    }

    fn list_take(&self, key: &str, max: usize) -> Result<Vec<String>, StoreError> {
        let mut map = lock_entries(&self.entries)?;
        match live_entry(&mut map, key, Instant::now()) {
            None => Ok(Vec::new()),
            Some(entry) => match &mut entry.value {
                Value::List(list) => {
                    let take = max.min(list.len());
                    Ok(list.drain(..take).collect())
                }
                other => Err(Self::wrong_kind(key, "list", other.kind())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_roundtrip_and_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.put("k", "v", None).unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));

        store.delete("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn counter_increments_and_expires() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(30);

        assert_eq!(store.incr("c", ttl).unwrap(), 1);
        assert_eq!(store.incr("c", ttl).unwrap(), 2);
        assert_eq!(store.read_counter("c").unwrap(), 2);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(store.read_counter("c").unwrap(), 0);
        assert_eq!(store.incr("c", ttl).unwrap(), 1);
    }

    #[test]
    fn set_add_is_idempotent_and_slides_ttl() {
        let store = MemoryStore::new();
        let ttl = Duration::from_millis(50);

        assert_eq!(store.set_add("s", "a", ttl).unwrap(), 1);
        assert_eq!(store.set_add("s", "a", ttl).unwrap(), 1);
        assert_eq!(store.set_add("s", "b", ttl).unwrap(), 2);
        assert!(store.set_contains("s", "a").unwrap());
        assert!(!store.set_contains("s", "c").unwrap());

        // Each add refreshes the expiry, so repeated touches keep it alive.
        std::thread::sleep(Duration::from_millis(30));
        store.set_add("s", "b", ttl).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(store.set_len("s").unwrap(), 2);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(store.set_len("s").unwrap(), 0);
    }

    #[test]
    fn list_push_and_take_in_order() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        store.list_push("l", "one", ttl).unwrap();
        store.list_push("l", "two", ttl).unwrap();
        store.list_push("l", "three", ttl).unwrap();

        assert_eq!(store.list_take("l", 2).unwrap(), vec!["one", "two"]);
        assert_eq!(store.list_take("l", 10).unwrap(), vec!["three"]);
        assert!(store.list_take("l", 10).unwrap().is_empty());
    }

    #[test]
    fn kind_mismatch_is_an_error() {
        let store = MemoryStore::new();
        store.put("k", "text", None).unwrap();

        let err = store.incr("k", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, StoreError::WrongKind { .. }));
        assert_eq!(err.transience(), crate::Transience::Permanent);
    }
}
