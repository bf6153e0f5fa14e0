use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use super::record::HostRecord;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("entry not found")]
    NotFound,

    #[error("duplicated entry")]
    DuplicateEntry,

    /// 遍历回调返回它表示提前结束，`iter` 把它当作成功
    #[error("iter stop")]
    IterStop,

    #[error("{0}")]
    Other(String),
}

/// 遍历回调
pub type Visitor<'a> = dyn FnMut(&str, &HostRecord) -> Result<(), StoreError> + 'a;

/// HostRecord 的键值存储
pub trait Store: Send + Sync {
    fn get(&self, key: &str) -> Result<Arc<HostRecord>, StoreError>;

    /// 键已存在时返回 `DuplicateEntry`，从不覆盖
    fn put(&self, key: &str, record: HostRecord) -> Result<(), StoreError>;

    fn del(&self, key: &str) -> Result<(), StoreError>;

    /// 顺序不保证。回调返回 `IterStop` 时提前结束并返回 `Ok`，其他错误原样传出。
    fn iter(&self, visitor: &mut Visitor<'_>) -> Result<(), StoreError>;

    fn len(&self) -> usize;
}

/// 单把读写锁保护的内存存储
#[derive(Default)]
pub struct MemStore {
    entries: RwLock<HashMap<String, Arc<HostRecord>>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemStore {
    fn get(&self, key: &str) -> Result<Arc<HostRecord>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned().ok_or(StoreError::NotFound)
    }

    fn put(&self, key: &str, record: HostRecord) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(key) {
            return Err(StoreError::DuplicateEntry);
        }
        entries.insert(key.to_string(), Arc::new(record));
        Ok(())
    }

    fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key).map(|_| ()).ok_or(StoreError::NotFound)
    }

    fn iter(&self, visitor: &mut Visitor<'_>) -> Result<(), StoreError> {
        // 只在快照期间持有读锁，回调里可以安全地调用 del
        let snapshot: Vec<(String, Arc<HostRecord>)> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .iter()
                .map(|(k, v)| (k.clone(), Arc::clone(v)))
                .collect()
        };

        for (key, record) in &snapshot {
            match visitor(key, record) {
                Ok(()) => {}
                Err(StoreError::IterStop) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn record(addr: &str) -> HostRecord {
        HostRecord::with_addrs(vec![addr.to_string()], Instant::now())
    }

    #[test]
    fn put_get_del() {
        let store = MemStore::new();
        store.put("example.com", record("1.2.3.4")).unwrap();
        assert_eq!(store.get("example.com").unwrap().addrs, vec!["1.2.3.4"]);

        store.del("example.com").unwrap();
        assert_eq!(store.get("example.com").unwrap_err(), StoreError::NotFound);
        assert_eq!(store.del("example.com").unwrap_err(), StoreError::NotFound);
    }

    #[test]
    fn put_never_overwrites() {
        let store = MemStore::new();
        store.put("k", record("1.1.1.1")).unwrap();
        assert_eq!(
            store.put("k", record("2.2.2.2")).unwrap_err(),
            StoreError::DuplicateEntry
        );
        assert_eq!(store.get("k").unwrap().addrs, vec!["1.1.1.1"]);
    }

    #[test]
    fn iter_stop_is_success() {
        let store = MemStore::new();
        for i in 0..10 {
            store.put(&format!("h{}", i), record("10.0.0.1")).unwrap();
        }

        let mut visited = 0;
        let result = store.iter(&mut |_, _| {
            visited += 1;
            if visited == 3 {
                return Err(StoreError::IterStop);
            }
            Ok(())
        });
        assert!(result.is_ok());
        assert_eq!(visited, 3);
    }

    #[test]
    fn iter_propagates_visitor_error() {
        let store = MemStore::new();
        store.put("a", record("10.0.0.1")).unwrap();
        let result = store.iter(&mut |_, _| Err(StoreError::Other("boom".into())));
        assert_eq!(result.unwrap_err(), StoreError::Other("boom".into()));
    }

    #[test]
    fn visitor_may_delete() {
        let store = MemStore::new();
        store.put("a", record("10.0.0.1")).unwrap();
        store.put("b", record("10.0.0.2")).unwrap();

        store.iter(&mut |key, _| store.del(key)).unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let store = Arc::new(MemStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let key = format!("t{}-{}", t, i);
                        store.put(&key, record("10.0.0.1")).unwrap();
                        assert!(store.get(&key).is_ok());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 800);
    }
}
