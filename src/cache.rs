use crate::store::{Sheet, StoreError, Table, TableStore};
use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Read-through cache in front of a [`TableStore`].
///
/// Each tab is fetched once and served from memory until a write to that tab
/// goes through this cache. A write attempt that fails with a conflict also
/// drops the entry, since the conflict proves the cached copy is stale.
pub struct CachedStore<S> {
    inner: S,
    entries: Mutex<HashMap<Table, Sheet>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<S: TableStore> CachedStore<S> {
    pub fn new(inner: S) -> Self {
        CachedStore {
            inner,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn invalidate(&self, table: Table) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&table);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.clear();
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn after_write(&self, table: Table, result: Result<u64, StoreError>) -> Result<u64, StoreError> {
        match &result {
            Ok(_) | Err(StoreError::Conflict { .. }) => self.invalidate(table),
            Err(_) => {}
        }
        result
    }
}

impl<S: TableStore> TableStore for CachedStore<S> {
    fn read(&self, table: Table) -> Result<Sheet, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::Unavailable("cache lock poisoned".to_string()))?;

        if let Some(sheet) = entries.get(&table) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", table);
            return Ok(sheet.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let sheet = self.inner.read(table)?;
        entries.insert(table, sheet.clone());
        Ok(sheet)
    }

    // Goes to the inner store and refreshes the entry with what it returns.
    fn read_fresh(&self, table: Table) -> Result<Sheet, StoreError> {
        let sheet = self.inner.read_fresh(table)?;
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(table, sheet.clone());
        }
        Ok(sheet)
    }

    fn append(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        let result = self.inner.append(table, expected_version, rows);
        self.after_write(table, result)
    }

    fn replace(&self, table: Table, expected_version: u64, rows: Vec<Vec<String>>) -> Result<u64, StoreError> {
        let result = self.inner.replace(table, expected_version, rows);
        self.after_write(table, result)
    }
}
