//! In-memory store connections and input sources used by unit and behaviour
//! tests.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    IndexSpec, InputError, InputSource, Query, RecordKey, StoreConnection, StoreError,
    StoreRecord, TaggedPoint,
};

#[derive(Debug, Default)]
struct Shared {
    records: Mutex<BTreeMap<RecordKey, StoreRecord>>,
    indexes: Mutex<Vec<IndexSpec>>,
}

/// In-memory [`StoreConnection`].
///
/// Connections created by [`MemoryConnection::pool`] or by cloning share one
/// record map but count their own puts. Queries scan every record linearly
/// and do not require an index.
#[derive(Debug, Default)]
pub struct MemoryConnection {
    shared: Arc<Shared>,
    puts: AtomicU64,
}

impl Clone for MemoryConnection {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            puts: AtomicU64::new(0),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryConnection {
    /// Create a connection to a fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `count` connections to one fresh store.
    pub fn pool(count: usize) -> Vec<Self> {
        let first = Self::new();
        (0..count).map(|_| first.clone()).collect()
    }

    /// Number of puts issued through this connection.
    pub fn puts(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    /// Number of records in the shared store.
    pub fn record_count(&self) -> usize {
        lock(&self.shared.records).len()
    }

    /// Copy of the record stored under `key`.
    pub fn get(&self, key: &RecordKey) -> Option<StoreRecord> {
        lock(&self.shared.records).get(key).cloned()
    }

    /// Indexes registered so far.
    pub fn indexes(&self) -> Vec<IndexSpec> {
        lock(&self.shared.indexes).clone()
    }
}

impl StoreConnection for MemoryConnection {
    fn put(&self, key: &RecordKey, record: &StoreRecord) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.records).insert(key.clone(), record.clone());
        Ok(())
    }

    fn query(
        &self,
        query: &Query,
        on_result: &mut dyn FnMut(Option<&StoreRecord>) -> bool,
    ) -> Result<(), StoreError> {
        // Snapshot matches so callbacks run without holding the lock.
        let matches: Vec<_> = lock(&self.shared.records)
            .iter()
            .filter(|(key, record)| {
                key.namespace == query.namespace
                    && key.set == query.set
                    && query.predicate.matches(record)
            })
            .map(|(_, record)| query.project(record))
            .collect();
        for record in &matches {
            if !on_result(Some(record)) {
                return Ok(());
            }
        }
        on_result(None);
        Ok(())
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        let mut indexes = lock(&self.shared.indexes);
        match indexes.iter().find(|existing| existing.name == spec.name) {
            Some(existing) if existing == spec => Ok(()),
            Some(_) => Err(StoreError::new(
                StoreError::INDEX_FOUND,
                format!("index {} already exists", spec.name),
            )),
            None => {
                indexes.push(spec.clone());
                Ok(())
            }
        }
    }
}

/// [`StoreConnection`] whose puts and queries fail after a number of
/// successful calls.
#[derive(Debug)]
pub struct FailingConnection {
    inner: MemoryConnection,
    error: StoreError,
    remaining: AtomicU64,
}

impl FailingConnection {
    /// Fail every put and query with `code` and `message`.
    pub fn new(code: i32, message: &str) -> Self {
        Self::after(0, code, message)
    }

    /// Let `successes` calls through before failing.
    pub fn after(successes: u64, code: i32, message: &str) -> Self {
        Self {
            inner: MemoryConnection::new(),
            error: StoreError::new(code, message),
            remaining: AtomicU64::new(successes),
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| self.error.clone())
    }
}

impl StoreConnection for FailingConnection {
    fn put(&self, key: &RecordKey, record: &StoreRecord) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, record)
    }

    fn query(
        &self,
        query: &Query,
        on_result: &mut dyn FnMut(Option<&StoreRecord>) -> bool,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.query(query, on_result)
    }

    fn create_index(&self, spec: &IndexSpec) -> Result<(), StoreError> {
        self.inner.create_index(spec)
    }
}

/// [`InputSource`] over an in-memory list of units.
#[derive(Debug, Default, Clone)]
pub struct VecSource {
    units: Vec<TaggedPoint>,
    delivered: usize,
}

impl VecSource {
    /// Create a source yielding `units` in order.
    pub fn new<I>(units: I) -> Self
    where
        I: IntoIterator<Item = TaggedPoint>,
    {
        Self {
            units: units.into_iter().collect(),
            delivered: 0,
        }
    }

    /// Units handed to the handler by the last traversal.
    pub const fn delivered(&self) -> usize {
        self.delivered
    }
}

impl InputSource for VecSource {
    fn for_each_unit(
        &mut self,
        handler: &mut dyn FnMut(TaggedPoint) -> bool,
    ) -> Result<(), InputError> {
        self.delivered = 0;
        for unit in self.units.iter().cloned() {
            self.delivered += 1;
            if !handler(unit) {
                break;
            }
        }
        Ok(())
    }
}
