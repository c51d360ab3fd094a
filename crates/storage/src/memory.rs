use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::{Column, KeyValueStore, PrefixVisitor, StoreError, WriteBatch, WriteOp};

type MemoryStoreMap = BTreeMap<(Column, Vec<u8>), Vec<u8>>;

/// Ordered in-memory store. Reads and writes can be made to fail on demand so
/// callers can exercise their backend-error paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreMap>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    flushes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn len(&self, column: Column) -> usize {
        let guard = self.inner.read().expect("memory store lock");
        guard.keys().filter(|(entry, _)| *entry == column).count()
    }

    fn check_read(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("memory store read unavailable".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("memory store write unavailable".to_string()));
        }
        Ok(())
    }

    fn prefix_range<'g>(
        guard: &'g MemoryStoreMap,
        column: Column,
        prefix: &'g [u8],
    ) -> impl Iterator<Item = (&'g Vec<u8>, &'g Vec<u8>)> + 'g {
        guard
            .range((Bound::Included((column, prefix.to_vec())), Bound::Unbounded))
            .take_while(move |((entry_column, key), _)| {
                *entry_column == column && key.starts_with(prefix)
            })
            .map(|((_, key), value)| (key, value))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.check_read()?;
        let guard = self.inner.read().expect("memory store lock");
        Ok(guard.get(&(column, key.to_vec())).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_write()?;
        let mut guard = self.inner.write().expect("memory store lock");
        guard.insert((column, key.to_vec()), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.check_write()?;
        let mut guard = self.inner.write().expect("memory store lock");
        guard.remove(&(column, key.to_vec()));
        Ok(())
    }

    fn scan_prefix(
        &self,
        column: Column,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        self.check_read()?;
        let guard = self.inner.read().expect("memory store lock");
        Ok(Self::prefix_range(&guard, column, prefix)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        self.check_read()?;
        let guard = self.inner.read().expect("memory store lock");
        for (key, value) in Self::prefix_range(&guard, column, prefix) {
            visitor(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.check_write()?;
        let mut guard = self.inner.write().expect("memory store lock");
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard.insert(
                        (*column, key.as_slice().to_vec()),
                        value.as_slice().to_vec(),
                    );
                }
                WriteOp::Delete { column, key } => {
                    guard.remove(&(*column, key.as_slice().to_vec()));
                }
            }
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.check_write()?;
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stays_inside_column() {
        let store = MemoryStore::new();
        store.put(Column::Tx, b"ab1", b"x").expect("put");
        store.put(Column::Tx, b"ab2", b"y").expect("put");
        store.put(Column::Tx, b"ac", b"z").expect("put");
        store.put(Column::Meta, b"ab3", b"w").expect("put");

        let keys: Vec<Vec<u8>> = store
            .scan_prefix(Column::Tx, b"ab")
            .expect("scan")
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![b"ab1".to_vec(), b"ab2".to_vec()]);
        assert_eq!(store.len(Column::Tx), 3);
    }

    #[test]
    fn failing_writes_leave_state_untouched() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::AddressBook, b"dest", b"label");
        store.set_fail_writes(true);
        assert!(store.write_batch(&batch).is_err());
        assert!(store.flush().is_err());
        store.set_fail_writes(false);
        assert!(store.get(Column::AddressBook, b"dest").expect("get").is_none());
        store.write_batch(&batch).expect("batch");
        store.flush().expect("flush");
        assert_eq!(store.flush_count(), 1);
    }

    #[test]
    fn failing_reads_are_reported() {
        let store = MemoryStore::new();
        store.set_fail_reads(true);
        assert!(store.get(Column::Meta, b"k").is_err());
        assert!(store.scan_prefix(Column::Meta, b"").is_err());
    }
}
