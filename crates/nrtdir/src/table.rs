//! The registry of files buffered in memory.
//!
//! Every cache entry and the total byte counter live behind a single mutex, so
//! the counter always equals the sum of the entry sizes whenever the lock is
//! released. Writers keep their bytes in their own buffer and report each
//! append here; an append against an entry which has since been removed from
//! the table is accepted but no longer counted.

use std::collections::BTreeMap;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    byte_unit::ByteUnit,
    err::{DirErr, Result},
};

/// Distinguishes successive cache entries which reuse the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryState {
    /// A writer is still appending to the entry.
    Open,
    /// The writer closed the entry; its contents are final.
    Closed,
    /// The contents are being copied into the stable store.
    Flushing,
}

#[derive(Debug)]
struct CacheEntry {
    id: EntryId,
    size: ByteUnit,
    state: EntryState,
    /// empty until the writer closes the entry
    data: Bytes,
}

#[derive(Debug, Default)]
struct TableState {
    entries: BTreeMap<String, CacheEntry>,
    total: ByteUnit,
    next_id: u64,
    closed: bool,
}

impl TableState {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            return DirErr::AlreadyClosed.into();
        }
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(name)?;
        debug_assert!(self.total >= entry.size, "cache accounting underflow");
        self.total -= entry.size;
        Some(entry)
    }
}

/// The result of looking up a cached file for reading.
#[derive(Debug)]
pub(crate) enum Lookup {
    Cached(Bytes),
    StillOpen,
    Absent,
}

/// How a rename was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Renamed {
    /// The cache entry now lives under the new name.
    Moved,
    /// The destination exists in the stable store; the source must be flushed
    /// and renamed there.
    NeedsFlush,
    /// Neither name is cached and the stable store performed the rename.
    InStore,
}

/// What a closing table hands back for its final flush.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Drained {
    /// Closed entries, now claimed for flushing.
    pub claimed: Vec<(String, Bytes)>,
    /// Entries which were still open for writing and have been dropped.
    pub discarded: Vec<String>,
}

#[derive(Debug, Default)]
pub(crate) struct CacheTable {
    /// Guards every entry together with the byte total. Creating and renaming
    /// also consult the stable store while holding it, so that a name can
    /// never appear in both places; those operations are therefore serialized
    /// with each other. Flushes copy their bytes without holding it.
    state: Mutex<TableState>,

    /// Signalled whenever an entry leaves the `Flushing` state or the table.
    flushed: Condvar,
}

impl CacheTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock()
    }

    /// Waits until `name` is not being flushed. The returned guard observes
    /// the entry either absent or in a stable state.
    fn lock_settled(&self, name: &str) -> MutexGuard<'_, TableState> {
        let mut state = self.lock();
        while state
            .entries
            .get(name)
            .is_some_and(|entry| entry.state == EntryState::Flushing)
        {
            self.flushed.wait(&mut state);
        }
        state
    }

    pub fn ram_bytes_used(&self) -> ByteUnit {
        self.lock().total
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sorted names of every cached file.
    pub fn names(&self) -> Vec<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    pub fn file_length(&self, name: &str) -> Option<ByteUnit> {
        self.lock().entries.get(name).map(|entry| entry.size)
    }

    pub fn lookup(&self, name: &str) -> Lookup {
        match self.lock().entries.get(name) {
            Some(entry) if entry.state == EntryState::Open => Lookup::StillOpen,
            Some(entry) => Lookup::Cached(entry.data.clone()),
            None => Lookup::Absent,
        }
    }

    /// Registers a new open entry. `exists_in_store` runs under the table lock
    /// so no other create can claim the same name in between.
    pub fn create(
        &self,
        name: &str,
        exists_in_store: impl FnOnce() -> Result<bool>,
    ) -> Result<EntryId> {
        let mut state = self.lock();
        state.check_open()?;
        if state.entries.contains_key(name) || exists_in_store()? {
            return DirErr::AlreadyExists(name.into()).into();
        }
        let id = EntryId(state.next_id);
        state.next_id += 1;
        state.entries.insert(
            name.into(),
            CacheEntry {
                id,
                size: ByteUnit::ZERO,
                state: EntryState::Open,
                data: Bytes::new(),
            },
        );
        tracing::trace!(name, "created cache entry");
        Ok(id)
    }

    /// Runs `create` while holding the table lock, provided `name` is not
    /// cached. Used to create uncached files without racing a cached create.
    pub fn create_uncached<T>(&self, name: &str, create: impl FnOnce() -> Result<T>) -> Result<T> {
        let state = self.lock();
        state.check_open()?;
        if state.entries.contains_key(name) {
            return DirErr::AlreadyExists(name.into()).into();
        }
        create()
    }

    /// Accounts for `len` bytes appended to the entry `id`. Returns whether
    /// the bytes are tracked; bytes written to a removed entry are not.
    pub fn record_write(&self, name: &str, id: EntryId, len: usize) -> Result<bool> {
        let mut state = self.lock();
        if state.closed {
            return DirErr::ClosedStream(name.into()).into();
        }
        let state = &mut *state;
        match state.entries.get_mut(name) {
            Some(entry) if entry.id == id => {
                debug_assert_eq!(entry.state, EntryState::Open);
                entry.size += len;
                state.total += len;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Publishes the final contents of the entry `id`. Returns false if the
    /// entry was removed while it was being written, in which case `data` is
    /// dropped.
    pub fn finish_write(&self, name: &str, id: EntryId, data: Bytes) -> bool {
        let mut state = self.lock();
        match state.entries.get_mut(name) {
            Some(entry) if entry.id == id => {
                debug_assert_eq!(entry.size, data.len());
                entry.state = EntryState::Closed;
                entry.data = data;
                tracing::trace!(name, size = %entry.size, "closed cache entry");
                true
            }
            _ => false,
        }
    }

    /// Removes `name` regardless of whether it is open or closed, returning the
    /// number of bytes released. An in-flight flush of `name` completes before
    /// the removal is considered, in which case `None` is returned since the
    /// file now lives in the stable store.
    pub fn remove(&self, name: &str) -> Option<ByteUnit> {
        let mut state = self.lock_settled(name);
        let released = state.remove(name).map(|entry| entry.size);
        if released.is_some() {
            self.flushed.notify_all();
        }
        released
    }

    /// Fails if any of `names` is cached and still open for writing.
    pub fn check_syncable(&self, names: &[String]) -> Result<()> {
        let state = self.lock();
        state.check_open()?;
        for name in names {
            if let Some(entry) = state.entries.get(name)
                && entry.state == EntryState::Open
            {
                return DirErr::InvariantViolation(format!(
                    "sync of `{name}` while it is still open for writing"
                ))
                .into();
            }
        }
        Ok(())
    }

    /// Claims the closed entry `name` for flushing, returning its contents.
    /// Returns `None` if `name` is not cached.
    pub fn begin_flush(&self, name: &str) -> Result<Option<Bytes>> {
        let mut state = self.lock_settled(name);
        state.check_open()?;
        match state.entries.get_mut(name) {
            None => Ok(None),
            Some(entry) if entry.state == EntryState::Open => {
                DirErr::InvariantViolation(format!(
                    "sync of `{name}` while it is still open for writing"
                ))
                .into()
            }
            Some(entry) => {
                entry.state = EntryState::Flushing;
                Ok(Some(entry.data.clone()))
            }
        }
    }

    /// Releases a flushed entry now that the stable store holds its contents.
    pub fn finish_flush(&self, name: &str) -> ByteUnit {
        let mut state = self.lock();
        debug_assert_eq!(
            state.entries.get(name).map(|entry| entry.state),
            Some(EntryState::Flushing)
        );
        let released = state.remove(name).map_or(ByteUnit::ZERO, |entry| entry.size);
        self.flushed.notify_all();
        released
    }

    /// Returns a claimed entry to the table after a failed flush. A closed
    /// table discards the entry instead, since nothing will flush it again.
    pub fn abort_flush(&self, name: &str) {
        let mut state = self.lock();
        if state.closed {
            state.remove(name);
        } else if let Some(entry) = state.entries.get_mut(name) {
            entry.state = EntryState::Closed;
        }
        self.flushed.notify_all();
    }

    /// Resolves a rename of `from` to `to`. `store_has` reports whether the
    /// stable store already holds `to`; `store_rename` performs the rename in
    /// the stable store when neither name is cached. Both run under the table
    /// lock.
    pub fn rename(
        &self,
        from: &str,
        to: &str,
        store_has: impl FnOnce() -> Result<bool>,
        store_rename: impl FnOnce() -> Result<()>,
    ) -> Result<Renamed> {
        let mut state = self.lock_settled(from);
        state.check_open()?;
        if from != to && state.entries.contains_key(to) {
            return DirErr::AlreadyExists(to.into()).into();
        }
        match state.entries.get(from).map(|entry| entry.state) {
            None => {
                store_rename()?;
                Ok(Renamed::InStore)
            }
            Some(EntryState::Open) => DirErr::StillOpen(from.into()).into(),
            Some(_) => {
                if from == to {
                    return Ok(Renamed::Moved);
                }
                if store_has()? {
                    return Ok(Renamed::NeedsFlush);
                }
                if let Some(entry) = state.entries.remove(from) {
                    state.entries.insert(to.into(), entry);
                }
                Ok(Renamed::Moved)
            }
        }
    }

    /// Marks the table closed and claims every closed entry for a final
    /// flush. Entries still open for writing are discarded and their writers
    /// will fail further writes. Returns the claimed entries along with the
    /// names of the discarded ones, or `None` if the table was already closed.
    pub fn drain(&self) -> Option<Drained> {
        let mut state = self.lock();
        if std::mem::replace(&mut state.closed, true) {
            return None;
        }

        let discarded: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.state == EntryState::Open)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &discarded {
            state.remove(name);
        }

        let claimed = state
            .entries
            .iter_mut()
            .filter(|(_, entry)| entry.state == EntryState::Closed)
            .map(|(name, entry)| {
                entry.state = EntryState::Flushing;
                (name.clone(), entry.data.clone())
            })
            .collect();

        Some(Drained { claimed, discarded })
    }

    /// Waits until every in-flight flush has finished or been discarded.
    pub fn wait_empty(&self) {
        let mut state = self.lock();
        while !state.entries.is_empty() {
            self.flushed.wait(&mut state);
        }
        debug_assert!(state.total.is_zero(), "cache accounting leak");
    }

    #[cfg(test)]
    fn sum_sizes(&self) -> ByteUnit {
        let state = self.lock();
        state
            .entries
            .values()
            .fold(ByteUnit::ZERO, |sum, entry| sum + entry.size)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn absent() -> Result<bool> {
        Ok(false)
    }

    fn write(table: &CacheTable, name: &str, data: &[u8]) -> EntryId {
        let id = table.create(name, absent).unwrap();
        assert!(table.record_write(name, id, data.len()).unwrap());
        assert!(table.finish_write(name, id, Bytes::copy_from_slice(data)));
        id
    }

    #[test]
    fn test_accounting() {
        let table = CacheTable::new();
        let a = table.create("a", absent).unwrap();
        let b = table.create("b", absent).unwrap();
        table.record_write("a", a, 10).unwrap();
        table.record_write("b", b, 5).unwrap();
        table.record_write("a", a, 3).unwrap();

        assert_eq!(table.ram_bytes_used(), 18u64);
        assert_eq!(table.ram_bytes_used(), table.sum_sizes());
        assert_eq!(table.file_length("a"), Some(ByteUnit::new(13)));
        assert_eq!(table.names(), vec!["a".to_string(), "b".to_string()]);

        assert_eq!(table.remove("a"), Some(ByteUnit::new(13)));
        assert_eq!(table.remove("a"), None);
        assert_eq!(table.ram_bytes_used(), 5u64);
        assert_eq!(table.ram_bytes_used(), table.sum_sizes());
    }

    #[test]
    fn test_create_duplicate() {
        let table = CacheTable::new();
        table.create("a", absent).unwrap();
        assert_matches!(
            table.create("a", absent).unwrap_err().ctx(),
            DirErr::AlreadyExists(name) if name == "a"
        );
        assert_matches!(
            table.create("b", || Ok(true)).unwrap_err().ctx(),
            DirErr::AlreadyExists(name) if name == "b"
        );
        assert_matches!(
            table.create_uncached("a", || Ok(())).unwrap_err().ctx(),
            DirErr::AlreadyExists(_)
        );
        assert!(!table.contains("b"));
    }

    #[test]
    fn test_writes_after_remove_are_untracked() {
        let table = CacheTable::new();
        let id = table.create("a", absent).unwrap();
        table.record_write("a", id, 40).unwrap();
        assert_eq!(table.remove("a"), Some(ByteUnit::new(40)));

        assert!(!table.record_write("a", id, 40).unwrap());
        assert_eq!(table.ram_bytes_used(), ByteUnit::ZERO);

        // a new entry under the same name is unaffected by the stale writer
        let id2 = table.create("a", absent).unwrap();
        assert!(!table.record_write("a", id, 7).unwrap());
        assert!(!table.finish_write("a", id, Bytes::from_static(&[0; 80])));
        assert!(table.record_write("a", id2, 2).unwrap());
        assert_eq!(table.ram_bytes_used(), 2u64);
    }

    #[test]
    fn test_flush_lifecycle() {
        let table = CacheTable::new();
        let id = table.create("a", absent).unwrap();
        table.record_write("a", id, 3).unwrap();

        let err = table.begin_flush("a").unwrap_err();
        assert_matches!(err.ctx(), DirErr::InvariantViolation(_));
        assert_matches!(
            table.check_syncable(&["a".into()]).unwrap_err().ctx(),
            DirErr::InvariantViolation(_)
        );

        table.finish_write("a", id, Bytes::from_static(b"abc"));
        table.check_syncable(&["a".into(), "zzz".into()]).unwrap();
        assert_eq!(table.begin_flush("a").unwrap(), Some(Bytes::from_static(b"abc")));
        assert_matches!(table.lookup("a"), Lookup::Cached(data) if data == "abc");

        table.abort_flush("a");
        assert_eq!(table.ram_bytes_used(), 3u64);

        assert!(table.begin_flush("a").unwrap().is_some());
        assert_eq!(table.finish_flush("a"), ByteUnit::new(3));
        assert_eq!(table.ram_bytes_used(), ByteUnit::ZERO);
        assert_eq!(table.begin_flush("a").unwrap(), None);
    }

    #[test]
    fn test_rename() {
        let table = CacheTable::new();
        write(&table, "a", b"123");
        write(&table, "b", b"4");
        let open = table.create("c", absent).unwrap();

        let no_store = || -> Result<()> { panic!("unexpected store rename") };
        assert_matches!(
            table.rename("a", "b", absent, no_store).unwrap_err().ctx(),
            DirErr::AlreadyExists(_)
        );
        assert_matches!(
            table.rename("c", "d", absent, no_store).unwrap_err().ctx(),
            DirErr::StillOpen(_)
        );
        assert_eq!(table.rename("a", "d", || Ok(true), no_store).unwrap(), Renamed::NeedsFlush);
        assert_eq!(table.rename("a", "d", absent, no_store).unwrap(), Renamed::Moved);
        assert_eq!(table.names(), vec!["b", "c", "d"]);
        assert_eq!(table.ram_bytes_used(), 4u64);

        let mut renamed = false;
        let result = table.rename("x", "y", absent, || {
            renamed = true;
            Ok(())
        });
        assert_eq!(result.unwrap(), Renamed::InStore);
        assert!(renamed);

        table.record_write("c", open, 1).unwrap();
        assert_eq!(table.ram_bytes_used(), table.sum_sizes());
    }

    #[test]
    fn test_drain() {
        let table = CacheTable::new();
        write(&table, "a", b"123");
        let open = table.create("b", absent).unwrap();
        table.record_write("b", open, 10).unwrap();

        let drained = table.drain().unwrap();
        assert_eq!(drained.claimed, vec![("a".to_string(), Bytes::from_static(b"123"))]);
        assert_eq!(drained.discarded, vec!["b".to_string()]);
        assert_eq!(table.ram_bytes_used(), 3u64);

        // only the first drain closes the table
        assert_eq!(table.drain(), None);

        assert_matches!(table.record_write("b", open, 1).unwrap_err().ctx(), DirErr::ClosedStream(_));
        assert_matches!(table.create("c", absent).unwrap_err().ctx(), DirErr::AlreadyClosed);

        table.finish_flush("a");
        table.wait_empty();
        assert_eq!(table.ram_bytes_used(), ByteUnit::ZERO);
        assert!(table.names().is_empty());
    }

    #[test]
    fn test_remove_waits_for_flush() {
        let table = CacheTable::new();
        write(&table, "a", b"xyz");
        assert!(table.begin_flush("a").unwrap().is_some());

        std::thread::scope(|s| {
            let remover = s.spawn(|| table.remove("a"));
            std::thread::sleep(std::time::Duration::from_millis(20));
            table.finish_flush("a");
            // the flush won, so the deletion must be forwarded to the store
            assert_eq!(remover.join().unwrap(), None);
        });
        assert_eq!(table.ram_bytes_used(), ByteUnit::ZERO);
    }
}
