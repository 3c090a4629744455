#![allow(dead_code)]

use std::{
    collections::HashSet,
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use nrtdir::{DirErr, Directory, IndexInput, IndexOutput, MemDirectory, Result};
use parking_lot::Mutex;

/// Writes `count` consecutive integers starting at zero and closes the output.
pub fn write_ints(out: &mut dyn IndexOutput, count: i32) {
    for i in 0..count {
        out.write_i32(i).unwrap();
    }
    out.close().unwrap();
}

#[derive(Debug, Default)]
struct Faults {
    create: HashSet<String>,
    sync: HashSet<String>,
}

/// A [`MemDirectory`] which fails selected operations with an I/O error.
#[derive(Debug, Clone, Default)]
pub struct FaultyDirectory {
    inner: MemDirectory,
    faults: Arc<Mutex<Faults>>,
    closes: Arc<AtomicUsize>,
}

impl FaultyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemDirectory {
        &self.inner
    }

    pub fn fail_create(&self, name: &str) {
        self.faults.lock().create.insert(name.into());
    }

    pub fn fail_sync(&self, name: &str) {
        self.faults.lock().sync.insert(name.into());
    }

    /// How many times the store has been closed.
    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn heal(&self) {
        let mut faults = self.faults.lock();
        faults.create.clear();
        faults.sync.clear();
    }
}

fn injected(op: &str, name: &str) -> io::Error {
    io::Error::other(format!("injected {op} failure for `{name}`"))
}

impl Directory for FaultyDirectory {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        if self.faults.lock().create.contains(name) {
            return DirErr::Io(injected("create", name)).into();
        }
        self.inner.create_output(name)
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        self.inner.open_input(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.inner.delete_file(name)
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        let faults = self.faults.lock();
        if let Some(name) = names.iter().find(|name| faults.sync.contains(*name)) {
            return DirErr::Io(injected("sync", name)).into();
        }
        drop(faults);
        self.inner.sync(names)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.inner.rename(from, to)
    }

    fn list_all(&self) -> Result<Vec<String>> {
        self.inner.list_all()
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.inner.file_length(name)
    }

    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close()
    }
}
