use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    err::{DirErr, Result},
    store::{BytesInput, Directory, IndexInput, IndexOutput},
};

enum MemFile {
    Writing,
    Closed(Bytes),
}

#[derive(Default)]
struct Shared {
    files: BTreeMap<String, MemFile>,

    /// every name passed to a successful sync, in order
    synced: Vec<String>,

    closed: bool,
}

/// A stable store which keeps every file on the heap.
///
/// Files are visible as soon as they are created and receive their contents
/// when their output is closed. Syncing records the synced names so callers
/// can observe which files were made durable; names which do not exist are
/// ignored.
#[derive(Default, Clone)]
pub struct MemDirectory {
    shared: Arc<Mutex<Shared>>,
}

impl MemDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every name which has been synced, in the order the sync calls
    /// were issued.
    pub fn synced_files(&self) -> Vec<String> {
        self.shared.lock().synced.clone()
    }

    fn open_shared(&self) -> Result<MutexGuard<'_, Shared>> {
        let shared = self.shared.lock();
        if shared.closed {
            return DirErr::AlreadyClosed.into();
        }
        Ok(shared)
    }
}

impl Debug for MemDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("MemDirectory")
            .field("files", &shared.files.len())
            .field("closed", &shared.closed)
            .finish()
    }
}

impl Directory for MemDirectory {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        let mut shared = self.open_shared()?;
        if shared.files.contains_key(name) {
            return DirErr::AlreadyExists(name.into()).into();
        }
        shared.files.insert(name.into(), MemFile::Writing);
        Ok(Box::new(MemOutput {
            name: name.into(),
            buf: BytesMut::new(),
            shared: self.shared.clone(),
            closed: false,
        }))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        match self.open_shared()?.files.get(name) {
            Some(MemFile::Closed(data)) => Ok(Box::new(BytesInput::new(name, data.clone()))),
            Some(MemFile::Writing) => DirErr::StillOpen(name.into()).into(),
            None => DirErr::NotFound(name.into()).into(),
        }
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match self.open_shared()?.files.remove(name) {
            Some(_) => Ok(()),
            None => DirErr::NotFound(name.into()).into(),
        }
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        let mut shared = self.open_shared()?;
        for name in names {
            match shared.files.get(name) {
                Some(MemFile::Closed(_)) => shared.synced.push(name.clone()),
                Some(MemFile::Writing) => return DirErr::StillOpen(name.clone()).into(),
                None => (),
            }
        }
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut shared = self.open_shared()?;
        match shared.files.get(from) {
            Some(MemFile::Closed(_)) => (),
            Some(MemFile::Writing) => return DirErr::StillOpen(from.into()).into(),
            None => return DirErr::NotFound(from.into()).into(),
        }
        if let Some(file) = shared.files.remove(from) {
            shared.files.insert(to.into(), file);
        }
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<String>> {
        Ok(self.open_shared()?.files.keys().cloned().collect())
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        match self.open_shared()?.files.get(name) {
            Some(MemFile::Closed(data)) => Ok(data.len() as u64),
            Some(MemFile::Writing) => Ok(0),
            None => DirErr::NotFound(name.into()).into(),
        }
    }

    fn close(&self) -> Result<()> {
        self.shared.lock().closed = true;
        Ok(())
    }
}

struct MemOutput {
    name: String,
    buf: BytesMut,
    shared: Arc<Mutex<Shared>>,
    closed: bool,
}

impl Debug for MemOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemOutput")
            .field("name", &self.name)
            .field("len", &self.buf.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl IndexOutput for MemOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return DirErr::ClosedStream(self.name.clone()).into();
        }
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn file_pointer(&self) -> u64 {
        self.buf.len() as u64
    }

    fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let data = std::mem::take(&mut self.buf).freeze();
        let mut shared = self.shared.lock();
        // a file deleted while it was being written stays deleted
        if let Some(file @ MemFile::Writing) = shared.files.get_mut(&self.name) {
            *file = MemFile::Closed(data);
        }
        Ok(())
    }
}

impl Drop for MemOutput {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!("failed to close output `{}`: {err}", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn write_file(dir: &MemDirectory, name: &str, data: &[u8]) {
        let mut out = dir.create_output(name).unwrap();
        out.write_bytes(data).unwrap();
        out.close().unwrap();
    }

    #[test]
    fn test_write_read() {
        let dir = MemDirectory::new();
        write_file(&dir, "_0.cfs", b"segment");

        assert_eq!(dir.file_length("_0.cfs").unwrap(), 7);
        assert_eq!(dir.open_input("_0.cfs").unwrap().read_all().unwrap(), b"segment");
        assert_eq!(dir.list_all().unwrap(), vec!["_0.cfs".to_string()]);
    }

    #[test]
    fn test_create_existing() {
        let dir = MemDirectory::new();
        write_file(&dir, "a", b"1");
        let err = dir.create_output("a").unwrap_err();
        assert_matches!(err.ctx(), DirErr::AlreadyExists(name) if name == "a");
    }

    #[test]
    fn test_write_after_close() {
        let dir = MemDirectory::new();
        let mut out = dir.create_output("a").unwrap();
        out.close().unwrap();
        out.close().unwrap();
        assert_matches!(out.write_u8(1).unwrap_err().ctx(), DirErr::ClosedStream(_));
    }

    #[test]
    fn test_delete_while_writing() {
        let dir = MemDirectory::new();
        let mut out = dir.create_output("a").unwrap();
        out.write_bytes(b"abc").unwrap();
        assert_matches!(dir.open_input("a").unwrap_err().ctx(), DirErr::StillOpen(_));
        dir.delete_file("a").unwrap();
        out.close().unwrap();
        assert!(!dir.file_exists("a").unwrap());
    }

    #[test]
    fn test_rename_replaces() {
        let dir = MemDirectory::new();
        write_file(&dir, "pending_segments_1", b"new");
        write_file(&dir, "segments_1", b"old");
        dir.rename("pending_segments_1", "segments_1").unwrap();

        assert_eq!(dir.list_all().unwrap(), vec!["segments_1".to_string()]);
        assert_eq!(dir.open_input("segments_1").unwrap().read_all().unwrap(), b"new");
        assert_matches!(dir.rename("missing", "x").unwrap_err().ctx(), DirErr::NotFound(_));
    }

    #[test]
    fn test_sync_records_names() {
        let dir = MemDirectory::new();
        write_file(&dir, "a", b"1");
        write_file(&dir, "b", b"2");
        dir.sync(&["b".into(), "missing".into(), "a".into()]).unwrap();
        assert_eq!(dir.synced_files(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_closed() {
        let dir = MemDirectory::new();
        dir.close().unwrap();
        assert_matches!(dir.list_all().unwrap_err().ctx(), DirErr::AlreadyClosed);
        assert_matches!(dir.create_output("a").unwrap_err().ctx(), DirErr::AlreadyClosed);
    }
}
