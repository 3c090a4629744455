use std::{fmt::Debug, sync::Arc};

use bytes::BytesMut;

use crate::{
    err::{DirErr, Result},
    store::IndexOutput,
    table::{CacheTable, EntryId},
};

/// The writer returned by the caching directory. Whether a file is buffered
/// in memory or written through to the stable store is decided once, when the
/// output is created.
pub enum CachingOutput {
    Cached(CachedOutput),
    Passthrough(PassthroughOutput),
}

impl CachingOutput {
    pub fn is_cached(&self) -> bool {
        matches!(self, CachingOutput::Cached(_))
    }

    fn inner(&self) -> &dyn IndexOutput {
        match self {
            CachingOutput::Cached(out) => out,
            CachingOutput::Passthrough(out) => out,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn IndexOutput {
        match self {
            CachingOutput::Cached(out) => out,
            CachingOutput::Passthrough(out) => out,
        }
    }
}

impl Debug for CachingOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CachingOutput::Cached(out) => out.fmt(f),
            CachingOutput::Passthrough(out) => out.fmt(f),
        }
    }
}

impl IndexOutput for CachingOutput {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.inner_mut().write_bytes(data)
    }

    fn file_pointer(&self) -> u64 {
        self.inner().file_pointer()
    }

    fn close(&mut self) -> Result<()> {
        self.inner_mut().close()
    }
}

/// Buffers a file in memory. Every append is reported to the cache table
/// before it lands in the buffer, and the buffer is handed to the table on
/// close.
pub struct CachedOutput {
    name: String,
    id: EntryId,
    table: Arc<CacheTable>,
    buf: BytesMut,
    closed: bool,
}

impl CachedOutput {
    pub(crate) fn new(name: String, id: EntryId, table: Arc<CacheTable>) -> Self {
        Self { name, id, table, buf: BytesMut::new(), closed: false }
    }
}

impl Debug for CachedOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedOutput")
            .field("name", &self.name)
            .field("len", &self.buf.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl IndexOutput for CachedOutput {
    fn name(&self) -> &str {
        &self.name
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return DirErr::ClosedStream(self.name.clone()).into();
        }
        let tracked = self.table.record_write(&self.name, self.id, data.len())?;
        if !tracked {
            tracing::trace!(name = %self.name, len = data.len(), "untracked write to deleted file");
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
        let len = data.len();
        if !self.table.finish_write(&self.name, self.id, data) {
            tracing::debug!(name = %self.name, len, "dropping buffer of deleted file");
        }
        Ok(())
    }
}

impl Drop for CachedOutput {
    fn drop(&mut self) {
        // closing a cached output never fails
        let _ = self.close();
    }
}

/// Writes straight through to the stable store. Its bytes never count
/// towards the cache budget.
pub struct PassthroughOutput {
    inner: Box<dyn IndexOutput>,
    closed: bool,
}

impl PassthroughOutput {
    pub(crate) fn new(inner: Box<dyn IndexOutput>) -> Self {
        Self { inner, closed: false }
    }
}

impl Debug for PassthroughOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughOutput")
            .field("inner", &self.inner)
            .field("closed", &self.closed)
            .finish()
    }
}

impl IndexOutput for PassthroughOutput {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return DirErr::ClosedStream(self.inner.name().into()).into();
        }
        self.inner.write_bytes(data)
    }

    fn file_pointer(&self) -> u64 {
        self.inner.file_pointer()
    }

    fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use crate::{
        byte_unit::ByteUnit,
        store::{Directory, mem::MemDirectory},
    };

    use super::*;

    #[test]
    fn test_cached_output() {
        let table = Arc::new(CacheTable::new());
        let id = table.create("f1", || Ok(false)).unwrap();
        let mut out = CachingOutput::Cached(CachedOutput::new("f1".into(), id, table.clone()));
        assert!(out.is_cached());

        for i in 0..10 {
            out.write_i32(i).unwrap();
        }
        assert_eq!(out.file_pointer(), 40);
        assert_eq!(table.ram_bytes_used(), 40u64);

        out.close().unwrap();
        out.close().unwrap();
        assert_matches!(out.write_u8(1).unwrap_err().ctx(), DirErr::ClosedStream(name) if name == "f1");
        assert_eq!(table.ram_bytes_used(), 40u64);
    }

    #[test]
    fn test_drop_closes() {
        let table = Arc::new(CacheTable::new());
        let id = table.create("f1", || Ok(false)).unwrap();
        {
            let mut out = CachedOutput::new("f1".into(), id, table.clone());
            out.write_bytes(b"hello").unwrap();
        }
        assert_eq!(table.begin_flush("f1").unwrap().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_passthrough_output() {
        let store = MemDirectory::new();
        let inner = store.create_output("big").unwrap();
        let mut out = CachingOutput::Passthrough(PassthroughOutput::new(inner));
        assert!(!out.is_cached());

        out.write_bytes(&[7; 100]).unwrap();
        out.close().unwrap();
        assert_matches!(out.write_u8(1).unwrap_err().ctx(), DirErr::ClosedStream(_));
        assert_eq!(store.file_length("big").unwrap(), 100);
        assert_eq!(ByteUnit::new(store.file_length("big").unwrap()), 100u64);
    }
}
