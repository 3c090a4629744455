//! The durable file namespace that the caching directory sits in front of.
//!
//! Files are named, written once from start to finish through an
//! [`IndexOutput`], and become immutable once the output is closed.

use std::{fmt::Debug, io};

use bytes::Bytes;
use culprit::ResultExt;

use crate::err::{DirErr, Result};

pub mod fs;
pub mod mem;

pub trait Directory: Send + Sync + Debug {
    /// Creates a new, empty file. Fails with `AlreadyExists` if `name` exists.
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>>;

    /// Opens a closed file for reading.
    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>>;

    fn delete_file(&self, name: &str) -> Result<()>;

    /// Makes the named files durable. Names which no longer exist are
    /// skipped, since a file deleted before it was synced has nothing left to
    /// persist.
    fn sync(&self, names: &[String]) -> Result<()>;

    /// Atomically renames `from` to `to`, replacing `to` if it exists.
    fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Returns every file name in the directory in sorted order.
    fn list_all(&self) -> Result<Vec<String>>;

    fn file_length(&self, name: &str) -> Result<u64>;

    fn close(&self) -> Result<()>;

    fn file_exists(&self, name: &str) -> Result<bool> {
        match self.file_length(name) {
            Ok(_) => Ok(true),
            Err(err) if err.ctx().is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// An append-only writer for a single file.
pub trait IndexOutput: Send + Debug {
    fn name(&self) -> &str;

    /// Appends `data` to the end of the file.
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// The number of bytes written so far.
    fn file_pointer(&self) -> u64;

    /// Finishes the file. Closing an already closed output does nothing.
    fn close(&mut self) -> Result<()>;

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
}

/// A positioned reader over a single closed file.
pub trait IndexInput: Send + Debug {
    fn name(&self) -> &str;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self) -> u64;

    fn seek(&mut self, pos: u64) -> Result<()>;

    /// Fills `buf` completely, failing with `UnexpectedEof` if the file ends
    /// first.
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0; 1];
        self.read_bytes(&mut buf)?;
        Ok(buf[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let mut buf = [0; 8];
        self.read_bytes(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    /// Reads from the current position to the end of the file.
    fn read_all(&mut self) -> Result<Vec<u8>> {
        let remaining = self.len().saturating_sub(self.position());
        let remaining = usize::try_from(remaining).or_into_ctx()?;
        let mut buf = vec![0; remaining];
        self.read_bytes(&mut buf)?;
        Ok(buf)
    }
}

/// Reads an immutable in-memory snapshot of a file.
#[derive(Clone)]
pub struct BytesInput {
    name: String,
    data: Bytes,
    pos: usize,
}

impl BytesInput {
    pub fn new(name: impl Into<String>, data: Bytes) -> Self {
        Self { name: name.into(), data, pos: 0 }
    }
}

impl Debug for BytesInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BytesInput")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("pos", &self.pos)
            .finish()
    }
}

impl IndexInput for BytesInput {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, pos: u64) -> Result<()> {
        match usize::try_from(pos) {
            Ok(pos) if pos <= self.data.len() => {
                self.pos = pos;
                Ok(())
            }
            _ => DirErr::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("seek past end of `{}`: {pos} > {}", self.name, self.data.len()),
            ))
            .into(),
        }
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return DirErr::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read past end of `{}`", self.name),
            ))
            .into();
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}
