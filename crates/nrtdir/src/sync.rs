//! Moves cached files into the stable store.
//!
//! A cached file is flushed in three steps: the entry is claimed under the
//! table lock (`Closed -> Flushing`), its bytes are copied into a new store
//! file and made durable without holding the lock, and finally the entry is
//! removed from the table. Deletes and renames of a name wait while it is
//! being flushed, so exactly one of them applies first.

use bytes::Bytes;

use crate::{
    dir::NrtCachingDirectory,
    err::{DirErr, Result},
    store::{Directory, IndexOutput},
    table::{Drained, Renamed},
};

impl<D: Directory> NrtCachingDirectory<D> {
    #[tracing::instrument(level = "debug", skip_all, fields(files = names.len()))]
    pub(crate) fn flush_and_sync(&self, names: &[String]) -> Result<()> {
        self.table.check_syncable(names)?;

        let mut uncached = Vec::new();
        for name in names {
            if !self.flush(name)? {
                uncached.push(name.clone());
            }
        }
        if !uncached.is_empty() {
            self.store.sync(&uncached)?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let renamed = self.table.rename(
            from,
            to,
            || self.store.file_exists(to),
            || self.store.rename(from, to),
        )?;
        if renamed == Renamed::NeedsFlush {
            // the store must replace `to` atomically, so `from` has to be
            // there first
            self.flush(from)?;
            self.store.rename(from, to)?;
        }
        tracing::debug!(?renamed, "renamed file");
        Ok(())
    }

    /// Flushes every cached file and closes the stable store.
    ///
    /// Cached files which are still open for writing can not be flushed and
    /// are dropped, which fails the close with `InvariantViolation` once the
    /// store is closed. Every closed cached file is attempted even if an
    /// earlier one fails; the first failure is returned. Only the first call
    /// closes anything; later calls return immediately.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn drain_and_close(&self) -> Result<()> {
        let Some(Drained { claimed, discarded }) = self.table.drain() else {
            return Ok(());
        };
        for name in &discarded {
            tracing::error!(%name, "discarding cached file which is still open for writing");
        }

        let mut first_err = None;
        for (name, data) in claimed {
            match self.copy_to_store(&name, &data) {
                Ok(()) => {
                    self.table.finish_flush(&name);
                }
                Err(err) => {
                    tracing::error!(%name, "failed to flush cached file on close: {err}");
                    self.table.abort_flush(&name);
                    first_err.get_or_insert(err);
                }
            }
        }

        // flushes started by a concurrent sync before the table closed
        self.table.wait_empty();

        let closed = self.store.close();
        if let Some(err) = first_err {
            return Err(err);
        }
        if !discarded.is_empty() {
            return DirErr::InvariantViolation(format!(
                "close while still open for writing: {}",
                discarded.join(", ")
            ))
            .into();
        }
        closed
    }

    /// Flushes `name` if it is cached, returning false if it is not.
    fn flush(&self, name: &str) -> Result<bool> {
        let Some(data) = self.table.begin_flush(name)? else {
            return Ok(false);
        };
        match self.copy_to_store(name, &data) {
            Ok(()) => {
                let released = self.table.finish_flush(name);
                tracing::debug!(name, %released, "flushed cached file");
                Ok(true)
            }
            Err(err) => {
                self.table.abort_flush(name);
                Err(err)
            }
        }
    }

    /// Writes `data` to a new store file and makes it durable. A partially
    /// written file is removed again if any step fails.
    fn copy_to_store(&self, name: &str, data: &Bytes) -> Result<()> {
        let mut out = self.store.create_output(name)?;
        let result = out
            .write_bytes(data)
            .and_then(|()| out.close())
            .and_then(|()| self.store.sync(&[name.to_owned()]));

        if result.is_err() {
            drop(out);
            if let Err(err) = self.store.delete_file(name)
                && !err.ctx().is_not_found()
            {
                tracing::error!(name, "failed to remove partially flushed file: {err}");
            }
        }
        result
    }
}
