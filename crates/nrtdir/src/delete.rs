use crate::{dir::NrtCachingDirectory, err::Result, store::Directory};

impl<D: Directory> NrtCachingDirectory<D> {
    /// Deletes `name` from the cache if it is cached, otherwise from the
    /// stable store.
    ///
    /// A cached file is released immediately even if it is still being
    /// written. Its writer keeps working, but whatever it writes from then on
    /// is no longer counted and is dropped when the writer closes.
    #[tracing::instrument(level = "debug", skip(self))]
    pub(crate) fn delete_tracked(&self, name: &str) -> Result<()> {
        self.check_open()?;
        match self.table.remove(name) {
            Some(released) => {
                tracing::debug!(%released, "deleted cached file");
                Ok(())
            }
            None => self.store.delete_file(name),
        }
    }
}
