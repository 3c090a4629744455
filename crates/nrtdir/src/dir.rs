use std::{
    fmt::{Debug, Display},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use culprit::ResultExt;

use crate::{
    byte_unit::ByteUnit,
    config::{CacheLimits, NrtCachingConfig},
    context::SizeHint,
    err::{DirErr, Result},
    output::{CachedOutput, CachingOutput, PassthroughOutput},
    policy::{CachePolicy, DefaultCachePolicy},
    store::{BytesInput, Directory, IndexInput, IndexOutput},
    table::{CacheTable, Lookup},
};

/// Wraps a stable store and keeps small, freshly written files in memory
/// until they are synced.
///
/// Whether a new file is cached is decided once, when it is created, by the
/// directory's [`CachePolicy`]. Cached files are readable, listable and
/// deletable exactly like files in the stable store. Syncing a cached file
/// copies it into the stable store and releases its memory; closing the
/// directory syncs everything that is still cached.
///
/// At any point a name lives either in the cache or in the stable store,
/// never both.
pub struct NrtCachingDirectory<D> {
    pub(crate) store: D,
    pub(crate) table: Arc<CacheTable>,
    policy: Box<dyn CachePolicy>,

    /// thresholds of the default policy, if it is in use
    limits: Option<CacheLimits>,

    temp_counter: AtomicU64,
}

impl<D: Directory> NrtCachingDirectory<D> {
    /// Creates a caching directory which caches files whose estimated size is
    /// at most `max_merge_size_mb`, as long as the total cached size stays
    /// within `max_cache_mb`. Both thresholds must be greater than zero.
    pub fn new(store: D, max_cache_mb: f64, max_merge_size_mb: f64) -> Result<Self> {
        let limits = CacheLimits::from_mb(max_cache_mb, max_merge_size_mb).or_into_ctx()?;
        Ok(Self::with_limits(store, limits))
    }

    pub fn with_config(store: D, config: NrtCachingConfig) -> Result<Self> {
        let limits = config.limits().or_into_ctx()?;
        Ok(Self::with_limits(store, limits))
    }

    pub fn with_limits(store: D, limits: CacheLimits) -> Self {
        tracing::debug!(
            max_cache = %limits.max_cache,
            max_merge_size = %limits.max_merge_size,
            "opening caching directory"
        );
        Self {
            limits: Some(limits),
            ..Self::with_policy(store, DefaultCachePolicy::new(limits))
        }
    }

    /// Creates a caching directory which consults `policy` for every new file.
    pub fn with_policy(store: D, policy: impl CachePolicy + 'static) -> Self {
        Self {
            store,
            table: Arc::new(CacheTable::new()),
            policy: Box::new(policy),
            limits: None,
            temp_counter: AtomicU64::new(0),
        }
    }

    /// The wrapped stable store.
    pub fn store(&self) -> &D {
        &self.store
    }

    /// The number of bytes currently held in memory across all cached files.
    pub fn ram_bytes_used(&self) -> ByteUnit {
        self.table.ram_bytes_used()
    }

    /// Sorted names of the files currently held in memory.
    pub fn list_cached_files(&self) -> Vec<String> {
        self.table.names()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        if self.table.is_closed() {
            return DirErr::AlreadyClosed.into();
        }
        Ok(())
    }

    /// Creates a new file, caching it in memory if the policy accepts `hint`.
    pub fn create_output_with_hint(&self, name: &str, hint: SizeHint) -> Result<CachingOutput> {
        self.check_open()?;
        let cache = self.policy.should_cache(name, &hint, self.table.ram_bytes_used());
        self.create(name, cache)
    }

    /// Creates a file with a unique name of the form
    /// `{prefix}_{suffix}_{n}.tmp` which collides with no cached or stored
    /// file. The cache decision is made on `{prefix}_{suffix}` before the
    /// unique name is chosen.
    pub fn create_temp_output(
        &self,
        prefix: &str,
        suffix: &str,
        hint: SizeHint,
    ) -> Result<CachingOutput> {
        self.check_open()?;
        let cache =
            self.policy
                .should_cache(&format!("{prefix}_{suffix}"), &hint, self.table.ram_bytes_used());
        loop {
            let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
            let name = temp_file_name(prefix, suffix, n);
            match self.create(&name, cache) {
                Err(err) if err.ctx().is_already_exists() => {
                    tracing::trace!(name, "temp file name taken");
                }
                result => return result,
            }
        }
    }

    fn create(&self, name: &str, cache: bool) -> Result<CachingOutput> {
        if cache {
            let id = self.table.create(name, || self.store.file_exists(name))?;
            tracing::debug!(name, cached = %self.table.ram_bytes_used(), "caching new file");
            Ok(CachingOutput::Cached(CachedOutput::new(
                name.into(),
                id,
                self.table.clone(),
            )))
        } else {
            let inner = self
                .table
                .create_uncached(name, || self.store.create_output(name))?;
            tracing::trace!(name, "writing new file through to the store");
            Ok(CachingOutput::Passthrough(PassthroughOutput::new(inner)))
        }
    }
}

fn temp_file_name(prefix: &str, suffix: &str, n: u64) -> String {
    format!("{prefix}_{suffix}_{}.tmp", to_base36(n))
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut buf = Vec::new();
    loop {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
        if n == 0 {
            break;
        }
    }
    buf.iter().rev().map(|&d| d as char).collect()
}

impl<D: Directory> Directory for NrtCachingDirectory<D> {
    fn create_output(&self, name: &str) -> Result<Box<dyn IndexOutput>> {
        Ok(Box::new(self.create_output_with_hint(name, SizeHint::None)?))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn IndexInput>> {
        self.check_open()?;
        match self.table.lookup(name) {
            Lookup::Cached(data) => Ok(Box::new(BytesInput::new(name, data))),
            Lookup::StillOpen => DirErr::StillOpen(name.into()).into(),
            Lookup::Absent => self.store.open_input(name),
        }
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.delete_tracked(name)
    }

    fn sync(&self, names: &[String]) -> Result<()> {
        self.flush_and_sync(names)
    }

    fn rename(&self, from: &str, to: &str) -> Result<()> {
        self.rename_file(from, to)
    }

    fn list_all(&self) -> Result<Vec<String>> {
        self.check_open()?;
        // list the cache first: a file flushed in between then shows up in the
        // store listing instead of being missed
        let mut names = self.table.names();
        names.extend(self.store.list_all()?);
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn file_length(&self, name: &str) -> Result<u64> {
        self.check_open()?;
        match self.table.file_length(name) {
            Some(size) => Ok(size.as_u64()),
            None => self.store.file_length(name),
        }
    }

    fn close(&self) -> Result<()> {
        self.drain_and_close()
    }
}

impl<D: Debug> Debug for NrtCachingDirectory<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NrtCachingDirectory")
            .field("limits", &self.limits)
            .field("cached", &self.table.ram_bytes_used())
            .field("store", &self.store)
            .finish()
    }
}

impl<D: Debug> Display for NrtCachingDirectory<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.limits {
            Some(limits) => write!(
                f,
                "NrtCachingDirectory({:?}; max_cache={}, max_merge_size={})",
                self.store, limits.max_cache, limits.max_merge_size
            ),
            None => write!(f, "NrtCachingDirectory({:?}; custom policy)", self.store),
        }
    }
}
