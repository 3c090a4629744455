//! Decides, once per new file, whether its bytes are buffered in memory or
//! written straight through to the stable store.

use crate::{byte_unit::ByteUnit, config::CacheLimits, context::SizeHint};

pub trait CachePolicy: Send + Sync {
    /// Returns true if the file `name` should be buffered in memory given the
    /// caller's size hint and the number of bytes currently cached.
    ///
    /// Implementations must be deterministic and free of side effects.
    fn should_cache(&self, name: &str, hint: &SizeHint, cached: ByteUnit) -> bool;
}

impl<F> CachePolicy for F
where
    F: Fn(&str, &SizeHint, ByteUnit) -> bool + Send + Sync,
{
    fn should_cache(&self, name: &str, hint: &SizeHint, cached: ByteUnit) -> bool {
        self(name, hint, cached)
    }
}

/// Caches a file only if its estimated size is known, does not exceed the
/// merge size ceiling, and fits in the remaining cache budget.
#[derive(Debug, Clone, Copy)]
pub struct DefaultCachePolicy {
    limits: CacheLimits,
}

impl DefaultCachePolicy {
    pub fn new(limits: CacheLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &CacheLimits {
        &self.limits
    }
}

impl CachePolicy for DefaultCachePolicy {
    fn should_cache(&self, _name: &str, hint: &SizeHint, cached: ByteUnit) -> bool {
        match hint.estimated_bytes() {
            Some(estimate) => {
                estimate <= self.limits.max_merge_size && cached + estimate <= self.limits.max_cache
            }
            // an unbounded file could blow through the budget
            None => false,
        }
    }
}
