use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use culprit::{Culprit, ResultExt};
use serde::{Deserialize, Serialize};

use crate::{byte_unit::ByteUnit, err::ConfigErr};

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct NrtCachingConfig {
    /// Total size of all cached files, in binary megabytes.
    pub max_cache_mb: f64,

    /// Files whose estimated size exceeds this many binary megabytes are
    /// never cached.
    pub max_merge_size_mb: f64,
}

impl NrtCachingConfig {
    pub fn new(max_cache_mb: f64, max_merge_size_mb: f64) -> Self {
        Self { max_cache_mb, max_merge_size_mb }
    }

    /// Loads the configuration from an optional TOML file. Values may be
    /// overridden by the environment variables `NRTDIR_MAX_CACHE_MB` and
    /// `NRTDIR_MAX_MERGE_SIZE_MB`.
    pub fn load(path: Option<&Path>) -> culprit::Result<Self, ConfigErr> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        builder
            .add_source(Environment::with_prefix("NRTDIR"))
            .build()
            .and_then(|config| config.try_deserialize())
            .or_into_ctx()
    }

    pub fn limits(&self) -> culprit::Result<CacheLimits, ConfigErr> {
        CacheLimits::from_mb(self.max_cache_mb, self.max_merge_size_mb)
    }
}

/// Validated byte thresholds consumed by the default cache policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_cache: ByteUnit,
    pub max_merge_size: ByteUnit,
}

impl CacheLimits {
    pub fn from_mb(
        max_cache_mb: f64,
        max_merge_size_mb: f64,
    ) -> culprit::Result<CacheLimits, ConfigErr> {
        let to_bytes = |field, value: f64| {
            ByteUnit::from_mb_f64(value)
                .filter(|bytes| !bytes.is_zero())
                .ok_or_else(|| Culprit::new(ConfigErr::NonPositive { field, value }))
        };
        Ok(CacheLimits {
            max_cache: to_bytes("max_cache_mb", max_cache_mb)?,
            max_merge_size: to_bytes("max_merge_size_mb", max_merge_size_mb)?,
        })
    }
}

impl TryFrom<NrtCachingConfig> for CacheLimits {
    type Error = Culprit<ConfigErr>;

    fn try_from(config: NrtCachingConfig) -> Result<Self, Self::Error> {
        config.limits()
    }
}
