//! A near-real-time caching directory.
//!
//! [`NrtCachingDirectory`] sits in front of a durable [`Directory`] and keeps
//! small, short-lived files in memory until they are synced, so that freshly
//! flushed segments can be opened without a round trip through the stable
//! store.

pub mod byte_unit;
pub mod config;
pub mod context;
pub mod err;
pub mod output;
pub mod policy;
pub mod store;

mod delete;
mod dir;
mod sync;
mod table;

pub use byte_unit::ByteUnit;
pub use config::{CacheLimits, NrtCachingConfig};
pub use context::SizeHint;
pub use dir::NrtCachingDirectory;
pub use err::{ConfigErr, DirErr, Result};
pub use output::CachingOutput;
pub use policy::{CachePolicy, DefaultCachePolicy};
pub use store::{BytesInput, Directory, IndexInput, IndexOutput, fs::FsDirectory, mem::MemDirectory};
