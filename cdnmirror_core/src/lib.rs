//! # cdnmirror core
//!
//! A local mirror for hash-addressed content distribution networks.
//!
//! Objects on the network are named by the MD5 digest of their bytes and
//! served under `scheme://host/path/xx/yy/hash`. This library fetches them,
//! verifies them, and caches them under a local root with the same sharded
//! layout, so each object is downloaded at most once.
//!
//! ## Features
//!
//! - Verified, atomic, write-once caching with host fallback
//! - Concurrent requests for one object collapse into a single download
//! - Structural validation of archive block indexes
//! - Catalog tree preloading with stable-name symlinks
//! - Build and CDN config resolution from product version tables
//! - Plain-URL mirroring for files named by old catalogs
//!
//! ## Example
//!
//! ```no_run
//! use cdnmirror_core::{
//!     CATALOG_NAMESPACE, CatalogResolver, ContentHash, HashStore, HttpFetcher, Remote,
//!     Settings, StoreLayout,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env();
//! let fetcher = Arc::new(HttpFetcher::from_settings(&settings));
//! let store = HashStore::new(
//!     &settings,
//!     CATALOG_NAMESPACE,
//!     Remote::new("cdn.example.com", "tpr/catalogs"),
//!     StoreLayout::Flat,
//!     fetcher,
//! )?;
//!
//! let root = ContentHash::from_hex("b5056174e18346a7c6c5a1e06cc0e828")?;
//! let report = CatalogResolver::new(&store).preload(&root)?;
//! println!("linked {} files", report.links_created);
//! # Ok(())
//! # }
//! ```

mod catalog;
mod config;
mod error;
mod fetch;
mod flight;
mod hash;
mod index;
mod legacy;
mod resolver;
mod settings;
mod store;
mod table;

#[cfg(test)]
mod testing;

pub use catalog::{
    CATALOG_NAMESPACE, Catalog, CatalogDocument, CatalogResolver, Install, Manifest,
    PreloadReport, SkippedEntry,
};
pub use config::{Config, ConfigValue};
pub use error::{Error, Result, ValidationError};
pub use fetch::{Fetched, Fetcher, HttpFetcher, NOT_FOUND_SENTINEL};
pub use flight::SingleFlight;
pub use hash::{ContentHash, HASH_SIZE, SHORT_HASH_SIZE, ShardedPath, shard, short_digest};
pub use index::{BLOCK_SIZE, IndexTrailer, TRAILER_SIZE, validate as validate_index};
pub use legacy::{FailedFile, LEGACY_NAMESPACE, LegacyMirror, LegacyOutcome, LegacyReport};
pub use resolver::{
    ArchiveReport, BuildHashes, ConfigResolver, FailedArchive, PRODUCT_NAMESPACE, ProductReport,
    ProductTables, cache_archives, cdn_root_from_row, load_config, mirror_product,
};
pub use settings::Settings;
pub use store::{ArchivePaths, HashStore, ObjectKind, Remote, StoreLayout};
pub use table::{Row, Table};
