//! Build and CDN configuration lookup.
//!
//! A product publishes two tables next to its instruction URL: `versions`,
//! with one row per region naming the build and CDN config hashes, and
//! `cdns`, naming the hosts and path prefix its objects live under. The
//! resolver picks a region row, derives the CDN root, and loads both configs
//! through a [`HashStore`].

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::hash::ContentHash;
use crate::settings::Settings;
use crate::store::{HashStore, ObjectKind, Remote, StoreLayout};
use crate::table::{Row, Table};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Namespace product stores live in.
pub const PRODUCT_NAMESPACE: &str = "ngdp";

/// Build and CDN config hashes for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildHashes {
    pub region: String,
    pub build_config: ContentHash,
    pub cdn_config: ContentHash,
}

/// The two tables published for a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTables {
    pub versions: Table,
    pub cdns: Option<Table>,
}

impl ProductTables {
    /// GET `{instructions_url}/versions` and `{instructions_url}/cdns`.
    ///
    /// A missing `versions` table is an error; a missing `cdns` table is not,
    /// since the CDN root may be supplied separately.
    pub fn fetch(fetcher: &dyn Fetcher, instructions_url: &str) -> Result<Self> {
        let base = instructions_url.trim_end_matches('/');

        let versions_url = format!("{}/versions", base);
        let versions = fetcher.fetch(&versions_url)?.into_body(&versions_url)?;
        let versions = Table::from_bytes(&versions)?;

        let cdns_url = format!("{}/cdns", base);
        let cdns = match fetcher.fetch(&cdns_url)?.into_body(&cdns_url) {
            Ok(bytes) => Some(Table::from_bytes(&bytes)?),
            Err(e) if e.is_not_found() => {
                tracing::warn!(url = %cdns_url, "no CDN table published");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self { versions, cdns })
    }
}

/// Read a CDN root from a `cdns` table row.
pub fn cdn_root_from_row(row: &Row<'_>) -> Result<Remote> {
    let path = row
        .get("Path")
        .ok_or_else(|| Error::no_cdn("CDN row has no Path column"))?;
    let hosts: Vec<String> = row
        .get("Hosts")
        .unwrap_or("")
        .split_whitespace()
        .map(str::to_string)
        .collect();

    if hosts.is_empty() {
        return Err(Error::no_cdn("CDN row lists no hosts"));
    }
    Ok(Remote::with_hosts(hosts, path))
}

/// An archive that could not be cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedArchive {
    pub hash: String,
    pub reason: String,
}

/// Summary of an archive caching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveReport {
    pub cached: usize,
    pub failed: Vec<FailedArchive>,
}

/// Resolves configuration for a product.
pub struct ConfigResolver {
    settings: Settings,
    fetcher: Arc<dyn Fetcher>,
    tables: ProductTables,
    cdn: Option<Remote>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("tables", &self.tables)
            .field("cdn", &self.cdn)
            .finish()
    }
}

impl ConfigResolver {
    /// Create a resolver over already fetched tables.
    pub fn new(settings: Settings, fetcher: Arc<dyn Fetcher>, tables: ProductTables) -> Self {
        Self {
            settings,
            fetcher,
            tables,
            cdn: None,
        }
    }

    /// Use an explicit CDN root instead of the `cdns` table.
    pub fn with_cdn(mut self, remote: Remote) -> Self {
        self.cdn = Some(remote);
        self
    }

    /// Find config hashes for the first candidate region with a usable row.
    ///
    /// Candidates are tried in order and rows are scanned in table order.
    /// Regions without a row, and rows whose hashes do not parse, are skipped
    /// with a warning.
    pub fn resolve_hashes(&self, candidates: &[&str]) -> Option<BuildHashes> {
        for region in candidates {
            let mut matched = false;

            for row in self.tables.versions.rows() {
                if row.get("Region") != Some(*region) {
                    continue;
                }
                matched = true;

                match parse_row_hashes(&row) {
                    Ok((build_config, cdn_config)) => {
                        tracing::debug!(region, %build_config, %cdn_config, "resolved region");
                        return Some(BuildHashes {
                            region: region.to_string(),
                            build_config,
                            cdn_config,
                        });
                    }
                    Err(e) => tracing::warn!(region, error = %e, "skipping unusable version row"),
                }
            }

            if !matched {
                tracing::warn!(region, "no version row for region");
            }
        }
        None
    }

    /// The CDN root: explicit if set, else the first row of the `cdns` table.
    pub fn cdn_root(&self) -> Result<Remote> {
        if let Some(remote) = &self.cdn {
            return Ok(remote.clone());
        }

        let row = self
            .tables
            .cdns
            .as_ref()
            .and_then(Table::first)
            .ok_or_else(|| Error::no_cdn("no CDN root set and no CDN table rows"))?;
        cdn_root_from_row(&row)
    }

    /// A store for this product's configs and archives.
    pub fn store(&self) -> Result<HashStore> {
        HashStore::new(
            &self.settings,
            PRODUCT_NAMESPACE,
            self.cdn_root()?,
            StoreLayout::Typed,
            Arc::clone(&self.fetcher),
        )
    }

    /// Load and parse the build config.
    pub fn build_config(&self, store: &HashStore, hashes: &BuildHashes) -> Result<Config> {
        load_config(store, &hashes.build_config)
    }

    /// Load and parse the CDN config.
    pub fn cdn_config(&self, store: &HashStore, hashes: &BuildHashes) -> Result<Config> {
        load_config(store, &hashes.cdn_config)
    }
}

fn parse_row_hashes(row: &Row<'_>) -> Result<(ContentHash, ContentHash)> {
    let build = row
        .get_non_empty("BuildConfig")
        .ok_or_else(|| Error::missing_key("BuildConfig"))?;
    let cdn = row
        .get_non_empty("CDNConfig")
        .ok_or_else(|| Error::missing_key("CDNConfig"))?;
    Ok((ContentHash::from_hex(build)?, ContentHash::from_hex(cdn)?))
}

/// Ensure a config object and parse it.
pub fn load_config(store: &HashStore, hash: &ContentHash) -> Result<Config> {
    let bytes = store.read(ObjectKind::Config, hash)?;
    Config::from_bytes(&bytes)
}

/// Cache every archive listed under `archives`, index first.
///
/// Up to `jobs` threads share the store; the store collapses duplicate
/// downloads. A failed archive is recorded and does not stop the others.
pub fn cache_archives(store: &HashStore, cdn_config: &Config, jobs: usize) -> ArchiveReport {
    let archives = cdn_config.get_list("archives");
    if archives.is_empty() {
        tracing::warn!("CDN config lists no archives");
        return ArchiveReport::default();
    }

    let next = AtomicUsize::new(0);
    let report = Mutex::new(ArchiveReport::default());
    let workers = jobs.clamp(1, archives.len());

    std::thread::scope(|s| {
        for _ in 0..workers {
            s.spawn(|| {
                loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    let Some(archive) = archives.get(i) else {
                        break;
                    };

                    let result = ContentHash::from_hex(archive)
                        .and_then(|hash| store.ensure_archive(&hash));

                    let mut summary = report.lock();
                    match result {
                        Ok(_) => summary.cached += 1,
                        Err(e) => {
                            tracing::warn!(archive, error = %e, "failed to cache archive");
                            summary.failed.push(FailedArchive {
                                hash: archive.to_string(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
            });
        }
    });

    let mut report = report.into_inner();
    report.failed.sort_by(|a, b| a.hash.cmp(&b.hash));
    tracing::info!(
        cached = report.cached,
        failed = report.failed.len(),
        "archive caching finished"
    );
    report
}

/// Result of mirroring one product end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReport {
    pub instructions_url: String,
    #[serde(flatten)]
    pub hashes: BuildHashes,
    pub archives: ArchiveReport,
}

/// Fetch a product's tables, load both configs and cache its archives.
///
/// `cdn` overrides the product's own `cdns` table when given.
pub fn mirror_product(
    settings: &Settings,
    fetcher: Arc<dyn Fetcher>,
    instructions_url: &str,
    candidates: &[&str],
    cdn: Option<Remote>,
    jobs: usize,
) -> Result<ProductReport> {
    let tables = ProductTables::fetch(fetcher.as_ref(), instructions_url)?;
    let mut resolver = ConfigResolver::new(settings.clone(), fetcher, tables);
    if let Some(remote) = cdn {
        resolver = resolver.with_cdn(remote);
    }

    let hashes = resolver
        .resolve_hashes(candidates)
        .ok_or_else(|| Error::missing_key(format!("version row for {}", candidates.join("/"))))?;
    let store = resolver.store()?;
    resolver.build_config(&store, &hashes)?;
    let cdn_config = resolver.cdn_config(&store, &hashes)?;
    let archives = cache_archives(&store, &cdn_config, jobs);

    Ok(ProductReport {
        instructions_url: instructions_url.to_string(),
        hashes,
        archives,
    })
}
