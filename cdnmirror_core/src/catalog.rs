//! Catalog trees and their local materialization.
//!
//! A catalog is a JSON document addressed by its hash. It may point at
//! per-region child catalogs and may carry a manifest mapping stable file
//! names to content hashes:
//!
//! ```json
//! {
//!   "catalogs": { "enus": { "hash": "..." } },
//!   "manifest": { "lookup": { "Agent/catalog.json": "..." } },
//!   "installs": { "wow": { "instructions_url": "http://{REGION_CODE}.patch.example:1119/wow" } }
//! }
//! ```
//!
//! Preloading walks the tree from a root hash, caches every catalog and
//! manifest object in the [`HashStore`], and links each manifest name to its
//! cached object.

use crate::error::{Error, Result};
use crate::hash::ContentHash;
use crate::store::{HashStore, ObjectKind};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Namespace catalog stores live in.
pub const CATALOG_NAMESPACE: &str = "Clog";

/// Placeholder substituted in install instruction URLs.
const REGION_PLACEHOLDER: &str = "{REGION_CODE}";

const INSTRUCTIONS_KEY: &str = "instructions_url";

/// Instruction URLs ending here use the retired patch handshake.
const LEGACY_PATCH_SUFFIX: &str = ":1119/patch";

/// Filename to hash table.
///
/// Values are kept as raw JSON so one malformed entry only affects itself.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub lookup: IndexMap<String, Value>,
}

/// The consumed fields of a catalog document.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CatalogDocument {
    /// Region code to `{"hash": ...}`.
    #[serde(default)]
    pub catalogs: IndexMap<String, Value>,
    #[serde(default)]
    pub manifest: Option<Manifest>,
    #[serde(default)]
    pub installs: IndexMap<String, Value>,
}

/// A product install listed by a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Install {
    pub product: String,
    /// Where the product's version tables live. `None` for products still on
    /// the legacy patch endpoint.
    pub instructions_url: Option<String>,
    /// Files named directly by old-style entries.
    pub legacy_urls: Vec<String>,
}

/// A resolved catalog node.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub hash: ContentHash,
    pub document: CatalogDocument,
}

impl Catalog {
    /// Parse a catalog document.
    pub fn parse(hash: ContentHash, bytes: &[u8]) -> Result<Self> {
        let document =
            serde_json::from_slice(bytes).map_err(|e| Error::json(hash.to_hex(), e))?;
        Ok(Self { hash, document })
    }

    /// Region codes and child hashes, in document order.
    pub fn regions(&self) -> impl DoubleEndedIterator<Item = (&str, Result<ContentHash>)> {
        self.document
            .catalogs
            .iter()
            .map(|(region, child)| (region.as_str(), parse_hash(child.get("hash"))))
    }

    /// The manifest, if the catalog carries one.
    pub fn manifest(&self) -> Option<&Manifest> {
        self.document.manifest.as_ref()
    }

    /// Product installs, with `{REGION_CODE}` replaced by `region_code`.
    ///
    /// Entries with an `instructions_url` are current products. Old-style
    /// entries nest per-language tables, optionally under `configuration`;
    /// every URL in them other than `instructions_url` is collected as a
    /// legacy file, and the `enus` instructions URL is used if present.
    /// Instruction URLs on the legacy `:1119/patch` endpoint are dropped.
    pub fn installs(&self, region_code: &str) -> Vec<Install> {
        let mut installs = Vec::new();

        for (product, entry) in &self.document.installs {
            let Some(entry) = entry.as_object() else {
                tracing::debug!(product, "install entry is not an object");
                continue;
            };

            let (server, legacy_urls) = match entry.get(INSTRUCTIONS_KEY).and_then(Value::as_str) {
                Some(url) => (Some(url), Vec::new()),
                None => {
                    let languages = entry
                        .get("configuration")
                        .and_then(Value::as_object)
                        .unwrap_or(entry);
                    let server = languages
                        .get("enus")
                        .and_then(|l| l.get(INSTRUCTIONS_KEY))
                        .and_then(Value::as_str);
                    (server, legacy_files(languages))
                }
            };

            let instructions_url = server
                .map(|url| url.replace(REGION_PLACEHOLDER, region_code))
                .filter(|url| {
                    let legacy = url.ends_with(LEGACY_PATCH_SUFFIX);
                    if legacy {
                        tracing::debug!(product, %url, "skipping legacy patch endpoint");
                    }
                    !legacy
                });

            installs.push(Install {
                product: product.clone(),
                instructions_url,
                legacy_urls,
            });
        }
        installs
    }

    /// Products and their instruction URLs for `region_code`.
    pub fn install_urls(&self, region_code: &str) -> Vec<(String, String)> {
        self.installs(region_code)
            .into_iter()
            .filter_map(|i| i.instructions_url.map(|url| (i.product, url)))
            .collect()
    }
}

/// Every URL in per-language tables except their instruction URLs, deduplicated.
fn legacy_files(languages: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut urls = IndexSet::new();
    for table in languages.values().filter_map(Value::as_object) {
        for (key, url) in table {
            if key == INSTRUCTIONS_KEY {
                continue;
            }
            if let Some(url) = url.as_str() {
                urls.insert(url.to_string());
            }
        }
    }
    urls.into_iter().collect()
}

/// Read a content hash out of a catalog value.
fn parse_hash(value: Option<&Value>) -> Result<ContentHash> {
    match value.and_then(Value::as_str) {
        Some(hex) => ContentHash::from_hex(hex),
        None => Err(Error::malformed_hash(
            raw_text(value),
            "expected a hash string",
        )),
    }
}

/// A catalog value as it appears in the document, for reports.
fn raw_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// One entry that could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    /// Region code or manifest file name.
    pub name: String,
    pub hash: String,
    pub reason: String,
}

/// Summary of a preload pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    /// Catalog documents fetched or read from cache and parsed.
    pub catalogs_resolved: usize,
    /// Catalog hashes reached more than once.
    pub shared_nodes: usize,
    /// Catalogs that carry no manifest.
    pub catalogs_without_manifest: usize,
    pub links_created: usize,
    pub links_existing: usize,
    pub skipped: Vec<SkippedEntry>,
}

/// Whether a link had to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkOutcome {
    Created,
    Existing,
}

/// Resolves catalog trees through a borrowed store.
///
/// Parsed catalogs are kept for the lifetime of the resolver.
#[derive(Debug)]
pub struct CatalogResolver<'s> {
    store: &'s HashStore,
    link_root: PathBuf,
    nodes: IndexMap<ContentHash, Arc<Catalog>>,
}

impl<'s> CatalogResolver<'s> {
    /// Create a resolver linking manifest names under the store's namespace.
    pub fn new(store: &'s HashStore) -> Self {
        Self::with_link_root(store, store.namespace_root())
    }

    /// Create a resolver linking manifest names under `link_root`.
    pub fn with_link_root(store: &'s HashStore, link_root: impl Into<PathBuf>) -> Self {
        Self {
            store,
            link_root: link_root.into(),
            nodes: IndexMap::new(),
        }
    }

    /// Directory manifest links are created in.
    pub fn link_root(&self) -> &Path {
        &self.link_root
    }

    /// A catalog resolved earlier in this pass.
    pub fn catalog(&self, hash: &ContentHash) -> Option<&Catalog> {
        self.nodes.get(hash).map(Arc::as_ref)
    }

    /// Every catalog resolved so far, in resolution order.
    pub fn catalogs(&self) -> impl Iterator<Item = &Catalog> {
        self.nodes.values().map(Arc::as_ref)
    }

    /// Installs of the first resolved catalog that lists any.
    ///
    /// Region catalogs of one tree list the same products, so only one is
    /// consulted. Catalogs are searched in resolution order.
    pub fn installs(&self, region_code: &str) -> Vec<Install> {
        self.catalogs()
            .find(|c| !c.document.installs.is_empty())
            .map(|c| c.installs(region_code))
            .unwrap_or_default()
    }

    /// Fetch (or reuse) and parse one catalog.
    pub fn load(&mut self, hash: &ContentHash) -> Result<Arc<Catalog>> {
        if let Some(catalog) = self.nodes.get(hash) {
            return Ok(Arc::clone(catalog));
        }

        let bytes = self.store.read(ObjectKind::Config, hash)?;
        let catalog = Arc::new(Catalog::parse(*hash, &bytes)?);
        self.nodes.insert(*hash, Arc::clone(&catalog));
        Ok(catalog)
    }

    /// Resolve the tree under `root` and materialize every manifest.
    ///
    /// The walk is depth-first in document order. Failure to resolve the
    /// root is fatal; failures below it are logged, recorded in the report,
    /// and do not stop the rest of the tree.
    pub fn preload(&mut self, root: &ContentHash) -> Result<PreloadReport> {
        let mut report = PreloadReport::default();
        let mut visited = HashSet::new();
        let mut stack = vec![(String::new(), *root)];

        while let Some((name, hash)) = stack.pop() {
            if !visited.insert(hash) {
                tracing::debug!(%hash, region = %name, "catalog already resolved in this pass");
                report.shared_nodes += 1;
                continue;
            }

            let catalog = match self.load(&hash) {
                Ok(catalog) => catalog,
                Err(e) if hash == *root => return Err(e),
                Err(e) => {
                    tracing::warn!(%hash, region = %name, error = %e, "skipping catalog");
                    report.skipped.push(SkippedEntry {
                        name,
                        hash: hash.to_hex(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            report.catalogs_resolved += 1;

            // Reversed so the first region is popped first.
            for (region, child) in catalog.document.catalogs.iter().rev() {
                let field = child.get("hash");
                match parse_hash(field) {
                    Ok(child_hash) => stack.push((region.clone(), child_hash)),
                    Err(e) => {
                        tracing::warn!(region = %region, error = %e, "skipping catalog");
                        report.skipped.push(SkippedEntry {
                            name: region.clone(),
                            hash: raw_text(field),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            match catalog.manifest() {
                Some(manifest) => self.materialize(manifest, &mut report),
                None => {
                    report.catalogs_without_manifest += 1;
                    tracing::warn!(%hash, region = %name, "no manifest found, old catalog?");
                }
            }
        }

        tracing::info!(
            catalogs = report.catalogs_resolved,
            links_created = report.links_created,
            skipped = report.skipped.len(),
            "preload finished"
        );
        Ok(report)
    }

    /// Cache and link every manifest entry.
    fn materialize(&self, manifest: &Manifest, report: &mut PreloadReport) {
        for (name, value) in &manifest.lookup {
            match self.link_entry(name, value) {
                Ok(LinkOutcome::Created) => report.links_created += 1,
                Ok(LinkOutcome::Existing) => report.links_existing += 1,
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "skipping manifest entry");
                    report.skipped.push(SkippedEntry {
                        name: name.clone(),
                        hash: raw_text(Some(value)),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn link_entry(&self, name: &str, value: &Value) -> Result<LinkOutcome> {
        let hash = parse_hash(Some(value))?;
        let link = self.link_path(name)?;
        let target = self.store.ensure(ObjectKind::Config, &hash)?;

        if fs::symlink_metadata(&link).is_ok() {
            return Ok(LinkOutcome::Existing);
        }

        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)?;
        }

        let target = std::path::absolute(&target)?;
        match create_link(&target, &link) {
            Ok(()) => {
                tracing::info!(
                    link = %link.display(),
                    target = %target.display(),
                    "linked manifest entry"
                );
                Ok(LinkOutcome::Created)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(LinkOutcome::Existing),
            Err(e) => Err(e.into()),
        }
    }

    /// Get the link path for a manifest name.
    fn link_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(Error::invalid_link(name, "name cannot be empty"));
        }

        let relative = Path::new(name);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::invalid_link(
                name,
                "must be relative and must not contain ..",
            ));
        }

        Ok(self.link_root.join(relative))
    }
}

/// Create a name-addressed link to a cached object.
#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// Create a name-addressed link to a cached object.
#[cfg(windows)]
fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
