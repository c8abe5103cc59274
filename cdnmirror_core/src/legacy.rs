//! Mirror of files named by old-style catalog installs.
//!
//! Old catalogs point at plain URLs instead of hash-addressed objects. Each
//! one is saved under `<save_root>/NGDPv0/<url path>`. When the file name
//! embeds a 32-hex MD5 the body must match it.

use crate::error::{Error, Result};
use crate::fetch::{Fetched, Fetcher};
use crate::hash::ContentHash;
use crate::settings::Settings;
use crate::store::write_object_atomic;
use regex::Regex;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Namespace legacy files live in.
pub const LEGACY_NAMESPACE: &str = "NGDPv0";

const MD5_PATTERN: &str = "[0-9a-fA-F]{32}";

/// What happened to one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LegacyOutcome {
    Cached(PathBuf),
    Existing(PathBuf),
    NotFound,
}

/// A URL that could not be mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFile {
    pub url: String,
    pub reason: String,
}

/// Summary of a legacy mirroring run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LegacyReport {
    pub cached: usize,
    pub existing: usize,
    pub not_found: Vec<String>,
    pub failed: Vec<FailedFile>,
}

/// Saves legacy URLs under a path-mirroring layout.
pub struct LegacyMirror {
    root: PathBuf,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for LegacyMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyMirror").field("root", &self.root).finish()
    }
}

impl LegacyMirror {
    pub fn new(settings: &Settings, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            root: settings.save_root.join(LEGACY_NAMESPACE),
            fetcher,
        }
    }

    /// Directory files are mirrored into.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path for `url`: the URL path below the mirror root.
    pub fn local_path(&self, url: &str) -> Result<PathBuf> {
        let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e))?;
        let relative = Path::new(parsed.path().trim_start_matches('/'));

        if relative.file_name().is_none() {
            return Err(Error::invalid_url(url, "no file name"));
        }
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::invalid_url(url, "path leaves the mirror root"));
        }
        Ok(self.root.join(relative))
    }

    /// Download `url` unless it is already mirrored.
    ///
    /// A 404 is reported as [`LegacyOutcome::NotFound`], not as an error.
    pub fn mirror(&self, url: &str) -> Result<LegacyOutcome> {
        let path = self.local_path(url)?;
        if path.exists() {
            tracing::debug!(%url, "legacy file already mirrored");
            return Ok(LegacyOutcome::Existing(path));
        }

        let bytes = match self.fetcher.fetch(url)? {
            Fetched::Body(bytes) => bytes,
            Fetched::NotFound => {
                tracing::warn!(%url, "legacy file not found");
                return Ok(LegacyOutcome::NotFound);
            }
        };

        if let Some(expected) = embedded_digest(&path) {
            let actual = ContentHash::digest(&bytes);
            if actual != expected {
                return Err(Error::integrity(expected.to_hex(), actual.to_hex()));
            }
        }

        write_object_atomic(&path, &bytes)?;
        tracing::info!(%url, path = %path.display(), bytes = bytes.len(), "mirrored legacy file");
        Ok(LegacyOutcome::Cached(path))
    }

    /// Mirror every URL; failures are recorded and do not stop the rest.
    pub fn mirror_all<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> LegacyReport {
        let mut report = LegacyReport::default();
        for url in urls {
            match self.mirror(url) {
                Ok(LegacyOutcome::Cached(_)) => report.cached += 1,
                Ok(LegacyOutcome::Existing(_)) => report.existing += 1,
                Ok(LegacyOutcome::NotFound) => report.not_found.push(url.to_string()),
                Err(e) => {
                    tracing::warn!(%url, error = %e, "failed to mirror legacy file");
                    report.failed.push(FailedFile {
                        url: url.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

/// The MD5 embedded in a file name, if any.
fn embedded_digest(path: &Path) -> Option<ContentHash> {
    let name = path.file_name()?.to_str()?;
    let found = Regex::new(MD5_PATTERN).ok()?.find(name)?;
    ContentHash::from_hex(found.as_str()).ok()
}
