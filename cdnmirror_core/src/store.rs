//! Hash-addressed local cache backed by a CDN.

use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::flight::SingleFlight;
use crate::hash::ContentHash;
use crate::index;
use crate::settings::Settings;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Kinds of objects a store can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    /// Archive data. Not hash-verified as a whole; see [`HashStore::ensure_archive`].
    Data,
    /// Small text or JSON document, verified against its hash.
    Config,
    /// Block index paired with a data object, structurally validated.
    Index,
}

impl ObjectKind {
    /// Get the string name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Data => "data",
            ObjectKind::Config => "config",
            ObjectKind::Index => "index",
        }
    }

    /// Directory segment used by the typed layout.
    fn type_dir(&self) -> &'static str {
        match self {
            ObjectKind::Data | ObjectKind::Index => "data",
            ObjectKind::Config => "config",
        }
    }

    /// Suffix appended to the object's file name.
    fn suffix(&self) -> &'static str {
        match self {
            ObjectKind::Index => ".index",
            ObjectKind::Data | ObjectKind::Config => "",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How object paths are built under the store prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLayout {
    /// `prefix/xx/yy/hash`
    Flat,
    /// `prefix/{config|data}/xx/yy/hash[.index]`
    Typed,
}

/// A CDN location: ordered candidate hosts sharing one path prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remote {
    /// Hosts in preference order.
    pub hosts: Vec<String>,
    /// Path prefix on every host.
    pub path: String,
}

impl Remote {
    /// A remote with a single host.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            hosts: vec![host.into()],
            path: path.into(),
        }
    }

    /// A remote with several candidate hosts, tried in order.
    pub fn with_hosts(hosts: Vec<String>, path: impl Into<String>) -> Self {
        Self {
            hosts,
            path: path.into(),
        }
    }

    /// Path prefix without leading or trailing slashes.
    fn trimmed_path(&self) -> &str {
        self.path.trim_matches('/')
    }
}

/// Local paths of an archive and its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivePaths {
    pub index: PathBuf,
    pub data: PathBuf,
}

/// A hash-addressed cache for one CDN path prefix.
///
/// Objects are written once, after verification, and never rewritten. A file
/// at an object's path is therefore trusted without re-checking it.
pub struct HashStore {
    namespace_root: PathBuf,
    root: PathBuf,
    scheme: String,
    remote: Remote,
    layout: StoreLayout,
    fetcher: Arc<dyn Fetcher>,
    in_flight: SingleFlight<(ObjectKind, ContentHash), PathBuf>,
}

impl fmt::Debug for HashStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashStore")
            .field("root", &self.root)
            .field("remote", &self.remote)
            .field("layout", &self.layout)
            .finish()
    }
}

impl HashStore {
    /// Create a store caching `remote` under `save_root/namespace/path`.
    ///
    /// The remote path must stay inside the namespace: `..` and drive or
    /// root prefixes are rejected.
    pub fn new(
        settings: &Settings,
        namespace: &str,
        remote: Remote,
        layout: StoreLayout,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self> {
        let namespace_root = settings.save_root.join(namespace);
        let relative = Path::new(remote.trimmed_path());
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::invalid_remote_path(
                &remote.path,
                "must not contain .. or a root prefix",
            ));
        }
        let root = namespace_root.join(relative);

        Ok(Self {
            namespace_root,
            root,
            scheme: settings.scheme.clone(),
            remote,
            layout,
            fetcher,
            in_flight: SingleFlight::new(),
        })
    }

    /// Directory holding this store's objects.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the namespace the store lives in.
    pub fn namespace_root(&self) -> &Path {
        &self.namespace_root
    }

    /// The CDN this store reads from.
    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    /// Relative location of an object, shared by URLs and cache paths.
    fn relative(&self, kind: ObjectKind, hash: &ContentHash) -> Vec<String> {
        let shard = hash.shard();
        let mut parts = Vec::with_capacity(4);
        if self.layout == StoreLayout::Typed {
            parts.push(kind.type_dir().to_string());
        }
        parts.push(shard.prefix2);
        parts.push(shard.prefix4);
        parts.push(format!("{}{}", shard.full, kind.suffix()));
        parts
    }

    /// Get the local path of an object.
    pub fn object_path(&self, kind: ObjectKind, hash: &ContentHash) -> PathBuf {
        self.relative(kind, hash)
            .iter()
            .fold(self.root.clone(), |acc, part| acc.join(part))
    }

    /// Get the URL of an object on `host`.
    pub fn url(&self, host: &str, kind: ObjectKind, hash: &ContentHash) -> String {
        let mut url = format!("{}://{}", self.scheme, host.trim_end_matches('/'));
        let path = self.remote.trimmed_path();
        if !path.is_empty() {
            url.push('/');
            url.push_str(path);
        }
        for part in self.relative(kind, hash) {
            url.push('/');
            url.push_str(&part);
        }
        url
    }

    /// Check whether an object is already cached.
    pub fn contains(&self, kind: ObjectKind, hash: &ContentHash) -> bool {
        self.object_path(kind, hash).exists()
    }

    /// Make sure an object is cached locally and return its path.
    ///
    /// A cached object is returned without any network access. Otherwise the
    /// object is fetched from the first host that has it, verified according
    /// to its kind and written atomically. Concurrent calls for the same
    /// object share one download.
    pub fn ensure(&self, kind: ObjectKind, hash: &ContentHash) -> Result<PathBuf> {
        let path = self.object_path(kind, hash);
        if path.exists() {
            tracing::debug!(%hash, %kind, "cache hit");
            return Ok(path);
        }

        self.in_flight.execute((kind, *hash), || {
            // Another caller may have finished between the check and here.
            if path.exists() {
                return Ok(path.clone());
            }

            let bytes = self.fetch_remote(kind, hash)?;
            verify(kind, hash, &bytes)?;
            write_object_atomic(&path, &bytes)?;

            tracing::info!(
                %hash,
                %kind,
                bytes = bytes.len(),
                path = %path.display(),
                "cached object"
            );
            Ok(path.clone())
        })
    }

    /// Make sure an archive and its block index are cached.
    ///
    /// The index is fetched and validated first; the data object is only
    /// fetched once its index is known to be sound.
    pub fn ensure_archive(&self, hash: &ContentHash) -> Result<ArchivePaths> {
        let index = self.ensure(ObjectKind::Index, hash)?;
        let data = self.ensure(ObjectKind::Data, hash)?;
        Ok(ArchivePaths { index, data })
    }

    /// Ensure an object and read its bytes.
    pub fn read(&self, kind: ObjectKind, hash: &ContentHash) -> Result<Vec<u8>> {
        let path = self.ensure(kind, hash)?;
        Ok(fs::read(path)?)
    }

    /// Fetch an object's bytes, trying each host in order.
    fn fetch_remote(&self, kind: ObjectKind, hash: &ContentHash) -> Result<Vec<u8>> {
        let mut last_err = None;

        for host in &self.remote.hosts {
            let url = self.url(host, kind, hash);
            tracing::debug!(%url, "downloading");

            match self.fetcher.fetch(&url).and_then(|f| f.into_body(&url)) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%url, error = %e, "CDN host failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| Error::no_cdn("remote has no hosts")))
    }
}

/// Apply the verification rule for `kind`.
fn verify(kind: ObjectKind, hash: &ContentHash, bytes: &[u8]) -> Result<()> {
    match kind {
        ObjectKind::Config => {
            let actual = ContentHash::digest(bytes);
            if actual != *hash {
                return Err(Error::integrity(hash.to_hex(), actual.to_hex()));
            }
        }
        ObjectKind::Index => {
            let blocks =
                index::validate(bytes).map_err(|e| Error::validation(hash.to_hex(), e))?;
            tracing::debug!(%hash, blocks, "index validated");
        }
        ObjectKind::Data => {
            // Archive containers do not hash to their key; the paired index
            // is the integrity check.
        }
    }
    Ok(())
}

/// Write an object atomically using tempfile.
pub(crate) fn write_object_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::unexpected_entry(path, "object path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
    temp_file.write_all(bytes)?;
    temp_file.flush()?;

    // Persist without replacing; a concurrent writer in another process wins.
    match temp_file.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(e) if path.exists() => {
            tracing::debug!(path = %path.display(), error = %e.error, "object already written");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store_with(
        temp_dir: &TempDir,
        layout: StoreLayout,
        fetcher: Arc<MockFetcher>,
    ) -> HashStore {
        let settings = Settings::new(temp_dir.path());
        HashStore::new(
            &settings,
            "ngdp",
            Remote::new("cdn.example.com", "tpr/test"),
            layout,
            fetcher,
        ).unwrap()
    }

    fn entries_in(dir: &Path) -> usize {
        fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn test_object_path_flat() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, StoreLayout::Flat, Arc::new(MockFetcher::new()));
        let hash = ContentHash::from_hex("b5056174e18346a7c6c5a1e06cc0e828").unwrap();

        let expected = temp_dir
            .path()
            .join("ngdp/tpr/test/b5/05/b5056174e18346a7c6c5a1e06cc0e828");
        assert_eq!(store.object_path(ObjectKind::Config, &hash), expected);
        assert_eq!(
            store.url("cdn.example.com", ObjectKind::Config, &hash),
            "http://cdn.example.com/tpr/test/b5/05/b5056174e18346a7c6c5a1e06cc0e828"
        );
    }

    #[test]
    fn test_object_path_typed() {
        let temp_dir = TempDir::new().unwrap();
        let store = store_with(&temp_dir, StoreLayout::Typed, Arc::new(MockFetcher::new()));
        let hash = ContentHash::from_hex("0017a402f556fbece46c38dc431a2c9b").unwrap();

        assert_eq!(
            store.url("h", ObjectKind::Config, &hash),
            "http://h/tpr/test/config/00/17/0017a402f556fbece46c38dc431a2c9b"
        );
        assert_eq!(
            store.url("h", ObjectKind::Data, &hash),
            "http://h/tpr/test/data/00/17/0017a402f556fbece46c38dc431a2c9b"
        );
        assert_eq!(
            store.url("h", ObjectKind::Index, &hash),
            "http://h/tpr/test/data/00/17/0017a402f556fbece46c38dc431a2c9b.index"
        );
        assert_eq!(
            store.object_path(ObjectKind::Index, &hash),
            temp_dir
                .path()
                .join("ngdp/tpr/test/data/00/17/0017a402f556fbece46c38dc431a2c9b.index")
        );
    }

    #[test]
    fn test_url_without_path_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::new(temp_dir.path());
        let store = HashStore::new(
            &settings,
            "Clog",
            Remote::new("cdn/", ""),
            StoreLayout::Flat,
            Arc::new(MockFetcher::new()),
        ).unwrap();
        let hash = ContentHash::digest(b"x");
        assert_eq!(
            store.url("cdn/", ObjectKind::Config, &hash),
            format!("http://cdn/{}", hash.shard())
        );
        assert_eq!(store.root(), temp_dir.path().join("Clog"));
    }

    #[test]
    fn test_ensure_fetches_once() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let body = b"archives = a b c\n".to_vec();
        let hash = ContentHash::digest(&body);
        let url = store.url("cdn.example.com", ObjectKind::Config, &hash);
        fetcher.serve(&url, body.clone());

        let first = store.ensure(ObjectKind::Config, &hash).unwrap();
        let second = store.ensure(ObjectKind::Config, &hash).unwrap();

        assert_eq!(first, second);
        assert_eq!(fs::read(&first).unwrap(), body);
        assert_eq!(fetcher.calls(&url), 1);
    }

    #[test]
    fn test_existing_file_is_trusted() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Flat, fetcher.clone());

        let hash = ContentHash::digest(b"real");
        let path = store.object_path(ObjectKind::Config, &hash);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"whatever is on disk").unwrap();

        assert_eq!(store.read(ObjectKind::Config, &hash).unwrap(), b"whatever is on disk");
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[test]
    fn test_config_integrity_mismatch_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let hash = ContentHash::digest(b"expected");
        let url = store.url("cdn.example.com", ObjectKind::Config, &hash);
        fetcher.serve(&url, b"tampered".to_vec());

        let err = store.ensure(ObjectKind::Config, &hash).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));

        let path = store.object_path(ObjectKind::Config, &hash);
        assert!(!path.exists());
        assert_eq!(entries_in(path.parent().unwrap()), 0);
    }

    #[test]
    fn test_not_found_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let hash = ContentHash::digest(b"gone");
        fetcher.serve_not_found(store.url("cdn.example.com", ObjectKind::Config, &hash));

        let err = store.ensure(ObjectKind::Config, &hash).unwrap_err();
        assert!(err.is_not_found());
        assert!(!store.contains(ObjectKind::Config, &hash));
    }

    #[test]
    fn test_data_is_not_hash_checked() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let hash = ContentHash::digest(b"encoded container header");
        fetcher.serve(
            store.url("cdn.example.com", ObjectKind::Data, &hash),
            b"container bytes".to_vec(),
        );

        let path = store.ensure(ObjectKind::Data, &hash).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"container bytes");
    }

    #[test]
    fn test_invalid_index_is_not_cached() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let hash = ContentHash::digest(b"archive");
        let mut bad = index::build_index(2, 7);
        bad[5] ^= 0x80;
        fetcher.serve(store.url("cdn.example.com", ObjectKind::Index, &hash), bad);

        let err = store.ensure(ObjectKind::Index, &hash).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation {
                source: crate::error::ValidationError::BlockChecksumMismatch { block: 0 },
                ..
            }
        ));
        assert!(!store.contains(ObjectKind::Index, &hash));
    }

    #[test]
    fn test_ensure_archive_fetches_index_first() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let hash = ContentHash::digest(b"archive");
        let index_url = store.url("cdn.example.com", ObjectKind::Index, &hash);
        let data_url = store.url("cdn.example.com", ObjectKind::Data, &hash);
        fetcher.serve(&index_url, index::build_index(1, 3));
        fetcher.serve(&data_url, vec![0u8; 64]);

        let paths = store.ensure_archive(&hash).unwrap();
        assert!(paths.index.exists());
        assert!(paths.data.exists());
        assert_eq!(fetcher.requests(), vec![index_url, data_url]);
    }

    #[test]
    fn test_bad_index_blocks_data_download() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let hash = ContentHash::digest(b"archive");
        let data_url = store.url("cdn.example.com", ObjectKind::Data, &hash);
        fetcher.serve(
            store.url("cdn.example.com", ObjectKind::Index, &hash),
            vec![1u8; 10],
        );
        fetcher.serve(&data_url, vec![0u8; 64]);

        assert!(store.ensure_archive(&hash).is_err());
        assert_eq!(fetcher.calls(&data_url), 0);
    }

    #[test]
    fn test_falls_back_to_next_host() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let settings = Settings::new(temp_dir.path());
        let store = HashStore::new(
            &settings,
            "ngdp",
            Remote::with_hosts(vec!["down.example".into(), "up.example".into()], "tpr"),
            StoreLayout::Typed,
            fetcher.clone(),
        ).unwrap();

        let body = b"k = v\n".to_vec();
        let hash = ContentHash::digest(&body);
        let down = store.url("down.example", ObjectKind::Config, &hash);
        let up = store.url("up.example", ObjectKind::Config, &hash);
        fetcher.serve(&up, body);

        store.ensure(ObjectKind::Config, &hash).unwrap();
        assert_eq!(fetcher.requests(), vec![down, up]);
    }

    #[test]
    fn test_not_found_falls_back_to_next_host() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let settings = Settings::new(temp_dir.path());
        let store = HashStore::new(
            &settings,
            "ngdp",
            Remote::with_hosts(vec!["stale.example".into(), "fresh.example".into()], "tpr"),
            StoreLayout::Typed,
            fetcher.clone(),
        )
        .unwrap();

        let body = b"archives = \n".to_vec();
        let hash = ContentHash::digest(&body);
        let stale = store.url("stale.example", ObjectKind::Config, &hash);
        let fresh = store.url("fresh.example", ObjectKind::Config, &hash);
        fetcher.serve_not_found(&stale);
        fetcher.serve(&fresh, body.clone());

        let path = store.ensure(ObjectKind::Config, &hash).unwrap();
        assert_eq!(fs::read(path).unwrap(), body);
        assert_eq!(fetcher.requests(), vec![stale, fresh]);
    }

    #[test]
    fn test_remote_path_cannot_escape_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::new(temp_dir.path());

        for path in ["../outside", "tpr/../../outside", "./tpr"] {
            let err = HashStore::new(
                &settings,
                "ngdp",
                Remote::new("cdn.example.com", path),
                StoreLayout::Typed,
                Arc::new(MockFetcher::new()),
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidRemotePath { .. }), "{}", path);
        }

        let store = HashStore::new(
            &settings,
            "ngdp",
            Remote::new("cdn.example.com", "/tpr/wow/"),
            StoreLayout::Typed,
            Arc::new(MockFetcher::new()),
        )
        .unwrap();
        assert_eq!(store.root(), temp_dir.path().join("ngdp").join("tpr").join("wow"));
    }

    #[test]
    fn test_integrity_error_is_not_retried_on_other_hosts() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let settings = Settings::new(temp_dir.path());
        let store = HashStore::new(
            &settings,
            "ngdp",
            Remote::with_hosts(vec!["a".into(), "b".into()], "tpr"),
            StoreLayout::Typed,
            fetcher.clone(),
        ).unwrap();

        let hash = ContentHash::digest(b"good");
        fetcher.serve(store.url("a", ObjectKind::Config, &hash), b"bad".to_vec());
        fetcher.serve(store.url("b", ObjectKind::Config, &hash), b"good".to_vec());

        let err = store.ensure(ObjectKind::Config, &hash).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert_eq!(fetcher.total_calls(), 1);
    }

    #[test]
    fn test_all_hosts_failing_returns_last_error() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::new());
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let err = store
            .ensure(ObjectKind::Config, &ContentHash::digest(b"x"))
            .unwrap_err();
        assert!(matches!(err, Error::Network { .. }));
    }

    #[test]
    fn test_concurrent_ensure_single_download() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = Arc::new(MockFetcher::with_delay(Duration::from_millis(150)));
        let store = store_with(&temp_dir, StoreLayout::Typed, fetcher.clone());

        let body = b"shared".to_vec();
        let hash = ContentHash::digest(&body);
        let url = store.url("cdn.example.com", ObjectKind::Config, &hash);
        fetcher.serve(&url, body);

        let paths: Vec<PathBuf> = std::thread::scope(|s| {
            let a = s.spawn(|| store.ensure(ObjectKind::Config, &hash).unwrap());
            let b = s.spawn(|| store.ensure(ObjectKind::Config, &hash).unwrap());
            vec![a.join().unwrap(), b.join().unwrap()]
        });

        assert_eq!(paths[0], paths[1]);
        assert_eq!(fetcher.calls(&url), 1);
    }
}
