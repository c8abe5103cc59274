//! Process-level settings shared by every store.

use std::path::PathBuf;
use std::time::Duration;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = "NGDP12";

/// Settings for fetching and caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root under which every namespace is cached.
    pub save_root: PathBuf,
    /// URL scheme used for CDN requests.
    pub scheme: String,
    /// Per-request timeout; expiry surfaces as a network error.
    pub timeout: Duration,
    /// User-Agent header value.
    pub user_agent: String,
}

impl Settings {
    /// Settings rooted at `save_root` with defaults for everything else.
    pub fn new(save_root: impl Into<PathBuf>) -> Self {
        Self {
            save_root: save_root.into(),
            scheme: "http".to_string(),
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Settings rooted at the save root found in the environment.
    ///
    /// `$MPQ_BASE_DIR`, else `$XDG_DATA_HOME/mpq`, else `$HOME/.local/share/mpq`.
    pub fn from_env() -> Self {
        Self::new(save_root_from(|key| std::env::var(key).ok()))
    }
}

/// Resolve the save root using `lookup` for environment variables.
fn save_root_from(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = lookup("MPQ_BASE_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }

    let data_home = lookup("XDG_DATA_HOME")
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = lookup("HOME").unwrap_or_else(|| ".".to_string());
            PathBuf::from(home).join(".local").join("share")
        });

    data_home.join("mpq")
}
