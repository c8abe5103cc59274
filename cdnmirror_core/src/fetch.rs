//! Single-request content fetching.
//!
//! A fetcher performs one blocking GET and reports either the body or the
//! "absent" signal. It knows nothing about hashes or caching.

use crate::error::{Error, Result};
use crate::settings::Settings;
use std::io::Read;
use std::time::Duration;

/// Body some legacy servers return with a 200 status for missing files.
pub const NOT_FOUND_SENTINEL: &[u8] = b"File not found.";

/// Outcome of a GET that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fetched {
    /// Full response body.
    Body(Vec<u8>),
    /// The server says the object does not exist.
    NotFound,
}

impl Fetched {
    /// Convert to bytes, mapping the absent signal to `Error::NotFound`.
    pub fn into_body(self, url: &str) -> Result<Vec<u8>> {
        match self {
            Fetched::Body(body) => Ok(body),
            Fetched::NotFound => Err(Error::not_found(url)),
        }
    }
}

/// Something that can GET a URL.
pub trait Fetcher: Send + Sync {
    /// Fetch `url`. Transport failures are `Error::Network`.
    fn fetch(&self, url: &str) -> Result<Fetched>;
}

/// Blocking HTTP fetcher.
#[derive(Debug)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    /// Create a fetcher with a per-request timeout and user agent.
    pub fn new(timeout: Duration, user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent)
            .build();
        Self { agent }
    }

    /// Create a fetcher from process settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.timeout, &settings.user_agent)
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched> {
        tracing::debug!(url, "GET");

        let response = match self.agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(Fetched::NotFound),
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::network(url, format!("HTTP status {}", code)));
            }
            Err(e) => return Err(Error::network(url, e)),
        };

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| Error::network(url, format!("failed to read response: {}", e)))?;

        Ok(classify_body(body))
    }
}

/// Map a successful body to `Fetched`, honouring the legacy sentinel.
pub fn classify_body(body: Vec<u8>) -> Fetched {
    if body == NOT_FOUND_SENTINEL {
        Fetched::NotFound
    } else {
        Fetched::Body(body)
    }
}
