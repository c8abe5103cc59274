//! In-memory fetcher for tests.

use crate::error::{Error, Result};
use crate::fetch::{Fetched, Fetcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Serves canned responses and records every request.
///
/// URLs without a canned response fail with a network error.
#[derive(Debug, Default)]
pub struct MockFetcher {
    responses: Mutex<HashMap<String, Fetched>>,
    log: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every fetch.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.responses
            .lock()
            .insert(url.into(), Fetched::Body(body.into()));
    }

    pub fn serve_not_found(&self, url: impl Into<String>) {
        self.responses.lock().insert(url.into(), Fetched::NotFound);
    }

    /// Requests made for `url`.
    pub fn calls(&self, url: &str) -> usize {
        self.log.lock().iter().filter(|u| *u == url).count()
    }

    /// All requests, in order.
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.log.lock().len()
    }
}

impl Fetcher for MockFetcher {
    fn fetch(&self, url: &str) -> Result<Fetched> {
        self.log.lock().push(url.to_string());
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.responses
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::network(url, "connection refused"))
    }
}
