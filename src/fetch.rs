//! Content fetching with a per-session URL cache.

use crate::error::{RepoError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use tracing::debug;

/// Source of release payloads.
///
/// Implementations must return the same bytes for the same URL within one
/// session; [`CachingFetcher`] provides that on top of any fetcher.
pub trait ContentFetcher {
    fn fetch(&mut self, url: &str) -> Result<Bytes>;
}

impl<F: ContentFetcher + ?Sized> ContentFetcher for Box<F> {
    fn fetch(&mut self, url: &str) -> Result<Bytes> {
        (**self).fetch(url)
    }
}

/// Plain HTTP(S) GET.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("vsdepot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RepoError::Fetch {
                url: String::new(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl ContentFetcher for HttpFetcher {
    fn fetch(&mut self, url: &str) -> Result<Bytes> {
        let fail = |e: reqwest::Error| RepoError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(fail)?;
        response.bytes().map_err(fail)
    }
}

/// Caches payloads by URL for the lifetime of the fetcher. No eviction.
pub struct CachingFetcher<F> {
    inner: F,
    cache: HashMap<String, Bytes>,
}

impl<F: ContentFetcher> CachingFetcher<F> {
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            cache: HashMap::new(),
        }
    }

    /// Number of distinct URLs fetched so far.
    pub fn cached_urls(&self) -> usize {
        self.cache.len()
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: ContentFetcher> ContentFetcher for CachingFetcher<F> {
    fn fetch(&mut self, url: &str) -> Result<Bytes> {
        if let Some(data) = self.cache.get(url) {
            return Ok(data.clone());
        }
        debug!(url, "fetching");
        let data = self.inner.fetch(url)?;
        self.cache.insert(url.to_string(), data.clone());
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting {
        calls: usize,
    }

    impl ContentFetcher for Counting {
        fn fetch(&mut self, url: &str) -> Result<Bytes> {
            self.calls += 1;
            if url.ends_with("missing") {
                return Err(RepoError::Fetch {
                    url: url.to_string(),
                    reason: "404".into(),
                });
            }
            Ok(Bytes::from(url.to_string()))
        }
    }

    #[test]
    fn same_url_fetched_once() {
        let mut fetcher = CachingFetcher::new(Counting { calls: 0 });
        let a = fetcher.fetch("https://x/a").unwrap();
        let b = fetcher.fetch("https://x/a").unwrap();
        fetcher.fetch("https://x/b").unwrap();
        assert_eq!(a, b);
        assert_eq!(fetcher.cached_urls(), 2);
        assert_eq!(fetcher.into_inner().calls, 2);
    }

    #[test]
    fn failures_are_not_cached() {
        let mut fetcher = CachingFetcher::new(Counting { calls: 0 });
        assert!(fetcher.fetch("https://x/missing").is_err());
        assert!(fetcher.fetch("https://x/missing").is_err());
        assert_eq!(fetcher.cached_urls(), 0);
        assert_eq!(fetcher.into_inner().calls, 2);
    }
}
