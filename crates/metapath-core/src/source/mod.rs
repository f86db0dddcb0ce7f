//! Capability interfaces for the external path data source.
//!
//! Identifier resolution (external id -> internal graph node id) and path
//! queries are separate traits so each can be faked on its own.

pub mod hetionet;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::errors::GatherResult;
use crate::models::ResultRow;

/// Maps an external identifier (GO term, Entrez gene id, …) to the data
/// source's internal integer node id.
pub trait IdentifierResolver: Send + Sync {
    /// `NotFound` when no node carries the identifier.
    fn resolve(&self, identifier: &str) -> GatherResult<i64>;
}

/// Fetches path rows for one resolved (source, target, metapath) triple.
pub trait PathQueryClient: Send + Sync {
    /// `TransientFetch` on network failure, timeout, or a non-2xx response.
    fn fetch(&self, source: i64, target: i64, metapath: &str) -> GatherResult<Vec<ResultRow>>;
}

impl<T: IdentifierResolver + ?Sized> IdentifierResolver for Arc<T> {
    fn resolve(&self, identifier: &str) -> GatherResult<i64> {
        (**self).resolve(identifier)
    }
}

impl<T: IdentifierResolver + ?Sized> IdentifierResolver for &T {
    fn resolve(&self, identifier: &str) -> GatherResult<i64> {
        (**self).resolve(identifier)
    }
}

impl<T: PathQueryClient + ?Sized> PathQueryClient for Arc<T> {
    fn fetch(&self, source: i64, target: i64, metapath: &str) -> GatherResult<Vec<ResultRow>> {
        (**self).fetch(source, target, metapath)
    }
}

impl<T: PathQueryClient + ?Sized> PathQueryClient for &T {
    fn fetch(&self, source: i64, target: i64, metapath: &str) -> GatherResult<Vec<ResultRow>> {
        (**self).fetch(source, target, metapath)
    }
}

// ---------------------------------------------------------------------------
// CachingResolver
// ---------------------------------------------------------------------------

/// Memoises successful resolutions. Failures are not cached so a transient
/// lookup error can succeed on retry.
pub struct CachingResolver<R> {
    inner: R,
    cache: RwLock<HashMap<String, i64>>,
}

impl<R: IdentifierResolver> CachingResolver<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.read().is_empty()
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

impl<R: IdentifierResolver> IdentifierResolver for CachingResolver<R> {
    fn resolve(&self, identifier: &str) -> GatherResult<i64> {
        if let Some(id) = self.cache.read().get(identifier) {
            return Ok(*id);
        }
        let id = self.inner.resolve(identifier)?;
        debug!(identifier, node_id = id, "resolved identifier");
        self.cache.write().insert(identifier.to_string(), id);
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::testing::FakeResolver;
    use super::*;
    use crate::errors::GatherError;

    #[test]
    fn caching_resolver_looks_up_each_identifier_once() {
        let resolver = CachingResolver::new(FakeResolver::new(&[("GO:0000002", 40731)]));
        for _ in 0..5 {
            assert_eq!(resolver.resolve("GO:0000002").unwrap(), 40731);
        }
        assert_eq!(resolver.inner().calls(), 1);
        assert_eq!(resolver.len(), 1);
    }

    #[test]
    fn caching_resolver_does_not_cache_failures() {
        let resolver = CachingResolver::new(FakeResolver::new(&[]));
        assert!(matches!(
            resolver.resolve("GO:missing"),
            Err(GatherError::NotFound(_))
        ));
        assert!(resolver.resolve("GO:missing").is_err());
        assert_eq!(resolver.inner().calls(), 2);
        assert!(resolver.is_empty());
    }
}
