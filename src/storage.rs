//! Storage provider resolution by URI scheme (spec.md §6).
//!
//! Trait-only: concrete backends (filesystem, object storage, …) are
//! connector implementations out of scope for this crate (spec.md §1
//! Non-goals); conduit owns only the scheme-resolution contract and an
//! in-memory test double.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Error;

/// A readable byte stream returned by [`StorageProvider::open_read`].
pub type BoxedReader = std::pin::Pin<Box<dyn AsyncRead + Send + Unpin>>;
/// A writable byte sink returned by [`StorageProvider::open_write`].
pub type BoxedWriter = std::pin::Pin<Box<dyn AsyncWrite + Send + Unpin>>;

/// A backend capable of opening readers/writers for URIs under one or more
/// schemes (e.g. `s3://`, `file://`).
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// Opens `uri` for reading.
    async fn open_read(&self, uri: &str) -> Result<BoxedReader, Error>;
    /// Opens `uri` for writing, creating or truncating as the backend sees fit.
    async fn open_write(&self, uri: &str) -> Result<BoxedWriter, Error>;
}

/// Resolves a URI's scheme (the part before `://`) to a registered
/// [`StorageProvider`].
#[derive(Default)]
pub struct StorageRegistry {
    providers: HashMap<String, Arc<dyn StorageProvider>>,
}

impl StorageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` to handle URIs under `scheme` (without `://`).
    pub fn register(&mut self, scheme: impl Into<String>, provider: Arc<dyn StorageProvider>) {
        self.providers.insert(scheme.into(), provider);
    }

    /// Resolves `uri` to its registered provider.
    pub fn resolve(&self, uri: &str) -> Result<Arc<dyn StorageProvider>, Error> {
        let scheme = uri
            .split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| Error::UnsupportedStorageScheme(uri.to_string()))?;
        self.providers
            .get(scheme)
            .cloned()
            .ok_or_else(|| Error::StorageProviderNotFound(scheme.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct MemoryProvider {
        contents: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl StorageProvider for MemoryProvider {
        async fn open_read(&self, _uri: &str) -> Result<BoxedReader, Error> {
            Ok(Box::pin(Cursor::new(self.contents.clone())))
        }
        async fn open_write(&self, _uri: &str) -> Result<BoxedWriter, Error> {
            Ok(Box::pin(Vec::new()))
        }
    }

    #[test]
    fn unresolvable_uri_reports_missing_scheme() {
        let registry = StorageRegistry::new();
        let err = registry.resolve("not-a-uri").unwrap_err();
        assert!(matches!(err, Error::UnsupportedStorageScheme(_)));
    }

    #[test]
    fn unregistered_scheme_reports_not_found() {
        let registry = StorageRegistry::new();
        let err = registry.resolve("s3://bucket/key").unwrap_err();
        assert!(matches!(err, Error::StorageProviderNotFound(scheme) if scheme == "s3"));
    }

    #[tokio::test]
    async fn registered_scheme_resolves_and_reads() {
        let mut registry = StorageRegistry::new();
        registry.register(
            "mem",
            Arc::new(MemoryProvider {
                contents: b"hello".to_vec(),
            }),
        );
        let provider = registry.resolve("mem://bucket/key").unwrap();
        let mut reader = provider.open_read("mem://bucket/key").await.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"hello");
    }
}
