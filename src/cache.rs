use crate::error::{Result, SscError};
use crate::types::{DeviceIdentity, Endpoint};
use crate::value::DynamicValue;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Failure in an external store.
///
/// Cache failures are logged by the core and never abort an operation;
/// discovery falls back to a live query.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CacheError(pub String);

impl From<CacheError> for SscError {
    fn from(error: CacheError) -> Self {
        SscError::Store(error.to_string())
    }
}

/// Persistent store of discovered schema shapes, keyed by device identity
pub trait SchemaCache: Send {
    fn get(&self, identity: &DeviceIdentity)
        -> std::result::Result<Option<DynamicValue>, CacheError>;
    fn put(
        &mut self,
        identity: &DeviceIdentity,
        shape: DynamicValue,
    ) -> std::result::Result<(), CacheError>;
}

/// Persistent store of known device endpoints
pub trait ConnectionCache: Send {
    fn get(&self) -> std::result::Result<Vec<Endpoint>, CacheError>;
    fn put(&mut self, endpoints: &[Endpoint]) -> std::result::Result<(), CacheError>;
    fn clear(&mut self) -> std::result::Result<(), CacheError>;
}

/// Listener for device advertisements on the local network
#[async_trait]
pub trait DiscoveryService: Send {
    /// Listen for the given duration and return every endpoint heard from
    async fn scan(&mut self, duration: Duration) -> Result<Vec<Endpoint>>;
}

/// Named-blob storage for parameter tree backups
pub trait BackupStore: Send {
    fn read(&self, name: &str) -> std::result::Result<Vec<u8>, CacheError>;
    fn write(&mut self, name: &str, data: &[u8]) -> std::result::Result<(), CacheError>;
    fn list(&self) -> std::result::Result<Vec<String>, CacheError>;
    fn delete(&mut self, name: &str) -> std::result::Result<(), CacheError>;
}

/// In-memory schema cache for tests and short-lived embedders
#[derive(Debug, Default)]
pub struct MemorySchemaCache {
    shapes: BTreeMap<String, DynamicValue>,
}

impl MemorySchemaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaCache for MemorySchemaCache {
    fn get(
        &self,
        identity: &DeviceIdentity,
    ) -> std::result::Result<Option<DynamicValue>, CacheError> {
        Ok(self.shapes.get(&identity.cache_key()).cloned())
    }

    fn put(
        &mut self,
        identity: &DeviceIdentity,
        shape: DynamicValue,
    ) -> std::result::Result<(), CacheError> {
        self.shapes.insert(identity.cache_key(), shape);
        Ok(())
    }
}

/// In-memory endpoint cache
#[derive(Debug, Default)]
pub struct MemoryConnectionCache {
    endpoints: Vec<Endpoint>,
}

impl MemoryConnectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoints(endpoints: Vec<Endpoint>) -> Self {
        Self { endpoints }
    }
}

impl ConnectionCache for MemoryConnectionCache {
    fn get(&self) -> std::result::Result<Vec<Endpoint>, CacheError> {
        Ok(self.endpoints.clone())
    }

    fn put(&mut self, endpoints: &[Endpoint]) -> std::result::Result<(), CacheError> {
        self.endpoints = endpoints.to_vec();
        Ok(())
    }

    fn clear(&mut self) -> std::result::Result<(), CacheError> {
        self.endpoints.clear();
        Ok(())
    }
}

/// In-memory backup store
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    blobs: BTreeMap<String, Vec<u8>>,
}

impl MemoryBackupStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackupStore for MemoryBackupStore {
    fn read(&self, name: &str) -> std::result::Result<Vec<u8>, CacheError> {
        self.blobs
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError(format!("no backup named '{name}'")))
    }

    fn write(&mut self, name: &str, data: &[u8]) -> std::result::Result<(), CacheError> {
        self.blobs.insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn list(&self) -> std::result::Result<Vec<String>, CacheError> {
        Ok(self.blobs.keys().cloned().collect())
    }

    fn delete(&mut self, name: &str) -> std::result::Result<(), CacheError> {
        self.blobs.remove(name);
        Ok(())
    }
}
