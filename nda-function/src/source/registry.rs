//! Registry of upstream schema handles
//!
//! Maps module names to connected upstream sources. Handles are connected
//! on first use and reused for the lifetime of the registry; nothing is
//! invalidated mid-run.

use super::UpstreamSource;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Opens a handle to a named upstream schema
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn connect(&self, schema_name: &str) -> Result<Arc<dyn UpstreamSource>>;
}

/// Lazily populated module name → source handle map
pub struct SourceRegistry {
    connector: Arc<dyn SourceConnector>,
    handles: RwLock<HashMap<String, Arc<dyn UpstreamSource>>>,
}

impl SourceRegistry {
    pub fn new(connector: Arc<dyn SourceConnector>) -> Self {
        Self {
            connector,
            handles: RwLock::new(HashMap::new()),
        }
    }

    /// Handle for `module_name`, connecting to `schema_name` on first use
    ///
    /// A module already registered keeps its original schema.
    pub async fn module(&self, module_name: &str, schema_name: &str) -> Result<Arc<dyn UpstreamSource>> {
        if let Some(handle) = self.handles.read().await.get(module_name) {
            return Ok(handle.clone());
        }

        let mut handles = self.handles.write().await;
        // Another task may have connected while we waited for the write lock
        if let Some(handle) = handles.get(module_name) {
            return Ok(handle.clone());
        }

        debug!(module = module_name, schema = schema_name, "Connecting upstream module");
        let handle = self.connector.connect(schema_name).await?;
        handles.insert(module_name.to_string(), handle.clone());
        info!(module = module_name, schema = schema_name, "Upstream module connected");
        Ok(handle)
    }

    /// Connect every module in `modules` (module name, schema name)
    pub async fn spawn(&self, modules: &[(&str, &str)]) -> Result<()> {
        for (module, schema) in modules {
            self.module(module, schema).await?;
        }
        Ok(())
    }

    /// Number of connected modules
    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handles.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryConnector, MemorySource};
    use crate::Error;

    #[tokio::test]
    async fn test_connects_once_and_reuses() {
        let connector = Arc::new(MemoryConnector::new());
        connector.insert(MemorySource::new("dv_scans_v1_oracle"));
        let registry = SourceRegistry::new(connector.clone());

        let first = registry.module("dv_scans_v1_oracle", "dv_scans_v1_oracle").await.unwrap();
        let second = registry.module("dv_scans_v1_oracle", "dv_scans_v1_oracle").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_alias_module_names() {
        let connector = Arc::new(MemoryConnector::new());
        connector.insert(MemorySource::new("dv_nns_v10_scan"));
        let registry = SourceRegistry::new(connector);

        let handle = registry.module("is_scan", "dv_nns_v10_scan").await.unwrap();
        assert_eq!(handle.schema_name(), "dv_nns_v10_scan");
    }

    #[tokio::test]
    async fn test_unknown_schema_is_unavailable() {
        let registry = SourceRegistry::new(Arc::new(MemoryConnector::new()));

        let result = registry.module("pipeline_tune", "pipeline_tune").await;
        assert!(matches!(result, Err(Error::SourceUnavailable { .. })));
        assert!(registry.is_empty().await);
    }
}
