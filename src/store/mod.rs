//! Object storage used by the reconciler.
//!
//! The reconciler only needs get/list/create/update/delete on a handful of
//! kinds; [`ObjectStore`] captures exactly that. [`MemoryStore`] is the
//! in-process implementation used by the binary and by tests.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{DerivedTarget, ObjectKey, SourceRoute, Tunnel};

pub use memory::{MemoryStore, WriteCounts};

/// Kind names used in errors and logs.
pub mod kinds {
    pub const SOURCE_ROUTE: &str = "Ingress";
    pub const DERIVED_TARGET: &str = "PangolinResource";
    pub const TUNNEL: &str = "PangolinTunnel";
}

/// Store capabilities the reconciler depends on.
///
/// Writes are individually atomic. `update_target` must reject a write whose
/// `resource_version` no longer matches the stored object with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetches a source route, `None` if it does not exist.
    async fn get_source_route(&self, key: &ObjectKey) -> Result<Option<SourceRoute>, StoreError>;

    /// Lists tunnels across all namespaces.
    async fn list_tunnels(&self) -> Result<Vec<Tunnel>, StoreError>;

    /// Fetches a derived target, `None` if it does not exist.
    async fn get_target(&self, key: &ObjectKey) -> Result<Option<DerivedTarget>, StoreError>;

    /// Lists derived targets in `namespace` carrying every label in `selector`.
    async fn list_targets(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DerivedTarget>, StoreError>;

    async fn create_target(&self, target: &DerivedTarget) -> Result<DerivedTarget, StoreError>;

    async fn update_target(&self, target: &DerivedTarget) -> Result<DerivedTarget, StoreError>;

    /// Deletes a derived target. Returns `NotFound` if it is already gone.
    async fn delete_target(&self, key: &ObjectKey) -> Result<(), StoreError>;

    /// Whether the store removes owned objects when their owner is deleted.
    ///
    /// When false the reconciler deletes a vanished route's targets itself.
    fn supports_cascade(&self) -> bool {
        true
    }
}
