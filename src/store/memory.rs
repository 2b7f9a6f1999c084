//! Thread-safe in-memory object store using DashMap.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{kinds, ObjectStore};
use crate::error::StoreError;
use crate::model::{DerivedTarget, ObjectKey, SourceRoute, Tunnel};

/// Number of successful target writes, by verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
}

impl WriteCounts {
    pub fn total(&self) -> u64 {
        self.creates + self.updates + self.deletes
    }
}

/// In-memory store for source routes, tunnels and derived targets.
///
/// Uses `DashMap` for concurrent access and a single `AtomicU64` as the
/// resource version clock. Deleting a source route removes every target
/// whose owner reference points at it, unless cascade is disabled.
pub struct MemoryStore {
    routes: DashMap<ObjectKey, SourceRoute>,
    tunnels: DashMap<ObjectKey, Tunnel>,
    targets: DashMap<ObjectKey, DerivedTarget>,
    version: AtomicU64,
    cascade: bool,
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    pending_conflicts: AtomicU32,
}

impl MemoryStore {
    /// Creates an empty store with owner cascade enabled.
    pub fn new() -> Self {
        Self::with_cascade(true)
    }

    /// Creates an empty store, choosing whether owner cascade is provided.
    pub fn with_cascade(cascade: bool) -> Self {
        Self {
            routes: DashMap::new(),
            tunnels: DashMap::new(),
            targets: DashMap::new(),
            version: AtomicU64::new(0),
            cascade,
            creates: AtomicU64::new(0),
            updates: AtomicU64::new(0),
            deletes: AtomicU64::new(0),
            pending_conflicts: AtomicU32::new(0),
        }
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Creates or replaces a source route.
    ///
    /// A route without a UID keeps the UID of the route it replaces, or gets
    /// a fresh one when it is new. Returns the stored UID.
    pub fn apply_source_route(&self, mut route: SourceRoute) -> String {
        let key = route.key();
        if route.metadata.uid.is_empty() {
            route.metadata.uid = self
                .routes
                .get(&key)
                .map(|existing| existing.uid().to_string())
                .filter(|uid| !uid.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
        }
        route.metadata.resource_version = self.next_version();
        let uid = route.metadata.uid.clone();
        self.routes.insert(key, route);
        uid
    }

    /// Removes a source route, cascading to its targets if enabled.
    ///
    /// Returns the removed route.
    pub fn delete_source_route(&self, key: &ObjectKey) -> Option<SourceRoute> {
        let (_, route) = self.routes.remove(key)?;
        if self.cascade {
            let uid = route.uid().to_string();
            self.targets.retain(|_, target| {
                !target
                    .metadata
                    .owner_references
                    .iter()
                    .any(|owner| owner.uid == uid)
            });
        }
        Some(route)
    }

    /// Creates or replaces a tunnel.
    pub fn apply_tunnel(&self, mut tunnel: Tunnel) {
        tunnel.metadata.resource_version = self.next_version();
        self.tunnels.insert(tunnel.metadata.key(), tunnel);
    }

    pub fn delete_tunnel(&self, key: &ObjectKey) -> Option<Tunnel> {
        self.tunnels.remove(key).map(|(_, t)| t)
    }

    /// Returns all source routes, sorted by key.
    pub fn source_routes(&self) -> Vec<SourceRoute> {
        let mut routes: Vec<SourceRoute> =
            self.routes.iter().map(|entry| entry.value().clone()).collect();
        routes.sort_by_key(SourceRoute::key);
        routes
    }

    /// Returns all derived targets, sorted by key.
    pub fn targets(&self) -> Vec<DerivedTarget> {
        let mut targets: Vec<DerivedTarget> =
            self.targets.iter().map(|entry| entry.value().clone()).collect();
        targets.sort_by_key(DerivedTarget::key);
        targets
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Returns the current resource version clock.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn write_counts(&self) -> WriteCounts {
        WriteCounts {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Makes the next `count` target updates fail with a conflict, as if
    /// another writer had modified the object first.
    pub fn inject_update_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_source_route(&self, key: &ObjectKey) -> Result<Option<SourceRoute>, StoreError> {
        Ok(self.routes.get(key).map(|entry| entry.value().clone()))
    }

    async fn list_tunnels(&self) -> Result<Vec<Tunnel>, StoreError> {
        let mut tunnels: Vec<Tunnel> =
            self.tunnels.iter().map(|entry| entry.value().clone()).collect();
        tunnels.sort_by_key(|t| t.metadata.key());
        Ok(tunnels)
    }

    async fn get_target(&self, key: &ObjectKey) -> Result<Option<DerivedTarget>, StoreError> {
        Ok(self.targets.get(key).map(|entry| entry.value().clone()))
    }

    async fn list_targets(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DerivedTarget>, StoreError> {
        let mut targets: Vec<DerivedTarget> = self
            .targets
            .iter()
            .filter(|entry| {
                entry.key().namespace == namespace
                    && entry.value().metadata.matches_labels(selector)
            })
            .map(|entry| entry.value().clone())
            .collect();
        targets.sort_by_key(DerivedTarget::key);
        Ok(targets)
    }

    async fn create_target(&self, target: &DerivedTarget) -> Result<DerivedTarget, StoreError> {
        match self.targets.entry(target.key()) {
            Entry::Occupied(entry) => Err(StoreError::already_exists(
                kinds::DERIVED_TARGET,
                entry.key().to_string(),
            )),
            Entry::Vacant(entry) => {
                let mut stored = target.clone();
                stored.metadata.resource_version = self.next_version();
                entry.insert(stored.clone());
                self.creates.fetch_add(1, Ordering::SeqCst);
                Ok(stored)
            }
        }
    }

    async fn update_target(&self, target: &DerivedTarget) -> Result<DerivedTarget, StoreError> {
        let key = target.key();
        let mut entry = self
            .targets
            .get_mut(&key)
            .ok_or_else(|| StoreError::not_found(kinds::DERIVED_TARGET, key.to_string()))?;

        let actual = entry.metadata.resource_version;
        if self.take_injected_conflict() {
            // Simulate a concurrent writer bumping the version.
            entry.metadata.resource_version = self.next_version();
            return Err(StoreError::Conflict {
                kind: kinds::DERIVED_TARGET,
                key: key.to_string(),
                expected: target.metadata.resource_version,
                actual: entry.metadata.resource_version,
            });
        }
        if actual != target.metadata.resource_version {
            return Err(StoreError::Conflict {
                kind: kinds::DERIVED_TARGET,
                key: key.to_string(),
                expected: target.metadata.resource_version,
                actual,
            });
        }

        let mut stored = target.clone();
        stored.metadata.resource_version = self.next_version();
        *entry = stored.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn delete_target(&self, key: &ObjectKey) -> Result<(), StoreError> {
        match self.targets.remove(key) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::not_found(kinds::DERIVED_TARGET, key.to_string())),
        }
    }

    fn supports_cascade(&self) -> bool {
        self.cascade
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DerivedTargetSpec, ObjectMeta, OwnerReference, TunnelRef};

    fn make_target(name: &str, owner_uid: &str) -> DerivedTarget {
        let mut metadata = ObjectMeta::new("default", name);
        metadata
            .labels
            .insert("owner".to_string(), owner_uid.to_string());
        metadata.owner_references.push(OwnerReference {
            kind: kinds::SOURCE_ROUTE.to_string(),
            name: "myapp".to_string(),
            uid: owner_uid.to_string(),
            controller: true,
        });
        DerivedTarget {
            metadata,
            spec: DerivedTargetSpec {
                name: format!("default/myapp/{name}"),
                enabled: true,
                protocol: "http".to_string(),
                tunnel_ref: TunnelRef::default(),
                http_config: None,
                targets: vec![],
            },
        }
    }

    fn owner_selector(uid: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("owner".to_string(), uid.to_string())])
    }

    #[tokio::test]
    async fn test_new_store_empty() {
        let store = MemoryStore::new();
        assert_eq!(store.version(), 0);
        assert_eq!(store.target_count(), 0);
        assert!(store.list_tunnels().await.unwrap().is_empty());
        assert_eq!(store.write_counts(), WriteCounts::default());
    }

    #[tokio::test]
    async fn test_create_and_get_target() {
        let store = MemoryStore::new();
        let created = store.create_target(&make_target("a", "u1")).await.unwrap();

        assert_eq!(created.metadata.resource_version, 1);
        let fetched = store.get_target(&created.key()).await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.write_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_create_existing_fails() {
        let store = MemoryStore::new();
        store.create_target(&make_target("a", "u1")).await.unwrap();

        let err = store.create_target(&make_target("a", "u1")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.write_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_update_requires_current_version() {
        let store = MemoryStore::new();
        let created = store.create_target(&make_target("a", "u1")).await.unwrap();

        let mut stale = created.clone();
        stale.metadata.resource_version = 0;
        let err = store.update_target(&stale).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::Conflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));

        let mut fresh = created;
        fresh.spec.enabled = false;
        let updated = store.update_target(&fresh).await.unwrap();
        assert_eq!(updated.metadata.resource_version, 2);
        assert!(!updated.spec.enabled);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_target(&make_target("a", "u1")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = MemoryStore::new();
        let created = store.create_target(&make_target("a", "u1")).await.unwrap();
        store.inject_update_conflicts(1);

        let err = store.update_target(&created).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let current = store.get_target(&created.key()).await.unwrap().unwrap();
        assert!(store.update_target(&current).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_targets_filters_by_namespace_and_labels() {
        let store = MemoryStore::new();
        store.create_target(&make_target("a", "u1")).await.unwrap();
        store.create_target(&make_target("b", "u1")).await.unwrap();
        store.create_target(&make_target("c", "u2")).await.unwrap();

        let owned = store.list_targets("default", &owner_selector("u1")).await.unwrap();
        let names: Vec<&str> = owned.iter().map(DerivedTarget::name).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(store
            .list_targets("other", &owner_selector("u1"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_target() {
        let store = MemoryStore::new();
        let created = store.create_target(&make_target("a", "u1")).await.unwrap();

        store.delete_target(&created.key()).await.unwrap();
        assert_eq!(store.target_count(), 0);

        let err = store.delete_target(&created.key()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.write_counts().deletes, 1);
    }

    #[tokio::test]
    async fn test_deleting_route_cascades_to_owned_targets() {
        let store = MemoryStore::new();
        store.apply_source_route(SourceRoute::new("default", "myapp", "u1"));
        store.create_target(&make_target("a", "u1")).await.unwrap();
        store.create_target(&make_target("b", "u2")).await.unwrap();

        let removed = store.delete_source_route(&ObjectKey::new("default", "myapp"));
        assert!(removed.is_some());

        let remaining = store.targets();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name(), "b");
    }

    #[tokio::test]
    async fn test_cascade_disabled_keeps_targets() {
        let store = MemoryStore::with_cascade(false);
        store.apply_source_route(SourceRoute::new("default", "myapp", "u1"));
        store.create_target(&make_target("a", "u1")).await.unwrap();

        store.delete_source_route(&ObjectKey::new("default", "myapp"));
        assert_eq!(store.target_count(), 1);
        assert!(!store.supports_cascade());
    }

    #[tokio::test]
    async fn test_concurrent_creates() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let mut handles = vec![];

        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .create_target(&make_target(&format!("t{i}"), "u1"))
                    .await
                    .unwrap();
            }));
        }
        // Everyone races for the same name; exactly one wins.
        for _ in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let _ = store.create_target(&make_target("shared", "u1")).await;
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.target_count(), 11);
        assert_eq!(store.write_counts().creates, 11);
    }

    #[test]
    fn test_routes_without_uid_get_distinct_uids() {
        let store = MemoryStore::new();
        let a = store.apply_source_route(SourceRoute::new("default", "a", ""));
        let b = store.apply_source_route(SourceRoute::new("default", "b", ""));

        assert!(!a.is_empty());
        assert!(!b.is_empty());
        assert_ne!(a, b);
        assert_eq!(store.source_routes()[0].uid(), a);
    }

    #[test]
    fn test_reapplied_route_keeps_uid() {
        let store = MemoryStore::new();
        let first = store.apply_source_route(SourceRoute::new("default", "a", ""));
        let second = store.apply_source_route(SourceRoute::new("default", "a", ""));
        assert_eq!(first, second);

        // An explicit UID always wins.
        let explicit = store.apply_source_route(SourceRoute::new("default", "a", "u9"));
        assert_eq!(explicit, "u9");
    }

    #[test]
    fn test_default_impl() {
        let store = MemoryStore::default();
        assert_eq!(store.version(), 0);
        assert!(store.supports_cascade());
    }
}
