//! Removal of derived targets that no longer have a desired counterpart.

use std::collections::{BTreeMap, BTreeSet};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::builder::owner_selector;
use super::{labels, Reconciler};
use crate::error::ReconcileError;
use crate::events::reasons;
use crate::model::{DerivedTarget, ObjectKey, SourceRoute};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OwnedTargets {
    uid: String,
    names: BTreeSet<String>,
}

/// Reverse index from source route to the targets created for it.
///
/// Entries are keyed by route key but remember the route's UID: recording
/// under a new UID (route deleted and recreated) starts a fresh entry.
#[derive(Debug, Default)]
pub struct OwnerIndex {
    entries: DashMap<ObjectKey, OwnedTargets>,
}

impl OwnerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, source: &ObjectKey, uid: &str, name: &str) {
        let mut entry = self.entries.entry(source.clone()).or_default();
        if entry.uid != uid {
            entry.uid = uid.to_string();
            entry.names.clear();
        }
        entry.names.insert(name.to_string());
    }

    pub fn forget(&self, source: &ObjectKey, name: &str) {
        if let Some(mut entry) = self.entries.get_mut(source) {
            entry.names.remove(name);
        }
    }

    /// Drops the entry for `source`, returning the recorded UID and names.
    pub fn remove(&self, source: &ObjectKey) -> Option<(String, BTreeSet<String>)> {
        self.entries
            .remove(source)
            .map(|(_, owned)| (owned.uid, owned.names))
    }

    /// Names recorded for `source`, empty if none.
    pub fn names(&self, source: &ObjectKey) -> BTreeSet<String> {
        self.entries
            .get(source)
            .map(|entry| entry.names.clone())
            .unwrap_or_default()
    }

    pub fn uid(&self, source: &ObjectKey) -> Option<String> {
        self.entries.get(source).map(|entry| entry.uid.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Reconciler {
    /// Deletes targets owned by `source` whose names are not in `desired`.
    pub(super) async fn cleanup_orphans(
        &self,
        source: &SourceRoute,
        desired: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let owned = self.list_owned(source, cancel).await?;
        for target in owned {
            if desired.contains_key(target.name()) {
                continue;
            }
            if self.delete_target(&target.key(), cancel).await? {
                info!(target = target.name(), "deleted orphaned target");
                self.normal(
                    source,
                    reasons::DELETED,
                    format!("Deleted PangolinResource {} (host removed)", target.name()),
                )
                .await;
            }
            self.owners.forget(&source.key(), target.name());
        }
        Ok(())
    }

    /// Deletes every target owned by a route that left management.
    pub(super) async fn delete_all_owned(
        &self,
        source: &SourceRoute,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let owned = self.list_owned(source, cancel).await?;
        for target in owned {
            if self.delete_target(&target.key(), cancel).await? {
                info!(target = target.name(), "deleted target of unmanaged route");
                self.normal(
                    source,
                    reasons::DELETED,
                    format!(
                        "Deleted PangolinResource {} (Ingress no longer managed)",
                        target.name()
                    ),
                )
                .await;
            }
        }
        self.owners.remove(&source.key());
        Ok(())
    }

    /// Deletes the targets of a route that no longer exists.
    ///
    /// Only used when the store does not cascade owner deletion. Without an
    /// index entry the route's namespace and name labels select the targets.
    pub(super) async fn delete_vanished(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let (selector, mut names) = match self.owners.remove(key) {
            Some((uid, names)) => (
                BTreeMap::from([(labels::SOURCE_UID.to_string(), uid)]),
                names,
            ),
            None => (
                BTreeMap::from([
                    (labels::SOURCE_NAMESPACE.to_string(), key.namespace.clone()),
                    (labels::SOURCE_NAME.to_string(), key.name.clone()),
                ]),
                BTreeSet::new(),
            ),
        };

        let listed = self
            .call(cancel, self.store.list_targets(&key.namespace, &selector))
            .await?;
        names.extend(listed.into_iter().map(|t| t.metadata.name));

        for name in names {
            let target_key = ObjectKey::new(key.namespace.clone(), name);
            if self.delete_target(&target_key, cancel).await? {
                info!(target = %target_key, "deleted target of removed route");
            }
        }
        Ok(())
    }

    async fn list_owned(
        &self,
        source: &SourceRoute,
        cancel: &CancellationToken,
    ) -> Result<Vec<DerivedTarget>, ReconcileError> {
        let selector = owner_selector(source);
        self.call(
            cancel,
            self.store.list_targets(source.namespace(), &selector),
        )
        .await
    }

    /// Deletes one target, retrying transient store failures.
    ///
    /// Returns false when the target was already gone.
    async fn delete_target(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<bool, ReconcileError> {
        let deleted = self
            .with_write_retries(&key.name, || {
                self.call(cancel, self.store.delete_target(key))
            })
            .await;
        match deleted {
            Ok(()) => Ok(true),
            Err(ReconcileError::Store(err)) if err.is_not_found() => {
                debug!(target = %key, "target already deleted");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use crate::events::MemoryEventRecorder;
    use crate::model::{Rule, Tunnel};
    use crate::store::MemoryStore;

    fn key() -> ObjectKey {
        ObjectKey::new("default", "myapp")
    }

    #[test]
    fn test_index_record_and_forget() {
        let index = OwnerIndex::new();
        assert!(index.is_empty());

        index.record(&key(), "uid-1", "pic-a");
        index.record(&key(), "uid-1", "pic-b");
        assert_eq!(index.len(), 1);
        assert_eq!(index.uid(&key()).as_deref(), Some("uid-1"));
        assert_eq!(index.names(&key()).len(), 2);

        index.forget(&key(), "pic-a");
        assert_eq!(
            index.names(&key()).into_iter().collect::<Vec<_>>(),
            vec!["pic-b".to_string()]
        );
    }

    #[test]
    fn test_index_resets_on_new_uid() {
        let index = OwnerIndex::new();
        index.record(&key(), "uid-1", "pic-a");
        index.record(&key(), "uid-2", "pic-b");

        assert_eq!(index.uid(&key()).as_deref(), Some("uid-2"));
        assert!(!index.names(&key()).contains("pic-a"));
    }

    #[test]
    fn test_index_remove() {
        let index = OwnerIndex::new();
        index.record(&key(), "uid-1", "pic-a");

        let (uid, names) = index.remove(&key()).unwrap();
        assert_eq!(uid, "uid-1");
        assert!(names.contains("pic-a"));
        assert!(index.remove(&key()).is_none());
        assert!(index.names(&key()).is_empty());
    }

    fn setup(cascade: bool) -> (Arc<MemoryStore>, Arc<MemoryEventRecorder>, Reconciler) {
        let store = Arc::new(MemoryStore::with_cascade(cascade));
        store.apply_tunnel(Tunnel::new("pangolin-system", "default"));
        let events = Arc::new(MemoryEventRecorder::new());
        let reconciler =
            Reconciler::new(store.clone(), events.clone(), Arc::new(Config::default()));
        (store, events, reconciler)
    }

    fn route(hosts: &[&str]) -> SourceRoute {
        hosts.iter().fold(
            SourceRoute::new("default", "myapp", "uid-1").with_class("pangolin"),
            |route, host| route.with_rule(Rule::new(host).path("/", "web", 80)),
        )
    }

    #[tokio::test]
    async fn test_orphans_removed_and_reported() {
        let (store, events, reconciler) = setup(true);
        let cancel = CancellationToken::new();
        store.apply_source_route(route(&["a.example.com", "b.example.com"]));
        reconciler.reconcile(&key(), &cancel).await.unwrap();
        assert_eq!(store.target_count(), 2);

        store.apply_source_route(route(&["a.example.com"]));
        reconciler.reconcile(&key(), &cancel).await.unwrap();

        assert_eq!(store.target_count(), 1);
        let deleted = events.with_reason(reasons::DELETED);
        assert_eq!(deleted.len(), 1);
        assert!(deleted[0].message.ends_with("(host removed)"));
        assert_eq!(reconciler.owner_index().names(&key()).len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_leaves_other_owners_alone() {
        let (store, _events, reconciler) = setup(true);
        let cancel = CancellationToken::new();
        let other = SourceRoute::new("default", "other", "uid-9")
            .with_class("pangolin")
            .with_rule(Rule::new("x.example.com").path("/", "web", 80));
        store.apply_source_route(other.clone());
        store.apply_source_route(route(&["a.example.com"]));
        reconciler.reconcile(&other.key(), &cancel).await.unwrap();
        reconciler.reconcile(&key(), &cancel).await.unwrap();

        store.apply_source_route(route(&[]).with_class("nginx"));
        reconciler.reconcile(&key(), &cancel).await.unwrap();

        let remaining = store.targets();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].label(labels::SOURCE_UID), Some("uid-9"));
    }

    #[tokio::test]
    async fn test_vanished_route_without_cascade() {
        let (store, events, reconciler) = setup(false);
        let cancel = CancellationToken::new();
        store.apply_source_route(route(&["a.example.com", "b.example.com"]));
        reconciler.reconcile(&key(), &cancel).await.unwrap();

        store.delete_source_route(&key());
        assert_eq!(store.target_count(), 2);

        reconciler.reconcile(&key(), &cancel).await.unwrap();
        assert_eq!(store.target_count(), 0);
        assert!(reconciler.owner_index().is_empty());
        // Nothing to attach events to once the route is gone.
        assert_eq!(events.count(reasons::DELETED), 0);
    }

    #[tokio::test]
    async fn test_vanished_route_after_restart() {
        let (store, _events, reconciler) = setup(false);
        let cancel = CancellationToken::new();
        store.apply_source_route(route(&["a.example.com"]));
        reconciler.reconcile(&key(), &cancel).await.unwrap();
        store.delete_source_route(&key());

        // A fresh reconciler has an empty index.
        let restarted = Reconciler::new(
            store.clone(),
            Arc::new(MemoryEventRecorder::new()),
            Arc::new(Config::default()),
        );
        restarted.reconcile(&key(), &cancel).await.unwrap();
        assert_eq!(store.target_count(), 0);
    }
}
