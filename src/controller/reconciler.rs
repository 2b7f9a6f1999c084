//! Per-route reconciliation.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::builder::{attach_owner, build_target, Overrides};
use super::cleanup::OwnerIndex;
use super::diff::spec_changed;
use super::grouping::group_host_paths;
use super::{annotations, labels};
use crate::config::Config;
use crate::error::{ReconcileError, StoreError};
use crate::events::{reasons, EventRecorder, EventType};
use crate::model::{DerivedTarget, ObjectKey, SourceRoute, TunnelRef};
use crate::store::ObjectStore;

/// What the work queue should do with a key after a successful pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Converged; wait for the next change.
    Done,
    /// A dependency is missing; try again after backoff.
    Requeue,
}

/// Reconciles source routes against the object store.
///
/// Holds no per-route state besides the [`OwnerIndex`], so one instance is
/// shared by every worker.
pub struct Reconciler {
    pub(super) store: Arc<dyn ObjectStore>,
    pub(super) events: Arc<dyn EventRecorder>,
    pub(super) config: Arc<Config>,
    pub(super) owners: OwnerIndex,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventRecorder>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            store,
            events,
            config,
            owners: OwnerIndex::new(),
        }
    }

    /// Reverse index of targets created per route.
    pub fn owner_index(&self) -> &OwnerIndex {
        &self.owners
    }

    /// Runs one pass for the route at `key`.
    ///
    /// Writes committed before a failure or cancellation stay in place; the
    /// next pass converges from there.
    #[instrument(skip(self, cancel), fields(source = %key))]
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<Action, ReconcileError> {
        debug!("reconciling source route");

        let Some(source) = self.call(cancel, self.store.get_source_route(key)).await? else {
            debug!("source route not found, assuming deleted");
            if self.store.supports_cascade() {
                self.owners.remove(key);
            } else {
                self.delete_vanished(key, cancel).await?;
            }
            return Ok(Action::Done);
        };

        // Every owner selector is keyed by UID; an empty one would match
        // the targets of every other UID-less route.
        if source.uid().is_empty() {
            return Err(ReconcileError::MissingUid {
                key: key.to_string(),
            });
        }

        if !self.is_managed(&source) {
            debug!("source route not managed");
            self.delete_all_owned(&source, cancel).await?;
            return Ok(Action::Done);
        }

        let tunnel_name = match self.resolve_tunnel(&source) {
            Ok(name) => name,
            Err(err) => {
                warn!(error = %err, "failed to resolve tunnel");
                self.warn(
                    &source,
                    reasons::TUNNEL_RESOLUTION_FAILED,
                    err.to_string(),
                )
                .await;
                return Err(err);
            }
        };

        let Some(tunnel) = self.find_tunnel(&source, &tunnel_name, cancel).await? else {
            return Ok(Action::Requeue);
        };

        self.process_hosts(&source, &tunnel, cancel).await?;
        Ok(Action::Done)
    }

    /// Whether this controller owns the route's lifecycle.
    pub fn is_managed(&self, source: &SourceRoute) -> bool {
        if let Some(enabled) = source.annotations().get(annotations::ENABLED) {
            if enabled.eq_ignore_ascii_case("false") {
                return false;
            }
        }
        let class = source.class();
        class == self.config.ingress_class || class.starts_with(&self.config.class_prefix())
    }

    /// Determines the tunnel name for a managed route.
    ///
    /// Order: explicit directive, default tunnel for the plain class, alias
    /// mapping for `<class>-<suffix>` (falling back to the suffix itself).
    pub fn resolve_tunnel(&self, source: &SourceRoute) -> Result<String, ReconcileError> {
        if let Some(name) = source.directive(annotations::TUNNEL_NAME) {
            return Ok(name.to_string());
        }

        let class = source.class();
        if class == self.config.ingress_class {
            return Ok(self.config.default_tunnel_name.clone());
        }

        match class.strip_prefix(&self.config.class_prefix()) {
            Some(suffix) if !suffix.is_empty() => Ok(self
                .config
                .tunnel_mapping
                .get(suffix)
                .unwrap_or(suffix)
                .to_string()),
            _ => Err(ReconcileError::TunnelResolution {
                class: class.to_string(),
            }),
        }
    }

    /// Looks the tunnel up by name across namespaces.
    ///
    /// Returns `None` after publishing a warning when the tunnel is missing
    /// or the name exists in more than one namespace.
    async fn find_tunnel(
        &self,
        source: &SourceRoute,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<TunnelRef>, ReconcileError> {
        let tunnels = self.call(cancel, self.store.list_tunnels()).await?;
        let matches: Vec<TunnelRef> = tunnels
            .iter()
            .filter(|t| t.name() == name)
            .map(|t| TunnelRef {
                name: t.name().to_string(),
                namespace: t.namespace().to_string(),
            })
            .collect();

        match matches.as_slice() {
            [tunnel] => Ok(Some(tunnel.clone())),
            [] => {
                warn!(tunnel = name, "tunnel not found");
                self.warn(
                    source,
                    reasons::TUNNEL_NOT_FOUND,
                    format!("Tunnel {name:?} not found"),
                )
                .await;
                Ok(None)
            }
            many => {
                let namespaces: Vec<&str> = many.iter().map(|t| t.namespace.as_str()).collect();
                warn!(tunnel = name, ?namespaces, "tunnel name is ambiguous");
                self.warn(
                    source,
                    reasons::TUNNEL_AMBIGUOUS,
                    format!(
                        "Tunnel {name:?} exists in several namespaces: {}",
                        namespaces.join(", ")
                    ),
                )
                .await;
                Ok(None)
            }
        }
    }

    /// Builds and applies one target per host, then removes orphans.
    async fn process_hosts(
        &self,
        source: &SourceRoute,
        tunnel: &TunnelRef,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        if source.spec.rules.is_empty() {
            info!("source route has no rules, skipping");
            self.warn(
                source,
                reasons::NO_RULES,
                "Ingress has no rules defined".into(),
            )
            .await;
            return Ok(());
        }

        let grouping = group_host_paths(&source.spec.rules);
        for _ in 0..grouping.empty_hosts {
            self.warn(
                source,
                reasons::EMPTY_HOST,
                "Rule with empty host skipped".into(),
            )
            .await;
        }

        let overrides = Overrides::from_source(source);
        // derived name -> host
        let mut desired: BTreeMap<String, String> = BTreeMap::new();

        for group in &grouping.groups {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }

            let mut target = match build_target(
                source,
                group,
                tunnel,
                &overrides,
                &self.config.backend_scheme,
            ) {
                Ok(target) => target,
                Err(err) => {
                    warn!(host = %group.host, error = %err, "skipping host");
                    self.warn(
                        source,
                        reasons::INVALID_HOST,
                        format!("Host {:?}: {err}", group.host),
                    )
                    .await;
                    continue;
                }
            };
            attach_owner(&mut target, source);

            if let Some(first) = desired.get(target.name()) {
                return Err(ReconcileError::NameCollision {
                    name: target.name().to_string(),
                    first: first.clone(),
                    second: group.host.clone(),
                });
            }
            desired.insert(target.name().to_string(), group.host.clone());

            self.apply_target(source, &target, cancel).await?;
        }

        self.cleanup_orphans(source, &desired, cancel).await
    }

    /// Creates or updates one target, retrying conflicting writes.
    async fn apply_target(
        &self,
        source: &SourceRoute,
        desired: &DerivedTarget,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        self.with_write_retries(desired.name(), || {
            self.try_apply_target(source, desired, cancel)
        })
        .await
    }

    /// Runs `step` until it succeeds, fails with a non-retryable error, or
    /// `write_retries` attempts are used up.
    pub(super) async fn with_write_retries<T, F, Fut>(
        &self,
        name: &str,
        mut step: F,
    ) -> Result<T, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ReconcileError>>,
    {
        let attempts = self.config.write_retries.max(1);
        let mut last_error = StoreError::unavailable("no write attempted");

        for attempt in 1..=attempts {
            match step().await {
                Ok(value) => return Ok(value),
                Err(ReconcileError::Store(err)) if err.is_retryable() => {
                    debug!(target = name, attempt, error = %err, "retrying target write");
                    last_error = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(ReconcileError::WriteRetriesExhausted {
            name: name.to_string(),
            attempts,
            source: last_error,
        })
    }

    async fn try_apply_target(
        &self,
        source: &SourceRoute,
        desired: &DerivedTarget,
        cancel: &CancellationToken,
    ) -> Result<(), ReconcileError> {
        let key = desired.key();
        let existing = self.call(cancel, self.store.get_target(&key)).await?;

        let Some(mut existing) = existing else {
            info!(target = desired.name(), "creating target");
            self.call(cancel, self.store.create_target(desired)).await?;
            self.owners.record(&source.key(), source.uid(), desired.name());
            self.normal(
                source,
                reasons::CREATED,
                format!("Created PangolinResource {}", desired.name()),
            )
            .await;
            return Ok(());
        };

        if existing.label(labels::SOURCE_UID) != Some(source.uid()) {
            return Err(ReconcileError::ForeignObject {
                name: existing.name().to_string(),
                uid: source.uid().to_string(),
            });
        }
        self.owners.record(&source.key(), source.uid(), desired.name());

        if !spec_changed(&existing.spec, &desired.spec) {
            debug!(target = desired.name(), "target up to date");
            return Ok(());
        }

        info!(target = desired.name(), "updating target");
        existing.spec = desired.spec.clone();
        existing
            .metadata
            .labels
            .extend(desired.metadata.labels.clone());
        existing.metadata.owner_references = desired.metadata.owner_references.clone();
        self.call(cancel, self.store.update_target(&existing)).await?;
        self.normal(
            source,
            reasons::UPDATED,
            format!("Updated PangolinResource {}", desired.name()),
        )
        .await;
        Ok(())
    }

    /// Runs a store call bounded by the configured timeout and `cancel`.
    pub(super) async fn call<T, F>(
        &self,
        cancel: &CancellationToken,
        fut: F,
    ) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.store_timeout();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReconcileError::Cancelled),
            result = tokio::time::timeout(timeout, fut) => match result {
                Ok(inner) => inner.map_err(ReconcileError::from),
                Err(_) => Err(StoreError::Timeout(timeout).into()),
            },
        }
    }

    pub(super) async fn normal(&self, source: &SourceRoute, reason: &str, message: String) {
        self.events
            .publish(source, EventType::Normal, reason, message)
            .await;
    }

    pub(super) async fn warn(&self, source: &SourceRoute, reason: &str, message: String) {
        self.events
            .publish(source, EventType::Warning, reason, message)
            .await;
    }
}
