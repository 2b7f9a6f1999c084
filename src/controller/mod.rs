//! Reconciliation of source routes into per-host derived targets.
//!
//! A pass over one route runs, in order: fetch, managed check, tunnel
//! resolution, host grouping, target building, create/update, orphan
//! cleanup. Passes for different routes are independent and run
//! concurrently on the [`Controller`] worker pool.

mod builder;
mod cleanup;
mod diff;
mod grouping;
mod queue;
mod reconciler;

pub use builder::{
    attach_owner, build_target, owner_labels, owner_selector, path_match_type, path_priority,
    Overrides, TARGET_PROTOCOL,
};
pub use cleanup::OwnerIndex;
pub use diff::spec_changed;
pub use grouping::{group_host_paths, HostGroup, HostGrouping};
pub use queue::{Backoff, Controller, WorkQueue};
pub use reconciler::{Action, Reconciler};

/// Directives read from a source route's annotations.
pub mod annotations {
    /// `"false"` (any case) takes the route out of management.
    pub const ENABLED: &str = "pangolin.ingress.k8s.io/enabled";
    pub const TUNNEL_NAME: &str = "pangolin.ingress.k8s.io/tunnel-name";
    pub const DOMAIN_NAME: &str = "pangolin.ingress.k8s.io/domain-name";
    pub const SUBDOMAIN: &str = "pangolin.ingress.k8s.io/subdomain";
    pub const SSO: &str = "pangolin.ingress.k8s.io/sso";
    pub const BLOCK_ACCESS: &str = "pangolin.ingress.k8s.io/block-access";
}

/// Identity labels stamped on every derived target.
pub mod labels {
    pub const SOURCE_UID: &str = "pic.ingress.k8s.io/uid";
    pub const SOURCE_NAME: &str = "pic.ingress.k8s.io/name";
    pub const SOURCE_NAMESPACE: &str = "pic.ingress.k8s.io/namespace";
}
