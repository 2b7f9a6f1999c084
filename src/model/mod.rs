//! Object model shared by the store, the reconciler and the event recorder.
//!
//! Three kinds of objects exist:
//! - [`SourceRoute`]: Ingress-style host/path rules, read-only to the controller.
//! - [`DerivedTarget`]: one Pangolin resource per unique host, owned by the controller.
//! - [`Tunnel`]: the shared upstream every derived target points at.

mod source;
mod target;
mod tunnel;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use source::{
    BackendPort, PathRule, PathType, Rule, ServiceBackend, SourceRoute, SourceRouteSpec,
};
pub use target::{BackendTarget, DerivedTarget, DerivedTargetSpec, HttpConfig, TunnelRef};
pub use tunnel::Tunnel;

/// `namespace/name` identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Link from a derived object to the object that owns it.
///
/// The store removes owned objects when the owner goes away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: String,
    #[serde(default)]
    pub controller: bool,
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Version stamped by the store on every write; used for optimistic concurrency.
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(&self.namespace, &self.name)
    }

    /// Returns true if every `selector` pair is present in the labels.
    pub fn matches_labels(&self, selector: &BTreeMap<String, String>) -> bool {
        selector
            .iter()
            .all(|(k, v)| self.labels.get(k).is_some_and(|actual| actual == v))
    }
}
