//! Pangolin resource derived from one host of a source route.

use serde::{Deserialize, Serialize};

use super::{ObjectKey, ObjectMeta};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTarget {
    pub metadata: ObjectMeta,
    pub spec: DerivedTargetSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedTargetSpec {
    /// Display name shown in Pangolin; unique per host.
    pub name: String,
    pub enabled: bool,
    pub protocol: String,
    pub tunnel_ref: TunnelRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_config: Option<HttpConfig>,
    pub targets: Vec<BackendTarget>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub domain_name: String,
    pub subdomain: String,
    #[serde(default)]
    pub sso: bool,
    #[serde(default)]
    pub block_access: bool,
}

/// One path-to-backend mapping inside a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendTarget {
    /// In-cluster DNS name of the backend service.
    pub ip: String,
    pub port: u16,
    /// Scheme used to reach the backend.
    pub method: String,
    pub path: String,
    pub path_match_type: String,
    pub priority: u32,
}

impl DerivedTarget {
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Value of the given label, if set.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }
}
