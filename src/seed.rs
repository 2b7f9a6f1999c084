//! Initial store contents loaded from a JSON file.
//!
//! ```json
//! {
//!   "tunnels": [{"metadata": {"namespace": "pangolin-system", "name": "default"}}],
//!   "sourceRoutes": [
//!     {"metadata": {...}, "spec": {"ingressClassName": "pangolin", "rules": [...]}}
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{SourceRoute, Tunnel};
use crate::store::MemoryStore;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub tunnels: Vec<Tunnel>,
    #[serde(default)]
    pub source_routes: Vec<SourceRoute>,
}

impl Seed {
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("invalid seed document")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seed file {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Writes every seeded object into `store`.
    pub fn apply(self, store: &MemoryStore) {
        for tunnel in self.tunnels {
            store.apply_tunnel(tunnel);
        }
        for route in self.source_routes {
            store.apply_source_route(route);
        }
    }
}
