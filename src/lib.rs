//! Pangolin ingress controller.
//!
//! Watches Ingress-style source routes and maintains one Pangolin resource
//! per unique host, routed through a shared tunnel. The library holds the
//! reconciliation core; the `pic-controller` binary wires it to a store,
//! a worker pool and a health server.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod health;
pub mod host;
pub mod model;
pub mod naming;
pub mod seed;
pub mod store;

pub use config::Config;
pub use controller::{Action, Controller, Reconciler};
pub use error::{BuildError, ConfigError, ReconcileError, StoreError};
pub use events::{EventRecorder, LogEventRecorder, MemoryEventRecorder};
pub use store::{MemoryStore, ObjectStore};
