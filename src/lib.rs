//! Configuration adapter between a centralized network-configuration
//! service and a 5G mobile-core control plane.
//!
//! Exposes one schema-validated config tree over a remote-configuration
//! protocol (Capabilities/Get/Set/Subscribe) and reconciles mutations into
//! per-endpoint JSON documents pushed to downstream core services.

pub mod config;
pub mod imsi;
pub mod observability;
pub mod server;
pub mod sync;
pub mod tree;

pub use config::AdapterConfig;
pub use server::{ProtocolServer, SubscriptionRegistry};
pub use sync::{CoreMapper, Synchronizer};
pub use tree::TreeStore;
