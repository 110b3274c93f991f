//! Protocol server subsystem.
//!
//! # Data Flow
//! ```text
//! Client RPC
//!     → service.rs (axum router: capabilities/get/set handlers)
//!     → collector.rs (snapshot collection under the read lock)
//!     → tree store (read or write lock)
//!     → sync (Set hands snapshots to the synchronizer)
//!
//! Subscribe (WebSocket)
//!     → subscribe.rs (session engine: ONCE / POLL / STREAM modes,
//!                     per-client outbound queue, on-change registry)
//! ```
//!
//! # Design Decisions
//! - Capabilities/Get/Set are JSON-over-HTTP; Subscribe is a duplex
//!   WebSocket session
//! - Errors surface as RPC status codes only; asynchronous reconciliation
//!   failures are invisible to protocol clients

pub mod collector;
pub mod error;
pub mod service;
pub mod subscribe;

pub use error::ProtocolError;
pub use service::{AppState, ProtocolServer};
pub use subscribe::SubscriptionRegistry;
