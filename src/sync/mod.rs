//! Synchronization subsystem.
//!
//! # Data Flow
//! ```text
//! Set RPC (tree mutated)
//!     → synchronizer.rs (deep-copied snapshot, Apply/Forced enqueued,
//!                        Delete reconciled synchronously)
//!     → mailbox.rs (single-slot coalescing queue, newest snapshot wins)
//!     → worker task → mapper.rs (tree → per-endpoint JSON documents)
//!     → cache.rs (skip pushes whose content is unchanged)
//!     → pusher.rs (HTTP POST/DELETE to downstream services)
//! ```
//!
//! # Design Decisions
//! - One serial worker; at most one reconciliation in flight
//! - Push failures retry on a fixed interval unless a newer snapshot
//!   supersedes the one being retried
//! - Forced synchronization invalidates the cache from the worker task,
//!   keeping the cache single-writer

pub mod cache;
pub mod mailbox;
pub mod mapper;
pub mod pusher;
pub mod synchronizer;

pub use cache::PushCache;
pub use mailbox::Mailbox;
pub use mapper::{CoreMapper, ModelInfo, SchemaMapper};
pub use pusher::{HttpPusher, PushError, Pusher};
pub use synchronizer::{SyncError, SyncKind, Synchronizer};
