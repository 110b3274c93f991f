//! Config tree subsystem.
//!
//! # Data Flow
//! ```text
//! initial payload (JSON bytes)
//!     → store.rs (TreeStore, one RwLock-guarded document)
//!     → path.rs (slash/bracket path syntax ↔ structured Path)
//!     → value.rs (typed leaf values, updates, notifications)
//!
//! Get/Subscribe read under the read lock; Set mutates under the write lock.
//! ```
//!
//! # Design Decisions
//! - One mutable tree per server instance, replaced field-by-field
//! - List-indexed elements select array members by key fields
//! - The lock is never held across a downstream network call

pub mod path;
pub mod store;
pub mod value;

pub use path::{Path, PathElem};
pub use store::TreeStore;
pub use value::{Notification, TypedValue, Update};
