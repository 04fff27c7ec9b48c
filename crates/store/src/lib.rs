//! Transactional persistence for channels and objectives.
//!
//! Serialization is per channel: each aggregate sits behind its own lock,
//! taken with a bounded-backoff retry policy, and multi-channel batches
//! always lock in ascending channel-id order.

mod retry;
mod store;

pub use retry::RetryPolicy;
pub use store::{Store, StoreError};
