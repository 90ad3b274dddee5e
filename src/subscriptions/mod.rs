//! Subscriptions to server-side item changes.
//!
//! A subscription is a standing query held by the server. The client keeps
//! a table of its subscriptions and routes each pushed envelope, tagged by
//! subscription id, to the owning callback on the user queue.
//!
//! Subscriptions support:
//! - Filtering by data type, item kind, app scope and query expression
//! - New-only, info-only and no-wait variants
//! - Batched keep-alive (one extend request for all)
//! - Optimistic cancellation: pushes for a cancelled id are dropped at once
//!
//! # Example
//!
//! ```ignore
//! let id = client.subscribe(
//!     SubscriptionOptions::all().data_type("Trade"),
//!     Arc::new(|id, item| println!("{}: {:?}", id, item.name())),
//! )?;
//! // ...
//! client.unsubscribe(id)?;
//! ```

mod manager;
mod types;

pub use manager::{CancelHandle, SubscriptionManager};
pub use types::{
    SubscriptionCallback, SubscriptionInfo, SubscriptionOptions, SubscriptionSpec,
    SubscriptionState,
};
