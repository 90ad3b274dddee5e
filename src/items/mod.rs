//! Items and their transform pipeline.
//!
//! Freezing runs serialize, compress, encrypt and sign in that order and
//! records what it did in the item's system properties. Received items are
//! decoded lazily in the reverse order.

pub mod codec;
mod item;
pub mod props;

pub use item::{Expiry, FreezeContext, Item, ItemBuilder, WireItem};
