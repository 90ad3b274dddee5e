//! # Itemwire
//!
//! Client core for a remote item store with live subscriptions: save, load,
//! query and subscribe to named, versioned, expiring, optionally encrypted
//! items over a single logical session.
//!
//! ## Core Concepts
//!
//! - **Items**: Named values frozen through a serialize, compress, encrypt
//!   and sign pipeline; decoded lazily on the way back
//! - **Requests**: Correlated with replies by id, paged, with back-pressure
//!   and per-request deadlines
//! - **Connection**: Transmit-with-retry, quadratic backoff and an offline
//!   budget driving the connection state
//! - **Subscriptions**: Standing queries whose pushes run callbacks on a
//!   dedicated queue
//! - **Caches**: Local name-keyed views kept current by subscriptions
//!
//! ## Example
//!
//! ```ignore
//! use itemwire::{Client, ClientConfig, QueryExpr, SubscriptionOptions};
//!
//! let client = Client::new(ClientConfig::default(), transport)?;
//!
//! // Save and load a typed value
//! client.save_object("Trade.1", Trade { notional: 1e6 })?;
//! let trade: Option<Arc<Trade>> = client.load_object("Trade.1")?;
//!
//! // Watch every trade
//! let id = client.subscribe(
//!     SubscriptionOptions::new(QueryExpr::all()).data_type("Trade"),
//!     Arc::new(|_, item| println!("{:?}", item.name())),
//! )?;
//! client.unsubscribe(id)?;
//! ```

pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod items;
pub mod requests;
pub mod subscriptions;
pub mod transport;
pub mod types;

// Re-exports
pub use cache::{CacheChange, CacheChangeEvent, CacheChangeHandler, CacheSource, ItemCache};
pub use client::Client;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ClientConfig, ClientFactory, CoreMode};
pub use connection::{backoff_for_attempt, ConnectionState, StateChange, StateListener};
pub use crypto::{CryptoError, CryptoProvider, NoKeys};
pub use dispatch::DispatchQueue;
pub use error::{ClientError, ErrorKind, Result, TimeoutReason};
pub use items::{Expiry, FreezeContext, Item, ItemBuilder, WireItem};
pub use requests::{ReplyHandle, RequestState};
pub use subscriptions::{
    CancelHandle, SubscriptionCallback, SubscriptionInfo, SubscriptionOptions, SubscriptionSpec,
    SubscriptionState,
};
pub use transport::{
    InboundHandler, InboundSink, RequestBody, RequestEnvelope, SelectQuery, Transport,
    TransportError, SAVE_PAGE_SIZE,
};
pub use types::*;
