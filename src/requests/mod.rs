//! Request correlation.
//!
//! Every call that talks to the server becomes an [`OutboundRequest`] queued
//! in the [`RequestCorrelator`]. Replies arrive asynchronously, tagged with
//! the request id, and are accumulated page by page until the last one
//! completes the caller's [`ReplyHandle`].
//!
//! # Lifecycle
//!
//! 1. `enqueue` adds the request (blocking under back-pressure)
//! 2. the connection manager transmits it
//! 3. pages arrive via `on_envelope`, or a failure via `on_fault`
//! 4. the next `sweep` resolves the handle and evicts the request

mod correlator;
mod types;

pub use correlator::RequestCorrelator;
pub use types::{OutboundRequest, ReplyHandle, RequestState, Submitter};
