//! Connection resilience.
//!
//! The [`ConnectionManager`] owns the logical session and the connectivity
//! state machine:
//!
//! ```text
//! Initial -> Connecting -> Connected -> { Offline | Faulted } -> Disposed
//! ```
//!
//! A transient transport failure moves to Connecting and retries with
//! backoff. Exceeding the offline budget escalates to Faulted (standard
//! mode) or Offline (tolerant mode).

mod manager;
mod state;

pub use manager::{backoff_for_attempt, ConnectionManager};
pub use state::{ConnectionState, StateChange, StateListener};
