//! Session ownership and transmit-with-retry.

use super::state::{ConnectionState, StateChange, StateListener};
use crate::clock::Clock;
use crate::config::CoreMode;
use crate::dispatch::DispatchQueue;
use crate::error::{ClientError, Result, TimeoutReason};
use crate::requests::OutboundRequest;
use crate::transport::{RequestEnvelope, Transport, TransportError};
use crate::types::{ClientInfo, SessionId, Timestamp};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MIN_BACKOFF_SECS: f64 = 0.125;
const MAX_BACKOFF_SECS: f64 = 15.0;

/// Delay before retry number `attempt` (1-based).
pub fn backoff_for_attempt(attempt: u32) -> Duration {
    let a = f64::from(attempt.max(1) - 1);
    let secs = (MIN_BACKOFF_SECS + 0.01 * a * a + 0.1 * a).clamp(MIN_BACKOFF_SECS, MAX_BACKOFF_SECS);
    Duration::from_secs_f64(secs)
}

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    client_info: ClientInfo,
    mode: CoreMode,
    offline_timeout: Duration,
    debug_requests: bool,
    state: Mutex<ConnectionState>,
    /// Start of the current outage: the first failed transmit since the
    /// last success. None while connected.
    offline_since: Mutex<Option<Timestamp>>,
    session: Mutex<Option<SessionId>>,
    listeners: Mutex<Vec<StateListener>>,
    user_queue: Arc<DispatchQueue>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
        client_info: ClientInfo,
        mode: CoreMode,
        offline_timeout: Duration,
        debug_requests: bool,
        user_queue: Arc<DispatchQueue>,
    ) -> Self {
        Self {
            transport,
            clock,
            client_info,
            mode,
            offline_timeout,
            debug_requests,
            state: Mutex::new(ConnectionState::Initial),
            offline_since: Mutex::new(None),
            session: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            user_queue,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn mode(&self) -> CoreMode {
        self.mode
    }

    pub fn session(&self) -> Option<SessionId> {
        *self.session.lock()
    }

    /// Fails fast once the client is faulted or disposed.
    pub fn check_accepting(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Faulted => Err(ClientError::Faulted),
            ConnectionState::Disposed => Err(ClientError::Disposed),
            _ => Ok(()),
        }
    }

    pub fn on_state_change(&self, listener: StateListener) {
        self.listeners.lock().push(listener);
    }

    /// Move to `new` if the transition is allowed, log it, and queue
    /// listener notifications on the user queue.
    pub fn set_state(&self, new: ConnectionState) {
        let old = {
            let mut state = self.state.lock();
            if !state.can_transition_to(new) {
                return;
            }
            std::mem::replace(&mut *state, new)
        };

        match new {
            ConnectionState::Faulted => error!(%old, %new, "connection state changed"),
            ConnectionState::Offline => warn!(%old, %new, "connection state changed"),
            ConnectionState::Connected | ConnectionState::Disposed => {
                info!(%old, %new, "connection state changed")
            }
            _ => debug!(%old, %new, "connection state changed"),
        }

        let listeners = self.listeners.lock().clone();
        if listeners.is_empty() {
            return;
        }
        let change = StateChange {
            old,
            new,
            at: self.clock.now(),
        };
        self.user_queue.dispatch(move || {
            for listener in &listeners {
                listener(&change);
            }
        });
    }

    /// Send `request`, retrying transient failures with backoff.
    ///
    /// Fails with a request timeout once the request's deadline passes and
    /// with an offline timeout once the offline budget is exhausted (which
    /// also escalates the shared state). Any non-transient failure faults
    /// the client.
    ///
    /// `before_sleep` runs ahead of every backoff sleep with the current
    /// time, while `request` is still within its deadline.
    pub fn transmit_or_retry(&self, request: &OutboundRequest, before_sleep: &dyn Fn(Timestamp)) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            self.check_accepting()?;
            match self.transmit(request) {
                Ok(()) => {
                    *self.offline_since.lock() = None;
                    self.set_state(ConnectionState::Connected);
                    return Ok(());
                }
                Err(ClientError::Transport(e)) if e.is_transient() => {
                    attempt = attempt.saturating_add(1);
                    self.backoff(request, attempt, &e, before_sleep)?;
                }
                Err(e) => {
                    error!(request_id = %request.id, error = %e, "transmit failed unexpectedly");
                    self.set_state(ConnectionState::Faulted);
                    return Err(e);
                }
            }
        }
    }

    fn transmit(&self, request: &OutboundRequest) -> Result<()> {
        let session = self.ensure_session()?;
        let envelopes = RequestEnvelope::paged(session, request.id, request.debug, &request.body);
        if request.debug || self.debug_requests {
            debug!(
                request_id = %request.id,
                body = request.body.name(),
                envelopes = envelopes.len(),
                "sending request"
            );
        }
        for envelope in &envelopes {
            self.transport.send(envelope)?;
        }
        Ok(())
    }

    fn ensure_session(&self) -> std::result::Result<SessionId, TransportError> {
        let mut session = self.session.lock();
        if let Some(id) = *session {
            return Ok(id);
        }
        let id = self.transport.open_session(&self.client_info)?;
        debug!(session = %id, "session opened");
        *session = Some(id);
        Ok(id)
    }

    fn backoff(
        &self,
        request: &OutboundRequest,
        attempt: u32,
        cause: &TransportError,
        before_sleep: &dyn Fn(Timestamp),
    ) -> Result<()> {
        let delay = backoff_for_attempt(attempt);
        self.set_state(ConnectionState::Connecting);

        let now = self.clock.now();
        if request.is_expired(now) {
            debug!(request_id = %request.id, attempt, "request deadline passed while retrying");
            return Err(ClientError::Timeout(TimeoutReason::Request));
        }
        let outage_start = *self.offline_since.lock().get_or_insert(now);
        let offline_for = now.since(outage_start);
        if offline_for > self.offline_timeout {
            warn!(
                request_id = %request.id,
                offline_secs = offline_for.as_secs(),
                mode = ?self.mode,
                "offline timeout exceeded"
            );
            match self.mode {
                CoreMode::Standard => self.set_state(ConnectionState::Faulted),
                CoreMode::Tolerant => {
                    // Offline keeps accepting requests; each gets a fresh budget.
                    *self.offline_since.lock() = None;
                    self.set_state(ConnectionState::Offline);
                }
            }
            return Err(ClientError::Timeout(TimeoutReason::Offline));
        }

        self.drop_session();
        debug!(
            request_id = %request.id,
            attempt,
            error = %cause,
            delay_ms = delay.as_millis() as u64,
            "transmit failed, retrying"
        );
        before_sleep(now);
        self.clock.sleep(delay);
        Ok(())
    }

    fn drop_session(&self) {
        if let Some(session) = self.session.lock().take() {
            self.transport.close_session(session);
        }
    }

    /// Close the session, if any.
    pub fn disconnect(&self) {
        self.drop_session();
    }
}
