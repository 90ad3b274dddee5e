//! Request records held by the correlator.

use crate::error::{ClientError, Result};
use crate::items::Item;
use crate::transport::RequestBody;
use crate::types::{RequestId, Timestamp};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting in the outgoing queue.
    Queued,
    /// Sent; no reply yet.
    Transmitted,
    /// At least one page received, more expected.
    PartiallyAnswered,
    Completed,
    Faulted,
    Expired,
}

impl RequestState {
    /// Terminal states are resolved and evicted by the next sweep.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Faulted | RequestState::Expired
        )
    }
}

/// What gets transmitted for a request. Immutable once enqueued.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
    pub id: RequestId,
    pub body: RequestBody,
    /// Trace this request at debug level.
    pub debug: bool,
    pub submitted: Timestamp,
    pub deadline: Timestamp,
}

impl OutboundRequest {
    pub fn new(body: RequestBody, submitted: Timestamp, timeout: Duration, debug: bool) -> Self {
        Self {
            id: RequestId::new(),
            body,
            debug,
            submitted,
            deadline: submitted.saturating_add(timeout),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now > self.deadline
    }
}

pub(crate) type Reply = Result<Vec<Item>>;

/// Entry in the pending table.
pub(crate) struct PendingRequest {
    pub request: std::sync::Arc<OutboundRequest>,
    pub state: RequestState,
    /// Items from every page, in arrival order.
    pub results: Vec<Item>,
    pub error: Option<ClientError>,
    reply: Option<Sender<Reply>>,
}

impl PendingRequest {
    pub fn new(request: std::sync::Arc<OutboundRequest>, reply: Sender<Reply>) -> Self {
        Self {
            request,
            state: RequestState::Queued,
            results: Vec::new(),
            error: None,
            reply: Some(reply),
        }
    }

    /// Take the reply channel and the outcome. Callable once.
    pub fn take_resolution(&mut self) -> Option<(Sender<Reply>, Reply)> {
        let reply = self.reply.take()?;
        let outcome = match self.state {
            RequestState::Completed => Ok(std::mem::take(&mut self.results)),
            _ => Err(self
                .error
                .take()
                .unwrap_or_else(|| ClientError::Unexpected("request resolved without outcome".into()))),
        };
        Some((reply, outcome))
    }
}

/// Caller's side of a request. Resolved exactly once.
pub struct ReplyHandle {
    request_id: RequestId,
    receiver: Receiver<Reply>,
}

impl ReplyHandle {
    pub(crate) fn new(request_id: RequestId, receiver: Receiver<Reply>) -> Self {
        Self {
            request_id,
            receiver,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Block until the request resolves.
    pub fn wait(self) -> Result<Vec<Item>> {
        self.receiver.recv().unwrap_or(Err(ClientError::Disposed))
    }

    /// Block for at most `timeout`. Returns the handle back if it has not
    /// resolved yet.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<Vec<Item>>, Self> {
        match self.receiver.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => Err(self),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(ClientError::Disposed)),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !self.receiver.is_empty()
    }
}

/// Submits requests through the client's correlator and main queue.
pub trait Submitter: Send + Sync {
    fn submit(&self, body: RequestBody) -> Result<ReplyHandle>;
}

impl std::fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("request_id", &self.request_id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
