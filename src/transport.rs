//! Transport abstraction.
//!
//! The client hands envelopes to a [`Transport`] and receives replies through
//! the [`InboundSink`] the transport was attached to. Replies are tagged with
//! the originating request id, pushes with a subscription id.

use crate::items::WireItem;
use crate::subscriptions::SubscriptionSpec;
use crate::types::{ClientInfo, ItemId, ItemKind, QueryExpr, RequestId, SessionId, SubscriptionId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Maximum items carried by one save envelope.
pub const SAVE_PAGE_SIZE: usize = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Communication failure: {0}")]
    Communication(String),

    #[error("Transport timeout: {0}")]
    Timeout(String),

    #[error("Unexpected transport failure: {0}")]
    Unexpected(String),
}

impl TransportError {
    /// Communication failures and timeouts are retried with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Communication(_) | TransportError::Timeout(_)
        )
    }
}

/// Item selection sent with a load or count.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub data_type: Option<String>,
    pub item_kind: ItemKind,
    pub app_scopes: Vec<String>,
    pub filter: Option<QueryExpr>,
    /// Exact ids; empty means no id constraint.
    pub item_ids: Vec<ItemId>,
    /// Exact names; empty means no name constraint.
    pub item_names: Vec<String>,
    pub min_usn: i64,
    /// Include tombstones and expired items.
    pub include_deleted: bool,
    /// Return metadata only.
    pub exclude_data_body: bool,
    pub order_by: Option<QueryExpr>,
    pub start_row: usize,
    /// Zero means unlimited.
    pub row_count: usize,
}

impl Default for SelectQuery {
    fn default() -> Self {
        Self {
            data_type: None,
            item_kind: ItemKind::Object,
            app_scopes: Vec::new(),
            filter: None,
            item_ids: Vec::new(),
            item_names: Vec::new(),
            min_usn: 0,
            include_deleted: false,
            exclude_data_body: false,
            order_by: None,
            start_row: 0,
            row_count: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    Select(SelectQuery),
    Save(Vec<WireItem>),
    CreateSubscription(SubscriptionSpec),
    /// Renew every subscription held by the session.
    ExtendSubscriptions,
    CancelSubscription(SubscriptionId),
}

impl RequestBody {
    pub fn name(&self) -> &'static str {
        match self {
            RequestBody::Select(_) => "SelectMultipleItems",
            RequestBody::Save(_) => "SaveMultipleItems",
            RequestBody::CreateSubscription(_) => "CreateSubscription",
            RequestBody::ExtendSubscriptions => "ExtendSubscription",
            RequestBody::CancelSubscription(_) => "CancelSubscription",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub session: SessionId,
    pub request_id: RequestId,
    pub debug: bool,
    /// Set on every page of a multi-envelope request except the last.
    pub more_following: bool,
    pub body: RequestBody,
}

impl RequestEnvelope {
    /// Split a request into the envelopes that carry it. Saves are paged at
    /// [`SAVE_PAGE_SIZE`] items; everything else is a single envelope.
    pub fn paged(
        session: SessionId,
        request_id: RequestId,
        debug: bool,
        body: &RequestBody,
    ) -> Vec<RequestEnvelope> {
        let envelope = |more_following, body| RequestEnvelope {
            session,
            request_id,
            debug,
            more_following,
            body,
        };
        match body {
            RequestBody::Save(items) if items.len() > SAVE_PAGE_SIZE => {
                let pages = items.chunks(SAVE_PAGE_SIZE).count();
                items
                    .chunks(SAVE_PAGE_SIZE)
                    .enumerate()
                    .map(|(i, page)| envelope(i + 1 < pages, RequestBody::Save(page.to_vec())))
                    .collect()
            }
            other => vec![envelope(false, other.clone())],
        }
    }
}

/// Receiver of inbound traffic. Implemented by the client core.
pub trait InboundHandler: Send + Sync {
    fn on_answer(&self, request_id: RequestId, items: Vec<WireItem>, more_following: bool);
    fn on_notify(&self, subscription_id: SubscriptionId, items: Vec<WireItem>);
    fn on_fault(&self, request_id: RequestId, error: String);
    fn on_complete(&self, request_id: RequestId, more_following: bool);
}

/// Handle the transport uses to deliver inbound envelopes.
///
/// Holds the client weakly; deliveries after the client is gone are dropped.
#[derive(Clone)]
pub struct InboundSink {
    handler: Weak<dyn InboundHandler>,
}

impl InboundSink {
    pub fn new(handler: &Arc<dyn InboundHandler>) -> Self {
        Self {
            handler: Arc::downgrade(handler),
        }
    }

    pub fn on_answer(&self, request_id: RequestId, items: Vec<WireItem>, more_following: bool) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_answer(request_id, items, more_following);
        }
    }

    pub fn on_notify(&self, subscription_id: SubscriptionId, items: Vec<WireItem>) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_notify(subscription_id, items);
        }
    }

    pub fn on_fault(&self, request_id: RequestId, error: impl Into<String>) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_fault(request_id, error.into());
        }
    }

    pub fn on_complete(&self, request_id: RequestId, more_following: bool) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_complete(request_id, more_following);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handler.strong_count() > 0
    }
}

/// Bidirectional envelope channel to one logical server.
pub trait Transport: Send + Sync {
    /// Register where inbound envelopes go. Called once by the client.
    fn attach(&self, sink: InboundSink);

    fn open_session(&self, client: &ClientInfo) -> Result<SessionId, TransportError>;

    /// Fire-and-forget from the caller's point of view.
    fn send(&self, envelope: &RequestEnvelope) -> Result<(), TransportError>;

    fn close_session(&self, session: SessionId);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PropertySet, Timestamp};

    fn wire(n: usize) -> WireItem {
        WireItem {
            id: ItemId::new(),
            kind: ItemKind::Object,
            name: format!("item-{}", n),
            app_scope: "Legacy".into(),
            data_type: None,
            transient: false,
            app_props: PropertySet::new(),
            sys_props: PropertySet::new(),
            net_scope: None,
            created: Timestamp::ZERO,
            expires: Timestamp::MAX,
            payload: Vec::new(),
            signature: Vec::new(),
            store_usn: 0,
        }
    }

    #[test]
    fn test_large_save_is_paged() {
        let items: Vec<_> = (0..120).map(wire).collect();
        let envelopes = RequestEnvelope::paged(
            SessionId::new(),
            RequestId::new(),
            false,
            &RequestBody::Save(items),
        );
        assert_eq!(envelopes.len(), 3);
        let flags: Vec<_> = envelopes.iter().map(|e| e.more_following).collect();
        assert_eq!(flags, vec![true, true, false]);
        match &envelopes[2].body {
            RequestBody::Save(page) => assert_eq!(page.len(), 20),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn test_small_request_single_envelope() {
        let envelopes = RequestEnvelope::paged(
            SessionId::new(),
            RequestId::new(),
            true,
            &RequestBody::ExtendSubscriptions,
        );
        assert_eq!(envelopes.len(), 1);
        assert!(!envelopes[0].more_following);
        assert!(envelopes[0].debug);
    }

    #[test]
    fn test_transient_classification() {
        assert!(TransportError::Communication("reset".into()).is_transient());
        assert!(TransportError::Timeout("slow".into()).is_transient());
        assert!(!TransportError::Unexpected("bug".into()).is_transient());
    }
}
