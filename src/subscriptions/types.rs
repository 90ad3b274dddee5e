//! Subscription types.

use crate::items::Item;
use crate::types::{ItemKind, QueryExpr, SubscriptionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Invoked on the user queue for every pushed item, in arrival order.
pub type SubscriptionCallback = Arc<dyn Fn(SubscriptionId, Arc<Item>) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Registered locally, not yet sent.
    Created,
    /// Create request in flight.
    Starting,
    Active,
    /// Cancelled locally. Pushes are dropped; the server-side cancel is in
    /// flight or waits for the create to complete.
    Cancelling,
}

/// Options for a new subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionOptions {
    pub filter: QueryExpr,

    /// Data type name to match (None = any).
    pub data_type: Option<String>,

    pub item_kind: ItemKind,

    /// App scopes to match (None = client default).
    pub app_scopes: Option<Vec<String>>,

    /// Only items with a higher update sequence number.
    pub min_usn: i64,

    /// Skip tombstones and expired items.
    /// Default: true
    pub exclude_deleted: bool,

    /// Push only items changed after the subscription starts.
    pub exclude_existing: bool,

    /// Complete the create request only after existing items were pushed.
    /// Default: true
    pub wait_for_existing: bool,

    /// Push metadata only.
    pub exclude_data_body: bool,

    /// Return before the create request completes. Failures are logged.
    pub no_wait: bool,
}

impl SubscriptionOptions {
    pub fn new(filter: QueryExpr) -> Self {
        Self {
            filter,
            data_type: None,
            item_kind: ItemKind::Object,
            app_scopes: None,
            min_usn: 0,
            exclude_deleted: true,
            exclude_existing: false,
            wait_for_existing: true,
            exclude_data_body: false,
            no_wait: false,
        }
    }

    /// Match every item.
    pub fn all() -> Self {
        Self::new(QueryExpr::all())
    }

    pub fn data_type(mut self, data_type: impl Into<String>) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    pub fn app_scopes(mut self, scopes: Vec<String>) -> Self {
        self.app_scopes = Some(scopes);
        self
    }

    pub fn item_kind(mut self, kind: ItemKind) -> Self {
        self.item_kind = kind;
        self
    }

    pub fn min_usn(mut self, usn: i64) -> Self {
        self.min_usn = usn;
        self
    }

    /// Changes only; existing items are not pushed.
    pub fn new_only(mut self) -> Self {
        self.exclude_existing = true;
        self.wait_for_existing = false;
        self
    }

    /// Metadata only.
    pub fn info_only(mut self) -> Self {
        self.exclude_data_body = true;
        self.wait_for_existing = false;
        self
    }

    pub fn no_wait(mut self) -> Self {
        self.no_wait = true;
        self.wait_for_existing = false;
        self
    }

    pub fn include_deleted(mut self) -> Self {
        self.exclude_deleted = false;
        self
    }
}

/// Subscription as sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub id: SubscriptionId,
    pub data_type: Option<String>,
    pub filter: QueryExpr,
    pub item_kind: ItemKind,
    pub app_scopes: Vec<String>,
    pub min_usn: i64,
    pub exclude_deleted: bool,
    pub exclude_existing: bool,
    pub wait_for_existing: bool,
    pub exclude_data_body: bool,
}

impl SubscriptionSpec {
    pub fn from_options(id: SubscriptionId, options: &SubscriptionOptions, default_scopes: &[String]) -> Self {
        Self {
            id,
            data_type: options.data_type.clone(),
            filter: options.filter.clone(),
            item_kind: options.item_kind,
            app_scopes: options
                .app_scopes
                .clone()
                .unwrap_or_else(|| default_scopes.to_vec()),
            min_usn: options.min_usn,
            exclude_deleted: options.exclude_deleted,
            exclude_existing: options.exclude_existing,
            wait_for_existing: options.wait_for_existing,
            exclude_data_body: options.exclude_data_body,
        }
    }
}

/// Read-only view of a registered subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub spec: SubscriptionSpec,
    pub state: SubscriptionState,
    pub created: Timestamp,
    /// Items delivered so far.
    pub delivered: u64,
}
