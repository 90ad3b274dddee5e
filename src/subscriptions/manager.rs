//! Subscription manager: lifecycle of standing queries and push routing.

use crate::dispatch::DispatchQueue;
use crate::error::{ClientError, Result};
use crate::items::Item;
use crate::requests::{ReplyHandle, Submitter};
use crate::transport::RequestBody;
use crate::types::{SubscriptionId, Timestamp};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;
use tracing::{debug, warn};

use super::types::{
    SubscriptionCallback, SubscriptionInfo, SubscriptionOptions, SubscriptionSpec,
    SubscriptionState,
};

/// Internal subscription state.
struct Subscription {
    spec: SubscriptionSpec,
    state: SubscriptionState,
    callback: Option<SubscriptionCallback>,
    created: Timestamp,
    delivered: u64,
    /// Set when cancelled while the create was in flight. Receives the
    /// outcome of the cancel sent once the create settles.
    owed_cancel: Option<Sender<Result<()>>>,
}

impl Subscription {
    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.spec.id,
            spec: self.spec.clone(),
            state: self.state,
            created: self.created,
            delivered: self.delivered,
        }
    }

    /// Whether the server knows about this subscription.
    fn is_started(&self) -> bool {
        matches!(
            self.state,
            SubscriptionState::Starting | SubscriptionState::Active
        )
    }

    fn is_live(&self) -> bool {
        self.state != SubscriptionState::Cancelling
    }
}

type SubscriptionTable = Arc<RwLock<HashMap<SubscriptionId, Subscription>>>;

enum PendingCancel {
    Settled,
    Sent(ReplyHandle),
    /// Sent by the create's waiter once the create completes.
    Deferred(Receiver<Result<()>>),
}

/// Outstanding cancel from [`SubscriptionManager::cancel_begin`].
///
/// The subscription reports [`SubscriptionState::Cancelling`] until the
/// cancel settles and the handle is waited on or dropped.
#[must_use = "dropping the handle forgets the cancel outcome"]
pub struct CancelHandle {
    id: SubscriptionId,
    pending: PendingCancel,
    /// Entry to remove once this handle is finished with.
    table: Option<SubscriptionTable>,
}

impl CancelHandle {
    fn settled(id: SubscriptionId) -> Self {
        Self {
            id,
            pending: PendingCancel::Settled,
            table: None,
        }
    }

    pub fn subscription_id(&self) -> SubscriptionId {
        self.id
    }

    /// Whether the cancel waits on the create request still in flight.
    pub fn is_deferred(&self) -> bool {
        matches!(self.pending, PendingCancel::Deferred(_))
    }

    /// Block until the cancel resolves.
    pub fn wait(mut self) -> Result<()> {
        match std::mem::replace(&mut self.pending, PendingCancel::Settled) {
            PendingCancel::Settled => Ok(()),
            PendingCancel::Sent(reply) => reply.wait().map(|_| ()),
            // The waiter is gone only when the create never settled.
            PendingCancel::Deferred(outcome) => outcome.recv().unwrap_or(Ok(())),
        }
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(table) = self.table.take() {
            let mut subs = table.write();
            if subs.get(&self.id).map(|s| s.state) == Some(SubscriptionState::Cancelling) {
                subs.remove(&self.id);
            }
        }
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("id", &self.id)
            .field("deferred", &self.is_deferred())
            .finish()
    }
}

/// Owns the subscription table and routes pushed items to callbacks.
pub struct SubscriptionManager {
    /// Registered subscriptions by id.
    subscriptions: SubscriptionTable,
    /// Callbacks run here, never on the transport or main thread.
    user_queue: Arc<DispatchQueue>,
    default_scopes: Vec<String>,
    debug: bool,
}

impl SubscriptionManager {
    pub fn new(user_queue: Arc<DispatchQueue>, default_scopes: Vec<String>, debug: bool) -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            user_queue,
            default_scopes,
            debug,
        }
    }

    /// Register a subscription without starting it.
    pub fn register(
        &self,
        options: &SubscriptionOptions,
        callback: Option<SubscriptionCallback>,
        now: Timestamp,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        let subscription = Subscription {
            spec: SubscriptionSpec::from_options(id, options, &self.default_scopes),
            state: SubscriptionState::Created,
            callback,
            created: now,
            delivered: 0,
            owed_cancel: None,
        };
        self.subscriptions.write().insert(id, subscription);
        id
    }

    /// Register and start a subscription.
    ///
    /// Unless `options.no_wait` is set, blocks until the server accepts it;
    /// on failure the subscription is removed and the error returned.
    pub fn create(
        &self,
        options: &SubscriptionOptions,
        callback: Option<SubscriptionCallback>,
        submitter: &Arc<dyn Submitter>,
        now: Timestamp,
    ) -> Result<SubscriptionId> {
        let id = self.register(options, callback, now);
        self.start(id, submitter, !options.no_wait)?;
        Ok(id)
    }

    /// Send the create request for a registered subscription.
    pub fn start(&self, id: SubscriptionId, submitter: &Arc<dyn Submitter>, wait: bool) -> Result<()> {
        let spec = {
            let mut subs = self.subscriptions.write();
            let sub = subs
                .get_mut(&id)
                .ok_or_else(|| ClientError::InvalidArgument(format!("unknown subscription {}", id)))?;
            if sub.state != SubscriptionState::Created {
                return Err(ClientError::InvalidArgument(format!(
                    "subscription {} already started",
                    id
                )));
            }
            sub.state = SubscriptionState::Starting;
            sub.spec.clone()
        };
        debug!(
            %id,
            data_type = spec.data_type.as_deref().unwrap_or("(any)"),
            filter = %spec.filter,
            "starting subscription"
        );

        let handle = match submitter.submit(RequestBody::CreateSubscription(spec)) {
            Ok(handle) => handle,
            Err(e) => return Self::finish_start(&self.subscriptions, id, Err(e), &Arc::downgrade(submitter)),
        };

        if wait {
            let outcome = handle.wait().map(|_| ());
            return Self::finish_start(&self.subscriptions, id, outcome, &Arc::downgrade(submitter));
        }

        let table = Arc::clone(&self.subscriptions);
        let submitter = Arc::downgrade(submitter);
        thread::Builder::new()
            .name("subscription-start".into())
            .spawn(move || {
                let outcome = handle.wait().map(|_| ());
                if let Err(e) = Self::finish_start(&table, id, outcome, &submitter) {
                    warn!(%id, error = %e, "subscription failed to start");
                }
            })
            .map_err(|e| ClientError::Unexpected(format!("cannot start waiter: {}", e)))?;
        Ok(())
    }

    /// Settle a create request. A cancel owed by a concurrent
    /// [`cancel_begin`](Self::cancel_begin) goes out only once the server
    /// has accepted the create, and never when the create failed.
    fn finish_start(
        table: &SubscriptionTable,
        id: SubscriptionId,
        outcome: Result<()>,
        submitter: &Weak<dyn Submitter>,
    ) -> Result<()> {
        let owed = {
            let mut subs = table.write();
            let Some(sub) = subs.get_mut(&id) else {
                return outcome;
            };
            let owed = sub.owed_cancel.take();
            let keep = match (&outcome, sub.state) {
                (Ok(()), SubscriptionState::Starting) => {
                    sub.state = SubscriptionState::Active;
                    true
                }
                (Ok(()), SubscriptionState::Cancelling) => owed.is_some(),
                _ => false,
            };
            if !keep {
                subs.remove(&id);
            }
            owed
        };

        let Some(owed) = owed else {
            return outcome;
        };
        if let Err(e) = outcome {
            debug!(%id, "create failed - owed cancel dropped");
            let _ = owed.send(Ok(()));
            return Err(e);
        }

        debug!(%id, "sending deferred cancel");
        let cancelled = match submitter.upgrade() {
            Some(submitter) => submitter
                .submit(RequestBody::CancelSubscription(id))
                .and_then(|reply| reply.wait().map(|_| ())),
            None => Err(ClientError::Disposed),
        };
        table.write().remove(&id);
        let _ = owed.send(cancelled);
        Ok(())
    }

    /// Stop delivering pushes for `id` and, if the server knows it, cancel
    /// it there.
    ///
    /// Pushes for `id` are dropped from here on even while the cancel is in
    /// flight. A subscription whose create is still in flight is cancelled
    /// once the create completes, so the two never overlap.
    pub fn cancel_begin(&self, id: SubscriptionId, submitter: &dyn Submitter) -> Result<CancelHandle> {
        {
            let mut subs = self.subscriptions.write();
            let state = match subs.get(&id) {
                Some(sub) => sub.state,
                None => {
                    debug!(%id, "subscription missing");
                    return Ok(CancelHandle::settled(id));
                }
            };
            match state {
                SubscriptionState::Created => {
                    subs.remove(&id);
                    debug!(%id, "subscription not started");
                    return Ok(CancelHandle::settled(id));
                }
                SubscriptionState::Cancelling => {
                    debug!(%id, "subscription already cancelling");
                    return Ok(CancelHandle::settled(id));
                }
                SubscriptionState::Starting => {
                    let (sender, receiver) = bounded(1);
                    if let Some(sub) = subs.get_mut(&id) {
                        sub.state = SubscriptionState::Cancelling;
                        sub.callback = None;
                        sub.owed_cancel = Some(sender);
                    }
                    debug!(%id, "create in flight - cancel deferred");
                    return Ok(CancelHandle {
                        id,
                        pending: PendingCancel::Deferred(receiver),
                        table: None,
                    });
                }
                SubscriptionState::Active => {
                    if let Some(sub) = subs.get_mut(&id) {
                        sub.state = SubscriptionState::Cancelling;
                        sub.callback = None;
                    }
                }
            }
        }

        debug!(%id, "subscription cancelled");
        match submitter.submit(RequestBody::CancelSubscription(id)) {
            Ok(reply) => Ok(CancelHandle {
                id,
                pending: PendingCancel::Sent(reply),
                table: Some(Arc::clone(&self.subscriptions)),
            }),
            Err(e) => {
                self.subscriptions.write().remove(&id);
                Err(e)
            }
        }
    }

    pub fn cancel(&self, id: SubscriptionId, submitter: &dyn Submitter) -> Result<()> {
        self.cancel_begin(id, submitter)?.wait()
    }

    /// Cancel every live subscription. Returns how many were cancelled.
    ///
    /// Cancels deferred behind an in-flight create are left to settle on
    /// the create's waiter.
    pub fn cancel_all(&self, submitter: &dyn Submitter) -> Result<usize> {
        let ids = self.ids();
        let mut handles = Vec::with_capacity(ids.len());
        let mut first_error = None;
        for id in &ids {
            match self.cancel_begin(*id, submitter) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        for handle in handles {
            if handle.is_deferred() {
                continue;
            }
            if let Err(e) = handle.wait() {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(ids.len()),
        }
    }

    /// Route pushed items to their subscription's callback.
    ///
    /// Returns false (after logging) for an unknown or cancelling
    /// subscription.
    pub fn dispatch_push(&self, id: SubscriptionId, items: Vec<Item>) -> bool {
        let callback = {
            let mut subs = self.subscriptions.write();
            match subs.get_mut(&id) {
                Some(sub) if sub.is_live() => {
                    sub.delivered += items.len() as u64;
                    sub.callback.clone()
                }
                Some(_) => {
                    debug!(%id, "subscription cancelling - ignoring data");
                    return false;
                }
                None => {
                    warn!(%id, "subscription unknown - ignoring data");
                    return false;
                }
            }
        };
        if self.debug {
            debug!(%id, items = items.len(), "subscription received items");
        }
        if let Some(callback) = callback {
            self.user_queue.dispatch(move || {
                for item in items {
                    callback(id, Arc::new(item));
                }
            });
        }
        true
    }

    /// Renew every started subscription with a single request.
    pub fn extend_all(&self, submitter: &dyn Submitter) -> Result<Option<ReplyHandle>> {
        let any_started = self.subscriptions.read().values().any(Subscription::is_started);
        if !any_started {
            return Ok(None);
        }
        submitter.submit(RequestBody::ExtendSubscriptions).map(Some)
    }

    /// Subscriptions not being cancelled.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().values().filter(|s| s.is_live()).count()
    }

    /// Includes subscriptions still cancelling.
    pub fn info(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.subscriptions.read().get(&id).map(Subscription::info)
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions
            .read()
            .iter()
            .filter(|(_, sub)| sub.is_live())
            .map(|(id, _)| *id)
            .collect()
    }
}
