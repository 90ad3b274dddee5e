//! The client: public operations over the correlator, the connection and
//! the subscription table.
//!
//! Every call that talks to the server is queued in the correlator and
//! transmitted by a dispatch pass on the main queue. Synchronous operations
//! are `begin_*` followed by `end_*`; both halves are public.

use crate::cache::{CacheChangeHandler, CacheSource, ItemCache, DEFAULT_CACHE_CAPACITY};
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, ConnectionState, StateListener};
use crate::crypto::{CryptoProvider, NoKeys};
use crate::dispatch::DispatchQueue;
use crate::error::{ClientError, Result, TimeoutReason};
use crate::items::{FreezeContext, Item, WireItem};
use crate::requests::{OutboundRequest, ReplyHandle, RequestCorrelator, Submitter};
use crate::subscriptions::{
    CancelHandle, SubscriptionCallback, SubscriptionInfo, SubscriptionManager, SubscriptionOptions,
};
use crate::transport::{
    InboundHandler, InboundSink, RequestBody, SelectQuery, Transport, SAVE_PAGE_SIZE,
};
use crate::types::{ClientInfo, ItemId, ItemKind, QueryExpr, RequestId, SubscriptionId, Timestamp};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Request timeout applied while disposing.
const DISPOSE_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const HEARTBEAT_DATA_TYPE: &str = "Heartbeat";
const HEARTBEAT_LIFETIME: Duration = Duration::from_secs(10 * 60);

#[derive(Default)]
struct Timers {
    /// Dropping the sender stops every timer thread.
    shutdown: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

fn spawn_timer<F>(
    name: &str,
    interval: Duration,
    stop: Receiver<()>,
    core: Weak<ClientCore>,
    tick: F,
) -> Result<JoinHandle<()>>
where
    F: Fn(&ClientCore) + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || loop {
            match stop.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => match core.upgrade() {
                    Some(core) => tick(&core),
                    None => break,
                },
                _ => break,
            }
        })
        .map_err(|e| ClientError::Unexpected(format!("cannot start {}: {}", name, e)))
}

/// Shared state behind a [`Client`]. Also the transport's inbound handler
/// and the submitter used by subscriptions and caches.
pub(crate) struct ClientCore {
    this: Weak<ClientCore>,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    crypto: Arc<dyn CryptoProvider>,
    correlator: RequestCorrelator,
    connection: ConnectionManager,
    subscriptions: SubscriptionManager,
    /// Owns transmission, inbound processing and sweeps.
    main_queue: DispatchQueue,
    /// Runs subscription, cache and state-change callbacks.
    user_queue: Arc<DispatchQueue>,
    request_timeout: Mutex<Duration>,
    heartbeat_calls: AtomicU64,
    disposing: AtomicBool,
    timers: Mutex<Timers>,
}

impl ClientCore {
    fn start(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        crypto: Arc<dyn CryptoProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        let config = config.normalized();
        let main_queue = DispatchQueue::new("itemwire-main")?;
        let user_queue = Arc::new(DispatchQueue::new("itemwire-user")?);
        let connection = ConnectionManager::new(
            Arc::clone(&transport),
            Arc::clone(&clock),
            config.client_info.clone(),
            config.core_mode,
            config.offline_timeout,
            config.debug_requests,
            Arc::clone(&user_queue),
        );
        let subscriptions = SubscriptionManager::new(
            Arc::clone(&user_queue),
            config.default_app_scopes.clone(),
            config.debug_requests,
        );

        let core = Arc::new_cyclic(|this| ClientCore {
            this: this.clone(),
            correlator: RequestCorrelator::new(config.max_outstanding_requests),
            request_timeout: Mutex::new(config.request_timeout),
            config,
            clock,
            crypto,
            connection,
            subscriptions,
            main_queue,
            user_queue,
            heartbeat_calls: AtomicU64::new(0),
            disposing: AtomicBool::new(false),
            timers: Mutex::new(Timers::default()),
        });

        let handler: Arc<dyn InboundHandler> = core.clone();
        transport.attach(InboundSink::new(&handler));
        core.start_timers()?;
        info!(
            env = %core.config.client_info.env,
            mode = ?core.config.core_mode,
            request_timeout_ms = core.config.request_timeout.as_millis() as u64,
            "client started"
        );
        Ok(core)
    }

    fn start_timers(&self) -> Result<()> {
        let (shutdown, stop) = bounded::<()>(0);
        let mut threads = vec![spawn_timer(
            "itemwire-housekeeping",
            self.config.housekeeping_interval,
            stop.clone(),
            self.this.clone(),
            ClientCore::housekeeping_tick,
        )?];
        if self.config.heartbeat_enabled {
            threads.push(spawn_timer(
                "itemwire-heartbeat",
                self.config.heartbeat_interval,
                stop,
                self.this.clone(),
                |core: &ClientCore| {
                    if let Err(e) = core.heartbeat_tick() {
                        error!(error = %e, "heartbeat failed");
                    }
                },
            )?);
        }
        *self.timers.lock() = Timers {
            shutdown: Some(shutdown),
            threads,
        };
        Ok(())
    }

    fn stop_timers(&self) {
        let threads = {
            let mut timers = self.timers.lock();
            timers.shutdown.take();
            std::mem::take(&mut timers.threads)
        };
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("timer thread panicked");
            }
        }
    }

    // --- Main queue ---

    /// Queue a dispatch pass. Passes coalesce: only the last one queued runs.
    fn schedule_pass(&self) {
        self.correlator.request_pass();
        let this = self.this.clone();
        self.main_queue.dispatch(move || {
            if let Some(core) = this.upgrade() {
                core.dispatch_pass();
            }
        });
    }

    /// Transmit everything queued, then resolve finished requests.
    ///
    /// Requests are sent one at a time. While one is backing off, overdue
    /// requests behind it are still swept before each sleep.
    fn dispatch_pass(&self) {
        if !self.correlator.claim_pass() {
            return;
        }
        while let Some(request) = self.correlator.next_outgoing() {
            if request.is_expired(self.clock.now()) {
                self.correlator
                    .on_fault(request.id, ClientError::Timeout(TimeoutReason::Request));
                continue;
            }
            // Other requests keep expiring on time while this one retries.
            let sweep = |now: Timestamp| {
                self.correlator.sweep(now, false);
            };
            match self.connection.transmit_or_retry(&request, &sweep) {
                Ok(()) => self.correlator.mark_transmitted(request.id),
                Err(e) => {
                    if request.debug {
                        debug!(request_id = %request.id, error = %e, "request not sent");
                    }
                    self.correlator.on_fault(request.id, e);
                }
            }
        }
        self.sweep();
    }

    fn sweep(&self) {
        let faulted = self.connection.state() == ConnectionState::Faulted;
        self.correlator.sweep(self.clock.now(), faulted);
    }

    fn housekeeping_tick(&self) {
        self.schedule_pass();
    }

    fn on_main_queue<F>(&self, job: F)
    where
        F: FnOnce(&ClientCore) + Send + 'static,
    {
        let this = self.this.clone();
        let queued = self.main_queue.dispatch(move || {
            if let Some(core) = this.upgrade() {
                job(&core);
            }
        });
        if !queued {
            debug!("main queue closed - inbound envelope dropped");
        }
    }

    fn accept_page(&self, request_id: RequestId, wire: Vec<WireItem>, is_last: bool) {
        let items = self.from_wire(wire);
        if self.correlator.on_envelope(request_id, items, is_last) && is_last {
            self.sweep();
        }
    }

    fn from_wire(&self, wire: Vec<WireItem>) -> Vec<Item> {
        wire.into_iter()
            .map(|w| Item::from_wire(w, Arc::clone(&self.crypto)))
            .collect()
    }

    // --- Requests ---

    fn check_open(&self) -> Result<()> {
        self.connection.check_accepting()
    }

    fn await_reply(&self, handle: ReplyHandle) -> Result<Vec<Item>> {
        let request_id = handle.request_id();
        let started = Instant::now();
        let outcome = handle.wait();
        if self.config.debug_requests {
            debug!(
                %request_id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                ok = outcome.is_ok(),
                "request resolved"
            );
        }
        outcome
    }

    fn freeze_item(&self, item: &mut Item) -> Result<()> {
        if item.is_frozen() {
            return Ok(());
        }
        if item.lifetime() == Duration::MAX && self.config.default_lifetime != Duration::MAX {
            item.set_lifetime(self.config.default_lifetime)?;
        }
        let ctx = FreezeContext {
            crypto: &self.crypto,
            clock: self.clock.as_ref(),
            client_info: &self.config.client_info,
            default_format: self.config.default_serial_format,
        };
        item.freeze(&ctx)
    }

    fn scoped(&self, mut query: SelectQuery) -> SelectQuery {
        if query.app_scopes.is_empty() {
            query.app_scopes = self.config.default_app_scopes.clone();
        }
        query
    }

    fn begin_save_items(&self, items: &mut [Item]) -> Result<ReplyHandle> {
        if items.is_empty() {
            return Err(ClientError::InvalidArgument("no items to save".into()));
        }
        self.check_open()?;
        let mut wire = Vec::with_capacity(items.len());
        for item in items.iter_mut() {
            self.freeze_item(item)?;
            wire.push(item.to_wire()?);
        }
        self.submit(RequestBody::Save(wire))
    }

    fn save_items(&self, items: &mut [Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let handle = self.begin_save_items(items)?;
        self.await_reply(handle).map(|_| ())
    }

    fn save_item(&self, item: &mut Item) -> Result<ItemId> {
        self.save_items(std::slice::from_mut(item))?;
        Ok(item.id())
    }

    fn begin_load_items(&self, query: SelectQuery) -> Result<ReplyHandle> {
        self.submit(RequestBody::Select(self.scoped(query)))
    }

    fn load_items(&self, query: SelectQuery) -> Result<Vec<Item>> {
        let handle = self.begin_load_items(query)?;
        self.await_reply(handle)
    }

    fn load_single(&self, query: SelectQuery) -> Result<Option<Item>> {
        let mut items = self.load_items(query)?;
        if items.len() > 1 {
            return Err(ClientError::TooManyResults(items.len()));
        }
        Ok(items.pop())
    }

    fn subscribe(&self, options: &SubscriptionOptions, callback: SubscriptionCallback) -> Result<SubscriptionId> {
        self.check_open()?;
        let submitter: Arc<dyn Submitter> = self.this.upgrade().ok_or(ClientError::Disposed)?;
        self.subscriptions
            .create(options, Some(callback), &submitter, self.clock.now())
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.subscriptions.cancel(id, self)
    }

    // --- Heartbeat ---

    /// Renew subscriptions and publish the liveness record. Skipped while a
    /// previous tick is still running or the client is faulted.
    fn heartbeat_tick(&self) -> Result<()> {
        let running = self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = if running > 0 {
            debug!("heartbeat still running - tick skipped");
            Ok(())
        } else if self.connection.state() == ConnectionState::Faulted {
            Ok(())
        } else {
            self.heartbeat()
        };
        self.heartbeat_calls.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn heartbeat(&self) -> Result<()> {
        if let Some(handle) = self.subscriptions.extend_all(self)? {
            self.await_reply(handle)?;
        }
        let mut item = Item::with_text(heartbeat_item_name(&self.config.client_info), None, HEARTBEAT_DATA_TYPE);
        item.set_kind(ItemKind::System)?;
        item.set_transient(true)?;
        item.set_lifetime(HEARTBEAT_LIFETIME)?;
        self.save_item(&mut item).map(|_| ())
    }

    // --- Disposal ---

    fn dispose(&self) {
        if self.disposing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("client disposing");
        {
            let mut timeout = self.request_timeout.lock();
            *timeout = (*timeout).min(DISPOSE_REQUEST_TIMEOUT);
        }
        self.stop_timers();

        match self.subscriptions.cancel_all(self) {
            Ok(0) => {}
            Ok(cancelled) => debug!(cancelled, "subscriptions cancelled"),
            Err(e) => warn!(error = %e, "cancelling subscriptions failed"),
        }

        let drain = self.config.drain_timeout;
        if !self.main_queue.wait_until_empty(drain) {
            warn!(pending = self.main_queue.len(), "main queue did not drain");
        }
        self.connection.set_state(ConnectionState::Disposed);
        if !self.user_queue.wait_until_empty(drain) {
            warn!(pending = self.user_queue.len(), "user queue did not drain");
        }
        self.connection.disconnect();

        let failed = self.correlator.fail_all(|| ClientError::Disposed);
        if failed > 0 {
            debug!(failed, "pending requests failed at disposal");
        }
        self.main_queue.close();
        self.user_queue.close();
    }
}

fn heartbeat_item_name(info: &ClientInfo) -> String {
    format!(
        "System.Heartbeat.{}.{}.{}.{}",
        info.host_name, info.user_name, info.appl_name, info.node_id
    )
}

impl Submitter for ClientCore {
    fn submit(&self, body: RequestBody) -> Result<ReplyHandle> {
        self.check_open()?;
        let timeout = *self.request_timeout.lock();
        let request = OutboundRequest::new(body, self.clock.now(), timeout, self.config.debug_requests);
        if request.debug {
            debug!(request_id = %request.id, body = request.body.name(), "request queued");
        }
        let handle = self.correlator.enqueue(request, || self.check_open())?;
        self.schedule_pass();
        Ok(handle)
    }
}

impl InboundHandler for ClientCore {
    fn on_answer(&self, request_id: RequestId, items: Vec<WireItem>, more_following: bool) {
        self.on_main_queue(move |core| core.accept_page(request_id, items, !more_following));
    }

    fn on_notify(&self, subscription_id: SubscriptionId, items: Vec<WireItem>) {
        self.on_main_queue(move |core| {
            let items = core.from_wire(items);
            core.subscriptions.dispatch_push(subscription_id, items);
        });
    }

    fn on_fault(&self, request_id: RequestId, error: String) {
        self.on_main_queue(move |core| {
            if core.correlator.on_fault(request_id, ClientError::Rejected(error)) {
                core.sweep();
            }
        });
    }

    fn on_complete(&self, request_id: RequestId, more_following: bool) {
        self.on_main_queue(move |core| core.accept_page(request_id, Vec::new(), !more_following));
    }
}

impl CacheSource for ClientCore {
    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    fn load_items(&self, query: SelectQuery) -> Result<Vec<Item>> {
        ClientCore::load_items(self, query)
    }

    fn save_item(&self, item: &mut Item) -> Result<()> {
        ClientCore::save_item(self, item).map(|_| ())
    }

    fn subscribe(&self, options: &SubscriptionOptions, callback: SubscriptionCallback) -> Result<SubscriptionId> {
        ClientCore::subscribe(self, options, callback)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        ClientCore::unsubscribe(self, id)
    }
}

/// Client for one logical server.
///
/// Dropping the client disposes it.
///
/// # Example
///
/// ```ignore
/// let client = Client::new(ClientConfig::default(), transport)?;
/// client.save_object("Trade.1", trade)?;
/// let loaded: Option<Arc<Trade>> = client.load_object("Trade.1")?;
/// ```
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    /// Create a client with no keys and the system clock.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        Self::with_parts(config, transport, Arc::new(NoKeys), Arc::new(SystemClock))
    }

    pub fn with_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        crypto: Arc<dyn CryptoProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Ok(Self {
            core: ClientCore::start(config, transport, crypto, clock)?,
        })
    }

    // --- State ---

    /// Configuration in effect, after clamping.
    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    pub fn client_info(&self) -> &ClientInfo {
        &self.core.config.client_info
    }

    pub fn state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    /// Listener runs on the user queue, once per transition, in order.
    pub fn on_state_change(&self, listener: StateListener) {
        self.core.connection.on_state_change(listener);
    }

    /// Queued plus unresolved requests.
    pub fn pending_requests(&self) -> usize {
        self.core.correlator.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.state() == ConnectionState::Disposed
    }

    // --- Save ---

    /// Freeze (if needed) and save one item. Returns its id.
    pub fn save_item(&self, item: &mut Item) -> Result<ItemId> {
        self.core.save_item(item)
    }

    /// Save several items in one request. Large batches are paged.
    pub fn save_items(&self, items: &mut [Item]) -> Result<()> {
        self.core.save_items(items)
    }

    pub fn begin_save_items(&self, items: &mut [Item]) -> Result<ReplyHandle> {
        self.core.begin_save_items(items)
    }

    pub fn end_save_items(&self, handle: ReplyHandle) -> Result<()> {
        self.core.await_reply(handle).map(|_| ())
    }

    pub fn save_object<T>(&self, name: impl Into<String>, value: T) -> Result<ItemId>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.save_item(&mut Item::with_object(name, value))
    }

    // --- Load ---

    pub fn begin_load_items(&self, query: SelectQuery) -> Result<ReplyHandle> {
        self.core.begin_load_items(query)
    }

    pub fn end_load_items(&self, handle: ReplyHandle) -> Result<Vec<Item>> {
        self.core.await_reply(handle)
    }

    /// Run a query. An empty scope list means the configured default scopes.
    pub fn load_items(&self, query: SelectQuery) -> Result<Vec<Item>> {
        self.core.load_items(query)
    }

    /// Current item named `name`, if any.
    pub fn load_item(&self, name: &str) -> Result<Option<Item>> {
        self.load_item_with(name, false)
    }

    /// Like [`load_item`](Self::load_item), optionally returning tombstones
    /// and expired items.
    pub fn load_item_with(&self, name: &str, include_deleted: bool) -> Result<Option<Item>> {
        self.core.load_single(SelectQuery {
            item_names: vec![name.to_string()],
            include_deleted,
            ..Default::default()
        })
    }

    pub fn load_item_by_id(&self, id: ItemId) -> Result<Option<Item>> {
        self.core.load_single(SelectQuery {
            item_ids: vec![id],
            include_deleted: true,
            ..Default::default()
        })
    }

    pub fn load_items_by_names(&self, names: &[String]) -> Result<Vec<Item>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        self.load_items(SelectQuery {
            item_names: names.to_vec(),
            ..Default::default()
        })
    }

    pub fn load_items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<Item>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.load_items(SelectQuery {
            item_ids: ids.to_vec(),
            include_deleted: true,
            ..Default::default()
        })
    }

    /// Items of `data_type` (any type if `None`) matching `filter`.
    pub fn load_items_where(&self, data_type: Option<&str>, filter: QueryExpr) -> Result<Vec<Item>> {
        self.load_items(SelectQuery {
            data_type: data_type.map(str::to_string),
            filter: Some(filter),
            ..Default::default()
        })
    }

    /// One page of a sorted query.
    pub fn load_items_paged(
        &self,
        data_type: Option<&str>,
        filter: QueryExpr,
        order_by: QueryExpr,
        start_row: usize,
        row_count: usize,
    ) -> Result<Vec<Item>> {
        self.load_items(SelectQuery {
            data_type: data_type.map(str::to_string),
            filter: Some(filter),
            order_by: Some(order_by),
            start_row,
            row_count,
            ..Default::default()
        })
    }

    /// Metadata only; payloads are left out.
    pub fn load_item_infos(&self, data_type: Option<&str>, filter: QueryExpr) -> Result<Vec<Item>> {
        self.load_items(SelectQuery {
            data_type: data_type.map(str::to_string),
            filter: Some(filter),
            exclude_data_body: true,
            ..Default::default()
        })
    }

    pub fn count_objects(&self, data_type: Option<&str>, filter: QueryExpr) -> Result<usize> {
        Ok(self.load_item_infos(data_type, filter)?.len())
    }

    pub fn load_object<T>(&self, name: &str) -> Result<Option<Arc<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        match self.load_item(name)? {
            Some(item) => item.data::<T>(),
            None => Ok(None),
        }
    }

    // --- Delete ---

    /// Save a tombstone carrying the item's name, type and properties.
    pub fn delete_item(&self, item: &Item) -> Result<ItemId> {
        let mut tombstone = tombstone_for(item)?;
        self.save_item(&mut tombstone)
    }

    /// Delete every current item of `data_type` matching `filter`. Returns
    /// how many were deleted.
    pub fn delete_objects(&self, data_type: &str, filter: QueryExpr) -> Result<usize> {
        let infos = self.load_item_infos(Some(data_type), filter)?;
        let mut tombstones = infos
            .iter()
            .map(tombstone_for)
            .collect::<Result<Vec<_>>>()?;
        for batch in tombstones.chunks_mut(SAVE_PAGE_SIZE) {
            self.save_items(batch)?;
        }
        debug!(data_type, deleted = tombstones.len(), "objects deleted");
        Ok(tombstones.len())
    }

    // --- Subscriptions ---

    /// Start a subscription. Unless the options say no-wait, returns once
    /// the server has accepted it.
    pub fn subscribe(&self, options: SubscriptionOptions, callback: SubscriptionCallback) -> Result<SubscriptionId> {
        self.core.subscribe(&options, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.core.unsubscribe(id)
    }

    /// Stop delivery and send the cancel. Pushes for `id` are dropped from
    /// here on. If the create is still in flight the cancel follows it.
    pub fn begin_unsubscribe(&self, id: SubscriptionId) -> Result<CancelHandle> {
        self.core.subscriptions.cancel_begin(id, self.core.as_ref())
    }

    pub fn end_unsubscribe(&self, handle: CancelHandle) -> Result<()> {
        handle.wait()
    }

    pub fn unsubscribe_all(&self) -> Result<usize> {
        self.core.subscriptions.cancel_all(self.core.as_ref())
    }

    pub fn subscription_count(&self) -> usize {
        self.core.subscriptions.subscription_count()
    }

    pub fn subscription_info(&self, id: SubscriptionId) -> Option<SubscriptionInfo> {
        self.core.subscriptions.info(id)
    }

    // --- Caches ---

    pub fn create_cache(&self, handler: Option<CacheChangeHandler>) -> ItemCache {
        self.create_cache_with_capacity(DEFAULT_CACHE_CAPACITY, handler)
    }

    pub fn create_cache_with_capacity(
        &self,
        capacity: usize,
        handler: Option<CacheChangeHandler>,
    ) -> ItemCache {
        let source: Arc<dyn CacheSource> = self.core.clone();
        ItemCache::new(source, Arc::clone(&self.core.user_queue), capacity, handler)
    }

    // --- Lifecycle ---

    /// Run one heartbeat now. The timer does the same every interval.
    pub fn heartbeat(&self) -> Result<()> {
        self.core.heartbeat_tick()
    }

    /// Stop timers, cancel subscriptions, drain both queues and fail what is
    /// still pending. Idempotent.
    pub fn dispose(&self) {
        self.core.dispose();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.core.dispose();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("env", &self.core.config.client_info.env)
            .field("state", &self.state())
            .field("pending", &self.pending_requests())
            .finish()
    }
}

fn tombstone_for(item: &Item) -> Result<Item> {
    let name = item.name().ok_or(ClientError::MissingName)?;
    let mut tombstone = Item::new(name);
    tombstone.set_kind(item.kind())?;
    tombstone.set_app_scope(item.app_scope())?;
    if let Some(data_type) = item.data_type() {
        tombstone.set_data_type(data_type)?;
    }
    tombstone.set_app_props(item.app_props().clone())?;
    Ok(tombstone)
}
