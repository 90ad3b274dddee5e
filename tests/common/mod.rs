//! Shared fixtures: an in-memory loopback server and a toy crypto provider.

#![allow(dead_code)]

use itemwire::{
    Clock, CryptoError, CryptoProvider, Hash, InboundSink, ItemId, ManualClock, QueryExpr,
    RequestBody, RequestEnvelope, RequestId, SelectQuery, SessionId, SubscriptionId,
    SubscriptionSpec, Timestamp, Transport, TransportError, WireItem, ClientInfo,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `check` until it holds or `timeout` passes.
pub fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

/// Inbound traffic the server has produced but not yet delivered.
#[derive(Clone, Debug)]
pub enum Inbound {
    Answer(RequestId, Vec<WireItem>, bool),
    Notify(SubscriptionId, Vec<WireItem>),
    Fault(RequestId, String),
}

#[derive(Default)]
struct ServerState {
    /// Latest item per lowercase name.
    items: HashMap<String, WireItem>,
    subscriptions: HashMap<SubscriptionId, SubscriptionSpec>,
    sent: Vec<RequestEnvelope>,
    held: Vec<Inbound>,
    /// Pages of a save still waiting for the last envelope.
    partial_saves: HashMap<RequestId, usize>,
}

/// Single-process server answering on the sending thread.
///
/// Supports holding replies (to reorder or delay them), ignoring selects for
/// chosen names, and failing the next sends with a transient error.
pub struct LoopbackServer {
    clock: Arc<dyn Clock>,
    sink: Mutex<Option<InboundSink>>,
    state: Mutex<ServerState>,
    usn: AtomicI64,
    sessions: AtomicUsize,
    fail_next_sends: AtomicUsize,
    hold_replies: Mutex<bool>,
    ignored_names: Mutex<HashSet<String>>,
    /// Selects naming a key here are answered with a fault.
    rejected_names: Mutex<HashMap<String, String>>,
    broken: AtomicBool,
    /// Max items per answer envelope.
    page_size: usize,
}

impl LoopbackServer {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Self::with_page_size(clock, 50)
    }

    pub fn with_page_size(clock: Arc<dyn Clock>, page_size: usize) -> Arc<Self> {
        Arc::new(Self {
            clock,
            sink: Mutex::new(None),
            state: Mutex::new(ServerState::default()),
            usn: AtomicI64::new(0),
            sessions: AtomicUsize::new(0),
            fail_next_sends: AtomicUsize::new(0),
            hold_replies: Mutex::new(false),
            ignored_names: Mutex::new(HashSet::new()),
            rejected_names: Mutex::new(HashMap::new()),
            broken: AtomicBool::new(false),
            page_size: page_size.max(1),
        })
    }

    pub fn hold_replies(&self, hold: bool) {
        *self.hold_replies.lock() = hold;
    }

    /// Deliver held replies, newest first when `reverse` is set.
    pub fn release(&self, reverse: bool) -> usize {
        let mut held = std::mem::take(&mut self.state.lock().held);
        if reverse {
            held.reverse();
        }
        let count = held.len();
        for inbound in held {
            self.deliver(inbound);
        }
        count
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Never answer selects naming `name`.
    pub fn ignore_name(&self, name: &str) {
        self.ignored_names.lock().insert(name.to_lowercase());
    }

    /// Answer selects naming `name` with a server fault.
    pub fn reject_name(&self, name: &str, reason: &str) {
        self.rejected_names
            .lock()
            .insert(name.to_lowercase(), reason.to_string());
    }

    /// Fail every send from now on with a non-transient error.
    pub fn break_contract(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_sends(&self, count: usize) {
        self.fail_next_sends.store(count, Ordering::SeqCst);
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<RequestEnvelope> {
        self.state.lock().sent.clone()
    }

    pub fn sent_names(&self) -> Vec<&'static str> {
        self.state.lock().sent.iter().map(|e| e.body.name()).collect()
    }

    pub fn stored(&self, name: &str) -> Option<WireItem> {
        self.state.lock().items.get(&name.to_lowercase()).cloned()
    }

    pub fn stored_count(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn subscription_ids(&self) -> Vec<SubscriptionId> {
        self.state.lock().subscriptions.keys().copied().collect()
    }

    /// Push items to a subscription id, bypassing the store.
    pub fn push(&self, id: SubscriptionId, items: Vec<WireItem>) {
        self.deliver(Inbound::Notify(id, items));
    }

    /// Answer a request id the client never sent.
    pub fn answer_unknown(&self) {
        self.deliver(Inbound::Answer(RequestId::new(), Vec::new(), false));
    }

    fn deliver(&self, inbound: Inbound) {
        let sink = match self.sink.lock().clone() {
            Some(sink) => sink,
            None => return,
        };
        match inbound {
            Inbound::Answer(id, items, more) => sink.on_answer(id, items, more),
            Inbound::Notify(id, items) => sink.on_notify(id, items),
            Inbound::Fault(id, error) => sink.on_fault(id, error),
        }
    }

    fn reply(&self, inbound: Inbound) {
        if *self.hold_replies.lock() {
            self.state.lock().held.push(inbound);
        } else {
            self.deliver(inbound);
        }
    }

    fn answer(&self, id: RequestId, items: Vec<WireItem>) {
        if items.is_empty() {
            self.reply(Inbound::Answer(id, Vec::new(), false));
            return;
        }
        let pages: Vec<Vec<WireItem>> = items.chunks(self.page_size).map(<[_]>::to_vec).collect();
        let last = pages.len() - 1;
        for (i, page) in pages.into_iter().enumerate() {
            self.reply(Inbound::Answer(id, page, i < last));
        }
    }

    fn is_live(&self, item: &WireItem, now: Timestamp) -> bool {
        now < item.expires && !item.payload.is_empty()
    }

    fn select(&self, query: &SelectQuery) -> Vec<WireItem> {
        let now = self.clock.now();
        let state = self.state.lock();
        let mut found: Vec<WireItem> = state
            .items
            .values()
            .filter(|item| {
                query.item_names.is_empty()
                    || query
                        .item_names
                        .iter()
                        .any(|n| n.eq_ignore_ascii_case(&item.name))
            })
            .filter(|item| query.item_ids.is_empty() || query.item_ids.contains(&item.id))
            .filter(|item| {
                query
                    .data_type
                    .as_ref()
                    .map_or(true, |t| item.data_type.as_deref() == Some(t.as_str()))
            })
            .filter(|item| query.app_scopes.is_empty() || query.app_scopes.contains(&item.app_scope))
            .filter(|item| item.store_usn > query.min_usn)
            .filter(|item| query.include_deleted || self.is_live(item, now))
            .filter(|item| query.filter.as_ref().map_or(true, |f| matches_filter(f, item)))
            .cloned()
            .collect();
        if query.order_by.is_some() {
            found.sort_by(|a, b| a.name.cmp(&b.name));
        }
        let mut page: Vec<WireItem> = found.into_iter().skip(query.start_row).collect();
        if query.row_count > 0 {
            page.truncate(query.row_count);
        }
        if query.exclude_data_body {
            for item in &mut page {
                item.payload.clear();
                item.signature.clear();
            }
        }
        page
    }

    fn save(&self, items: &[WireItem]) {
        let mut notifications = Vec::new();
        {
            let mut state = self.state.lock();
            for item in items {
                let mut item = item.clone();
                item.store_usn = self.usn.fetch_add(1, Ordering::SeqCst) + 1;
                for (id, spec) in &state.subscriptions {
                    if subscription_matches(spec, &item) {
                        notifications.push(Inbound::Notify(*id, vec![item.clone()]));
                    }
                }
                state.items.insert(item.name.to_lowercase(), item);
            }
        }
        for notification in notifications {
            self.reply(notification);
        }
    }

    fn create_subscription(&self, spec: &SubscriptionSpec) {
        let now = self.clock.now();
        let existing: Vec<WireItem> = {
            let mut state = self.state.lock();
            state.subscriptions.insert(spec.id, spec.clone());
            if spec.exclude_existing {
                Vec::new()
            } else {
                state
                    .items
                    .values()
                    .filter(|item| subscription_matches(spec, item))
                    .filter(|item| !spec.exclude_deleted || self.is_live(item, now))
                    .cloned()
                    .collect()
            }
        };
        if !existing.is_empty() {
            self.reply(Inbound::Notify(spec.id, existing));
        }
    }
}

fn subscription_matches(spec: &SubscriptionSpec, item: &WireItem) -> bool {
    spec.data_type
        .as_ref()
        .map_or(true, |t| item.data_type.as_deref() == Some(t.as_str()))
        && matches_filter(&spec.filter, item)
}

/// Understands `true` and `Prop = 'value'`.
fn matches_filter(filter: &QueryExpr, item: &WireItem) -> bool {
    if filter.is_all() {
        return true;
    }
    let Some((prop, value)) = filter.as_str().split_once('=') else {
        return false;
    };
    let value = value.trim().trim_matches('\'');
    item.app_props.get_str(prop.trim()) == Some(value)
}

impl Transport for LoopbackServer {
    fn attach(&self, sink: InboundSink) {
        *self.sink.lock() = Some(sink);
    }

    fn open_session(&self, _client: &ClientInfo) -> Result<SessionId, TransportError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(SessionId::new())
    }

    fn send(&self, envelope: &RequestEnvelope) -> Result<(), TransportError> {
        let failing = self
            .fail_next_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Communication("connection refused".into()));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(TransportError::Unexpected("contract mismatch".into()));
        }
        self.state.lock().sent.push(envelope.clone());

        let id = envelope.request_id;
        match &envelope.body {
            RequestBody::Select(query) => {
                let ignored = self.ignored_names.lock();
                if query.item_names.iter().any(|n| ignored.contains(&n.to_lowercase())) {
                    return Ok(());
                }
                drop(ignored);
                let rejection = query
                    .item_names
                    .iter()
                    .find_map(|n| self.rejected_names.lock().get(&n.to_lowercase()).cloned());
                if let Some(reason) = rejection {
                    self.reply(Inbound::Fault(id, reason));
                    return Ok(());
                }
                let items = self.select(query);
                self.answer(id, items);
            }
            RequestBody::Save(items) => {
                self.save(items);
                if envelope.more_following {
                    *self.state.lock().partial_saves.entry(id).or_default() += 1;
                } else {
                    self.state.lock().partial_saves.remove(&id);
                    self.reply(Inbound::Answer(id, Vec::new(), false));
                }
            }
            RequestBody::CreateSubscription(spec) => {
                self.create_subscription(spec);
                self.reply(Inbound::Answer(id, Vec::new(), false));
            }
            RequestBody::ExtendSubscriptions => {
                self.reply(Inbound::Answer(id, Vec::new(), false));
            }
            RequestBody::CancelSubscription(sub) => {
                self.state.lock().subscriptions.remove(sub);
                self.reply(Inbound::Answer(id, Vec::new(), false));
            }
        }
        Ok(())
    }

    fn close_session(&self, _session: SessionId) {}
}

/// Reversible toy crypto. Keys starting with `bad` are unknown.
#[derive(Debug, Default)]
pub struct ToyCrypto;

fn xor(key: &str, data: &[u8]) -> Vec<u8> {
    let mask = key.bytes().fold(0x5Au8, |acc, b| acc ^ b);
    data.iter().map(|b| b ^ mask).collect()
}

fn check_key(key_id: &str) -> Result<(), CryptoError> {
    if key_id.starts_with("bad") {
        Err(CryptoError::UnknownKey(key_id.to_string()))
    } else {
        Ok(())
    }
}

impl CryptoProvider for ToyCrypto {
    fn encrypt_with_transport_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key(key_id)?;
        Ok(xor(key_id, data))
    }

    fn decrypt_with_transport_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key(key_id)?;
        Ok(xor(key_id, data))
    }

    fn encrypt_with_public_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key(key_id)?;
        let mut out = xor(key_id, data);
        out.reverse();
        Ok(out)
    }

    fn decrypt_with_secret_key(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key(key_id)?;
        let mut reversed = data.to_vec();
        reversed.reverse();
        Ok(xor(key_id, &reversed))
    }

    fn create_signature(&self, key_id: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key(key_id)?;
        let mut keyed = key_id.as_bytes().to_vec();
        keyed.extend_from_slice(data);
        Ok(Hash::from_bytes(&keyed).0.to_vec())
    }

    fn verify_signature(&self, key_id: &str, data: &[u8], signature: &[u8]) -> bool {
        self.create_signature(key_id, data)
            .map(|expected| expected == signature)
            .unwrap_or(false)
    }
}

/// Manual clock starting at a fixed instant, shared as both types.
pub fn manual_clock() -> (ManualClock, Arc<dyn Clock>) {
    let clock = ManualClock::new(Timestamp(1_700_000_000_000_000));
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    (clock, shared)
}

pub fn item_id_set(items: &[itemwire::Item]) -> HashSet<ItemId> {
    items.iter().map(|i| i.id()).collect()
}
