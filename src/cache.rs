//! Local item cache fed by subscriptions.
//!
//! An [`ItemCache`] keeps the latest current item per name (names compare
//! case-insensitively). Its own subscriptions keep it up to date; tombstones
//! and expired items remove entries. Every change is reported as a
//! [`CacheChangeEvent`] on the user queue, in the order it was applied.
//!
//! Reads fall back to the server on a miss and saves write through. Private
//! objects live only in this process and are never sent.

use crate::dispatch::DispatchQueue;
use crate::error::{ClientError, Result};
use crate::items::Item;
use crate::subscriptions::{SubscriptionCallback, SubscriptionOptions};
use crate::transport::SelectQuery;
use crate::types::{CacheId, ItemId, SubscriptionId, Timestamp};
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Entries held when no capacity is given.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// What the cache needs from its client.
pub trait CacheSource: Send + Sync {
    fn now(&self) -> Timestamp;

    fn load_items(&self, query: SelectQuery) -> Result<Vec<Item>>;

    /// Freeze and save `item`.
    fn save_item(&self, item: &mut Item) -> Result<()>;

    fn subscribe(
        &self,
        options: &SubscriptionOptions,
        callback: SubscriptionCallback,
    ) -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheChange {
    Cleared,
    Created,
    /// An entry was replaced by a different item of the same name.
    Updated,
    /// Deleted, expired, evicted or unsubscribed.
    Removed,
}

#[derive(Clone, Debug)]
pub struct CacheChangeEvent {
    pub cache_id: CacheId,
    pub change: CacheChange,
    pub old: Option<Arc<Item>>,
    pub new: Option<Arc<Item>>,
}

pub type CacheChangeHandler = Arc<dyn Fn(&CacheChangeEvent) + Send + Sync>;

/// Where an entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Subscription(SubscriptionId),
    Loaded,
    Saved,
    Private,
}

struct Entry {
    item: Arc<Item>,
    origin: Origin,
}

struct CacheState {
    entries: LruCache<String, Entry>,
    subscriptions: Vec<SubscriptionId>,
    created: u64,
    updated: u64,
    deleted: u64,
}

struct CacheInner {
    id: CacheId,
    source: Arc<dyn CacheSource>,
    user_queue: Arc<DispatchQueue>,
    handler: Option<CacheChangeHandler>,
    state: Mutex<CacheState>,
}

fn cache_key(name: &str) -> String {
    name.to_lowercase()
}

impl CacheInner {
    fn event(&self, change: CacheChange, old: Option<Arc<Item>>, new: Option<Arc<Item>>) -> CacheChangeEvent {
        CacheChangeEvent {
            cache_id: self.id,
            change,
            old,
            new,
        }
    }

    /// Apply one item. Returns the resulting events; the caller notifies.
    fn apply(&self, state: &mut CacheState, item: Arc<Item>, origin: Origin, now: Timestamp) -> Vec<CacheChangeEvent> {
        let mut events = Vec::new();
        let key = match item.name() {
            Some(name) => cache_key(name),
            None => return events,
        };

        let removes = origin != Origin::Private
            && (!item.is_current(now) || item.is_tombstone().unwrap_or(false));
        if removes {
            if let Some(old) = state.entries.pop(&key) {
                state.deleted += 1;
                events.push(self.event(CacheChange::Removed, Some(old.item), None));
            }
            return events;
        }

        match state.entries.peek(&key) {
            Some(old) if old.item.id() == item.id() => {}
            Some(old) => {
                state.updated += 1;
                events.push(self.event(
                    CacheChange::Updated,
                    Some(Arc::clone(&old.item)),
                    Some(Arc::clone(&item)),
                ));
            }
            None => {
                state.created += 1;
                events.push(self.event(CacheChange::Created, None, Some(Arc::clone(&item))));
            }
        }

        if let Some((evicted_key, evicted)) = state.entries.push(key.clone(), Entry { item, origin }) {
            if evicted_key != key {
                state.deleted += 1;
                events.push(self.event(CacheChange::Removed, Some(evicted.item), None));
            }
        }
        events
    }

    fn notify(&self, events: Vec<CacheChangeEvent>) {
        if events.is_empty() {
            return;
        }
        if let Some(handler) = self.handler.clone() {
            self.user_queue.dispatch(move || {
                for event in &events {
                    handler(event);
                }
            });
        }
    }

    fn put(&self, item: Arc<Item>, origin: Origin) {
        let now = self.source.now();
        let events = {
            let mut state = self.state.lock();
            self.apply(&mut state, item, origin, now)
        };
        self.notify(events);
    }

    fn remove_where<F>(&self, matches: F) -> usize
    where
        F: Fn(&Entry) -> bool,
    {
        let events: Vec<_> = {
            let mut state = self.state.lock();
            let keys: Vec<String> = state
                .entries
                .iter()
                .filter(|(_, entry)| matches(entry))
                .map(|(key, _)| key.clone())
                .collect();
            let mut events = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(old) = state.entries.pop(&key) {
                    state.deleted += 1;
                    events.push(self.event(CacheChange::Removed, Some(old.item), None));
                }
            }
            events
        };
        let removed = events.len();
        self.notify(events);
        removed
    }
}

/// Name-keyed local view of server items.
///
/// Dropping the cache cancels its subscriptions.
pub struct ItemCache {
    inner: Arc<CacheInner>,
}

impl ItemCache {
    /// Create an empty cache holding at most `capacity` entries.
    pub fn new(
        source: Arc<dyn CacheSource>,
        user_queue: Arc<DispatchQueue>,
        capacity: usize,
        handler: Option<CacheChangeHandler>,
    ) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                id: CacheId::new(),
                source,
                user_queue,
                handler,
                state: Mutex::new(CacheState {
                    entries: LruCache::new(capacity),
                    subscriptions: Vec::new(),
                    created: 0,
                    updated: 0,
                    deleted: 0,
                }),
            }),
        }
    }

    pub fn id(&self) -> CacheId {
        self.inner.id
    }

    // --- Subscriptions ---

    /// Subscribe and feed every pushed item into the cache.
    pub fn subscribe(&self, options: SubscriptionOptions) -> Result<SubscriptionId> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let callback: SubscriptionCallback = Arc::new(move |id: SubscriptionId, item: Arc<Item>| {
            if let Some(inner) = weak.upgrade() {
                inner.put(item, Origin::Subscription(id));
            }
        });
        let id = self.inner.source.subscribe(&options, callback)?;
        self.inner.state.lock().subscriptions.push(id);
        debug!(cache_id = %self.inner.id, subscription_id = %id, "cache subscribed");
        Ok(id)
    }

    /// Cancel a subscription and drop the entries it delivered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.inner.state.lock().subscriptions.retain(|s| *s != id);
        let result = self.inner.source.unsubscribe(id);
        self.inner
            .remove_where(|entry| entry.origin == Origin::Subscription(id));
        result
    }

    pub fn unsubscribe_all(&self) -> Result<()> {
        let ids = std::mem::take(&mut self.inner.state.lock().subscriptions);
        let mut first_error = None;
        for id in ids {
            if let Err(e) = self.inner.source.unsubscribe(id) {
                first_error.get_or_insert(e);
            }
            self.inner
                .remove_where(|entry| entry.origin == Origin::Subscription(id));
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.inner.state.lock().subscriptions.clone()
    }

    // --- Reads ---

    /// Current item named `name`, loading it from the server on a miss.
    pub fn load_item(&self, name: &str) -> Result<Option<Arc<Item>>> {
        let now = self.inner.source.now();
        let key = cache_key(name);
        let expired = {
            let mut state = self.inner.state.lock();
            match state.entries.get(&key) {
                Some(entry) if entry.item.is_current(now) => return Ok(Some(Arc::clone(&entry.item))),
                Some(_) => {
                    let old = state.entries.pop(&key).map(|e| e.item);
                    state.deleted += 1;
                    old
                }
                None => None,
            }
        };
        if let Some(old) = expired {
            self.inner
                .notify(vec![self.inner.event(CacheChange::Removed, Some(old), None)]);
        }

        let query = SelectQuery {
            item_names: vec![name.to_string()],
            ..Default::default()
        };
        let mut items = self.inner.source.load_items(query)?;
        if items.len() > 1 {
            return Err(ClientError::TooManyResults(items.len()));
        }
        let item = match items.pop() {
            Some(item) => Arc::new(item),
            None => return Ok(None),
        };
        if !item.is_current(now) || item.is_tombstone()? {
            return Ok(None);
        }
        self.inner.put(Arc::clone(&item), Origin::Loaded);
        Ok(Some(item))
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

    /// Cached entry, without a server round-trip.
    pub fn get(&self, name: &str) -> Option<Arc<Item>> {
        self.inner
            .state
            .lock()
            .entries
            .peek(&cache_key(name))
            .map(|entry| Arc::clone(&entry.item))
    }

    pub fn items(&self) -> Vec<Arc<Item>> {
        self.inner
            .state
            .lock()
            .entries
            .iter()
            .map(|(_, entry)| Arc::clone(&entry.item))
            .collect()
    }

    // --- Writes ---

    /// Save through to the server and cache the frozen item.
    pub fn save_item(&self, mut item: Item) -> Result<ItemId> {
        self.inner.source.save_item(&mut item)?;
        let id = item.id();
        self.inner.put(Arc::new(item), Origin::Saved);
        Ok(id)
    }

    pub fn save_object<T>(&self, name: impl Into<String>, value: T) -> Result<ItemId>
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.save_item(Item::with_object(name, value))
    }

    /// Save a tombstone for `name` and drop the entry.
    pub fn delete_item(&self, name: &str) -> Result<ItemId> {
        let mut tombstone = Item::new(name);
        if let Some(existing) = self.get(name) {
            if let Some(data_type) = existing.data_type() {
                tombstone.set_data_type(data_type)?;
            }
            tombstone.set_app_props(existing.app_props().clone())?;
        }
        self.save_item(tombstone)
    }

    /// Keep a value in this cache only. Never sent to the server.
    pub fn save_private_object<T>(&self, name: impl Into<String>, value: T)
    where
        T: Serialize + Send + Sync + 'static,
    {
        self.inner
            .put(Arc::new(Item::with_object(name, value)), Origin::Private);
    }

    pub fn load_private_object<T>(&self, name: &str) -> Result<Option<Arc<T>>>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        let state = self.inner.state.lock();
        match state.entries.peek(&cache_key(name)) {
            Some(entry) if entry.origin == Origin::Private => entry.item.data::<T>(),
            _ => Ok(None),
        }
    }

    // --- Housekeeping ---

    /// Drop entries that are no longer current. Returns how many went.
    pub fn purge(&self) -> usize {
        let now = self.inner.source.now();
        self.inner
            .remove_where(|entry| entry.origin != Origin::Private && !entry.item.is_current(now))
    }

    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            let count = state.entries.len() as u64;
            state.deleted += count;
            state.entries.clear();
        }
        self.inner
            .notify(vec![self.inner.event(CacheChange::Cleared, None, None)]);
    }

    // --- Counters ---

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Created minus deleted.
    pub fn item_count(&self) -> i64 {
        let state = self.inner.state.lock();
        state.created as i64 - state.deleted as i64
    }

    pub fn create_count(&self) -> u64 {
        self.inner.state.lock().created
    }

    pub fn update_count(&self) -> u64 {
        self.inner.state.lock().updated
    }

    pub fn delete_count(&self) -> u64 {
        self.inner.state.lock().deleted
    }
}

impl Drop for ItemCache {
    fn drop(&mut self) {
        if let Err(e) = self.unsubscribe_all() {
            warn!(cache_id = %self.inner.id, error = %e, "cache unsubscribe failed");
        }
    }
}
