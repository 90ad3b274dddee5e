//! Matches asynchronous replies to outstanding requests.

use super::types::{OutboundRequest, PendingRequest, Reply, ReplyHandle, RequestState};
use crate::error::{ClientError, Result, TimeoutReason};
use crate::items::Item;
use crate::types::{RequestId, Timestamp};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// How often a blocked `enqueue` re-checks the admission gate.
const ADMIT_POLL: Duration = Duration::from_millis(100);
/// Interval between "still blocked" log lines.
const BLOCKED_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Outgoing queue plus pending table. The queue indexes into the table.
#[derive(Default)]
struct RequestTable {
    outgoing: VecDeque<RequestId>,
    pending: HashMap<RequestId, PendingRequest>,
}

/// Owns every outstanding request from enqueue to resolution.
pub struct RequestCorrelator {
    table: Mutex<RequestTable>,
    /// Signalled whenever a slot is freed.
    room: Condvar,
    max_outstanding: usize,
    /// Pending dispatch passes; only the last one queued does work.
    dispatch_calls: AtomicU64,
}

impl RequestCorrelator {
    pub fn new(max_outstanding: usize) -> Self {
        Self {
            table: Mutex::new(RequestTable::default()),
            room: Condvar::new(),
            max_outstanding: max_outstanding.max(1),
            dispatch_calls: AtomicU64::new(0),
        }
    }

    /// Add a request to the outgoing queue and pending table.
    ///
    /// Blocks the caller while `max_outstanding` requests are already queued
    /// or pending. `admit` is checked before and while blocked; its error
    /// (a faulted or disposed client) is returned immediately.
    pub fn enqueue<F>(&self, request: OutboundRequest, admit: F) -> Result<ReplyHandle>
    where
        F: Fn() -> Result<()>,
    {
        admit()?;
        let mut table = self.table.lock();
        let mut blocked_since: Option<Instant> = None;
        let mut last_log = Instant::now();

        while table.pending.len() >= self.max_outstanding {
            let started = *blocked_since.get_or_insert_with(Instant::now);
            if last_log.elapsed() >= BLOCKED_LOG_INTERVAL {
                debug!(
                    outstanding = table.pending.len(),
                    blocked_ms = started.elapsed().as_millis() as u64,
                    "enqueue blocked: too many outstanding requests"
                );
                last_log = Instant::now();
            }
            self.room.wait_for(&mut table, ADMIT_POLL);
            MutexGuard::unlocked(&mut table, &admit)?;
        }
        if let Some(started) = blocked_since {
            if started.elapsed() >= BLOCKED_LOG_INTERVAL {
                debug!(
                    blocked_ms = started.elapsed().as_millis() as u64,
                    "enqueue unblocked"
                );
            }
        }

        let id = request.id;
        let (sender, receiver) = bounded(1);
        table
            .pending
            .insert(id, PendingRequest::new(Arc::new(request), sender));
        table.outgoing.push_back(id);
        Ok(ReplyHandle::new(id, receiver))
    }

    /// Record that a dispatch pass has been requested.
    pub fn request_pass(&self) {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
    }

    /// Claim a requested pass. Returns false when a later pass is already
    /// queued and will do the work instead.
    pub fn claim_pass(&self) -> bool {
        let prev = self
            .dispatch_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev <= 1
    }

    /// Pop the next request still awaiting transmission.
    pub fn next_outgoing(&self) -> Option<Arc<OutboundRequest>> {
        let mut table = self.table.lock();
        while let Some(id) = table.outgoing.pop_front() {
            if let Some(pending) = table.pending.get(&id) {
                if pending.state == RequestState::Queued {
                    return Some(Arc::clone(&pending.request));
                }
            }
        }
        None
    }

    pub fn mark_transmitted(&self, id: RequestId) {
        let mut table = self.table.lock();
        if let Some(pending) = table.pending.get_mut(&id) {
            if pending.state == RequestState::Queued {
                pending.state = RequestState::Transmitted;
            }
        }
    }

    /// Append a page of results. Returns false for an unknown id.
    pub fn on_envelope(&self, id: RequestId, items: Vec<Item>, is_last: bool) -> bool {
        let mut table = self.table.lock();
        let Some(pending) = table.pending.get_mut(&id) else {
            warn!(%id, "request unknown - ignoring data");
            return false;
        };
        if pending.state.is_terminal() {
            debug!(%id, state = ?pending.state, "late page for resolved request dropped");
            return true;
        }
        pending.results.extend(items);
        if is_last {
            pending.state = RequestState::Completed;
            if pending.request.debug {
                debug!(
                    %id,
                    results = pending.results.len(),
                    "request completed normally"
                );
            }
        } else {
            pending.state = RequestState::PartiallyAnswered;
        }
        true
    }

    /// Fail a request. Short-circuits any pages still expected.
    pub fn on_fault(&self, id: RequestId, error: ClientError) -> bool {
        let mut table = self.table.lock();
        let Some(pending) = table.pending.get_mut(&id) else {
            warn!(%id, %error, "request unknown - ignoring fault");
            return false;
        };
        if !pending.state.is_terminal() {
            let state = if matches!(error, ClientError::Timeout(TimeoutReason::Request)) {
                RequestState::Expired
            } else {
                RequestState::Faulted
            };
            pending.state = state;
            pending.error = Some(error);
        }
        true
    }

    /// Resolve and evict every finished request.
    ///
    /// Requests past their deadline expire first. With `faulted` set, every
    /// unfinished request fails with a general timeout.
    pub fn sweep(&self, now: Timestamp, faulted: bool) -> usize {
        let resolutions = {
            let mut table = self.table.lock();
            let mut resolutions = Vec::new();
            for (id, pending) in table.pending.iter_mut() {
                if !pending.state.is_terminal() {
                    if faulted {
                        pending.state = RequestState::Faulted;
                        pending.error = Some(ClientError::Timeout(TimeoutReason::General));
                    } else if pending.request.is_expired(now) {
                        debug!(%id, state = ?pending.state, "request expired");
                        pending.state = RequestState::Expired;
                        pending.error = Some(ClientError::Timeout(TimeoutReason::Request));
                    }
                }
                if pending.state.is_terminal() {
                    if let Some(resolution) = pending.take_resolution() {
                        resolutions.push(resolution);
                    }
                }
            }
            table.pending.retain(|_, p| !p.state.is_terminal());
            let RequestTable { outgoing, pending } = &mut *table;
            outgoing.retain(|id| pending.contains_key(id));
            resolutions
        };

        let resolved = resolutions.len();
        if resolved > 0 {
            self.room.notify_all();
        }
        Self::deliver(resolutions);
        resolved
    }

    /// Fail and evict every outstanding request.
    pub fn fail_all<F>(&self, error: F) -> usize
    where
        F: Fn() -> ClientError,
    {
        let resolutions: Vec<_> = {
            let mut table = self.table.lock();
            table.outgoing.clear();
            table
                .pending
                .drain()
                .filter_map(|(_, mut pending)| {
                    if !pending.state.is_terminal() {
                        pending.state = RequestState::Faulted;
                        pending.error = Some(error());
                    }
                    pending.take_resolution()
                })
                .collect()
        };
        let failed = resolutions.len();
        self.room.notify_all();
        Self::deliver(resolutions);
        failed
    }

    fn deliver(resolutions: Vec<(Sender<Reply>, Reply)>) {
        for (reply, outcome) in resolutions {
            // The caller may have stopped waiting.
            let _ = reply.send(outcome);
        }
    }

    /// Queued plus pending requests.
    pub fn len(&self) -> usize {
        self.table.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn queued_len(&self) -> usize {
        self.table.lock().outgoing.len()
    }

    pub fn state_of(&self, id: RequestId) -> Option<RequestState> {
        self.table.lock().pending.get(&id).map(|p| p.state)
    }

    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::RequestBody;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    fn request(timeout_secs: u64) -> OutboundRequest {
        OutboundRequest::new(
            RequestBody::ExtendSubscriptions,
            Timestamp(0),
            Duration::from_secs(timeout_secs),
            false,
        )
    }

    fn open() -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_pages_accumulate_until_last() {
        let correlator = RequestCorrelator::new(4);
        let handle = correlator.enqueue(request(30), open).unwrap();
        let id = handle.request_id();

        let names = ["a", "b", "c"];
        assert!(correlator.on_envelope(id, vec![Item::new(names[0])], false));
        assert_eq!(correlator.state_of(id), Some(RequestState::PartiallyAnswered));
        assert!(correlator.on_envelope(id, vec![Item::new(names[1]), Item::new(names[2])], true));
        assert_eq!(correlator.sweep(Timestamp(1), false), 1);

        let items = handle.wait().unwrap();
        let got: Vec<_> = items.iter().map(|i| i.name().unwrap_or("")).collect();
        assert_eq!(got, names);
        assert!(correlator.is_empty());
    }

    #[test]
    fn test_unknown_id_dropped() {
        let correlator = RequestCorrelator::new(4);
        let handle = correlator.enqueue(request(30), open).unwrap();
        assert!(!correlator.on_envelope(RequestId::new(), vec![Item::new("x")], true));
        assert!(!correlator.on_fault(RequestId::new(), ClientError::Faulted));
        assert_eq!(correlator.state_of(handle.request_id()), Some(RequestState::Queued));
    }

    #[test]
    fn test_fault_short_circuits_pages() {
        let correlator = RequestCorrelator::new(4);
        let handle = correlator.enqueue(request(30), open).unwrap();
        let id = handle.request_id();
        correlator.on_envelope(id, vec![Item::new("a")], false);
        correlator.on_fault(id, ClientError::Rejected("no access".into()));
        correlator.sweep(Timestamp(1), false);
        assert!(matches!(handle.wait(), Err(ClientError::Rejected(_))));
    }

    #[test]
    fn test_sweep_expires_only_overdue() {
        let correlator = RequestCorrelator::new(4);
        let short = correlator.enqueue(request(1), open).unwrap();
        let long = correlator.enqueue(request(60), open).unwrap();

        let now = Timestamp(0).saturating_add(Duration::from_secs(2));
        assert_eq!(correlator.sweep(now, false), 1);
        assert!(matches!(
            short.wait(),
            Err(ClientError::Timeout(TimeoutReason::Request))
        ));
        assert_eq!(correlator.state_of(long.request_id()), Some(RequestState::Queued));
    }

    #[test]
    fn test_sweep_when_faulted_fails_everything() {
        let correlator = RequestCorrelator::new(4);
        let handle = correlator.enqueue(request(60), open).unwrap();
        correlator.sweep(Timestamp(1), true);
        assert!(matches!(
            handle.wait(),
            Err(ClientError::Timeout(TimeoutReason::General))
        ));
    }

    #[test]
    fn test_enqueue_blocks_at_capacity() {
        let correlator = Arc::new(RequestCorrelator::new(2));
        let first = correlator.enqueue(request(60), open).unwrap();
        let _second = correlator.enqueue(request(60), open).unwrap();

        let entered = Arc::new(AtomicBool::new(false));
        let c = Arc::clone(&correlator);
        let e = Arc::clone(&entered);
        let blocked = thread::spawn(move || {
            let handle = c.enqueue(request(60), open).unwrap();
            e.store(true, Ordering::SeqCst);
            handle.request_id()
        });

        thread::sleep(Duration::from_millis(200));
        assert!(!entered.load(Ordering::SeqCst));

        correlator.on_envelope(first.request_id(), Vec::new(), true);
        correlator.sweep(Timestamp(1), false);
        let id = blocked.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(correlator.state_of(id), Some(RequestState::Queued));
    }

    #[test]
    fn test_blocked_enqueue_fails_fast_when_gate_closes() {
        let correlator = Arc::new(RequestCorrelator::new(1));
        let _held = correlator.enqueue(request(60), open).unwrap();

        let gate_open = Arc::new(AtomicBool::new(true));
        let c = Arc::clone(&correlator);
        let g = Arc::clone(&gate_open);
        let blocked = thread::spawn(move || {
            c.enqueue(request(60), move || {
                if g.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(ClientError::Faulted)
                }
            })
        });

        thread::sleep(Duration::from_millis(150));
        gate_open.store(false, Ordering::SeqCst);
        assert!(matches!(blocked.join().unwrap(), Err(ClientError::Faulted)));
    }

    #[test]
    fn test_next_outgoing_skips_resolved() {
        let correlator = RequestCorrelator::new(4);
        let a = correlator.enqueue(request(60), open).unwrap();
        let b = correlator.enqueue(request(60), open).unwrap();
        correlator.on_fault(a.request_id(), ClientError::Faulted);
        correlator.sweep(Timestamp(1), false);

        let next = correlator.next_outgoing().unwrap();
        assert_eq!(next.id, b.request_id());
        correlator.mark_transmitted(next.id);
        assert!(correlator.next_outgoing().is_none());
    }

    #[test]
    fn test_dispatch_passes_coalesce() {
        let correlator = RequestCorrelator::new(4);
        correlator.request_pass();
        correlator.request_pass();
        correlator.request_pass();
        assert!(!correlator.claim_pass());
        assert!(!correlator.claim_pass());
        assert!(correlator.claim_pass());
    }

    #[test]
    fn test_fail_all_resolves_pending() {
        let correlator = RequestCorrelator::new(4);
        let a = correlator.enqueue(request(60), open).unwrap();
        let b = correlator.enqueue(request(60), open).unwrap();
        assert_eq!(correlator.fail_all(|| ClientError::Disposed), 2);
        assert!(matches!(a.wait(), Err(ClientError::Disposed)));
        assert!(matches!(b.wait(), Err(ClientError::Disposed)));
        assert_eq!(correlator.queued_len(), 0);
    }
}
