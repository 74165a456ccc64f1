//! Pending request table
//!
//! Tracks outstanding RPC requests by correlation id. Every request settles
//! exactly once: resolved, failed, timed out or cancelled. Settling removes the
//! entry under the table lock, so whoever removes it owns the outcome.
//!
//! Deadlines are enforced by the table itself. Each entry gets a timer task
//! that expires it at its deadline, and a response that reaches an entry past
//! its deadline times the request out instead of resolving it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{RpcError, RpcResult};
use crate::protocol::{CorrelationId, Message, MessageKind};

/// Terminal state of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Resolved,
    /// Answered with the wrong variant
    Failed,
    TimedOut,
    Cancelled,
}

/// Result of routing a correlated response into the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Delivered to the waiting caller
    Resolved,
    /// Caller failed with a correlation type error
    Mismatch {
        expected: MessageKind,
        actual: MessageKind,
    },
    /// The request had already settled; the response is dropped
    Late(Settlement),
    /// No request with this id was ever seen here
    Unknown,
}

struct PendingEntry {
    expected: MessageKind,
    created_at: Instant,
    deadline: Instant,
    slot: oneshot::Sender<RpcResult<Message>>,
    timer: Option<JoinHandle<()>>,
}

impl PendingEntry {
    fn stop_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }

    fn time_out(self, correlation_id: CorrelationId) -> Duration {
        let elapsed = self.created_at.elapsed();
        let _ = self.slot.send(Err(RpcError::Timeout {
            correlation_id,
            elapsed,
        }));
        elapsed
    }
}

struct TableState {
    pending: HashMap<CorrelationId, PendingEntry>,
    settled: HashMap<CorrelationId, Settlement>,
    settled_order: VecDeque<CorrelationId>,
    history: usize,
}

impl TableState {
    fn settle(&mut self, id: CorrelationId, settlement: Settlement) {
        if self.history == 0 {
            return;
        }
        if self.settled_order.len() >= self.history {
            if let Some(oldest) = self.settled_order.pop_front() {
                self.settled.remove(&oldest);
            }
        }
        self.settled.insert(id, settlement);
        self.settled_order.push_back(id);
    }
}

/// Correlation table shared by callers and the inbound path
pub struct PendingTable {
    state: Mutex<TableState>,
}

impl PendingTable {
    /// `history` bounds how many settled ids are remembered
    pub fn new(history: usize) -> Self {
        Self {
            state: Mutex::new(TableState {
                pending: HashMap::new(),
                settled: HashMap::new(),
                settled_order: VecDeque::new(),
                history,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new request expecting `expected` within `timeout`.
    ///
    /// Inside a Tokio runtime a timer task expires the entry at its deadline.
    /// Without one, expiry happens when a response arrives or the caller polls.
    pub fn insert(self: &Arc<Self>, expected: MessageKind, timeout: Duration) -> PendingRequest {
        let (slot, receiver) = oneshot::channel();
        let created_at = Instant::now();
        let deadline = created_at + timeout;

        let mut state = self.lock();
        let mut correlation_id = CorrelationId::new();
        while state.pending.contains_key(&correlation_id) || state.settled.contains_key(&correlation_id) {
            correlation_id = CorrelationId::new();
        }
        let timer = Handle::try_current()
            .ok()
            .map(|runtime| runtime.spawn(expire_at(Arc::downgrade(self), correlation_id, deadline)));
        state.pending.insert(
            correlation_id,
            PendingEntry {
                expected,
                created_at,
                deadline,
                slot,
                timer,
            },
        );
        drop(state);

        tracing::trace!("Request {} pending, expecting {}", correlation_id, expected);

        PendingRequest {
            correlation_id,
            expected,
            created_at,
            deadline,
            receiver,
            table: Arc::clone(self),
            finished: false,
        }
    }

    /// Route a correlated response to its request
    pub fn resolve(&self, correlation_id: CorrelationId, message: Message) -> Resolution {
        let mut state = self.lock();

        let Some(entry) = state.pending.remove(&correlation_id) else {
            return match state.settled.get(&correlation_id) {
                Some(settlement) => Resolution::Late(*settlement),
                None => Resolution::Unknown,
            };
        };
        entry.stop_timer();

        if Instant::now() >= entry.deadline {
            let elapsed = entry.time_out(correlation_id);
            state.settle(correlation_id, Settlement::TimedOut);
            tracing::debug!(
                "Request {} timed out after {:?}, dropping its response",
                correlation_id,
                elapsed
            );
            return Resolution::Late(Settlement::TimedOut);
        }

        let actual = message.kind();
        let (outcome, settlement, resolution) = if actual == entry.expected {
            (Ok(message), Settlement::Resolved, Resolution::Resolved)
        } else {
            let err = RpcError::CorrelationType {
                correlation_id,
                expected: entry.expected,
                actual,
            };
            let resolution = Resolution::Mismatch {
                expected: entry.expected,
                actual,
            };
            (Err(err), Settlement::Failed, resolution)
        };

        // Sent while holding the lock so a racing timeout finds the value
        if entry.slot.send(outcome).is_err() {
            tracing::trace!("Caller of {} went away before delivery", correlation_id);
        }
        state.settle(correlation_id, settlement);

        tracing::debug!(
            "Request {} settled as {:?} after {:?}",
            correlation_id,
            settlement,
            entry.created_at.elapsed()
        );
        resolution
    }

    /// Fail a request that could not be sent
    pub fn fail(&self, correlation_id: CorrelationId, err: RpcError) -> bool {
        let mut state = self.lock();
        match state.pending.remove(&correlation_id) {
            Some(entry) => {
                entry.stop_timer();
                let _ = entry.slot.send(Err(err));
                state.settle(correlation_id, Settlement::Failed);
                true
            }
            None => false,
        }
    }

    fn expire(&self, correlation_id: CorrelationId) -> bool {
        self.remove(correlation_id, Settlement::TimedOut)
    }

    /// Timer path: expire the entry and hand the caller its timeout
    fn expire_entry(&self, correlation_id: CorrelationId) {
        let mut state = self.lock();
        if let Some(entry) = state.pending.remove(&correlation_id) {
            let elapsed = entry.time_out(correlation_id);
            state.settle(correlation_id, Settlement::TimedOut);
            tracing::debug!("Request {} timed out after {:?}", correlation_id, elapsed);
        }
    }

    fn cancel(&self, correlation_id: CorrelationId) -> bool {
        self.remove(correlation_id, Settlement::Cancelled)
    }

    fn remove(&self, correlation_id: CorrelationId, settlement: Settlement) -> bool {
        let mut state = self.lock();
        if let Some(entry) = state.pending.remove(&correlation_id) {
            entry.stop_timer();
            state.settle(correlation_id, settlement);
            true
        } else {
            false
        }
    }

    pub fn settlement(&self, correlation_id: CorrelationId) -> Option<Settlement> {
        self.lock().settled.get(&correlation_id).copied()
    }

    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.lock().pending.contains_key(&correlation_id)
    }

    /// Number of outstanding requests
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn expire_at(table: Weak<PendingTable>, correlation_id: CorrelationId, deadline: Instant) {
    tokio::time::sleep_until(deadline).await;
    if let Some(table) = table.upgrade() {
        table.expire_entry(correlation_id);
    }
}

/// Caller's handle on one outstanding request.
///
/// Dropping the handle before it yields a result cancels the request; a
/// response arriving afterwards is discarded.
pub struct PendingRequest {
    correlation_id: CorrelationId,
    expected: MessageKind,
    created_at: Instant,
    deadline: Instant,
    receiver: oneshot::Receiver<RpcResult<Message>>,
    table: Arc<PendingTable>,
    finished: bool,
}

impl PendingRequest {
    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn expected(&self) -> MessageKind {
        self.expected
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Poll for the outcome without waiting. Yields the outcome once, then `None`.
    pub fn try_result(&mut self) -> Option<RpcResult<Message>> {
        if self.finished {
            return None;
        }

        match self.receiver.try_recv() {
            Ok(result) => {
                self.finished = true;
                Some(result)
            }
            Err(oneshot::error::TryRecvError::Empty) if Instant::now() < self.deadline => None,
            Err(oneshot::error::TryRecvError::Empty) => {
                self.finished = true;
                Some(self.expire_or_take())
            }
            Err(oneshot::error::TryRecvError::Closed) => {
                self.finished = true;
                Some(Err(RpcError::Cancelled))
            }
        }
    }

    /// Wait for the response, at most until the deadline
    pub async fn wait(mut self) -> RpcResult<Message> {
        let outcome = tokio::time::timeout_at(self.deadline, &mut self.receiver).await;
        self.finished = true;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RpcError::Cancelled),
            Err(_) => self.expire_or_take(),
        }
    }

    fn expire_or_take(&mut self) -> RpcResult<Message> {
        if self.table.expire(self.correlation_id) {
            let elapsed = self.created_at.elapsed();
            tracing::debug!("Request {} timed out after {:?}", self.correlation_id, elapsed);
            return Err(RpcError::Timeout {
                correlation_id: self.correlation_id,
                elapsed,
            });
        }

        // Settled by the inbound path just before the deadline
        self.receiver.try_recv().unwrap_or(Err(RpcError::Cancelled))
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if !self.finished && self.table.cancel(self.correlation_id) {
            tracing::trace!("Request {} cancelled by caller", self.correlation_id);
        }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("correlation_id", &self.correlation_id)
            .field("expected", &self.expected)
            .field("deadline", &self.deadline)
            .finish()
    }
}
