use crate::config::StorageConfig;
use crate::error::DbError;
use crate::storage::backend::TransactionMode;
use std::collections::{BTreeSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Unopened,
    Opening,
    Ready,
    Failed,
    Closed,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Unopened => "unopened",
            Phase::Opening => "opening",
            Phase::Ready => "ready",
            Phase::Failed => "failed",
            Phase::Closed => "closed",
        }
    }
}

/// Outcome of [`TransactionScheduler::admit`].
#[derive(Debug)]
pub enum Admission<R> {
    /// Run the request now.
    Dispatch(R),
    /// Held until the connection is ready or the version change completes.
    Queued,
    /// The connection failed or was closed; the request gets this error.
    Rejected(R, DbError),
}

/// Pending-transaction queue, ready gate and version-change mutex of one
/// connection.
///
/// Read-write transactions whose store sets overlap run one at a time; reads
/// and writes over disjoint stores run concurrently.
///
/// Pure state: requests go in, requests to run come out. The caller executes
/// them and reports completion, and never holds the scheduler lock while a
/// request runs.
#[derive(Debug)]
pub struct TransactionScheduler<R> {
    phase: Phase,
    failure: Option<DbError>,
    in_version_change: bool,
    active: usize,
    locked: BTreeSet<String>,
    queue: VecDeque<(TransactionMode, Vec<String>, R)>,
    max_queue_depth: usize,
    stall_warning: Duration,
    last_progress: Option<Instant>,
    dropped: u64,
}

impl<R> TransactionScheduler<R> {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            phase: Phase::Unopened,
            failure: None,
            in_version_change: false,
            active: 0,
            locked: BTreeSet::new(),
            queue: VecDeque::new(),
            max_queue_depth: config.max_queue_depth.max(1),
            stall_warning: config.queue_stall_warning,
            last_progress: None,
            dropped: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    pub fn in_version_change(&self) -> bool {
        self.in_version_change
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Requests discarded because the queue overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn failure(&self) -> Option<&DbError> {
        self.failure.as_ref()
    }

    pub fn begin_opening(&mut self) {
        if self.phase == Phase::Unopened {
            self.phase = Phase::Opening;
        }
    }

    fn rejection(&self) -> Option<DbError> {
        match self.phase {
            Phase::Failed => Some(
                self.failure
                    .clone()
                    .unwrap_or_else(|| DbError::connection("connection failed")),
            ),
            Phase::Closed => Some(DbError::connection("connection closed")),
            _ => None,
        }
    }

    /// Stores held by running read-write transactions.
    pub fn locked_stores(&self) -> impl Iterator<Item = &str> {
        self.locked.iter().map(String::as_str)
    }

    fn can_dispatch(&self, mode: TransactionMode, stores: &[String]) -> bool {
        if self.phase != Phase::Ready || self.in_version_change {
            return false;
        }
        match mode {
            TransactionMode::VersionChange => self.active == 0,
            TransactionMode::ReadWrite => !stores.iter().any(|s| self.locked.contains(s)),
            TransactionMode::ReadOnly => true,
        }
    }

    fn start(&mut self, mode: TransactionMode, stores: &[String]) {
        self.active += 1;
        match mode {
            TransactionMode::VersionChange => self.in_version_change = true,
            TransactionMode::ReadWrite => self.locked.extend(stores.iter().cloned()),
            TransactionMode::ReadOnly => {}
        }
    }

    pub fn admit(
        &mut self,
        mode: TransactionMode,
        stores: &[String],
        request: R,
    ) -> Admission<R> {
        if let Some(err) = self.rejection() {
            return Admission::Rejected(request, err);
        }
        if self.queue.is_empty() && self.can_dispatch(mode, stores) {
            self.start(mode, stores);
            debug!(?mode, active = self.active, "transaction dispatched");
            return Admission::Dispatch(request);
        }
        self.enqueue(mode, stores.to_vec(), request);
        Admission::Queued
    }

    fn enqueue(&mut self, mode: TransactionMode, stores: Vec<String>, request: R) {
        let now = Instant::now();
        match self.last_progress {
            Some(since) if !self.queue.is_empty() => {
                let stalled = now.saturating_duration_since(since);
                if stalled >= self.stall_warning {
                    warn!(
                        phase = self.phase.as_str(),
                        queued = self.queue.len(),
                        stalled_ms = stalled.as_millis() as u64,
                        "transaction queue is not moving"
                    );
                }
            }
            _ => self.last_progress = Some(now),
        }
        if self.queue.len() >= self.max_queue_depth {
            self.queue.pop_front();
            self.dropped += 1;
            warn!(
                max_queue_depth = self.max_queue_depth,
                dropped = self.dropped,
                "transaction queue full, oldest request dropped"
            );
        }
        self.queue.push_back((mode, stores, request));
    }

    fn pop_next(&mut self) -> Option<R> {
        let (mode, stores, _) = self.queue.front()?;
        if !self.can_dispatch(*mode, stores) {
            return None;
        }
        let (mode, stores, request) = self.queue.pop_front()?;
        self.last_progress = Some(Instant::now());
        self.start(mode, &stores);
        debug!(?mode, queued = self.queue.len(), "queued transaction dispatched");
        Some(request)
    }

    /// Records the end of a dispatched transaction and returns the next
    /// queued request allowed to run.
    pub fn complete(&mut self, mode: TransactionMode, stores: &[String]) -> Option<R> {
        self.active = self.active.saturating_sub(1);
        match mode {
            TransactionMode::VersionChange => self.in_version_change = false,
            TransactionMode::ReadWrite => {
                for store in stores {
                    self.locked.remove(store);
                }
            }
            TransactionMode::ReadOnly => {}
        }
        self.pop_next()
    }

    /// Opens the gate and returns the first queued request.
    pub fn mark_ready(&mut self) -> Option<R> {
        if matches!(self.phase, Phase::Failed | Phase::Closed) {
            return None;
        }
        self.phase = Phase::Ready;
        debug!(queued = self.queue.len(), "connection ready");
        self.pop_next()
    }

    /// Moves to `Failed` and hands back every queued request so each can
    /// receive the error.
    pub fn fail(&mut self, err: DbError) -> Vec<R> {
        if self.phase != Phase::Closed {
            self.phase = Phase::Failed;
            self.failure = Some(err.clone());
        }
        let purged = self.drain();
        info!(purged = purged.len(), error = %err, "transaction queue purged");
        purged
    }

    /// Moves to `Closed` and hands back every queued request.
    pub fn close(&mut self) -> Vec<R> {
        self.phase = Phase::Closed;
        let purged = self.drain();
        if !purged.is_empty() {
            info!(purged = purged.len(), "transaction queue purged on close");
        }
        purged
    }

    fn drain(&mut self) -> Vec<R> {
        self.last_progress = None;
        self.queue.drain(..).map(|(_, _, request)| request).collect()
    }
}
