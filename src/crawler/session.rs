//! Crawl session state
//!
//! A [`CrawlSession`] is owned by the task running the session and dropped
//! when it ends. Its [`CrawlState`] only moves along the edges allowed by
//! [`CrawlState::can_transition_to`].

use crate::source::{CrawlTarget, Item, KnownItems};
use crate::DragnetError;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// State of the orchestrator's session loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlState {
    /// Not started yet
    Idle,

    /// Asking the adapter for new targets
    Discovering,

    /// Fetching up to `hits-per-loop` queued targets
    FetchingBatch,

    /// Parsing, deduplicating and storing the fetched batch
    Persisting,

    /// Waiting before the next discovery attempt
    Throttled,

    /// Terminal state
    Completed,
}

impl CrawlState {
    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: CrawlState) -> bool {
        use CrawlState::*;

        matches!(
            (self, next),
            (Idle, Discovering)
                | (Discovering, FetchingBatch)
                | (Discovering, Discovering)
                | (Discovering, Throttled)
                | (Discovering, Completed)
                | (Throttled, Discovering)
                | (Throttled, Completed)
                | (FetchingBatch, Persisting)
                | (FetchingBatch, Discovering)
                | (FetchingBatch, Completed)
                | (Persisting, FetchingBatch)
                | (Persisting, Discovering)
                | (Persisting, Throttled)
                | (Persisting, Completed)
        )
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlState::Idle => "idle",
            CrawlState::Discovering => "discovering",
            CrawlState::FetchingBatch => "fetching",
            CrawlState::Persisting => "persisting",
            CrawlState::Throttled => "throttled",
            CrawlState::Completed => "completed",
        };
        write!(f, "{}", name)
    }
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The requested number of items was inserted
    LimitReached,

    /// Discovery stayed empty for the configured number of attempts
    Exhausted,

    /// The session's cancellation token fired
    Cancelled,
}

impl SessionOutcome {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::LimitReached => "limit_reached",
            Self::Exhausted => "exhausted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "limit_reached" => Some(Self::LimitReached),
            "exhausted" => Some(Self::Exhausted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Transient state of one crawl session
#[derive(Debug)]
pub struct CrawlSession {
    /// Identities already persisted, seeded from the sink
    pub known: KnownItems,

    /// Discovered targets waiting to be fetched
    pub pending: VecDeque<CrawlTarget>,

    /// Items inserted by this session
    pub inserted: Vec<Item>,

    /// Known identities when the session started
    pub items_at_start: usize,

    /// Index of the filter currently being crawled
    pub filter_index: usize,

    /// Consecutive discoveries that returned nothing
    pub idle_discoveries: u32,

    pub parse_failures: usize,
    pub fetch_failures: usize,

    state: CrawlState,
    started: Instant,
}

impl CrawlSession {
    pub fn new(known: KnownItems) -> Self {
        Self {
            items_at_start: known.len(),
            known,
            pending: VecDeque::new(),
            inserted: Vec::new(),
            filter_index: 0,
            idle_discoveries: 0,
            parse_failures: 0,
            fetch_failures: 0,
            state: CrawlState::Idle,
            started: Instant::now(),
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Moves to `next`, rejecting edges the state machine does not allow
    pub fn transition(&mut self, next: CrawlState) -> Result<(), DragnetError> {
        if !self.state.can_transition_to(next) {
            return Err(DragnetError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(from = %self.state, to = %next, "Session state change");
        self.state = next;
        Ok(())
    }

    /// Number of items inserted by this session
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Queues newly discovered targets, skipping keys already pending
    pub fn enqueue(&mut self, targets: Vec<CrawlTarget>) {
        for target in targets {
            if !self.pending.iter().any(|t| t.key == target.key) {
                self.pending.push_back(target);
            }
        }
    }

    /// Drops pending targets that became known; returns how many were dropped
    pub fn drop_known_pending(&mut self) -> usize {
        let before = self.pending.len();
        let known = &self.known;
        self.pending
            .retain(|t| !known.matches(&t.key, t.name.as_deref()));
        before - self.pending.len()
    }

    /// Takes up to `max` targets from the front of the queue
    pub fn take_batch(&mut self, max: usize) -> Vec<CrawlTarget> {
        let n = max.min(self.pending.len());
        self.pending.drain(..n).collect()
    }

    /// Records a successfully stored item
    pub fn record_inserted(&mut self, item: Item) {
        self.known.insert_item(&item);
        self.inserted.push(item);
    }
}
