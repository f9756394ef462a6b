//! # Reconciliation Poller
//!
//! After a transaction lands, the backend needs a few blocks to index it.
//! Until then the user looks at an optimistic record. This module watches
//! the backend until its record moves away from what we saw before
//! submitting, then swaps the optimistic record for the real one.
//!
//! ## State machine (per proposal)
//!
//! ```text
//! Unsynced ──begin──► Syncing ──changed──► Synced
//!                        │
//!                        └──attempts exhausted──► TimedOut
//! ```
//!
//! Each proposal gets one task. Starting a new one for the same id cancels
//! the old one first. Cancelling (for instance when the view showing the
//! proposal goes away) stops the task between polls and leaves the durable
//! marker behind, so a later [`resume_pending`](ReconciliationPoller::resume_pending)
//! picks it up again.
//!
//! The delay between polls is fixed. Confirmation latency is bounded by the
//! block time, so backing off would only make the user wait longer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::SyncMarkers;
use super::view::ProposalView;
use crate::backend::GovernanceBackend;
use crate::config::GovernanceConfig;
use crate::error::Result;
use crate::proposal::{Proposal, ProposalStatus};

/// Capacity of the sync event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Reconciliation state of one proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncState {
    Unsynced,
    Syncing,
    Synced,
    TimedOut,
}

/// Which kind of transaction is being reconciled. Decides what happens to
/// the durable marker when polling gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncFlow {
    /// A new proposal. The marker is kept after a timeout so the next
    /// session keeps looking for it.
    Create,
    /// A redeemer action on an existing proposal. The marker is cleared
    /// after a timeout.
    Update,
}

/// The fields whose change means the backend has indexed our transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedFields {
    pub status: ProposalStatus,
    pub min_voting_tokens: u64,
    pub authorized_pkhs: BTreeMap<String, u64>,
    pub vote_tally: BTreeMap<String, u64>,
    pub voting_start: i64,
    pub voting_end: i64,
    pub updated_at: DateTime<Utc>,
}

impl From<&Proposal> for WatchedFields {
    fn from(p: &Proposal) -> Self {
        Self {
            status: p.status,
            min_voting_tokens: p.min_voting_tokens,
            authorized_pkhs: p.authorized_pkhs.clone(),
            vote_tally: p.vote_tally.clone(),
            voting_start: p.voting_start,
            voting_end: p.voting_end,
            updated_at: p.updated_at,
        }
    }
}

/// What "confirmed" means for a poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    /// Confirmed once any watched field differs from this pre-submission
    /// snapshot.
    Snapshot(WatchedFields),
    /// Confirmed once the backend reports the proposal with any status
    /// other than `Draft`. Used for creations and for resumed polls, where
    /// no snapshot exists.
    AwaitNonDraft,
}

impl Baseline {
    pub fn snapshot(proposal: &Proposal) -> Self {
        Self::Snapshot(WatchedFields::from(proposal))
    }

    fn is_reconciled_by(&self, fetched: &Proposal) -> bool {
        match self {
            Self::Snapshot(before) => *before != WatchedFields::from(fetched),
            Self::AwaitNonDraft => fetched.status != ProposalStatus::Draft,
        }
    }
}

/// One notification per finished reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Synced {
        proposal_id: String,
        proposal: Box<Proposal>,
        attempts: u32,
    },
    TimedOut {
        proposal_id: String,
        attempts: u32,
    },
}

impl SyncEvent {
    pub fn proposal_id(&self) -> &str {
        match self {
            Self::Synced { proposal_id, .. } | Self::TimedOut { proposal_id, .. } => proposal_id,
        }
    }
}

struct PollTask {
    cancel: watch::Sender<bool>,
    /// Holds the final state once the task has ended.
    done: watch::Receiver<Option<SyncState>>,
    handle: JoinHandle<()>,
}

// ---------------------------------------------------------------------------
// ReconciliationPoller
// ---------------------------------------------------------------------------

struct Inner {
    backend: Arc<dyn GovernanceBackend>,
    markers: SyncMarkers,
    view: Arc<ProposalView>,
    attempts: u32,
    interval: Duration,
    states: DashMap<String, SyncState>,
    tasks: DashMap<String, PollTask>,
    events: broadcast::Sender<SyncEvent>,
}

/// Drives one polling task per proposal.
///
/// Cheap to clone; clones share state. Starting a poll spawns onto the
/// current Tokio runtime.
#[derive(Clone)]
pub struct ReconciliationPoller {
    inner: Arc<Inner>,
}

impl ReconciliationPoller {
    pub fn new(
        backend: Arc<dyn GovernanceBackend>,
        markers: SyncMarkers,
        view: Arc<ProposalView>,
        attempts: u32,
        interval: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                backend,
                markers,
                view,
                attempts,
                interval,
                states: DashMap::new(),
                tasks: DashMap::new(),
                events,
            }),
        }
    }

    /// Poller with the attempt budget and interval from `config`.
    pub fn from_config(
        backend: Arc<dyn GovernanceBackend>,
        markers: SyncMarkers,
        view: Arc<ProposalView>,
        config: &GovernanceConfig,
    ) -> Self {
        Self::new(backend, markers, view, config.poll_attempts, config.poll_interval())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn view(&self) -> &Arc<ProposalView> {
        &self.inner.view
    }

    pub fn markers(&self) -> &SyncMarkers {
        &self.inner.markers
    }

    pub fn state(&self, proposal_id: &str) -> SyncState {
        self.inner
            .states
            .get(proposal_id)
            .map(|s| *s.value())
            .unwrap_or(SyncState::Unsynced)
    }

    /// `true` while a task for `proposal_id` is still running.
    pub fn is_polling(&self, proposal_id: &str) -> bool {
        self.inner
            .tasks
            .get(proposal_id)
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Shows `optimistic` as pending, then starts polling for it.
    pub fn track(&self, optimistic: Proposal, baseline: Baseline, flow: SyncFlow) -> Result<()> {
        let proposal_id = optimistic.id.clone();
        self.inner.view.apply_optimistic(optimistic);
        self.begin(&proposal_id, baseline, flow)
    }

    /// Persists the syncing marker and starts the polling task, replacing
    /// any task already running for `proposal_id`.
    pub fn begin(&self, proposal_id: &str, baseline: Baseline, flow: SyncFlow) -> Result<()> {
        self.inner.markers.mark(proposal_id)?;

        if let Some((_, previous)) = self.inner.tasks.remove(proposal_id) {
            let _ = previous.cancel.send(true);
            debug!(proposal_id, "replaced running poll");
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);
        self.inner.states.insert(proposal_id.to_string(), SyncState::Syncing);
        let poll = run(self.inner.clone(), proposal_id.to_string(), baseline, flow, cancel_rx);
        let handle = tokio::spawn(async move {
            let state = poll.await;
            let _ = done_tx.send(Some(state));
        });
        self.inner.tasks.insert(
            proposal_id.to_string(),
            PollTask {
                cancel: cancel_tx,
                done: done_rx,
                handle,
            },
        );
        info!(proposal_id, ?flow, attempts = self.inner.attempts, "polling for confirmation");
        Ok(())
    }

    /// Stops polling `proposal_id`. The state goes back to `Unsynced` and
    /// the durable marker stays. Returns `false` if nothing was running.
    pub fn cancel(&self, proposal_id: &str) -> bool {
        match self.inner.tasks.remove(proposal_id) {
            Some((_, task)) => {
                let _ = task.cancel.send(true);
                self.inner.states.remove(proposal_id);
                info!(proposal_id, "polling cancelled");
                true
            }
            None => false,
        }
    }

    /// Waits for the current task of `proposal_id` to end and returns the
    /// state it ended in. Without a task, returns the current state.
    ///
    /// Any number of callers may wait on the same task; the task stays
    /// registered, so it still counts as polling while they wait.
    pub async fn wait(&self, proposal_id: &str) -> SyncState {
        let done = self.inner.tasks.get(proposal_id).map(|task| task.done.clone());
        let Some(mut done) = done else {
            return self.state(proposal_id);
        };
        let state = match done.wait_for(Option::is_some).await {
            Ok(state) => (*state).unwrap_or(SyncState::Unsynced),
            Err(_) => {
                warn!(proposal_id, "polling task ended without a result");
                self.state(proposal_id)
            }
        };
        state
    }

    /// Restarts polling for every proposal that still has a durable marker
    /// and no running task. Returns the ids picked up.
    pub fn resume_pending(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for proposal_id in self.inner.markers.pending_ids()? {
            if self.is_polling(&proposal_id) {
                continue;
            }
            self.begin(&proposal_id, Baseline::AwaitNonDraft, SyncFlow::Create)?;
            resumed.push(proposal_id);
        }
        if !resumed.is_empty() {
            info!(count = resumed.len(), "resumed pending reconciliations");
        }
        Ok(resumed)
    }
}

// ---------------------------------------------------------------------------
// Poll loop
// ---------------------------------------------------------------------------

async fn run(
    inner: Arc<Inner>,
    proposal_id: String,
    baseline: Baseline,
    flow: SyncFlow,
    mut cancel: watch::Receiver<bool>,
) -> SyncState {
    for attempt in 1..=inner.attempts {
        tokio::select! {
            _ = tokio::time::sleep(inner.interval) => {}
            Ok(()) = cancel.changed() => {
                debug!(proposal_id = %proposal_id, attempt, "poll stopped during delay");
                return SyncState::Unsynced;
            }
        }

        let fetched = inner.backend.fetch_status(&proposal_id).await;
        if *cancel.borrow() {
            return SyncState::Unsynced;
        }

        match fetched {
            Ok(proposal) if baseline.is_reconciled_by(&proposal) => {
                inner.synced(&proposal_id, proposal, attempt);
                return SyncState::Synced;
            }
            Ok(proposal) => {
                debug!(proposal_id = %proposal_id, attempt, status = %proposal.status, "no change yet");
            }
            Err(e) => {
                warn!(proposal_id = %proposal_id, attempt, error = %e, "status poll failed");
            }
        }
    }

    inner.timed_out(&proposal_id, flow);
    SyncState::TimedOut
}

impl Inner {
    fn synced(&self, proposal_id: &str, proposal: Proposal, attempts: u32) {
        if let Err(e) = self.markers.clear(proposal_id) {
            warn!(proposal_id, error = %e, "could not clear syncing marker");
        }
        self.view.confirm(proposal.clone());
        self.states.insert(proposal_id.to_string(), SyncState::Synced);
        info!(proposal_id, attempts, status = %proposal.status, "proposal confirmed");
        let _ = self.events.send(SyncEvent::Synced {
            proposal_id: proposal_id.to_string(),
            proposal: Box::new(proposal),
            attempts,
        });
    }

    fn timed_out(&self, proposal_id: &str, flow: SyncFlow) {
        if flow == SyncFlow::Update {
            if let Err(e) = self.markers.clear(proposal_id) {
                warn!(proposal_id, error = %e, "could not clear syncing marker");
            }
        }
        self.view.settle(proposal_id);
        self.states.insert(proposal_id.to_string(), SyncState::TimedOut);
        warn!(proposal_id, attempts = self.attempts, ?flow, "confirmation timed out");
        let _ = self.events.send(SyncEvent::TimedOut {
            proposal_id: proposal_id.to_string(),
            attempts: self.attempts,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{POLL_INTERVAL, POLL_MAX_ATTEMPTS};
    use crate::error::GovernanceError;
    use crate::mock::MockBackend;
    use crate::proposal::model::tests::sample_proposal;
    use tokio::sync::broadcast::error::TryRecvError;

    fn poller(backend: Arc<MockBackend>) -> ReconciliationPoller {
        ReconciliationPoller::new(
            backend,
            SyncMarkers::in_memory(),
            Arc::new(ProposalView::new()),
            POLL_MAX_ATTEMPTS,
            POLL_INTERVAL,
        )
    }

    fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn change_on_last_poll_syncs_once() {
        let before = sample_proposal(ProposalStatus::Proposed);
        let mut after = before.clone();
        after.updated_at = before.updated_at + chrono::Duration::seconds(30);

        let backend = Arc::new(MockBackend::new());
        backend.insert(before.clone());
        backend.change_at(24, after.clone());
        let p = poller(backend.clone());
        let mut rx = p.subscribe();

        p.track(before.clone(), Baseline::snapshot(&before), SyncFlow::Update).unwrap();
        assert!(p.view().get("prop-1").unwrap().pending);
        assert_eq!(p.state("prop-1"), SyncState::Syncing);

        assert_eq!(p.wait("prop-1").await, SyncState::Synced);
        assert_eq!(backend.status_calls("prop-1"), 24);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SyncEvent::Synced { attempts: 24, .. }));

        let shown = p.view().get("prop-1").unwrap();
        assert!(!shown.pending);
        assert_eq!(shown.proposal, after);
        assert!(!p.markers().is_marked("prop-1").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_record_times_out_once() {
        let before = sample_proposal(ProposalStatus::Voting);
        let backend = Arc::new(MockBackend::new());
        backend.insert(before.clone());
        let p = poller(backend.clone());
        let mut rx = p.subscribe();

        p.track(before.clone(), Baseline::snapshot(&before), SyncFlow::Update).unwrap();
        assert_eq!(p.wait("prop-1").await, SyncState::TimedOut);
        assert_eq!(backend.status_calls("prop-1"), 24);

        tokio::time::sleep(Duration::from_secs(3_600)).await;
        assert_eq!(backend.status_calls("prop-1"), 24, "no polls after timeout");

        let events = drain(&mut rx);
        assert_eq!(events, vec![SyncEvent::TimedOut { proposal_id: "prop-1".into(), attempts: 24 }]);
        assert!(!p.view().get("prop-1").unwrap().pending, "pending styling cleared");
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_keeps_marker_only_for_creations() {
        let draft = sample_proposal(ProposalStatus::Draft);
        let backend = Arc::new(MockBackend::new());
        backend.insert(draft.clone());

        let p = poller(backend.clone());
        p.track(draft.clone(), Baseline::AwaitNonDraft, SyncFlow::Create).unwrap();
        assert_eq!(p.wait("prop-1").await, SyncState::TimedOut);
        assert!(p.markers().is_marked("prop-1").unwrap());

        let p = poller(backend);
        p.track(draft.clone(), Baseline::snapshot(&draft), SyncFlow::Update).unwrap();
        assert_eq!(p.wait("prop-1").await, SyncState::TimedOut);
        assert!(!p.markers().is_marked("prop-1").unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failures_count_as_attempts() {
        let backend = Arc::new(MockBackend::new());
        for _ in 0..3 {
            backend.push_status("prop-1", Err(GovernanceError::Backend("502 bad gateway".into())));
        }
        backend.insert(sample_proposal(ProposalStatus::Proposed));
        let p = poller(backend.clone());

        p.begin("prop-1", Baseline::AwaitNonDraft, SyncFlow::Create).unwrap();
        assert_eq!(p.wait("prop-1").await, SyncState::Synced);
        assert_eq!(backend.status_calls("prop-1"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_proposal_times_out_after_full_budget() {
        let backend = Arc::new(MockBackend::new());
        let p = poller(backend.clone());
        p.begin("ghost", Baseline::AwaitNonDraft, SyncFlow::Create).unwrap();
        assert_eq!(p.wait("ghost").await, SyncState::TimedOut);
        assert_eq!(backend.status_calls("ghost"), 24);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_between_polls_and_keeps_marker() {
        let before = sample_proposal(ProposalStatus::Proposed);
        let backend = Arc::new(MockBackend::new());
        backend.insert(before.clone());
        let p = poller(backend.clone());
        let mut rx = p.subscribe();

        p.track(before.clone(), Baseline::snapshot(&before), SyncFlow::Update).unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(backend.status_calls("prop-1"), 2);

        assert!(p.cancel("prop-1"));
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(backend.status_calls("prop-1"), 2);
        assert_eq!(p.state("prop-1"), SyncState::Unsynced);
        assert!(p.markers().is_marked("prop-1").unwrap());
        assert!(drain(&mut rx).is_empty());
        assert!(!p.cancel("prop-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_replaces_the_running_task() {
        let draft = sample_proposal(ProposalStatus::Draft);
        let backend = Arc::new(MockBackend::new());
        backend.insert(sample_proposal(ProposalStatus::Proposed));
        let p = poller(backend.clone());
        let mut rx = p.subscribe();

        p.track(draft.clone(), Baseline::AwaitNonDraft, SyncFlow::Create).unwrap();
        p.track(draft, Baseline::AwaitNonDraft, SyncFlow::Create).unwrap();
        assert_eq!(p.wait("prop-1").await, SyncState::Synced);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(drain(&mut rx).len(), 1);
        assert_eq!(backend.status_calls("prop-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_picks_up_persisted_markers() {
        let backend = Arc::new(MockBackend::new());
        backend.insert(sample_proposal(ProposalStatus::Proposed));
        let p = poller(backend);
        p.markers().mark("prop-1").unwrap();

        assert_eq!(p.resume_pending().unwrap(), vec!["prop-1".to_string()]);
        assert!(p.resume_pending().unwrap().is_empty(), "already polling");
        assert_eq!(p.wait("prop-1").await, SyncState::Synced);
        assert!(!p.markers().is_marked("prop-1").unwrap());
        assert_eq!(p.view().get("prop-1").unwrap().proposal.status, ProposalStatus::Proposed);
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_does_not_let_resume_start_a_second_task() {
        let backend = Arc::new(MockBackend::new());
        backend.insert(sample_proposal(ProposalStatus::Draft));
        backend.change_at(3, sample_proposal(ProposalStatus::Proposed));
        let p = poller(backend.clone());
        let mut rx = p.subscribe();

        p.begin("prop-1", Baseline::AwaitNonDraft, SyncFlow::Create).unwrap();
        let waiter = {
            let p = p.clone();
            tokio::spawn(async move { p.wait("prop-1").await })
        };
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(p.is_polling("prop-1"), "still polling while someone waits");
        assert!(p.resume_pending().unwrap().is_empty());
        let second = p.wait("prop-1");

        assert_eq!(waiter.await.unwrap(), SyncState::Synced);
        assert_eq!(second.await, SyncState::Synced);
        assert_eq!(backend.status_calls("prop-1"), 3);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn snapshot_ignores_presentation_fields() {
        let before = sample_proposal(ProposalStatus::Proposed);
        let mut renamed = before.clone();
        renamed.title = "Something else".into();
        assert!(!Baseline::snapshot(&before).is_reconciled_by(&renamed));

        let mut retuned = before.clone();
        retuned.min_voting_tokens += 1;
        assert!(Baseline::snapshot(&before).is_reconciled_by(&retuned));
    }
}
