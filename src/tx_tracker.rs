//! Drives one submitted transaction to exactly one terminal outcome
//!
//! ```text
//! Submitted -> PreDispatchFailed
//!           -> AwaitingInclusion -> Confirmed | DispatchFailed
//!                                -> PreDispatchFailed (invalid/dropped/usurped)
//!                                -> Abandoned (disconnect, timeout)
//! ```
//!
//! The outcome is delivered through a oneshot channel that can only be
//! completed once; the listener is released through an idempotent
//! [`Unsubscribe`] before completion, so a duplicate inclusion event that
//! arrives right behind the first one can neither re-run teardown nor
//! complete the outcome twice.

use crate::ledger::{
    AuthorizedCall, BlockRef, DispatchError, LedgerConnection, SubmitError, Subscription,
    TxStatus, TxStatusEvent, Unsubscribe,
};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbandonReason {
    /// The connection went away before a terminal status
    Disconnected(String),
    TimedOut(Duration),
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbandonReason::Disconnected(why) => write!(f, "connection lost: {why}"),
            AbandonReason::TimedOut(after) => {
                write!(f, "no terminal status after {} ms", after.as_millis())
            }
        }
    }
}

/// Terminal result of one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    PreDispatchFailed(String),
    Confirmed(BlockRef),
    DispatchFailed(DispatchError),
    Abandoned(AbandonReason),
}

impl TxOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TxOutcome::PreDispatchFailed(_) => "pre_dispatch_failed",
            TxOutcome::Confirmed(_) => "confirmed",
            TxOutcome::DispatchFailed(_) => "dispatch_failed",
            TxOutcome::Abandoned(_) => "abandoned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Submitted,
    AwaitingInclusion,
    Completed,
}

pub struct TxSubmissionTracker {
    call_name: &'static str,
    state: TrackerState,
    unsubscribe: Option<Unsubscribe>,
    completion: Option<oneshot::Sender<TxOutcome>>,
}

impl TxSubmissionTracker {
    /// Create a tracker and the receiver its outcome will be delivered to
    pub fn new(call_name: &'static str) -> (Self, oneshot::Receiver<TxOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                call_name,
                state: TrackerState::Submitted,
                unsubscribe: None,
                completion: Some(tx),
            },
            rx,
        )
    }

    pub fn state(&self) -> TrackerState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == TrackerState::Completed
    }

    /// Register the listener handle returned by the ledger
    pub fn attach(&mut self, unsubscribe: Unsubscribe) {
        if self.is_complete() {
            unsubscribe.call();
            return;
        }
        self.unsubscribe = Some(unsubscribe);
        self.state = TrackerState::AwaitingInclusion;
    }

    pub fn on_submit_error(&mut self, error: SubmitError) {
        match error {
            SubmitError::Rejected(reason) => self.complete(TxOutcome::PreDispatchFailed(reason)),
            SubmitError::Transport(why) => {
                self.complete(TxOutcome::Abandoned(AbandonReason::Disconnected(why)))
            }
        }
    }

    /// Feed one status event. Returns true once the tracker is terminal.
    pub fn on_event(&mut self, event: TxStatusEvent) -> bool {
        if self.is_complete() {
            debug!(call = self.call_name, status = event.status.label(), "ignoring status after completion");
            return true;
        }
        match event.status {
            TxStatus::InBlock(block) | TxStatus::Finalized(block) => {
                let outcome = match event.dispatch_error {
                    None => TxOutcome::Confirmed(block),
                    Some(error) => TxOutcome::DispatchFailed(error),
                };
                self.complete(outcome);
            }
            TxStatus::Invalid(reason) => self.complete(TxOutcome::PreDispatchFailed(reason)),
            TxStatus::Dropped => {
                self.complete(TxOutcome::PreDispatchFailed("transaction dropped from pool".into()))
            }
            TxStatus::Usurped => self.complete(TxOutcome::PreDispatchFailed(
                "transaction usurped by another with the same nonce".into(),
            )),
            other => {
                debug!(call = self.call_name, status = other.label(), "awaiting inclusion");
            }
        }
        self.is_complete()
    }

    /// The status stream ended without a terminal event
    pub fn on_stream_closed(&mut self) {
        self.complete(TxOutcome::Abandoned(AbandonReason::Disconnected(
            "status stream closed".into(),
        )));
    }

    pub fn on_timeout(&mut self, after: Duration) {
        self.complete(TxOutcome::Abandoned(AbandonReason::TimedOut(after)));
    }

    fn release_listener(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            if unsubscribe.call() {
                debug!(call = self.call_name, "status listener released");
            }
        }
    }

    fn complete(&mut self, outcome: TxOutcome) {
        self.release_listener();
        let Some(completion) = self.completion.take() else {
            debug!(call = self.call_name, outcome = outcome.label(), "outcome already delivered");
            return;
        };
        self.state = TrackerState::Completed;
        match &outcome {
            TxOutcome::Confirmed(block) => {
                info!(call = self.call_name, block = block.number, "transaction confirmed")
            }
            TxOutcome::DispatchFailed(error) => {
                warn!(call = self.call_name, %error, "transaction failed during dispatch")
            }
            TxOutcome::PreDispatchFailed(reason) => {
                warn!(call = self.call_name, %reason, "transaction rejected before dispatch")
            }
            TxOutcome::Abandoned(reason) => {
                warn!(call = self.call_name, %reason, "submission abandoned")
            }
        }
        // The receiver may be gone if the caller was cancelled.
        let _ = completion.send(outcome);
    }
}

impl Drop for TxSubmissionTracker {
    fn drop(&mut self) {
        self.release_listener();
    }
}

/// A submission the ledger has answered, not yet driven to its outcome.
///
/// Splitting submission from the wait lets callers release anything they
/// hold for the submission step (such as a signer's nonce turn) as soon as
/// the pool has admitted or refused the call.
pub struct TrackedSubmission {
    tracker: TxSubmissionTracker,
    outcome: oneshot::Receiver<TxOutcome>,
    events: Option<mpsc::UnboundedReceiver<TxStatusEvent>>,
    deadline: Instant,
    timeout: Duration,
}

impl TrackedSubmission {
    /// Wait for the terminal outcome, bounded by the deadline set at submission
    pub async fn outcome(self) -> TxOutcome {
        let TrackedSubmission {
            mut tracker,
            outcome,
            events,
            deadline,
            timeout,
        } = self;
        if let Some(mut events) = events {
            while !tracker.is_complete() {
                match timeout_at(deadline, events.recv()).await {
                    Ok(Some(event)) => {
                        tracker.on_event(event);
                    }
                    Ok(None) => tracker.on_stream_closed(),
                    Err(_) => tracker.on_timeout(timeout),
                }
            }
        }
        drop(tracker);

        outcome.await.unwrap_or_else(|_| {
            TxOutcome::Abandoned(AbandonReason::Disconnected("tracker dropped".into()))
        })
    }
}

/// Submit `call` and start tracking it. One deadline, `timeout` from now,
/// covers the submission request itself and the later wait for inclusion.
pub async fn submit_tracked(
    connection: &dyn LedgerConnection,
    call: AuthorizedCall,
    timeout: Duration,
) -> TrackedSubmission {
    let call_name = call.call.name();
    let (mut tracker, outcome) = TxSubmissionTracker::new(call_name);
    let deadline = Instant::now() + timeout;

    let events = match timeout_at(deadline, connection.submit_transaction(call)).await {
        Err(_) => {
            tracker.on_timeout(timeout);
            None
        }
        Ok(Err(error)) => {
            tracker.on_submit_error(error);
            None
        }
        Ok(Ok(Subscription {
            events,
            unsubscribe,
        })) => {
            tracker.attach(unsubscribe);
            debug!(call = call_name, "submitted, awaiting inclusion");
            Some(events)
        }
    };

    TrackedSubmission {
        tracker,
        outcome,
        events,
        deadline,
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn block(number: u64) -> BlockRef {
        BlockRef {
            number,
            hash: format!("0x{number:064x}"),
            included_at: Utc::now(),
        }
    }

    fn counted_unsubscribe() -> (Unsubscribe, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (
            Unsubscribe::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[tokio::test]
    async fn ignores_pool_statuses_until_inclusion() {
        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        let (unsub, count) = counted_unsubscribe();
        tracker.attach(unsub);
        assert_eq!(tracker.state(), TrackerState::AwaitingInclusion);

        for status in [TxStatus::Future, TxStatus::Ready, TxStatus::Broadcast, TxStatus::Retracted] {
            assert!(!tracker.on_event(TxStatusEvent::new(status)));
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        assert!(tracker.on_event(TxStatusEvent::new(TxStatus::InBlock(block(3)))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        match rx.await.unwrap() {
            TxOutcome::Confirmed(b) => assert_eq!(b.number, 3),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_inclusion_tears_down_once() {
        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        let (unsub, count) = counted_unsubscribe();
        tracker.attach(unsub);

        let error = DispatchError::Module { index: 9, error: [4, 0, 0, 0] };
        tracker.on_event(
            TxStatusEvent::new(TxStatus::InBlock(block(5))).with_dispatch_error(error.clone()),
        );
        tracker.on_event(TxStatusEvent::new(TxStatus::InBlock(block(5))));
        tracker.on_event(TxStatusEvent::new(TxStatus::Finalized(block(5))));
        drop(tracker);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(rx.await.unwrap(), TxOutcome::DispatchFailed(error));
    }

    #[tokio::test]
    async fn finalized_without_in_block_counts_as_inclusion() {
        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        tracker.attach(Unsubscribe::noop());
        assert!(tracker.on_event(TxStatusEvent::new(TxStatus::Finalized(block(8)))));
        assert!(matches!(rx.await.unwrap(), TxOutcome::Confirmed(_)));
    }

    #[tokio::test]
    async fn pool_rejections_are_pre_dispatch_failures() {
        for status in [TxStatus::Invalid("stale nonce".into()), TxStatus::Dropped, TxStatus::Usurped] {
            let (mut tracker, rx) = TxSubmissionTracker::new("test");
            let (unsub, count) = counted_unsubscribe();
            tracker.attach(unsub);
            assert!(tracker.on_event(TxStatusEvent::new(status)));
            assert!(matches!(rx.await.unwrap(), TxOutcome::PreDispatchFailed(_)));
            assert_eq!(count.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn submit_errors_map_to_outcomes() {
        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        tracker.on_submit_error(SubmitError::Rejected("bad signature".into()));
        assert_eq!(rx.await.unwrap(), TxOutcome::PreDispatchFailed("bad signature".into()));

        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        tracker.on_submit_error(SubmitError::Transport("reset".into()));
        assert_eq!(
            rx.await.unwrap(),
            TxOutcome::Abandoned(AbandonReason::Disconnected("reset".into()))
        );
    }

    #[tokio::test]
    async fn late_attach_after_completion_releases_immediately() {
        let (mut tracker, _rx) = TxSubmissionTracker::new("test");
        tracker.on_timeout(Duration::from_millis(5));
        let (unsub, count) = counted_unsubscribe();
        tracker.attach(unsub);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(tracker.is_complete());
    }

    #[tokio::test]
    async fn dropping_an_incomplete_tracker_releases_listener() {
        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        let (unsub, count) = counted_unsubscribe();
        tracker.attach(unsub);
        tracker.on_event(TxStatusEvent::new(TxStatus::Ready));
        drop(tracker);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn tracked_submission_resolves_after_the_pool_answers() {
        use crate::identifiers::{AccountId, ItemId, LocId};
        use crate::ledger::{LedgerCall, LocKind, LocRecord, LocState};
        use crate::ledger_memory::MemoryLedger;
        use crate::signer::{AccountSigner, Sr25519Signer};

        let ledger = MemoryLedger::new();
        let signer: Arc<dyn AccountSigner> = Arc::new(Sr25519Signer::from_seed([5; 32]).unwrap());
        ledger
            .insert_loc(LocRecord {
                id: LocId::new(1),
                owner: AccountId::new([1; 32]),
                requester: Some(signer.account()),
                kind: LocKind::Collection,
                state: LocState::Closed,
            })
            .unwrap();
        let call = |nonce: u64| {
            AuthorizedCall::new(
                signer.clone(),
                LedgerCall::AddCollectionItem {
                    loc_id: LocId::new(1),
                    item_id: ItemId::new([nonce as u8; 32]),
                    description: "item".into(),
                    files: Vec::new(),
                    restricted_delivery: false,
                    terms_and_conditions: Vec::new(),
                },
                nonce,
            )
        };
        let conn = ledger.open_connection();
        let timeout = Duration::from_secs(5);

        // The nonce is consumed once submit_tracked returns, before any outcome
        let first = submit_tracked(conn.as_ref(), call(0), timeout).await;
        assert_eq!(conn.account_nonce(&signer.account()).await.unwrap(), 1);
        let stale = submit_tracked(conn.as_ref(), call(0), timeout).await;

        assert!(matches!(first.outcome().await, TxOutcome::Confirmed(_)));
        assert!(matches!(stale.outcome().await, TxOutcome::PreDispatchFailed(_)));
        assert_eq!(ledger.active_subscriptions(), 0);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn timeout_and_stream_close_abandon() {
        let (mut tracker, rx) = TxSubmissionTracker::new("test");
        tracker.attach(Unsubscribe::noop());
        tracker.on_stream_closed();
        tracker.on_timeout(Duration::from_secs(1));
        assert!(matches!(
            rx.await.unwrap(),
            TxOutcome::Abandoned(AbandonReason::Disconnected(_))
        ));
    }
}
