use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};

use super::record::SwapRecord;
use super::state::SwapState;
use super::{SwapContext, SwapEvent, SwapFamily};
use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::ledger::LedgerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOrdering {
    Eq,
    /// Satisfied by any state whose code is at least the target's.
    Gte,
}

impl WaitOrdering {
    fn satisfied<S: SwapState>(self, state: S, target: S) -> bool {
        match self {
            Self::Eq => state == target,
            Self::Gte => state.code() >= target.code(),
        }
    }
}

/// Strength of the observation backing a candidate state. When several
/// sources disagree, the strongest legal candidate is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Evidence {
    NotCommitted,
    Expired,
    Committed,
    PaidConfirmed,
}

type Patch<D> = Box<dyn FnOnce(&mut SwapRecord<D>) + Send>;

/// A next state proposed by one reconciliation source, with the record
/// fields it would set.
pub struct Candidate<F: SwapFamily> {
    pub state: F::State,
    pub evidence: Evidence,
    patch: Option<Patch<F::Data>>,
}

impl<F: SwapFamily> Candidate<F> {
    pub fn new(state: F::State, evidence: Evidence) -> Self {
        Self {
            state,
            evidence,
            patch: None,
        }
    }

    pub fn with(mut self, patch: impl FnOnce(&mut SwapRecord<F::Data>) + Send + 'static) -> Self {
        self.patch = Some(Box::new(patch));
        self
    }
}

/// One live swap. Every mutation goes through the record lock: the
/// transition is checked against the state current at that moment,
/// persisted, and only then published.
pub struct SwapHandle<F: SwapFamily> {
    id: String,
    record: Mutex<SwapRecord<F::Data>>,
    state: watch::Sender<F::State>,
    ctx: Arc<SwapContext>,
    events: broadcast::Sender<SwapEvent>,
}

impl<F: SwapFamily> std::fmt::Debug for SwapHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapHandle")
            .field("id", &self.id)
            .field("swap_type", &F::TYPE)
            .field("state", &self.state())
            .finish()
    }
}

impl<F: SwapFamily> SwapHandle<F> {
    pub fn new(
        record: SwapRecord<F::Data>,
        ctx: Arc<SwapContext>,
        events: broadcast::Sender<SwapEvent>,
    ) -> Result<Self, SwapError> {
        if record.swap_type != F::TYPE {
            return Err(SwapError::storage(anyhow::anyhow!(
                "swap {} is a {} swap, not {}",
                record.id,
                record.swap_type,
                F::TYPE
            )));
        }
        let state = F::State::from_code(record.state).ok_or_else(|| {
            SwapError::storage(anyhow::anyhow!(
                "swap {} has unknown {} state {}",
                record.id,
                F::TYPE,
                record.state
            ))
        })?;
        let (tx, _) = watch::channel(state);
        Ok(Self {
            id: record.id.clone(),
            record: Mutex::new(record),
            state: tx,
            ctx,
            events,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn ctx(&self) -> &Arc<SwapContext> {
        &self.ctx
    }

    pub fn state(&self) -> F::State {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<F::State> {
        self.state.subscribe()
    }

    pub async fn snapshot(&self) -> SwapRecord<F::Data> {
        self.record.lock().await.clone()
    }

    pub async fn matches(&self, event: &LedgerEvent) -> bool {
        F::matches_event(&*self.record.lock().await, event)
    }

    /// Persists the record as it is, e.g. right after creation.
    pub async fn save(&self) -> Result<(), SwapError> {
        let record = self.record.lock().await;
        self.persist(&record).await
    }

    /// Fails with a precondition error unless the swap is in one of `allowed`.
    pub fn expect_state(&self, allowed: &[F::State], action: &str) -> Result<F::State, SwapError> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(state)
        } else {
            Err(SwapError::precondition(format!(
                "{action} not allowed for {} swap {} in state {state}",
                F::TYPE,
                self.id
            )))
        }
    }

    pub async fn transition(
        &self,
        next: F::State,
        patch: impl FnOnce(&mut SwapRecord<F::Data>) + Send + 'static,
    ) -> Result<bool, SwapError> {
        self.apply_best(vec![Candidate::<F>::new(next, Evidence::Committed).with(patch)])
            .await
    }

    /// Applies the strongest candidate that is a legal move from the
    /// current state. A candidate equal to the current state means the
    /// record already reflects the best evidence and nothing is written.
    pub async fn apply_best(&self, mut candidates: Vec<Candidate<F>>) -> Result<bool, SwapError> {
        candidates.sort_by(|a, b| b.evidence.cmp(&a.evidence));

        let mut record = self.record.lock().await;
        let current = *self.state.borrow();

        for candidate in candidates {
            if candidate.state == current {
                return Ok(false);
            }
            if current.is_terminal() {
                tracing::warn!(
                    swap_id = %self.id,
                    swap_type = %F::TYPE,
                    state = %current,
                    observed = %candidate.state,
                    "ignoring contradicting observation for finished swap"
                );
                return Ok(false);
            }
            if !current.can_transition_to(candidate.state) {
                tracing::debug!(
                    swap_id = %self.id,
                    from = %current,
                    to = %candidate.state,
                    "skipping illegal transition"
                );
                continue;
            }

            let mut next = record.clone();
            next.state = candidate.state.code();
            if let Some(patch) = candidate.patch {
                patch(&mut next);
            }
            self.check(&next, candidate.state)?;
            self.persist(&next).await?;
            *record = next;

            self.state.send_replace(candidate.state);
            let _ = self.events.send(SwapEvent {
                id: self.id.clone(),
                swap_type: F::TYPE,
                previous: current.code(),
                state: candidate.state.code(),
            });
            tracing::info!(
                swap_id = %self.id,
                swap_type = %F::TYPE,
                from = %current,
                to = %candidate.state,
                "swap state changed"
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Persists a change that leaves the state alone.
    pub async fn update(
        &self,
        mutate: impl FnOnce(&mut SwapRecord<F::Data>) + Send,
    ) -> Result<(), SwapError> {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        mutate(&mut next);
        next.state = record.state;
        self.check(&next, *self.state.borrow())?;
        self.persist(&next).await?;
        *record = next;
        Ok(())
    }

    /// Suspends until the state satisfies `ordering` against `target`, or
    /// until it reaches a terminal state or one awaiting the caller's
    /// action; in every case the state reached is returned. A watchdog re-syncs the
    /// swap on every `watchdog_interval` in case a notification was missed.
    pub async fn wait_till_state(
        &self,
        target: F::State,
        ordering: WaitOrdering,
        cancel: Option<&Cancellation>,
    ) -> Result<F::State, SwapError> {
        let mut rx = self.state.subscribe();
        let mut watchdog = tokio::time::interval(self.ctx.config.watchdog_interval);
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        watchdog.tick().await;

        loop {
            let state = *rx.borrow_and_update();
            if ordering.satisfied(state, target) || state.is_terminal() || state.requires_action() {
                return Ok(state);
            }

            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(SwapError::Cancelled);
                    }
                }
                _ = watchdog.tick() => {
                    // Dropping a pass mid-flight can leave storage ahead of
                    // memory, never behind it; the next pass rewrites the same state.
                    tokio::select! {
                        synced = F::sync(self) => {
                            if let Err(err) = synced {
                                tracing::warn!(swap_id = %self.id, error = %err, "watchdog sync failed");
                            }
                        }
                        _ = cancelled(cancel) => return Err(SwapError::Cancelled),
                    }
                }
                _ = cancelled(cancel) => return Err(SwapError::Cancelled),
            }
        }
    }

    fn check(&self, next: &SwapRecord<F::Data>, state: F::State) -> Result<(), SwapError> {
        if state.requires_signature() && next.signature.is_none() {
            return Err(SwapError::precondition(format!(
                "swap {} cannot enter {state} without signature data",
                self.id
            )));
        }
        if next.claim_tx_id.is_some() && next.refund_tx_id.is_some() {
            return Err(SwapError::integrity(
                None,
                format!("swap {} would record both a claim and a refund", self.id),
            ));
        }
        Ok(())
    }

    async fn persist(&self, record: &SwapRecord<F::Data>) -> Result<(), SwapError> {
        let row = record.to_stored(F::payment_hash(&record.data))?;
        self.ctx.storage.save(&row).await.map_err(SwapError::storage)
    }
}

async fn cancelled(cancel: Option<&Cancellation>) {
    match cancel {
        Some(cancel) => cancel.cancelled().await,
        None => std::future::pending().await,
    }
}
