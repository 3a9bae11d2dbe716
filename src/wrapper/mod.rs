//! Per-family registry of live swaps and the loops that keep them
//! reconciled.
//!
//! At most one [`SwapHandle`] exists per persisted swap: loading an id that
//! is already live returns the existing handle. Finished swaps are dropped
//! from the registry once nothing outside it holds them; their records stay
//! in storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::{JoinHandle, JoinSet};

use crate::cancel::Cancellation;
use crate::error::SwapError;
use crate::ledger::LedgerEvent;
use crate::storage::{QueryParam, StoredSwap};
use crate::swap::{SwapContext, SwapEvent, SwapFamily, SwapHandle, SwapRecord, SwapState, migrate};

pub struct SwapWrapper<F: SwapFamily> {
    ctx: Arc<SwapContext>,
    live: Mutex<HashMap<String, Arc<SwapHandle<F>>>>,
    events: broadcast::Sender<SwapEvent>,
    shutdown: Cancellation,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: SwapFamily> SwapWrapper<F> {
    pub fn new(ctx: Arc<SwapContext>, events: broadcast::Sender<SwapEvent>) -> Self {
        Self {
            ctx,
            live: Mutex::new(HashMap::new()),
            events,
            shutdown: Cancellation::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn ctx(&self) -> &Arc<SwapContext> {
        &self.ctx
    }

    /// State changes of every swap in this family, after they are persisted.
    pub fn subscribe(&self) -> broadcast::Receiver<SwapEvent> {
        self.events.subscribe()
    }

    /// Persists a freshly created record and registers its handle.
    pub async fn insert(&self, record: SwapRecord<F::Data>) -> Result<Arc<SwapHandle<F>>, SwapError> {
        if let Some(existing) = self.get(&record.id) {
            return Ok(existing);
        }
        let handle = SwapHandle::new(record, self.ctx.clone(), self.events.clone())?;
        handle.save().await?;
        tracing::info!(swap_id = %handle.id(), swap_type = %F::TYPE, state = %handle.state(), "swap created");
        Ok(self.register(handle))
    }

    /// Live handle for `id`, if one is registered.
    pub fn get(&self, id: &str) -> Option<Arc<SwapHandle<F>>> {
        self.live
            .lock()
            .expect("swap registry lock poisoned")
            .get(id)
            .cloned()
    }

    /// Handle for `id`, loading and upgrading the stored record if it is
    /// not live yet.
    pub async fn load(&self, id: &str) -> Result<Option<Arc<SwapHandle<F>>>, SwapError> {
        if let Some(existing) = self.get(id) {
            return Ok(Some(existing));
        }
        let rows = self
            .ctx
            .storage
            .query(&[vec![QueryParam::id(id), QueryParam::swap_type(F::TYPE)]])
            .await
            .map_err(SwapError::storage)?;
        match rows.into_iter().next() {
            Some(row) => self.restore(row).await.map(Some),
            None => Ok(None),
        }
    }

    /// Loads every pending swap of this family and reconciles it once.
    /// Rows that fail to load are logged and skipped.
    pub async fn init(&self) -> Result<usize, SwapError> {
        let rows = self
            .ctx
            .storage
            .query(&[vec![
                QueryParam::swap_type(F::TYPE),
                QueryParam::states(&F::State::pending_codes()),
            ]])
            .await
            .map_err(SwapError::storage)?;

        let mut loaded = 0;
        for row in rows {
            let id = row.id.clone();
            match self.restore(row).await {
                Ok(_) => loaded += 1,
                Err(err) => tracing::warn!(swap_id = %id, swap_type = %F::TYPE, error = %err, "failed to load swap"),
            }
        }
        tracing::info!(swap_type = %F::TYPE, loaded, "pending swaps loaded");
        self.sync_all().await;
        Ok(loaded)
    }

    pub fn live_swaps(&self) -> Vec<Arc<SwapHandle<F>>> {
        self.live
            .lock()
            .expect("swap registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Reconciles every live, non-terminal swap concurrently. Returns how
    /// many changed state.
    pub async fn sync_all(&self) -> usize {
        let mut set = JoinSet::new();
        for swap in self.live_swaps() {
            if swap.state().is_terminal() {
                continue;
            }
            set.spawn(async move {
                let result = F::sync(&swap).await;
                (swap, result)
            });
        }

        let mut changed = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(true))) => changed += 1,
                Ok((_, Ok(false))) => {}
                Ok((swap, Err(err))) => {
                    tracing::warn!(swap_id = %swap.id(), swap_type = %F::TYPE, error = %err, "sync failed")
                }
                Err(err) => tracing::error!(swap_type = %F::TYPE, error = %err, "sync task panicked"),
            }
        }
        changed
    }

    /// Applies time-based transitions to every live, non-terminal swap.
    pub async fn tick_all(&self) -> usize {
        let mut changed = 0;
        for swap in self.live_swaps() {
            if swap.state().is_terminal() {
                continue;
            }
            match F::tick(&swap).await {
                Ok(true) => changed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(swap_id = %swap.id(), swap_type = %F::TYPE, error = %err, "tick failed")
                }
            }
        }
        changed
    }

    /// Routes a ledger event to the swaps it concerns. Pending swaps that
    /// are not live are loaded from storage first.
    pub async fn dispatch(&self, event: &LedgerEvent) -> Result<bool, SwapError> {
        let mut targets = Vec::new();
        for swap in self.live_swaps() {
            if swap.matches(event).await {
                targets.push(swap);
            }
        }

        if targets.is_empty() {
            let Some(hash) = F::event_hash(event) else {
                return Ok(false);
            };
            let rows = self
                .ctx
                .storage
                .query(&[vec![
                    QueryParam::swap_type(F::TYPE),
                    QueryParam::payment_hash(&hash),
                    QueryParam::states(&F::State::pending_codes()),
                ]])
                .await
                .map_err(SwapError::storage)?;
            for row in rows {
                let swap = self.restore(row).await?;
                if swap.matches(event).await {
                    targets.push(swap);
                }
            }
        }

        let mut changed = false;
        for swap in targets {
            tracing::debug!(swap_id = %swap.id(), tx_id = event.tx_id(), "dispatching ledger event");
            changed |= F::on_event(&swap, event).await?;
        }
        Ok(changed)
    }

    /// Drops finished swaps that nothing outside the registry references.
    pub fn evict_unreferenced(&self) -> usize {
        let mut live = self.live.lock().expect("swap registry lock poisoned");
        let before = live.len();
        live.retain(|_, swap| !(swap.state().is_terminal() && Arc::strong_count(swap) == 1));
        let evicted = before - live.len();
        if evicted > 0 {
            tracing::debug!(swap_type = %F::TYPE, evicted, "evicted finished swaps");
        }
        evicted
    }

    /// Removes quotes that expired unused and are older than the
    /// configured retention.
    pub async fn prune(&self) -> Result<usize, SwapError> {
        let now = self.ctx.clock.now_ms();
        let retention = u64::try_from(self.ctx.config.retention.as_millis()).unwrap_or(u64::MAX);
        let rows = self.list(false).await?;
        let ids: Vec<String> = rows
            .iter()
            .filter(|row| crate::swap::is_prunable(row, now, retention))
            .filter(|row| self.get(&row.id).is_none())
            .map(|row| row.id.clone())
            .collect();
        if !ids.is_empty() {
            self.ctx
                .storage
                .remove_all(&ids)
                .await
                .map_err(SwapError::storage)?;
            tracing::info!(swap_type = %F::TYPE, pruned = ids.len(), "pruned expired quotes");
        }
        Ok(ids.len())
    }

    /// Stored rows of this family, optionally only the pending ones.
    pub async fn list(&self, pending_only: bool) -> Result<Vec<StoredSwap>, SwapError> {
        let mut group = vec![QueryParam::swap_type(F::TYPE)];
        if pending_only {
            group.push(QueryParam::states(&F::State::pending_codes()));
        }
        self.ctx
            .storage
            .query(&[group])
            .await
            .map_err(SwapError::storage)
    }

    /// Spawns the tick/sync loop and the ledger event loop.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task list lock poisoned");
        if !tasks.is_empty() {
            return;
        }

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move { this.run_timers().await }));
        let this = Arc::clone(self);
        let rx = self.ctx.ledger.subscribe();
        tasks.push(tokio::spawn(async move { this.run_events(rx).await }));
        tracing::info!(swap_type = %F::TYPE, "swap wrapper started");
    }

    /// Stops the background loops. In-flight reconciliation is abandoned
    /// between transitions; nothing partial is persisted.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("task list lock poisoned"));
        for task in tasks {
            match task.await {
                Err(err) if !err.is_cancelled() => {
                    tracing::error!(swap_type = %F::TYPE, error = %err, "wrapper task failed")
                }
                _ => {}
            }
        }
        tracing::info!(swap_type = %F::TYPE, "swap wrapper stopped");
    }

    async fn run_timers(&self) {
        let mut tick = tokio::time::interval(self.ctx.config.tick_interval);
        let mut sync = tokio::time::interval(self.ctx.config.sync_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        sync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tick.tick() => {
                    self.tick_all().await;
                }
                _ = sync.tick() => {
                    self.sync_all().await;
                    self.evict_unreferenced();
                }
            }
        }
    }

    async fn run_events(&self, mut rx: broadcast::Receiver<LedgerEvent>) {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => {
                    if let Err(err) = self.dispatch(&event).await {
                        tracing::warn!(swap_type = %F::TYPE, tx_id = event.tx_id(), error = %err, "ledger event dispatch failed");
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(swap_type = %F::TYPE, missed, "ledger subscription lagged, resyncing");
                    self.sync_all().await;
                }
                Err(RecvError::Closed) => {
                    tracing::warn!(swap_type = %F::TYPE, "ledger event stream closed");
                    break;
                }
            }
        }
    }

    async fn restore(&self, mut row: StoredSwap) -> Result<Arc<SwapHandle<F>>, SwapError> {
        if let Some(existing) = self.get(&row.id) {
            return Ok(existing);
        }
        if migrate::upgrade(&mut row)? {
            self.ctx.storage.save(&row).await.map_err(SwapError::storage)?;
        }
        let record = SwapRecord::<F::Data>::from_stored(&row)?;
        let handle = SwapHandle::new(record, self.ctx.clone(), self.events.clone())?;
        Ok(self.register(handle))
    }

    /// Registers `handle` unless another task registered the same id first,
    /// in which case that instance wins.
    fn register(&self, handle: SwapHandle<F>) -> Arc<SwapHandle<F>> {
        self.live
            .lock()
            .expect("swap registry lock poisoned")
            .entry(handle.id().to_owned())
            .or_insert_with(|| Arc::new(handle))
            .clone()
    }
}
