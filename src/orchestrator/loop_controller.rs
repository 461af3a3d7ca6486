use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BoardConfig, ExecutionConfig, RetryConfig};
use crate::error::{BoardError, BoardResult, CapabilityError, ConflictError, PersistenceError};
use crate::models::{HumanDecision, SessionState, SessionStateDelta, StageId};
use crate::phases::AdapterSet;
use crate::slug::is_valid_session_id;
use crate::store::{CheckpointStore, StoreResult};

use super::events::{EventBus, SessionEvent};
use super::guardrails::{AbortReason, Guardrails};
use super::merge::merge;
use super::orchestration_state::{CheckpointRecord, OutcomeMarker, SessionMeta};
use super::registry::{SessionRegistry, SessionSlot};
use super::router::{Decision, route};
use super::state::StepOutcome;

/// Drives sessions through the review pipeline, one checkpoint per step.
///
/// The orchestrator owns no session state in memory: every step reads the
/// latest checkpoint, decides, and appends the next one. Steps of the same
/// session are serialized through the [`SessionRegistry`]; different
/// sessions proceed in parallel.
pub struct Orchestrator {
    store: Arc<dyn CheckpointStore>,
    adapters: AdapterSet,
    guardrails: Guardrails,
    execution: ExecutionConfig,
    registry: Arc<SessionRegistry>,
    events: EventBus,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        adapters: AdapterSet,
        guardrails: Guardrails,
        execution: ExecutionConfig,
    ) -> Self {
        let events = EventBus::new(execution.event_buffer);
        Self {
            store,
            adapters,
            guardrails,
            execution,
            registry: Arc::new(SessionRegistry::new()),
            events,
        }
    }

    pub fn from_config(store: Arc<dyn CheckpointStore>, adapters: AdapterSet, config: &BoardConfig) -> Self {
        Self::new(
            store,
            adapters,
            Guardrails::from_config(&config.routing),
            config.execution.clone(),
        )
    }

    /// Share a registry with other orchestrators over the same store.
    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    /// Advance the session by one step.
    pub async fn step(&self, session_id: &str) -> BoardResult<StepOutcome> {
        let slot = self.slot(session_id).await?;
        let _guard = slot.lock.lock_owned().await;
        self.step_locked(session_id).await
    }

    /// Step until the session suspends, finishes or aborts.
    pub async fn run(&self, session_id: &str) -> BoardResult<StepOutcome> {
        loop {
            let outcome = self.step(session_id).await?;
            if !outcome.is_continue() {
                info!("Session {} settled: {:?}", session_id, outcome);
                return Ok(outcome);
            }
        }
    }

    /// Abort a session on behalf of an external caller.
    ///
    /// An adapter call in flight is abandoned without touching the state,
    /// then a terminal checkpoint is written once the session lock is free.
    pub async fn cancel(&self, session_id: &str, reason: &str) -> BoardResult<StepOutcome> {
        if !is_valid_session_id(session_id) {
            return Err(BoardError::SessionNotFound(session_id.to_string()));
        }
        let meta = self
            .session_meta(session_id)
            .await?
            .ok_or_else(|| BoardError::SessionNotFound(session_id.to_string()))?;
        if let Some(latest) = self.latest(session_id).await?
            && latest.outcome.is_terminal()
        {
            return Err(BoardError::invalid_state(
                session_id,
                format!("cannot cancel a finished session ({})", latest.outcome),
            ));
        }

        let slot = self.registry.get_or_create(session_id).await;
        slot.cancel.cancel();
        let _guard = Arc::clone(&slot.lock).lock_owned().await;

        let (mut state, seq) = match self.latest(session_id).await? {
            Some(record) if record.outcome.is_terminal() => {
                return Err(BoardError::invalid_state(
                    session_id,
                    format!("cannot cancel a finished session ({})", record.outcome),
                ));
            }
            Some(record) => (record.state, record.seq + 1),
            None => (meta.initial_state(), 1),
        };

        let reason = AbortReason::Cancelled {
            reason: reason.to_string(),
        };
        state.active_stage = None;
        let committed = self
            .commit(CheckpointRecord::new(
                seq,
                None,
                OutcomeMarker::Aborted {
                    reason: reason.clone(),
                },
                state,
            ))
            .await;
        if let Err(e) = committed {
            // The session is still live on disk, so later steps must not see the trip
            warn!("Session {} cancel not recorded: {}", session_id, e);
            self.registry.reset_cancel(session_id).await;
            return Err(e);
        }

        info!("Session {} cancelled at checkpoint {}", session_id, seq);
        Ok(StepOutcome::Aborted { reason })
    }

    // ------------------------------------------------------------------------
    // Step internals (caller holds the session lock)
    // ------------------------------------------------------------------------

    pub(crate) async fn step_locked(&self, session_id: &str) -> BoardResult<StepOutcome> {
        let latest = self.latest(session_id).await?;

        let (mut state, next_seq) = match &latest {
            Some(record) if record.outcome.is_terminal() => {
                debug!("Session {} is terminal ({})", session_id, record.outcome);
                self.registry.remove(session_id).await;
                return Ok(StepOutcome::from_marker(&record.outcome));
            }
            Some(record) => (record.state.clone(), record.seq + 1),
            None => {
                let meta = self
                    .session_meta(session_id)
                    .await?
                    .ok_or_else(|| BoardError::SessionNotFound(session_id.to_string()))?;
                (meta.initial_state(), 1)
            }
        };

        let cancel = self.registry.cancel_token(session_id).await;
        if cancel.is_cancelled() {
            return Err(BoardError::Cancelled(session_id.to_string()));
        }

        let mut decision = route(&state, &self.guardrails);
        if decision == Decision::run(StageId::Drafting)
            && state.effective_decision() == HumanDecision::Rejected
            && let Some(review) = state.human_decision.as_mut()
            && !review.cycle_opened
        {
            // A rejection opens one revision cycle, however many drafting
            // steps it takes to produce the next version
            review.cycle_opened = true;
            state.iteration_count += 1;
            info!(
                "Session {} rejected by reviewer, starting revision cycle {}",
                session_id, state.iteration_count
            );
            decision = route(&state, &self.guardrails);
        }

        match decision {
            Decision::RunStage { stage } => {
                self.run_stage(state, stage, next_seq, &cancel).await
            }
            Decision::Suspend { reason } => {
                // Already parked on this draft for the same reason
                if let Some(record) = &latest
                    && matches!(&record.outcome, OutcomeMarker::Suspended { reason: r } if *r == reason)
                    && record.state.draft_version() == state.draft_version()
                {
                    return Ok(StepOutcome::Suspended { reason });
                }

                state.active_stage = None;
                info!(
                    "Session {} suspended on draft v{}: {}",
                    session_id,
                    state.draft_version(),
                    reason
                );
                self.commit(CheckpointRecord::new(
                    next_seq,
                    None,
                    OutcomeMarker::Suspended {
                        reason: reason.clone(),
                    },
                    state,
                ))
                .await?;
                Ok(StepOutcome::Suspended { reason })
            }
            Decision::Finalize => {
                state.active_stage = None;
                info!(
                    "Session {} approved after {} revision cycle(s)",
                    session_id, state.iteration_count
                );
                self.commit(CheckpointRecord::new(next_seq, None, OutcomeMarker::Done, state))
                    .await?;
                Ok(StepOutcome::Done)
            }
            Decision::Abort { reason } => {
                state.active_stage = None;
                warn!("Session {} aborted: {}", session_id, reason);
                self.commit(CheckpointRecord::new(
                    next_seq,
                    None,
                    OutcomeMarker::Aborted {
                        reason: reason.clone(),
                    },
                    state,
                ))
                .await?;
                Ok(StepOutcome::Aborted { reason })
            }
        }
    }

    async fn run_stage(
        &self,
        mut state: SessionState,
        stage: StageId,
        seq: u64,
        cancel: &CancellationToken,
    ) -> BoardResult<StepOutcome> {
        state.active_stage = Some(stage);
        info!(
            "Session {} step {}: running {} on draft v{}",
            state.session_id,
            seq,
            stage.label(),
            state.draft_version()
        );

        let delta = match self.invoke_with_retry(stage, &state, cancel).await? {
            Ok(delta) => delta,
            Err(err) => {
                let reason = AbortReason::CapabilityFailure {
                    stage,
                    message: err.to_string(),
                };
                warn!("Session {} aborted: {}", state.session_id, reason);
                self.commit(CheckpointRecord::new(
                    seq,
                    Some(stage),
                    OutcomeMarker::Aborted {
                        reason: reason.clone(),
                    },
                    state,
                ))
                .await?;
                return Ok(StepOutcome::Aborted { reason });
            }
        };

        if delta.author != stage {
            return Err(ConflictError::ForeignAuthor {
                expected: stage,
                found: delta.author,
            }
            .into());
        }

        let mut next = merge(&state, delta)?;
        next.steps_taken += 1;
        self.commit(CheckpointRecord::new(seq, Some(stage), OutcomeMarker::Running, next))
            .await?;
        Ok(StepOutcome::Continue)
    }

    /// Call the stage adapter with timeout and backoff.
    ///
    /// The outer error is cancellation; the inner one is the last adapter
    /// failure once retries are exhausted.
    async fn invoke_with_retry(
        &self,
        stage: StageId,
        state: &SessionState,
        cancel: &CancellationToken,
    ) -> BoardResult<Result<SessionStateDelta, CapabilityError>> {
        let adapter = self.adapters.get(stage);
        let retry = &self.execution.capability_retry;
        let timeout = self.execution.adapter_timeout();
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let call = tokio::time::timeout(timeout, adapter.invoke(stage, state));
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Session {}: {} call abandoned on cancel", state.session_id, stage);
                    return Err(BoardError::Cancelled(state.session_id.clone()));
                }
                result = call => match result {
                    Ok(result) => result,
                    Err(_) => Err(CapabilityError::Timeout { stage, after: timeout }),
                },
            };

            match result {
                Ok(delta) => return Ok(Ok(delta)),
                Err(err) if attempt >= attempts => {
                    warn!("{} (attempt {}/{}), giving up", err, attempt, attempts);
                    return Ok(Err(err));
                }
                Err(err) => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        "{} (attempt {}/{}), retrying in {:?}",
                        err, attempt, attempts, delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(BoardError::Cancelled(state.session_id.clone()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Persistence with retry
    // ------------------------------------------------------------------------

    /// Durably append `record`, then announce it.
    pub(crate) async fn commit(&self, record: CheckpointRecord) -> BoardResult<()> {
        let retry = &self.execution.persistence_retry;
        let attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.store.append(&record).await {
                Ok(()) => break,
                Err(e @ PersistenceError::SequenceTaken { .. }) if attempt > 1 => {
                    // An earlier attempt may have landed before it reported failure
                    match self.store.get(&record.session_id, record.seq).await {
                        Ok(Some(stored)) if stored == record => break,
                        _ => return Err(e.into()),
                    }
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        "Checkpoint {} write failed (attempt {}/{}): {}, retrying in {:?}",
                        record.id(),
                        attempt,
                        attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!("Committed checkpoint {} ({})", record.id(), record.outcome);
        self.events.publish(SessionEvent::from(&record));
        if record.outcome.is_terminal() {
            // Nothing runs after a terminal record; waiters hold their own handle
            self.registry.remove(&record.session_id).await;
        }
        Ok(())
    }

    /// Coordination slot of a registered session.
    ///
    /// Unknown or malformed ids are refused before a slot is created.
    pub(crate) async fn slot(&self, session_id: &str) -> BoardResult<SessionSlot> {
        if let Some(slot) = self.registry.get(session_id).await {
            return Ok(slot);
        }
        if !is_valid_session_id(session_id) || self.session_meta(session_id).await?.is_none() {
            return Err(BoardError::SessionNotFound(session_id.to_string()));
        }
        Ok(self.registry.get_or_create(session_id).await)
    }

    pub(crate) async fn latest(&self, session_id: &str) -> BoardResult<Option<CheckpointRecord>> {
        with_retry(&self.execution.persistence_retry, "read latest checkpoint", || {
            self.store.latest(session_id)
        })
        .await
    }

    pub(crate) async fn history(&self, session_id: &str) -> BoardResult<Vec<CheckpointRecord>> {
        with_retry(&self.execution.persistence_retry, "read history", || {
            self.store.list(session_id)
        })
        .await
    }

    pub(crate) async fn checkpoint(
        &self,
        session_id: &str,
        seq: u64,
    ) -> BoardResult<Option<CheckpointRecord>> {
        with_retry(&self.execution.persistence_retry, "read checkpoint", || {
            self.store.get(session_id, seq)
        })
        .await
    }

    pub(crate) async fn session_meta(&self, session_id: &str) -> BoardResult<Option<SessionMeta>> {
        with_retry(&self.execution.persistence_retry, "read session", || {
            self.store.session(session_id)
        })
        .await
    }
}

/// Retry a store read on transient errors with bounded backoff.
async fn with_retry<T, F, Fut>(retry: &RetryConfig, what: &str, mut op: F) -> BoardResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = retry.backoff(attempt);
                warn!("Failed to {} (attempt {}/{}): {}", what, attempt, attempts, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
