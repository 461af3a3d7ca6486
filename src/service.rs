//! ReviewBoard - the external surface of the library.
//!
//! Wraps an [`Orchestrator`] and a [`ResumeGateway`] over one checkpoint
//! store and exposes the session operations used by the CLI.

use std::sync::Arc;

use anyhow::Context;
use futures::Stream;
use tracing::info;

use crate::config::BoardConfig;
use crate::error::{BoardError, BoardResult, PersistenceError};
use crate::models::{SessionState, Verdict};
use crate::orchestrator::{
    CheckpointId, CheckpointSummary, Orchestrator, ResumeGateway, RunReport, SessionEvent,
    SessionMeta, StepOutcome,
};
use crate::phases::AdapterSet;
use crate::slug::{is_valid_session_id, new_session_id};
use crate::status::{SessionInfo, derive_status};
use crate::store::{CheckpointStore, FileCheckpointStore};

pub struct ReviewBoard {
    orchestrator: Arc<Orchestrator>,
    gateway: ResumeGateway,
}

impl ReviewBoard {
    pub fn new(config: &BoardConfig, store: Arc<dyn CheckpointStore>, adapters: AdapterSet) -> Self {
        Self::from_orchestrator(Arc::new(Orchestrator::from_config(store, adapters, config)))
    }

    pub fn from_orchestrator(orchestrator: Arc<Orchestrator>) -> Self {
        let gateway = ResumeGateway::new(Arc::clone(&orchestrator));
        Self {
            orchestrator,
            gateway,
        }
    }

    /// File-backed board with adapters selected by configuration.
    pub fn open(config: &BoardConfig) -> anyhow::Result<Self> {
        let adapters = AdapterSet::from_config(&config.adapters).context("Failed to build adapters")?;
        let store = Arc::new(FileCheckpointStore::new(config.store.root_dir.clone()));
        info!("Checkpoint store at {}", config.store.root_dir.display());
        Ok(Self::new(config, store, adapters))
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Register a new session and run it until it suspends, finishes or aborts.
    pub async fn start_session(
        &self,
        initial_prompt: &str,
        generation_profile: &str,
    ) -> BoardResult<RunReport> {
        let session_id = new_session_id(initial_prompt);
        self.start_session_with_id(&session_id, initial_prompt, generation_profile)
            .await
    }

    /// Same as `start_session` with a caller-chosen id.
    pub async fn start_session_with_id(
        &self,
        session_id: &str,
        initial_prompt: &str,
        generation_profile: &str,
    ) -> BoardResult<RunReport> {
        if !is_valid_session_id(session_id) {
            return Err(BoardError::invalid_state(
                session_id,
                "session ids may only contain lowercase letters, digits and '-'",
            ));
        }

        let meta = SessionMeta::new(
            session_id.to_string(),
            initial_prompt.to_string(),
            generation_profile.to_string(),
        );
        self.orchestrator.store().create_session(&meta).await?;
        info!(
            "Started session {} (profile {})",
            session_id, generation_profile
        );

        let outcome = self.orchestrator.run(session_id).await?;
        self.report(session_id, outcome).await
    }

    pub async fn resume_session(
        &self,
        session_id: &str,
        verdict: Verdict,
        guidance: Option<String>,
    ) -> BoardResult<RunReport> {
        let outcome = self.gateway.resume(session_id, verdict, guidance).await?;
        self.report(session_id, outcome).await
    }

    pub async fn resume_session_at(
        &self,
        checkpoint: &CheckpointId,
        verdict: Verdict,
        guidance: Option<String>,
    ) -> BoardResult<RunReport> {
        let outcome = self.gateway.resume_at(checkpoint, verdict, guidance).await?;
        self.report(&checkpoint.session_id, outcome).await
    }

    /// Re-enter the step loop, e.g. after a crash left the session mid-run.
    pub async fn continue_session(&self, session_id: &str) -> BoardResult<RunReport> {
        let outcome = self.orchestrator.run(session_id).await?;
        self.report(session_id, outcome).await
    }

    pub async fn cancel_session(&self, session_id: &str, reason: &str) -> BoardResult<StepOutcome> {
        self.orchestrator.cancel(session_id, reason).await
    }

    /// State snapshot stored in one checkpoint.
    pub async fn get_checkpoint(&self, checkpoint: &CheckpointId) -> BoardResult<SessionState> {
        if !is_valid_session_id(&checkpoint.session_id) {
            return Err(BoardError::SessionNotFound(checkpoint.session_id.clone()));
        }
        match self
            .orchestrator
            .checkpoint(&checkpoint.session_id, checkpoint.seq)
            .await?
        {
            Some(record) => Ok(record.state),
            None => {
                self.require_session(&checkpoint.session_id).await?;
                Err(BoardError::CheckpointNotFound(checkpoint.to_string()))
            }
        }
    }

    /// History of a session, oldest first.
    pub async fn list_checkpoints(&self, session_id: &str) -> BoardResult<Vec<CheckpointSummary>> {
        self.require_session(session_id).await?;
        let history = self.orchestrator.history(session_id).await?;
        Ok(history.iter().map(|record| record.summary()).collect())
    }

    /// Live stream of checkpoints committed by this process for the session.
    pub fn subscribe_session_events(
        &self,
        session_id: &str,
    ) -> impl Stream<Item = SessionEvent> + Send + use<> {
        self.orchestrator.events().subscribe(session_id)
    }

    pub async fn session_status(&self, session_id: &str) -> BoardResult<SessionInfo> {
        let meta = self.require_session(session_id).await?;
        let latest = self.orchestrator.latest(session_id).await?;
        Ok(derive_status(&meta, latest.as_ref()))
    }

    pub async fn list_sessions(&self) -> BoardResult<Vec<SessionInfo>> {
        let metas = self
            .orchestrator
            .store()
            .list_sessions()
            .await
            .map_err(BoardError::from)?;

        let mut sessions = Vec::with_capacity(metas.len());
        for meta in metas {
            let latest = self.orchestrator.latest(&meta.session_id).await?;
            sessions.push(derive_status(&meta, latest.as_ref()));
        }
        Ok(sessions)
    }

    async fn require_session(&self, session_id: &str) -> BoardResult<SessionMeta> {
        if !is_valid_session_id(session_id) {
            return Err(BoardError::SessionNotFound(session_id.to_string()));
        }
        self.orchestrator
            .session_meta(session_id)
            .await?
            .ok_or_else(|| BoardError::SessionNotFound(session_id.to_string()))
    }

    async fn report(&self, session_id: &str, outcome: StepOutcome) -> BoardResult<RunReport> {
        let latest = self
            .orchestrator
            .latest(session_id)
            .await?
            .ok_or_else(|| {
                BoardError::Persistence(PersistenceError::Unavailable(format!(
                    "session {} has no checkpoint after running",
                    session_id
                )))
            })?;

        Ok(RunReport {
            session_id: session_id.to_string(),
            outcome,
            latest: latest.summary(),
            current_draft: latest.state.current_draft.clone(),
        })
    }
}
