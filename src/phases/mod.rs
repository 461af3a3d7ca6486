mod command;
mod critic;
mod drafting;
mod safety;

pub use command::ExternalCommandAdapter;
pub use critic::LexiconCritic;
pub use drafting::TemplateDrafter;
pub use safety::KeywordSafetyReviewer;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{AdapterSpec, AdaptersConfig};
use crate::error::CapabilityError;
use crate::models::{SessionState, SessionStateDelta, StageId};

/// A pipeline stage implementation.
///
/// Adapters receive a read-only snapshot and return a delta; they never see
/// the store and never decide what runs next.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    async fn invoke(
        &self,
        stage: StageId,
        state: &SessionState,
    ) -> Result<SessionStateDelta, CapabilityError>;
}

/// The adapter bound to each stage.
#[derive(Clone)]
pub struct AdapterSet {
    drafting: Arc<dyn AgentAdapter>,
    safety: Arc<dyn AgentAdapter>,
    critic: Arc<dyn AgentAdapter>,
}

impl AdapterSet {
    pub fn new(
        drafting: Arc<dyn AgentAdapter>,
        safety: Arc<dyn AgentAdapter>,
        critic: Arc<dyn AgentAdapter>,
    ) -> Self {
        Self {
            drafting,
            safety,
            critic,
        }
    }

    /// Build adapters from configuration.
    pub fn from_config(config: &AdaptersConfig) -> Result<Self> {
        let builtin = &config.builtin;

        let drafting: Arc<dyn AgentAdapter> = match &config.drafting {
            AdapterSpec::Builtin => Arc::new(TemplateDrafter::new(builtin.draft_template.as_deref())?),
            AdapterSpec::Command { program, args } => {
                Arc::new(ExternalCommandAdapter::new(program, args.clone()))
            }
        };
        let safety: Arc<dyn AgentAdapter> = match &config.safety {
            AdapterSpec::Builtin => Arc::new(KeywordSafetyReviewer::new(&builtin.prohibited_phrases)),
            AdapterSpec::Command { program, args } => {
                Arc::new(ExternalCommandAdapter::new(program, args.clone()))
            }
        };
        let critic: Arc<dyn AgentAdapter> = match &config.critic {
            AdapterSpec::Builtin => Arc::new(LexiconCritic::new(builtin.empathy_target)),
            AdapterSpec::Command { program, args } => {
                Arc::new(ExternalCommandAdapter::new(program, args.clone()))
            }
        };

        Ok(Self::new(drafting, safety, critic))
    }

    pub fn get(&self, stage: StageId) -> Arc<dyn AgentAdapter> {
        match stage {
            StageId::Drafting => Arc::clone(&self.drafting),
            StageId::Safety => Arc::clone(&self.safety),
            StageId::Critic => Arc::clone(&self.critic),
        }
    }

    /// Replace the adapter for one stage.
    pub fn with_adapter(mut self, stage: StageId, adapter: Arc<dyn AgentAdapter>) -> Self {
        match stage {
            StageId::Drafting => self.drafting = adapter,
            StageId::Safety => self.safety = adapter,
            StageId::Critic => self.critic = adapter,
        }
        self
    }
}

impl Default for AdapterSet {
    fn default() -> Self {
        let config = AdaptersConfig::default();
        Self::new(
            Arc::new(TemplateDrafter::default()),
            Arc::new(KeywordSafetyReviewer::new(&config.builtin.prohibited_phrases)),
            Arc::new(LexiconCritic::new(config.builtin.empathy_target)),
        )
    }
}
