pub mod events;
pub mod gateway;
pub mod guardrails;
pub mod loop_controller;
pub mod merge;
pub mod orchestration_state;
pub mod registry;
pub mod router;
pub mod state;

pub use events::{EventBus, SessionEvent};
pub use gateway::ResumeGateway;
pub use guardrails::{AbortReason, Guardrails};
pub use loop_controller::Orchestrator;
pub use merge::merge;
pub use orchestration_state::{
    CheckpointId, CheckpointRecord, CheckpointSummary, OutcomeMarker, SCHEMA_VERSION, SessionMeta,
};
pub use registry::{SessionRegistry, SessionSlot};
pub use router::{AWAITING_HUMAN, Decision, route};
pub use state::{RunReport, StepOutcome};
