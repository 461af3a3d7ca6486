pub mod config;
pub mod error;
pub mod models;
pub mod orchestrator;
pub mod phases;
pub mod service;
pub mod slug;
pub mod status;
pub mod store;

// Re-export main types
pub use config::BoardConfig;
pub use error::{BoardError, BoardResult, CapabilityError, ConflictError, PersistenceError};
pub use models::{HumanDecision, SessionState, SessionStateDelta, Severity, StageId, Verdict};
pub use orchestrator::{
    CheckpointId, CheckpointRecord, CheckpointSummary, Orchestrator, ResumeGateway, RunReport,
    SessionEvent, StepOutcome,
};
pub use phases::{AdapterSet, AgentAdapter};
pub use service::ReviewBoard;
pub use status::{SessionInfo, SessionStatus};
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};

// Re-export slug utilities
pub use slug::{new_session_id, slugify, slugify_truncate};
