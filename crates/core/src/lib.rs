//! # Mentor Core
//!
//! Session orchestration for an agent-driven learning platform: a gateway
//! to remote teaching agents, a coordinator that deduplicates and caches
//! agent calls, durable weekly progress records, session snapshots, and
//! the weekly session state machine that ties them together.

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod models;
pub mod session;
pub mod state;

pub use config::OrchestratorConfig;
pub use coordinator::RequestCoordinator;
pub use error::OrchestratorError;
pub use gateway::{AgentGateway, AgentTransport};
pub use models::{AgentFailure, AgentId, AgentOutcome, AgentRequest, RequestKey};
pub use session::{Phase, SessionEvent, SessionEventKind, SessionMachine, SessionStatus};
pub use state::{MentorDb, ProgressRecorder, SessionSnapshot, SnapshotStore, WeeklyProgressRecord};
