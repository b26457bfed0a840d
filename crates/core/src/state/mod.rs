pub mod db;
pub mod progress;
pub mod snapshot;

pub use db::MentorDb;

pub use progress::{AgentProgress, ProgressRecorder, ProgressStore, WeeklyProgressRecord};
pub use snapshot::{SessionSnapshot, SnapshotStore};
