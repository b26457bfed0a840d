pub mod events;
pub mod machine;
pub mod phase;

pub use events::{SessionEvent, SessionEventKind};
pub use machine::{SessionMachine, SessionStatus, TrackStatus};
pub use phase::Phase;
