//! Event recording: the value object and the durable per-ping buffers.

pub mod database;
pub mod recorded;

pub use database::EventsDatabase;
pub use recorded::RecordedEvent;
