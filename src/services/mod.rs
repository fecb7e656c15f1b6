//! External collaborator seams and their default implementations

pub mod events;
pub mod safety;
pub mod structural;

pub use events::{BroadcastSink, EventSink, LifecycleAction, LifecycleEvent, LoggingSink};
pub use safety::{ContentDetector, WordListDetector};
pub use structural::{SchemaRulesValidator, StructuralValidator, WriteMode};
