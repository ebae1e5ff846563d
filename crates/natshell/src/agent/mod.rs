//! The agent core: the ReAct loop, its event stream, context management,
//! and prompt assembly.

pub mod context;
pub mod context_manager;
pub mod events;
pub mod plan;
pub mod runner;
pub mod system_prompt;

pub use context::{Platform, SystemContext};
pub use events::{AgentEvent, ErrorKind, EventSink};
pub use runner::AgentLoop;
