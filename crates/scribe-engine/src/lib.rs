pub mod error;
pub mod estimate;
pub mod normalize;
pub mod orchestrator;
pub mod progress;
pub mod sweeper;

pub use error::EngineError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use progress::StatusPublisher;
pub use sweeper::{Sweeper, SweeperConfig};
