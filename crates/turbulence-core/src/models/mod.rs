pub mod error;
pub mod ids;
pub mod task;

pub use error::{CoreError, CoreErrorKind};
pub use ids::{AgentId, TaskId};
pub use task::{ResultRequest, State, StateRequest, Task};
