pub mod poller;
pub mod transport;

pub use poller::{AgentPoller, StopProbe, TaskRunner};
pub use transport::{AgentTransport, LocalTransport};
