use serde::{Deserialize, Serialize};

use crate::models::AgentId;
use crate::orchestration::OrchestrationResult;

/// A managed VM and the agent running on it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub group: String,
    pub deployment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub az: Option<String>,
    pub agent_id: AgentId,
}

pub trait Fleet: Send + Sync {
    fn instances(&self) -> OrchestrationResult<Vec<Instance>>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticFleet {
    instances: Vec<Instance>,
}

impl StaticFleet {
    pub fn new(instances: impl IntoIterator<Item = Instance>) -> Self {
        Self {
            instances: instances.into_iter().collect(),
        }
    }
}

impl Fleet for StaticFleet {
    fn instances(&self) -> OrchestrationResult<Vec<Instance>> {
        Ok(self.instances.clone())
    }
}
