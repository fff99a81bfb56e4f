pub mod executor;
pub mod reporter;

pub use executor::{IncidentExecutor, RunningIncident};
pub use reporter::{Event, IncidentReport};

use serde::{Deserialize, Serialize};

use crate::fleet::Instance;
use crate::models::{CoreError, CoreErrorKind};
use crate::orchestration::OrchestrationResult;

/// Tasks to run and the instances to run them on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IncidentRequest {
    /// Task options; each must carry a string `"type"`.
    pub tasks: Vec<serde_json::Value>,
    #[serde(default)]
    pub selector: InstanceSelector,
}

/// Narrows the fleet by exact attribute match. Unset fields match everything.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceSelector {
    pub deployment: Option<String>,
    pub group: Option<String>,
    pub az: Option<String>,
}

impl InstanceSelector {
    pub fn matches(&self, instance: &Instance) -> bool {
        self.deployment
            .as_ref()
            .is_none_or(|deployment| *deployment == instance.deployment)
            && self
                .group
                .as_ref()
                .is_none_or(|group| *group == instance.group)
            && self
                .az
                .as_ref()
                .is_none_or(|az| instance.az.as_ref() == Some(az))
    }
}

impl IncidentRequest {
    pub fn validate(&self) -> OrchestrationResult<()> {
        if self.tasks.is_empty() {
            return Err(CoreError::new(
                CoreErrorKind::InvalidInput,
                "incident must include at least one task",
            ));
        }

        for (index, options) in self.tasks.iter().enumerate() {
            let kind = options.get("type").and_then(serde_json::Value::as_str);
            if kind.is_none_or(str::is_empty) {
                return Err(CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("task options at index {index} must include a non-empty 'type'"),
                ));
            }
        }

        Ok(())
    }
}
