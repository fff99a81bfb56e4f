use std::collections::BTreeSet;
use std::time::SystemTime;

use serde::{Serialize, Serializer};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::fleet::Instance;
use crate::models::{ResultRequest, Task, TaskId};

/// Outcome of one task on one instance.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: String,
    pub instance: Instance,
    #[serde(serialize_with = "serialize_timestamp")]
    pub execution_started_at: SystemTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub execution_completed_at: Option<SystemTime>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Event {
    pub fn started(task: &Task, instance: &Instance, started_at: SystemTime) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind().unwrap_or_default().to_string(),
            instance: instance.clone(),
            execution_started_at: started_at,
            execution_completed_at: None,
            error: String::new(),
        }
    }

    pub fn complete(&mut self, result: ResultRequest) {
        self.error = result.error;
        self.execution_completed_at = Some(SystemTime::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.complete(ResultRequest::failure(error));
    }

    pub fn is_completed(&self) -> bool {
        self.execution_completed_at.is_some()
    }

    pub fn has_error(&self) -> bool {
        !self.error.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IncidentReport {
    pub id: String,
    pub events: Vec<Event>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub execution_started_at: SystemTime,
    #[serde(serialize_with = "serialize_optional_timestamp")]
    pub execution_completed_at: Option<SystemTime>,
}

impl IncidentReport {
    pub fn has_event_errors(&self) -> bool {
        self.events.iter().any(Event::has_error)
    }

    /// Distinct task types in the report, comma separated.
    pub fn task_types(&self) -> String {
        let kinds: BTreeSet<&str> = self
            .events
            .iter()
            .map(|event| event.kind.as_str())
            .filter(|kind| !kind.is_empty())
            .collect();
        kinds.into_iter().collect::<Vec<_>>().join(", ")
    }
}

pub fn format_timestamp(at: SystemTime) -> String {
    OffsetDateTime::from(at).format(&Rfc3339).unwrap_or_default()
}

fn serialize_timestamp<S: Serializer>(at: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(*at))
}

fn serialize_optional_timestamp<S: Serializer>(
    at: &Option<SystemTime>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match at {
        Some(at) => serializer.serialize_some(&format_timestamp(*at)),
        None => serializer.serialize_none(),
    }
}
