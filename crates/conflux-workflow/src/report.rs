//! Read-only execution reports.
//!
//! Reports are projections built on demand. Before a component first runs
//! its report carries only its identity and the `notStarted` state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::group::{Group, GroupMode};
use crate::unit::{UnitOfWork, UnitStatus};
use crate::value::Value;

/// Reported state of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportState {
    /// Not run yet.
    NotStarted,
    /// Running.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl From<UnitStatus> for ReportState {
    fn from(status: UnitStatus) -> Self {
        match status {
            UnitStatus::Pending => ReportState::NotStarted,
            UnitStatus::InProgress => ReportState::InProgress,
            UnitStatus::Completed => ReportState::Completed,
            UnitStatus::Failed => ReportState::Failed,
        }
    }
}

/// Kind of a reported component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Unit of work.
    Task,
    /// Group.
    Group,
}

/// Report of one component, nesting its children for groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReport {
    /// Component id.
    pub id: String,
    /// Component name.
    pub name: String,
    /// Component description.
    pub description: String,
    /// Task or group.
    pub kind: ComponentKind,
    /// Execution mode, for groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<GroupMode>,
    /// Current state.
    pub state: ReportState,
    /// When the last run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Duration of the last run in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Retries performed, for tasks that ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Outputs of a completed task, sorted by key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outputs: Option<BTreeMap<String, Value>>,
    /// Error of a failed task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reports of a group's children.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub child_reports: Vec<ComponentReport>,
}

impl ComponentReport {
    pub(crate) fn for_unit(unit: &UnitOfWork) -> Self {
        let snapshot = unit.snapshot();
        let ran = snapshot.status != UnitStatus::Pending;

        Self {
            id: unit.id().to_string(),
            name: unit.name().to_string(),
            description: unit.description().to_string(),
            kind: ComponentKind::Task,
            mode: None,
            state: snapshot.status.into(),
            started_at: snapshot.started_at,
            execution_time_ms: snapshot.duration_ms(),
            retry_count: ran.then_some(snapshot.retry_count),
            outputs: snapshot.outputs.map(|outputs| outputs.into_iter().collect()),
            error: snapshot.error.map(|err| err.to_string()),
            child_reports: Vec::new(),
        }
    }

    pub(crate) fn for_group(group: &Group) -> Self {
        let timing = group.timing();

        Self {
            id: group.id().to_string(),
            name: group.name().to_string(),
            description: group.description().to_string(),
            kind: ComponentKind::Group,
            mode: Some(group.mode()),
            state: group.status().into(),
            started_at: timing.started_at,
            execution_time_ms: timing.duration_ms(),
            retry_count: None,
            outputs: None,
            error: group.error().map(|err| err.to_string()),
            child_reports: group.components().iter().map(crate::component::Component::report).collect(),
        }
    }
}

/// Report of a whole workflow.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    /// Workflow id.
    pub id: String,
    /// Workflow name.
    pub name: String,
    /// Workflow description.
    pub description: String,
    /// `notStarted`, `inProgress`, `completed`, `failed` or `stopped`.
    pub state: String,
    /// Error carried by a failed workflow.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Duration of the run in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// One report per top-level component.
    pub components: Vec<ComponentReport>,
    /// Snapshot of the output store, sorted by key.
    pub outputs: BTreeMap<String, Value>,
}

impl WorkflowReport {
    /// Renders the report as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Finds a component report anywhere in the tree by name.
    pub fn find(&self, name: &str) -> Option<&ComponentReport> {
        fn search<'a>(reports: &'a [ComponentReport], name: &str) -> Option<&'a ComponentReport> {
            reports.iter().find_map(|report| {
                if report.name == name {
                    Some(report)
                } else {
                    search(&report.child_reports, name)
                }
            })
        }
        search(&self.components, name)
    }
}
