//! Entity records held by the store.
//!
//! Every record is owned by value: stages own their templates, templates own their
//! subtasks, tasks own their work logs. Cross-entity links are plain string ids and
//! are resolved through the [`Database`](crate::db::Database) lookups.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A named phase of a workflow together with its checklist templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub tasks: Vec<StageTaskTemplate>,
}

/// A checklist item declared on a stage. Rendered in every module that uses the
/// stage; it is not a task itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTaskTemplate {
    pub id: String,
    pub stage_id: String,
    pub name: String,
    pub sort_order: i32,
    #[serde(default)]
    pub subtasks: Vec<StageSubtaskTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSubtaskTemplate {
    pub id: String,
    pub stage_task_id: String,
    pub name: String,
    pub sort_order: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskType {
    pub id: String,
    pub name: String,
}

/// An ordered sequence of stages. The order of `stage_ids` is the process order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub stage_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub workflow_id: String,
}

/// A sub-division of a project. `workflow_id == None` inherits the project's workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub workflow_id: Option<String>,
}

/// A concrete unit of work.
///
/// At most one of `parent_task_id` / `parent_stage_task_id` is set; the store
/// rejects any write that would set both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub module_id: Option<String>,
    pub stage_id: String,
    pub task_type_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub priority: String,
    pub status: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub parent_task_id: Option<String>,
    pub parent_stage_task_id: Option<String>,
    #[serde(default)]
    pub work_logs: Vec<TaskWorkLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWorkLog {
    pub id: String,
    pub task_id: String,
    pub work_time: NaiveDateTime,
    pub content: String,
}

/// Template task as submitted when creating or replacing a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageTaskInput {
    pub name: String,
    pub subtasks: Vec<String>,
}

/// Raw work log entry as typed by the user; parsed and validated by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkLogInput {
    pub work_time: String,
    pub content: String,
}

/// Field set accepted by task creation and update.
///
/// Dates stay as strings until the store validates them, so a malformed value can
/// be reported back verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFields {
    pub project_id: String,
    pub module_id: Option<String>,
    pub stage_id: String,
    pub task_type_id: Option<String>,
    pub name: String,
    pub description: String,
    pub priority: String,
    pub status: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub parent_task_id: Option<String>,
    pub parent_stage_task_id: Option<String>,
    pub work_logs: Vec<WorkLogInput>,
}

impl TaskFields {
    /// Seed an update payload from an existing task, so callers only overwrite what changes.
    pub fn from_task(task: &Task) -> Self {
        TaskFields {
            project_id: task.project_id.clone(),
            module_id: task.module_id.clone(),
            stage_id: task.stage_id.clone(),
            task_type_id: task.task_type_id.clone(),
            name: task.name.clone(),
            description: task.description.clone(),
            priority: task.priority.clone(),
            status: task.status.clone(),
            start_date: task.start_date.map(|d| d.to_string()),
            end_date: task.end_date.map(|d| d.to_string()),
            parent_task_id: task.parent_task_id.clone(),
            parent_stage_task_id: task.parent_stage_task_id.clone(),
            work_logs: task
                .work_logs
                .iter()
                .map(|log| WorkLogInput {
                    work_time: log.work_time.format(crate::fields::WORK_TIME_FULL_FORMAT).to_string(),
                    content: log.content.clone(),
                })
                .collect(),
        }
    }
}
