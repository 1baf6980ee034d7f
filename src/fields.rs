//! Enumerations, vocabularies and sentinel keys used across the tracker.
//!
//! Priority and status are free strings in the store; the lists below are the
//! vocabulary offered by the CLI and the dashboard.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Priorities offered to the user, lowest first.
pub const PRIORITIES: [&str; 3] = ["低", "中", "高"];

/// Statuses offered to the user, in lifecycle order.
pub const STATUSES: [&str; 3] = ["未开始", "进行中", "已完成"];

/// The middle priority.
pub const DEFAULT_PRIORITY: &str = PRIORITIES[1];

pub const DEFAULT_STATUS: &str = STATUSES[0];

/// Display/parse format for work log timestamps.
pub const WORK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Lossless work log format, used when stored logs are fed back into an update.
pub const WORK_TIME_FULL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Module key used for tasks that are not assigned to any module.
pub const UNASSIGNED_MODULE_KEY: &str = "__unassigned__";
pub const UNASSIGNED_MODULE_LABEL: &str = "未分配模块";

/// Board scope label for project tasks that belong to no module.
pub const PROJECT_TASKS_LABEL: &str = "项目任务（未分配模块）";

pub const NO_STAGE_KEY: &str = "__no_stage__";
pub const NO_TASK_TYPE_KEY: &str = "__no_task_type__";
pub const NO_PRIORITY_KEY: &str = "__no_priority__";
pub const NO_STATUS_KEY: &str = "__no_status__";

/// Name of the synthetic board group holding stages outside the active workflow.
pub const OTHER_STAGES_LABEL: &str = "其他阶段";

/// Grouping dimensions of the dashboard, in their fixed composite-key order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ValueEnum, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Stage,
    TaskType,
    Priority,
    Status,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Stage,
        Dimension::TaskType,
        Dimension::Priority,
        Dimension::Status,
    ];

    /// Human label used in group legends.
    pub fn label(self) -> &'static str {
        match self {
            Dimension::Stage => "阶段",
            Dimension::TaskType => "任务类型",
            Dimension::Priority => "优先级",
            Dimension::Status => "状态",
        }
    }

    /// Key standing in for a missing value.
    pub fn missing_key(self) -> &'static str {
        match self {
            Dimension::Stage => NO_STAGE_KEY,
            Dimension::TaskType => NO_TASK_TYPE_KEY,
            Dimension::Priority => NO_PRIORITY_KEY,
            Dimension::Status => NO_STATUS_KEY,
        }
    }

    pub fn missing_label(self) -> &'static str {
        match self {
            Dimension::Stage => "未指定阶段",
            Dimension::TaskType => "未指定类型",
            Dimension::Priority => "未设置优先级",
            Dimension::Status => "未设置状态",
        }
    }

    /// Parse the CLI spelling used by `--only DIM=VALUE`.
    pub fn from_key(s: &str) -> Option<Dimension> {
        match s.trim().to_lowercase().as_str() {
            "stage" => Some(Dimension::Stage),
            "task-type" | "tasktype" | "type" => Some(Dimension::TaskType),
            "priority" => Some(Dimension::Priority),
            "status" => Some(Dimension::Status),
            _ => None,
        }
    }
}

/// Which date a board time filter looks at.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum TimeField {
    #[default]
    Start,
    End,
    Work,
}

/// Kind tag of a flattened board row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    Task,
    TemplateTask,
    TemplateSubtask,
}

impl NodeKind {
    pub fn is_template(self) -> bool {
        !matches!(self, NodeKind::Task)
    }
}
