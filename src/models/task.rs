use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A gamified action that students can complete to earn points.
///
/// Task definitions are never deleted once created: ledger entries keep
/// referring to them after they are deactivated, so historical accounting
/// stays intact. Deactivation only stops new awards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    /// Points granted per award. Always within `[1, max_task_points]`.
    pub points: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Grouping used by the dashboards to tab tasks.
///
/// - `Daily`: repeatable once per calendar day (check-ins)
/// - `Profile`: one-off profile improvements (resume, skills)
/// - `Job`: job portal activity (applications)
/// - `Referral`: credited once per referred user
/// - `Other`: anything else an admin defines
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Daily,
    Profile,
    Job,
    Referral,
    Other,
}

impl TaskCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Profile => "profile",
            Self::Job => "job",
            Self::Referral => "referral",
            Self::Other => "other",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "profile" => Some(Self::Profile),
            "job" => Some(Self::Job),
            "referral" => Some(Self::Referral),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// Input for defining a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskInput {
    pub title: String,
    pub description: String,
    pub category: TaskCategory,
    pub points: u32,
    /// Whether the task can be awarded right away. Defaults to `true`.
    #[serde(default)]
    pub active: Option<bool>,
}

/// Input for updating a task. All fields are optional for partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTaskInput {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<TaskCategory>,
    pub points: Option<u32>,
    pub active: Option<bool>,
}

/// Filter for listing the catalog.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    pub category: Option<TaskCategory>,
    #[serde(default)]
    pub active_only: bool,
}

impl TaskFilter {
    pub fn matches(&self, task: &TaskDefinition) -> bool {
        self.category.map_or(true, |c| c == task.category) && (!self.active_only || task.active)
    }
}
