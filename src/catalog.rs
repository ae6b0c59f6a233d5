//! The task catalog: which actions earn points and how many.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{LedgerError, Result};
use crate::models::*;
use crate::store::Store;

pub const MIN_TITLE_LEN: usize = 3;
pub const MIN_DESCRIPTION_LEN: usize = 10;
pub const DEFAULT_MAX_TASK_POINTS: u32 = 1000;

/// Stock tasks offered by the portal dashboards: (title, description, category, points, active).
const DEFAULT_TASKS: &[(&str, &str, TaskCategory, u32, bool)] = &[
    (
        "Daily Sign-In",
        "Check in once per day",
        TaskCategory::Daily,
        10,
        true,
    ),
    (
        "Refer a Peer",
        "Unique referral link generates points on signup",
        TaskCategory::Referral,
        200,
        true,
    ),
    (
        "Apply for a Job",
        "Click \"Apply\" on a job listing via portal",
        TaskCategory::Job,
        5,
        true,
    ),
    (
        "Upload Resume",
        "Add or update resume PDF/profile document",
        TaskCategory::Profile,
        20,
        true,
    ),
    (
        "Complete Profile",
        "Fill out all profile fields (education, skills)",
        TaskCategory::Profile,
        50,
        true,
    ),
    (
        "Add Skills to Profile",
        "Add at least 5 relevant skills to your profile",
        TaskCategory::Profile,
        15,
        false,
    ),
    (
        "Connect Social Media",
        "Link your social media accounts to your profile",
        TaskCategory::Profile,
        25,
        false,
    ),
];

#[derive(Debug, Clone)]
pub struct TaskCatalog<S> {
    store: S,
    max_points: u32,
}

impl<S: Store> TaskCatalog<S> {
    pub fn new(store: S, max_points: u32) -> Self {
        Self { store, max_points }
    }

    pub fn define_task(&self, input: CreateTaskInput) -> Result<TaskDefinition> {
        let title = input.title.trim().to_string();
        let description = input.description.trim().to_string();
        self.validate(&title, &description, input.points)?;

        let now = Utc::now();
        let task = TaskDefinition {
            id: Uuid::new_v4(),
            title,
            description,
            category: input.category,
            points: input.points,
            active: input.active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_task(&task)?;

        tracing::info!(
            task_id = %task.id,
            category = task.category.as_str(),
            points = task.points,
            "Defined task '{}'",
            task.title
        );
        Ok(task)
    }

    pub fn get_task(&self, id: Uuid) -> Result<TaskDefinition> {
        self.store
            .get_task(id)?
            .ok_or(LedgerError::TaskNotFound(id))
    }

    /// Apply a partial update. Only the fields present in `input` are
    /// validated and written; the rest keep their stored values.
    pub fn update_task(&self, id: Uuid, input: UpdateTaskInput) -> Result<TaskDefinition> {
        let changes = UpdateTaskInput {
            title: input.title.map(|t| t.trim().to_string()),
            description: input.description.map(|d| d.trim().to_string()),
            ..input
        };
        if let Some(title) = &changes.title {
            self.validate_title(title)?;
        }
        if let Some(description) = &changes.description {
            self.validate_description(description)?;
        }
        if let Some(points) = changes.points {
            self.validate_points(points)?;
        }

        let task = self
            .store
            .patch_task(id, &changes, Utc::now())?
            .ok_or(LedgerError::TaskNotFound(id))?;

        tracing::info!(task_id = %id, points = task.points, active = task.active, "Updated task");
        Ok(task)
    }

    pub fn activate_task(&self, id: Uuid) -> Result<TaskDefinition> {
        self.set_active(id, true)
    }

    /// Stop new awards for a task. Existing entries keep counting.
    pub fn deactivate_task(&self, id: Uuid) -> Result<TaskDefinition> {
        self.set_active(id, false)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<TaskDefinition>> {
        Ok(self.store.list_tasks(filter)?)
    }

    /// Define the stock portal tasks if the catalog is empty.
    ///
    /// Returns the tasks created, which is empty when the catalog already had entries.
    pub fn seed_defaults(&self) -> Result<Vec<TaskDefinition>> {
        if self.store.count_tasks()? > 0 {
            tracing::debug!("Catalog not empty, skipping default tasks");
            return Ok(Vec::new());
        }

        DEFAULT_TASKS
            .iter()
            .map(|&(title, description, category, points, active)| {
                self.define_task(CreateTaskInput {
                    title: title.to_string(),
                    description: description.to_string(),
                    category,
                    points: points.min(self.max_points),
                    active: Some(active),
                })
            })
            .collect()
    }

    fn set_active(&self, id: Uuid, active: bool) -> Result<TaskDefinition> {
        self.update_task(
            id,
            UpdateTaskInput {
                active: Some(active),
                ..Default::default()
            },
        )
    }

    fn validate(&self, title: &str, description: &str, points: u32) -> Result<()> {
        self.validate_title(title)?;
        self.validate_description(description)?;
        self.validate_points(points)
    }

    fn validate_title(&self, title: &str) -> Result<()> {
        if title.chars().count() < MIN_TITLE_LEN {
            return Err(LedgerError::Validation(format!(
                "title must be at least {} characters",
                MIN_TITLE_LEN
            )));
        }
        Ok(())
    }

    fn validate_description(&self, description: &str) -> Result<()> {
        if description.chars().count() < MIN_DESCRIPTION_LEN {
            return Err(LedgerError::Validation(format!(
                "description must be at least {} characters",
                MIN_DESCRIPTION_LEN
            )));
        }
        Ok(())
    }

    fn validate_points(&self, points: u32) -> Result<()> {
        if points < 1 || points > self.max_points {
            return Err(LedgerError::Validation(format!(
                "points must be between 1 and {}",
                self.max_points
            )));
        }
        Ok(())
    }
}
