use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    models::{JsonMap, Project, ProjectStatus, Task, TaskStatus, DEFAULT_PROJECT_ID},
    store::Store,
    workspaces::WorkspaceManager,
};

/// Per-project task counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectStats {
    pub project_id: String,
    pub total_tasks: usize,
    pub tasks_by_status: HashMap<String, usize>,
    pub tasks_by_priority: HashMap<i64, usize>,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Membership-enforced project operations.
///
/// Projects organize tasks inside a workspace; access is resolved through
/// workspace membership.
#[derive(Clone)]
pub struct ProjectManager {
    store: Arc<dyn Store>,
    workspaces: WorkspaceManager,
}

impl ProjectManager {
    pub fn new(store: Arc<dyn Store>, workspaces: WorkspaceManager) -> Self {
        Self { store, workspaces }
    }

    /// Create a project in a workspace the user belongs to.
    pub async fn create(
        &self,
        workspace_id: &str,
        name: &str,
        user_id: &str,
        description: &str,
        settings: Option<JsonMap>,
    ) -> Result<Project> {
        if name.trim().is_empty() {
            return Err(Error::empty_field("name"));
        }
        self.workspaces.get(workspace_id, Some(user_id)).await?;

        let project_id = Uuid::new_v4().to_string();
        let project = self
            .store
            .create_project(
                &project_id,
                workspace_id,
                name,
                description,
                settings.unwrap_or_default(),
            )
            .await?;

        tracing::info!(
            project_id = %project_id,
            workspace_id = %workspace_id,
            name = %name,
            created_by = %user_id,
            "project created"
        );

        Ok(project)
    }

    /// Fetch a project, optionally verifying access through its workspace.
    pub async fn get(&self, project_id: &str, user_id: Option<&str>) -> Result<Project> {
        let project = self
            .store
            .get_project(project_id)
            .await?
            .ok_or_else(|| Error::project_not_found(project_id))?;

        if let Some(user_id) = user_id {
            self.workspaces
                .get(&project.workspace_id, Some(user_id))
                .await
                .map_err(|_| {
                    Error::AccessDenied(format!(
                        "user {user_id} does not have access to project {project_id}"
                    ))
                })?;
        }

        Ok(project)
    }

    /// Projects in a workspace, excluding soft-deleted ones.
    pub async fn list(&self, workspace_id: &str, user_id: &str) -> Result<Vec<Project>> {
        self.workspaces.get(workspace_id, Some(user_id)).await?;
        self.store.get_projects_in_workspace(workspace_id).await
    }

    /// Update the given fields of a project the user can access.
    pub async fn update(
        &self,
        project_id: &str,
        user_id: &str,
        name: Option<String>,
        description: Option<String>,
        status: Option<ProjectStatus>,
        settings: Option<JsonMap>,
    ) -> Result<Project> {
        self.get(project_id, Some(user_id)).await?;

        let project = self
            .store
            .update_project(project_id, name, description, status, settings)
            .await?
            .ok_or_else(|| Error::project_not_found(project_id))?;

        tracing::info!(project_id = %project_id, updated_by = %user_id, "project updated");

        Ok(project)
    }

    /// Soft-delete a project. The reserved default project is refused.
    pub async fn delete(&self, project_id: &str, user_id: &str) -> Result<bool> {
        self.get(project_id, Some(user_id)).await?;

        if project_id == DEFAULT_PROJECT_ID {
            return Err(Error::Conflict(
                "cannot delete the default project".to_string(),
            ));
        }

        let deleted = self.store.delete_project(project_id).await?;

        if deleted {
            tracing::info!(project_id = %project_id, deleted_by = %user_id, "project deleted");
        }

        Ok(deleted)
    }

    /// Flip a project to `archived`.
    pub async fn archive(&self, project_id: &str, user_id: &str) -> Result<Project> {
        self.update(
            project_id,
            user_id,
            None,
            None,
            Some(ProjectStatus::Archived),
            None,
        )
        .await
    }

    /// Restore an archived project to `active`.
    pub async fn restore(&self, project_id: &str, user_id: &str) -> Result<Project> {
        self.update(
            project_id,
            user_id,
            None,
            None,
            Some(ProjectStatus::Active),
            None,
        )
        .await
    }

    /// Tasks in a project, optionally filtered by status.
    pub async fn project_tasks(
        &self,
        project_id: &str,
        user_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        self.get(project_id, Some(user_id)).await?;
        self.store.get_tasks_by_project(project_id, status).await
    }

    /// Task counters for a project.
    pub async fn project_stats(&self, project_id: &str, user_id: &str) -> Result<ProjectStats> {
        self.get(project_id, Some(user_id)).await?;

        let tasks = self.store.get_tasks_by_project(project_id, None).await?;

        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_priority: HashMap<i64, usize> = HashMap::new();
        for task in &tasks {
            *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
            *by_priority.entry(task.priority).or_default() += 1;
        }

        let count = |status: TaskStatus| by_status.get(status.as_str()).copied().unwrap_or(0);

        Ok(ProjectStats {
            project_id: project_id.to_string(),
            total_tasks: tasks.len(),
            pending: count(TaskStatus::Pending),
            running: count(TaskStatus::Running),
            completed: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            tasks_by_status: by_status,
            tasks_by_priority: by_priority,
        })
    }
}
