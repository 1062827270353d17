use std::sync::Arc;

use maestro_core::models::{JsonMap, ProjectStatus, TaskStatus, UserRole, DEFAULT_PROJECT_ID};
use maestro_core::store::{ProjectStore, TaskStore, UserStore};
use maestro_core::{Error, ProjectManager, WorkspaceManager};
use maestro_mocks::MockStore;

async fn fixture() -> (ProjectManager, WorkspaceManager, Arc<MockStore>, String) {
    let store = Arc::new(MockStore::new());
    for (id, email) in [("u-owner", "owner@example.com"), ("u-other", "other@example.com")] {
        store
            .create_user(id, email, id, "hash", UserRole::Member)
            .await
            .unwrap();
    }
    let workspaces = WorkspaceManager::new(store.clone());
    let workspace = workspaces.create("Research", "u-owner", None).await.unwrap();
    let projects = ProjectManager::new(store.clone(), workspaces.clone());
    (projects, workspaces, store, workspace.id)
}

#[tokio::test]
async fn create_requires_workspace_membership() {
    let (projects, _workspaces, _store, workspace_id) = fixture().await;

    let err = projects
        .create(&workspace_id, "Pipelines", "u-other", "", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AccessDenied(_)));

    let project = projects
        .create(&workspace_id, "Pipelines", "u-owner", "batch jobs", None)
        .await
        .unwrap();
    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(project.workspace_id, workspace_id);
}

#[tokio::test]
async fn soft_delete_hides_from_listing() {
    let (projects, _workspaces, _store, workspace_id) = fixture().await;

    let project = projects
        .create(&workspace_id, "Pipelines", "u-owner", "", None)
        .await
        .unwrap();
    assert!(projects.delete(&project.id, "u-owner").await.unwrap());

    let listed = projects.list(&workspace_id, "u-owner").await.unwrap();
    assert!(listed.is_empty());

    // The row still exists, soft-deleted.
    let fetched = projects.get(&project.id, Some("u-owner")).await.unwrap();
    assert_eq!(fetched.status, ProjectStatus::Deleted);
}

#[tokio::test]
async fn default_project_is_reserved() {
    let (projects, _workspaces, store, workspace_id) = fixture().await;
    store
        .create_project(DEFAULT_PROJECT_ID, &workspace_id, "Default Project", "", JsonMap::new())
        .await
        .unwrap();

    let err = projects
        .delete(DEFAULT_PROJECT_ID, "u-owner")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
}

#[tokio::test]
async fn archive_and_restore_round_trip() {
    let (projects, _workspaces, _store, workspace_id) = fixture().await;

    let project = projects
        .create(&workspace_id, "Pipelines", "u-owner", "", None)
        .await
        .unwrap();

    let archived = projects.archive(&project.id, "u-owner").await.unwrap();
    assert_eq!(archived.status, ProjectStatus::Archived);

    let restored = projects.restore(&project.id, "u-owner").await.unwrap();
    assert_eq!(restored.status, ProjectStatus::Active);
}

#[tokio::test]
async fn stats_count_by_status_and_priority() {
    let (projects, _workspaces, store, workspace_id) = fixture().await;

    let project = projects
        .create(&workspace_id, "Pipelines", "u-owner", "", None)
        .await
        .unwrap();

    for (index, status) in [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
    ]
    .into_iter()
    .enumerate()
    {
        let mut task = maestro_mocks::sample_task(&format!("t-{index}"));
        task.project_id = Some(project.id.clone());
        task.status = status;
        task.priority = 3;
        store.save_task(&task).await.unwrap();
    }

    let stats = projects
        .project_stats(&project.id, "u-owner")
        .await
        .unwrap();
    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.running, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.tasks_by_priority.get(&3), Some(&3));
}
