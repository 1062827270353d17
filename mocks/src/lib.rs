//! In-memory mock of the Maestro store traits.
//!
//! Backs the core crate's unit tests with a thread-safe store that needs
//! no database: error injection for failure paths, call tracking for
//! interaction assertions, and behavior matching the SQLite
//! implementation (expiry reaping, timestamp stamping, soft deletes).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use maestro_core::{
    error::{Error, Result},
    models::{
        EventType, JsonMap, Lock, Project, ProjectStatus, Task, TaskEvent, TaskStatus, User,
        UserRole, Webhook, WebhookService, Workspace, WorkspaceMember,
    },
    store::{
        DashboardStats, EventStore, LockStore, ProjectStore, Store, TaskStats, TaskStore,
        UserStore, WebhookStore, WorkspaceStore,
    },
};

/// A task snapshot with sensible defaults, for test setup.
pub fn sample_task(id: &str) -> Task {
    Task {
        id: id.to_string(),
        project_id: None,
        name: format!("task {id}"),
        description: String::new(),
        service: "compute".to_string(),
        payload: serde_json::json!({}),
        priority: 5,
        status: TaskStatus::Pending,
        dependencies: Vec::new(),
        metadata: JsonMap::new(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
        result: None,
        error: None,
        retry_count: 0,
        version: 1,
        created_by: None,
    }
}

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    events: Vec<TaskEvent>,
    locks: HashMap<String, Lock>,
    users: HashMap<String, (User, String)>,
    workspaces: HashMap<String, Workspace>,
    members: HashMap<(String, String), (UserRole, DateTime<Utc>)>,
    projects: HashMap<String, Project>,
    webhooks: HashMap<String, Webhook>,
}

/// Thread-safe in-memory implementation of every store trait.
#[derive(Default)]
pub struct MockStore {
    state: Mutex<State>,
    error_injection: Mutex<Option<Error>>,
    call_history: Mutex<Vec<String>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next store operation with `error`.
    pub fn inject_error(&self, error: Error) {
        *self.error_injection.lock() = Some(error);
    }

    pub fn clear_error(&self) {
        *self.error_injection.lock() = None;
    }

    /// Names of the operations called so far, in order.
    pub fn call_history(&self) -> Vec<String> {
        self.call_history.lock().clone()
    }

    pub fn clear_history(&self) {
        self.call_history.lock().clear();
    }

    /// Panic unless `method` appears in the call history.
    pub fn assert_called(&self, method: &str) {
        let history = self.call_history.lock();
        assert!(
            history.iter().any(|call| call == method),
            "method '{}' was not called; history: {:?}",
            method,
            *history
        );
    }

    fn enter(&self, method: &str) -> Result<()> {
        self.call_history.lock().push(method.to_string());
        match self.error_injection.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn reap_expired_locks(state: &mut State) {
        let now = Utc::now();
        state.locks.retain(|_, lock| !lock.is_expired(now));
    }

    fn sort_schedulable(tasks: &mut [Task]) {
        tasks.sort_by(|a, b| {
            (a.priority, a.created_at, &a.id).cmp(&(b.priority, b.created_at, &b.id))
        });
    }
}

#[async_trait]
impl TaskStore for MockStore {
    async fn save_task(&self, task: &Task) -> Result<()> {
        self.enter("save_task")?;
        self.state.lock().tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        self.enter("get_task")?;
        Ok(self.state.lock().tasks.get(id).cloned())
    }

    async fn get_all_tasks(&self) -> Result<Vec<Task>> {
        self.enter("get_all_tasks")?;
        let mut tasks: Vec<Task> = self.state.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn get_tasks_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        self.enter("get_tasks_by_status")?;
        let mut tasks: Vec<Task> = self
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| task.status == status)
            .cloned()
            .collect();
        Self::sort_schedulable(&mut tasks);
        Ok(tasks)
    }

    async fn get_tasks_by_project(
        &self,
        project_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>> {
        self.enter("get_tasks_by_project")?;
        let mut tasks: Vec<Task> = self
            .state
            .lock()
            .tasks
            .values()
            .filter(|task| task.project_id.as_deref() == Some(project_id))
            .filter(|task| status.map(|s| task.status == s).unwrap_or(true))
            .cloned()
            .collect();
        Self::sort_schedulable(&mut tasks);
        Ok(tasks)
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<Option<Task>> {
        self.enter("update_task_status")?;
        let mut state = self.state.lock();
        let Some(task) = state.tasks.get_mut(id) else {
            return Ok(None);
        };

        let now = Utc::now();
        if status == TaskStatus::Running && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if status.is_terminal() {
            task.completed_at = Some(now);
        }
        task.status = status;
        task.result = result;
        task.error = error;

        Ok(Some(task.clone()))
    }

    async fn update_task_version(&self, id: &str) -> Result<i64> {
        self.enter("update_task_version")?;
        let mut state = self.state.lock();
        match state.tasks.get_mut(id) {
            Some(task) => {
                task.version += 1;
                Ok(task.version)
            }
            None => Ok(0),
        }
    }

    async fn delete_task(&self, id: &str) -> Result<bool> {
        self.enter("delete_task")?;
        let mut state = self.state.lock();
        let removed = state.tasks.remove(id).is_some();
        if removed {
            state.events.retain(|event| event.task_id != id);
        }
        Ok(removed)
    }

    async fn task_stats(&self) -> Result<TaskStats> {
        self.enter("task_stats")?;
        let state = self.state.lock();

        let mut by_status: HashMap<String, i64> = HashMap::new();
        let mut by_service: HashMap<String, i64> = HashMap::new();
        let mut durations_ms: Vec<f64> = Vec::new();

        for task in state.tasks.values() {
            *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
            *by_service.entry(task.service.clone()).or_default() += 1;
            if task.status == TaskStatus::Completed {
                if let (Some(start), Some(end)) = (task.started_at, task.completed_at) {
                    durations_ms.push((end - start).num_milliseconds() as f64);
                }
            }
        }

        let avg = if durations_ms.is_empty() {
            0.0
        } else {
            durations_ms.iter().sum::<f64>() / durations_ms.len() as f64
        };

        Ok(TaskStats {
            total_tasks: state.tasks.len() as i64,
            tasks_by_status: by_status,
            tasks_by_service: by_service,
            avg_completion_time_ms: avg,
        })
    }
}

#[async_trait]
impl EventStore for MockStore {
    async fn create_task_event(
        &self,
        event_id: &str,
        task_id: &str,
        event_type: EventType,
        user_id: Option<&str>,
        details: JsonMap,
    ) -> Result<TaskEvent> {
        self.enter("create_task_event")?;
        let event = TaskEvent {
            id: event_id.to_string(),
            task_id: task_id.to_string(),
            event_type,
            user_id: user_id.map(|id| id.to_string()),
            details,
            created_at: Utc::now(),
        };
        self.state.lock().events.push(event.clone());
        Ok(event)
    }

    async fn get_task_events(&self, task_id: &str, limit: i64) -> Result<Vec<TaskEvent>> {
        self.enter("get_task_events")?;
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .filter(|event| event.task_id == task_id)
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get_recent_events(&self, limit: i64) -> Result<Vec<TaskEvent>> {
        self.enter("get_recent_events")?;
        Ok(self
            .state
            .lock()
            .events
            .iter()
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LockStore for MockStore {
    async fn acquire_lock(
        &self,
        lock_id: &str,
        resource_type: &str,
        resource_id: &str,
        holder_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Option<Lock>> {
        self.enter("acquire_lock")?;
        let mut state = self.state.lock();
        Self::reap_expired_locks(&mut state);

        let taken = state
            .locks
            .values()
            .any(|lock| lock.resource_type == resource_type && lock.resource_id == resource_id);
        if taken {
            return Ok(None);
        }

        let lock = Lock {
            id: lock_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            holder_id: holder_id.to_string(),
            acquired_at: Utc::now(),
            expires_at,
        };
        state.locks.insert(lock.id.clone(), lock.clone());
        Ok(Some(lock))
    }

    async fn release_lock(&self, lock_id: &str, holder_id: &str) -> Result<bool> {
        self.enter("release_lock")?;
        let mut state = self.state.lock();
        let matched = state
            .locks
            .get(lock_id)
            .map(|lock| lock.holder_id == holder_id)
            .unwrap_or(false);
        if matched {
            state.locks.remove(lock_id);
        }
        Ok(matched)
    }

    async fn get_lock(&self, resource_type: &str, resource_id: &str) -> Result<Option<Lock>> {
        self.enter("get_lock")?;
        let mut state = self.state.lock();
        Self::reap_expired_locks(&mut state);
        Ok(state
            .locks
            .values()
            .find(|lock| lock.resource_type == resource_type && lock.resource_id == resource_id)
            .cloned())
    }

    async fn get_active_locks(&self, holder_id: Option<&str>) -> Result<Vec<Lock>> {
        self.enter("get_active_locks")?;
        let mut state = self.state.lock();
        Self::reap_expired_locks(&mut state);
        Ok(state
            .locks
            .values()
            .filter(|lock| holder_id.map(|h| lock.holder_id == h).unwrap_or(true))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MockStore {
    async fn create_user(
        &self,
        user_id: &str,
        email: &str,
        name: &str,
        password_hash: &str,
        role: UserRole,
    ) -> Result<User> {
        self.enter("create_user")?;
        let mut state = self.state.lock();

        if state.users.values().any(|(user, _)| user.email == email) {
            return Err(Error::Conflict(format!("email {email} already registered")));
        }

        let user = User {
            id: user_id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            role,
            created_at: Utc::now(),
            last_login: None,
        };
        state
            .users
            .insert(user_id.to_string(), (user.clone(), password_hash.to_string()));
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.enter("get_user")?;
        Ok(self.state.lock().users.get(id).map(|(user, _)| user.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<(User, String)>> {
        self.enter("get_user_by_email")?;
        Ok(self
            .state
            .lock()
            .users
            .values()
            .find(|(user, _)| user.email == email)
            .cloned())
    }

    async fn update_last_login(&self, id: &str) -> Result<()> {
        self.enter("update_last_login")?;
        if let Some((user, _)) = self.state.lock().users.get_mut(id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for MockStore {
    async fn create_workspace(
        &self,
        workspace_id: &str,
        name: &str,
        owner_id: Option<&str>,
        settings: JsonMap,
    ) -> Result<Workspace> {
        self.enter("create_workspace")?;
        let workspace = Workspace {
            id: workspace_id.to_string(),
            name: name.to_string(),
            owner_id: owner_id.map(|id| id.to_string()),
            settings,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.state
            .lock()
            .workspaces
            .insert(workspace_id.to_string(), workspace.clone());
        Ok(workspace)
    }

    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        self.enter("get_workspace")?;
        Ok(self.state.lock().workspaces.get(id).cloned())
    }

    async fn get_workspaces_for_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        self.enter("get_workspaces_for_user")?;
        let state = self.state.lock();
        let mut workspaces: Vec<Workspace> = state
            .members
            .keys()
            .filter(|(_, member_id)| member_id == user_id)
            .filter_map(|(workspace_id, _)| state.workspaces.get(workspace_id).cloned())
            .collect();
        workspaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workspaces)
    }

    async fn update_workspace(
        &self,
        id: &str,
        name: Option<String>,
        settings: Option<JsonMap>,
    ) -> Result<Option<Workspace>> {
        self.enter("update_workspace")?;
        let mut state = self.state.lock();
        let Some(workspace) = state.workspaces.get_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            workspace.name = name;
        }
        if let Some(settings) = settings {
            workspace.settings = settings;
        }
        workspace.updated_at = Some(Utc::now());
        Ok(Some(workspace.clone()))
    }

    async fn delete_workspace(&self, id: &str) -> Result<bool> {
        self.enter("delete_workspace")?;
        let mut state = self.state.lock();
        let removed = state.workspaces.remove(id).is_some();
        if removed {
            // Cascade like the relational schema's ON DELETE CASCADE.
            let project_ids: Vec<String> = state
                .projects
                .values()
                .filter(|project| project.workspace_id == id)
                .map(|project| project.id.clone())
                .collect();
            state
                .projects
                .retain(|_, project| project.workspace_id != id);
            state.tasks.retain(|_, task| {
                task.project_id
                    .as_ref()
                    .map(|pid| !project_ids.contains(pid))
                    .unwrap_or(true)
            });
            state.members.retain(|(workspace_id, _), _| workspace_id != id);
            state
                .webhooks
                .retain(|_, webhook| webhook.workspace_id != id);
        }
        Ok(removed)
    }

    async fn add_workspace_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        role: UserRole,
    ) -> Result<()> {
        self.enter("add_workspace_member")?;
        self.state.lock().members.insert(
            (workspace_id.to_string(), user_id.to_string()),
            (role, Utc::now()),
        );
        Ok(())
    }

    async fn remove_workspace_member(&self, workspace_id: &str, user_id: &str) -> Result<bool> {
        self.enter("remove_workspace_member")?;
        Ok(self
            .state
            .lock()
            .members
            .remove(&(workspace_id.to_string(), user_id.to_string()))
            .is_some())
    }

    async fn get_workspace_members(&self, workspace_id: &str) -> Result<Vec<WorkspaceMember>> {
        self.enter("get_workspace_members")?;
        let state = self.state.lock();
        let mut members: Vec<WorkspaceMember> = state
            .members
            .iter()
            .filter(|((ws_id, _), _)| ws_id == workspace_id)
            .map(|((_, user_id), (role, joined_at))| {
                let (name, email) = state
                    .users
                    .get(user_id)
                    .map(|(user, _)| (user.name.clone(), user.email.clone()))
                    .unwrap_or_default();
                WorkspaceMember {
                    user_id: user_id.clone(),
                    user_name: name,
                    user_email: email,
                    role: *role,
                    joined_at: *joined_at,
                }
            })
            .collect();
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(members)
    }

    async fn is_workspace_member(&self, workspace_id: &str, user_id: &str) -> Result<bool> {
        self.enter("is_workspace_member")?;
        Ok(self
            .state
            .lock()
            .members
            .contains_key(&(workspace_id.to_string(), user_id.to_string())))
    }
}

#[async_trait]
impl ProjectStore for MockStore {
    async fn create_project(
        &self,
        project_id: &str,
        workspace_id: &str,
        name: &str,
        description: &str,
        settings: JsonMap,
    ) -> Result<Project> {
        self.enter("create_project")?;
        let project = Project {
            id: project_id.to_string(),
            workspace_id: workspace_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: ProjectStatus::Active,
            settings,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.state
            .lock()
            .projects
            .insert(project_id.to_string(), project.clone());
        Ok(project)
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        self.enter("get_project")?;
        Ok(self.state.lock().projects.get(id).cloned())
    }

    async fn get_projects_in_workspace(&self, workspace_id: &str) -> Result<Vec<Project>> {
        self.enter("get_projects_in_workspace")?;
        let mut projects: Vec<Project> = self
            .state
            .lock()
            .projects
            .values()
            .filter(|project| project.workspace_id == workspace_id)
            .filter(|project| project.status != ProjectStatus::Deleted)
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn update_project(
        &self,
        id: &str,
        name: Option<String>,
        description: Option<String>,
        status: Option<ProjectStatus>,
        settings: Option<JsonMap>,
    ) -> Result<Option<Project>> {
        self.enter("update_project")?;
        let mut state = self.state.lock();
        let Some(project) = state.projects.get_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = name {
            project.name = name;
        }
        if let Some(description) = description {
            project.description = description;
        }
        if let Some(status) = status {
            project.status = status;
        }
        if let Some(settings) = settings {
            project.settings = settings;
        }
        project.updated_at = Some(Utc::now());
        Ok(Some(project.clone()))
    }

    async fn delete_project(&self, id: &str) -> Result<bool> {
        self.enter("delete_project")?;
        let mut state = self.state.lock();
        match state.projects.get_mut(id) {
            Some(project) => {
                project.status = ProjectStatus::Deleted;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl WebhookStore for MockStore {
    async fn create_webhook(
        &self,
        webhook_id: &str,
        workspace_id: &str,
        service: WebhookService,
        url: &str,
        events: Option<Vec<EventType>>,
    ) -> Result<Webhook> {
        self.enter("create_webhook")?;
        let webhook = Webhook {
            id: webhook_id.to_string(),
            workspace_id: workspace_id.to_string(),
            service,
            url: url.to_string(),
            events: events.unwrap_or_else(EventType::all),
            active: true,
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .webhooks
            .insert(webhook_id.to_string(), webhook.clone());
        Ok(webhook)
    }

    async fn get_webhook(&self, id: &str) -> Result<Option<Webhook>> {
        self.enter("get_webhook")?;
        Ok(self.state.lock().webhooks.get(id).cloned())
    }

    async fn get_webhooks_for_workspace(&self, workspace_id: &str) -> Result<Vec<Webhook>> {
        self.enter("get_webhooks_for_workspace")?;
        let mut webhooks: Vec<Webhook> = self
            .state
            .lock()
            .webhooks
            .values()
            .filter(|webhook| webhook.workspace_id == workspace_id)
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(webhooks)
    }

    async fn get_active_webhooks_for_event(
        &self,
        workspace_id: &str,
        event_type: EventType,
    ) -> Result<Vec<Webhook>> {
        self.enter("get_active_webhooks_for_event")?;
        let mut webhooks: Vec<Webhook> = self
            .state
            .lock()
            .webhooks
            .values()
            .filter(|webhook| webhook.workspace_id == workspace_id)
            .filter(|webhook| webhook.active)
            .filter(|webhook| webhook.events.contains(&event_type))
            .cloned()
            .collect();
        webhooks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(webhooks)
    }

    async fn update_webhook(
        &self,
        id: &str,
        url: Option<String>,
        events: Option<Vec<EventType>>,
        active: Option<bool>,
    ) -> Result<Option<Webhook>> {
        self.enter("update_webhook")?;
        let mut state = self.state.lock();
        let Some(webhook) = state.webhooks.get_mut(id) else {
            return Ok(None);
        };
        if let Some(url) = url {
            webhook.url = url;
        }
        if let Some(events) = events {
            webhook.events = events;
        }
        if let Some(active) = active {
            webhook.active = active;
        }
        Ok(Some(webhook.clone()))
    }

    async fn delete_webhook(&self, id: &str) -> Result<bool> {
        self.enter("delete_webhook")?;
        Ok(self.state.lock().webhooks.remove(id).is_some())
    }
}

#[async_trait]
impl Store for MockStore {
    async fn health_check(&self) -> Result<()> {
        self.enter("health_check")?;
        Ok(())
    }

    async fn dashboard_stats(&self) -> Result<DashboardStats> {
        self.enter("dashboard_stats")?;
        let tasks = {
            // Recompute inline to keep the injected-error semantics of a
            // single operation.
            let state = self.state.lock();
            let mut by_status: HashMap<String, i64> = HashMap::new();
            let mut by_service: HashMap<String, i64> = HashMap::new();
            for task in state.tasks.values() {
                *by_status.entry(task.status.as_str().to_string()).or_default() += 1;
                *by_service.entry(task.service.clone()).or_default() += 1;
            }
            TaskStats {
                total_tasks: state.tasks.len() as i64,
                tasks_by_status: by_status,
                tasks_by_service: by_service,
                avg_completion_time_ms: 0.0,
            }
        };

        let state = self.state.lock();
        let now = Utc::now();
        Ok(DashboardStats {
            total_workspaces: state.workspaces.len() as i64,
            total_projects: state
                .projects
                .values()
                .filter(|project| project.status != ProjectStatus::Deleted)
                .count() as i64,
            total_users: state.users.len() as i64,
            active_locks: state
                .locks
                .values()
                .filter(|lock| !lock.is_expired(now))
                .count() as i64,
            tasks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_and_fetch_round_trip() {
        let store = MockStore::new();
        let task = sample_task("t-1");
        store.save_task(&task).await.unwrap();

        let fetched = store.get_task("t-1").await.unwrap().unwrap();
        assert_eq!(fetched, task);
        store.assert_called("save_task");
        store.assert_called("get_task");
    }

    #[tokio::test]
    async fn injected_error_fires_once() {
        let store = MockStore::new();
        store.inject_error(Error::Storage("disk on fire".into()));

        let err = store.get_task("t-1").await.unwrap_err();
        assert!(err.is_storage());

        // Next call works again.
        assert!(store.get_task("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_update_stamps_timestamps() {
        let store = MockStore::new();
        store.save_task(&sample_task("t-1")).await.unwrap();

        let running = store
            .update_task_status("t-1", TaskStatus::Running, None, None)
            .await
            .unwrap()
            .unwrap();
        assert!(running.started_at.is_some());
        assert!(running.completed_at.is_none());

        let done = store
            .update_task_status("t-1", TaskStatus::Completed, None, None)
            .await
            .unwrap()
            .unwrap();
        assert!(done.completed_at.is_some());
        // started_at is never cleared.
        assert_eq!(done.started_at, running.started_at);
    }

    #[tokio::test]
    async fn expired_locks_are_reaped_on_read() {
        let store = MockStore::new();
        let past = Utc::now() - chrono::Duration::seconds(5);
        store
            .acquire_lock("l-1", "task", "t-1", "alice", Some(past))
            .await
            .unwrap()
            .unwrap();

        assert!(store.get_lock("task", "t-1").await.unwrap().is_none());
        let lock = store
            .acquire_lock("l-2", "task", "t-1", "bob", None)
            .await
            .unwrap();
        assert!(lock.is_some());
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let store = MockStore::new();
        store
            .create_user("u-1", "a@example.com", "A", "hash", UserRole::Member)
            .await
            .unwrap();
        let err = store
            .create_user("u-2", "a@example.com", "B", "hash", UserRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }
}
