use std::sync::Arc;

use uuid::Uuid;

use crate::{
    error::{Error, Result},
    models::{JsonMap, UserRole, Workspace, WorkspaceMember, DEFAULT_WORKSPACE_ID},
    store::Store,
};

/// Membership-enforced workspace operations.
///
/// The authorization gate above the store: every mutating call checks the
/// acting user's membership role first.
#[derive(Clone)]
pub struct WorkspaceManager {
    store: Arc<dyn Store>,
}

impl WorkspaceManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a workspace and admit its creator as an admin member.
    pub async fn create(
        &self,
        name: &str,
        owner_id: &str,
        settings: Option<JsonMap>,
    ) -> Result<Workspace> {
        if name.trim().is_empty() {
            return Err(Error::empty_field("name"));
        }

        let workspace_id = Uuid::new_v4().to_string();
        let workspace = self
            .store
            .create_workspace(
                &workspace_id,
                name,
                Some(owner_id),
                settings.unwrap_or_default(),
            )
            .await?;

        self.store
            .add_workspace_member(&workspace_id, owner_id, UserRole::Admin)
            .await?;

        tracing::info!(
            workspace_id = %workspace_id,
            name = %name,
            owner_id = %owner_id,
            "workspace created"
        );

        Ok(workspace)
    }

    /// Fetch a workspace, optionally verifying the user is a member.
    ///
    /// # Errors
    /// `Error::NotFound` for unknown ids, `Error::AccessDenied` when
    /// `user_id` is given and is not a member.
    pub async fn get(&self, workspace_id: &str, user_id: Option<&str>) -> Result<Workspace> {
        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| Error::workspace_not_found(workspace_id))?;

        if let Some(user_id) = user_id {
            let is_member = self
                .store
                .is_workspace_member(workspace_id, user_id)
                .await?;
            if !is_member {
                return Err(Error::AccessDenied(format!(
                    "user {user_id} does not have access to workspace {workspace_id}"
                )));
            }
        }

        Ok(workspace)
    }

    /// Workspaces the user belongs to.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Workspace>> {
        self.store.get_workspaces_for_user(user_id).await
    }

    /// Update name and/or settings. Admin only.
    pub async fn update(
        &self,
        workspace_id: &str,
        user_id: &str,
        name: Option<String>,
        settings: Option<JsonMap>,
    ) -> Result<Workspace> {
        self.require_admin(workspace_id, user_id).await?;

        let workspace = self
            .store
            .update_workspace(workspace_id, name, settings)
            .await?
            .ok_or_else(|| Error::workspace_not_found(workspace_id))?;

        tracing::info!(workspace_id = %workspace_id, updated_by = %user_id, "workspace updated");

        Ok(workspace)
    }

    /// Delete a workspace and everything cascading from it. Owner only;
    /// the reserved default workspace is refused.
    pub async fn delete(&self, workspace_id: &str, user_id: &str) -> Result<bool> {
        let workspace = self
            .store
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| Error::workspace_not_found(workspace_id))?;

        if workspace.owner_id.as_deref() != Some(user_id) {
            return Err(Error::AccessDenied(
                "only the workspace owner can delete it".to_string(),
            ));
        }

        if workspace_id == DEFAULT_WORKSPACE_ID {
            return Err(Error::Conflict(
                "cannot delete the default workspace".to_string(),
            ));
        }

        let deleted = self.store.delete_workspace(workspace_id).await?;

        if deleted {
            tracing::info!(workspace_id = %workspace_id, deleted_by = %user_id, "workspace deleted");
        }

        Ok(deleted)
    }

    /// Add (or re-role) a member. Admin only.
    pub async fn add_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        new_member_id: &str,
        role: UserRole,
    ) -> Result<()> {
        self.require_admin(workspace_id, user_id).await?;

        self.store
            .add_workspace_member(workspace_id, new_member_id, role)
            .await?;

        tracing::info!(
            workspace_id = %workspace_id,
            member_id = %new_member_id,
            role = %role,
            added_by = %user_id,
            "workspace member added"
        );

        Ok(())
    }

    /// Remove a member. Admin only; the owner can never be removed.
    pub async fn remove_member(
        &self,
        workspace_id: &str,
        user_id: &str,
        member_to_remove: &str,
    ) -> Result<bool> {
        let workspace = self.get(workspace_id, Some(user_id)).await?;
        self.require_admin(workspace_id, user_id).await?;

        if workspace.owner_id.as_deref() == Some(member_to_remove) {
            return Err(Error::Conflict(
                "cannot remove the workspace owner".to_string(),
            ));
        }

        let removed = self
            .store
            .remove_workspace_member(workspace_id, member_to_remove)
            .await?;

        if removed {
            tracing::info!(
                workspace_id = %workspace_id,
                member_id = %member_to_remove,
                removed_by = %user_id,
                "workspace member removed"
            );
        }

        Ok(removed)
    }

    /// Members of a workspace. Caller must be a member.
    pub async fn members(&self, workspace_id: &str, user_id: &str) -> Result<Vec<WorkspaceMember>> {
        self.get(workspace_id, Some(user_id)).await?;
        self.store.get_workspace_members(workspace_id).await
    }

    /// The role a user holds in the workspace, if any.
    pub async fn member_role(&self, workspace_id: &str, user_id: &str) -> Result<Option<UserRole>> {
        let members = self.store.get_workspace_members(workspace_id).await?;
        Ok(members
            .into_iter()
            .find(|member| member.user_id == user_id)
            .map(|member| member.role))
    }

    async fn require_admin(&self, workspace_id: &str, user_id: &str) -> Result<()> {
        match self.member_role(workspace_id, user_id).await? {
            Some(UserRole::Admin) => Ok(()),
            _ => Err(Error::AccessDenied(
                "admin access required for this operation".to_string(),
            )),
        }
    }
}
