use std::sync::Arc;

use uuid::Uuid;

use crate::authz::guard::AuthorizationGuard;
use crate::authz::scope::{Scope, ScopeResolver};
use crate::db::notebook_repository::{NotebookRepository, NotebookUpdate};
use crate::db::organization_repository::{
    AddMemberOutcome, MemberMutationOutcome, OrganizationRepository,
};
use crate::db::user_repository::UserRepository;
use crate::error::{retry_read, CoreError};
use crate::models::notebook::{CreateNotebook, Notebook, NotebookPatch, NotebookSummary, Source};
use crate::models::organization::{
    MemberWithProfile, MembershipSummary, Organization, OrganizationMember, OrganizationRole,
};
use crate::services::change_notifier::{ChangeEvent, ChangeNotifier, ChangeOp, EntityKind};

fn notebook_scope(notebook: &Notebook) -> Scope {
    match notebook.organization_id {
        Some(organization_id) => Scope::organization(organization_id),
        None => Scope::personal(notebook.user_id),
    }
}

/// The single entry point for tenant data. Every operation resolves the
/// caller's scope, authorizes it, performs the mutation or read through a
/// repository whose statement re-checks the same predicate, and publishes
/// one change event after the mutation committed. Nothing above this
/// layer touches the repositories directly.
#[derive(Clone)]
pub struct TenantStore {
    resolver: ScopeResolver,
    guard: AuthorizationGuard,
    notebooks: Arc<dyn NotebookRepository>,
    organizations: Arc<dyn OrganizationRepository>,
    users: Arc<dyn UserRepository>,
    notifier: Arc<ChangeNotifier>,
}

impl TenantStore {
    pub fn new(
        notebooks: Arc<dyn NotebookRepository>,
        organizations: Arc<dyn OrganizationRepository>,
        users: Arc<dyn UserRepository>,
        notifier: Arc<ChangeNotifier>,
    ) -> Self {
        Self {
            resolver: ScopeResolver::new(organizations.clone()),
            guard: AuthorizationGuard::new(organizations.clone()),
            notebooks,
            organizations,
            users,
            notifier,
        }
    }

    fn publish(&self, scope: Scope, entity: EntityKind, entity_id: Uuid, op: ChangeOp) {
        self.notifier.publish(ChangeEvent {
            scope,
            entity,
            entity_id,
            op,
        });
    }

    // Notebooks

    pub async fn create_notebook(
        &self,
        caller: Uuid,
        payload: CreateNotebook,
    ) -> Result<Notebook, CoreError> {
        let scope = self.resolver.resolve(caller, payload.organization_id).await?;
        self.guard.can_write(caller, scope).await?;

        let created = self
            .notebooks
            .create_notebook(
                caller,
                payload.organization_id,
                &payload.title,
                payload.description.as_deref(),
            )
            .await?
            // The insert predicate failed: membership was revoked between
            // the authorization check and the statement.
            .ok_or(CoreError::Forbidden)?;

        self.publish(scope, EntityKind::Notebook, created.id, ChangeOp::Insert);
        Ok(created)
    }

    pub async fn list_notebooks(
        &self,
        caller: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<Vec<NotebookSummary>, CoreError> {
        let scope = self.resolver.resolve(caller, organization_id).await?;
        self.guard.can_read(caller, scope).await?;

        let rows = match scope {
            Scope::Personal { user_id } => {
                retry_read(|| self.notebooks.list_personal_notebooks(user_id)).await?
            }
            Scope::Organization { organization_id } => {
                retry_read(|| self.notebooks.list_organization_notebooks(organization_id)).await?
            }
        };
        Ok(rows)
    }

    pub async fn get_notebook(&self, caller: Uuid, notebook_id: Uuid) -> Result<Notebook, CoreError> {
        retry_read(|| self.notebooks.find_notebook_for_caller(caller, notebook_id))
            .await?
            .ok_or(CoreError::NotFound)
    }

    pub async fn update_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        patch: NotebookPatch,
    ) -> Result<Notebook, CoreError> {
        if patch.touches_scope() {
            return Err(CoreError::ScopeImmutable);
        }

        let updated = self
            .notebooks
            .update_notebook(
                caller,
                notebook_id,
                NotebookUpdate {
                    title: patch.title.as_deref(),
                    description: patch.description.as_ref().map(|d| d.as_deref()),
                    generation_status: patch.generation_status,
                },
            )
            .await?
            .ok_or(CoreError::NotFound)?;

        self.publish(
            notebook_scope(&updated),
            EntityKind::Notebook,
            updated.id,
            ChangeOp::Update,
        );
        Ok(updated)
    }

    pub async fn delete_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Notebook, CoreError> {
        let deleted = self
            .notebooks
            .delete_notebook(caller, notebook_id)
            .await?
            .ok_or(CoreError::NotFound)?;

        self.publish(
            notebook_scope(&deleted),
            EntityKind::Notebook,
            deleted.id,
            ChangeOp::Delete,
        );
        Ok(deleted)
    }

    pub async fn add_source(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        title: &str,
    ) -> Result<Source, CoreError> {
        // Fetched for the event's scope; the insert re-checks visibility.
        let notebook = self.get_notebook(caller, notebook_id).await?;
        let source = self
            .notebooks
            .add_source(caller, notebook_id, title)
            .await?
            .ok_or(CoreError::NotFound)?;

        self.publish(
            notebook_scope(&notebook),
            EntityKind::Source,
            source.id,
            ChangeOp::Insert,
        );
        Ok(source)
    }

    pub async fn remove_source(&self, caller: Uuid, source_id: Uuid) -> Result<Source, CoreError> {
        let (source, notebook) = self
            .notebooks
            .remove_source(caller, source_id)
            .await?
            .ok_or(CoreError::NotFound)?;

        self.publish(
            notebook_scope(&notebook),
            EntityKind::Source,
            source.id,
            ChangeOp::Delete,
        );
        Ok(source)
    }

    // Organizations

    pub async fn create_organization(
        &self,
        caller: Uuid,
        name: &str,
    ) -> Result<(Organization, OrganizationMember), CoreError> {
        let (organization, member) = self
            .organizations
            .create_organization_with_admin(name, caller)
            .await?;

        self.publish(
            Scope::organization(organization.id),
            EntityKind::Organization,
            organization.id,
            ChangeOp::Insert,
        );
        Ok((organization, member))
    }

    pub async fn list_organizations(
        &self,
        caller: Uuid,
    ) -> Result<Vec<MembershipSummary>, CoreError> {
        Ok(retry_read(|| self.organizations.list_memberships_for_user(caller)).await?)
    }

    pub async fn update_organization(
        &self,
        caller: Uuid,
        organization_id: Uuid,
        name: &str,
    ) -> Result<Organization, CoreError> {
        let updated = self
            .organizations
            .update_organization_name(caller, organization_id, name)
            .await?
            // Non-admins and outsiders get the same answer; the statement
            // does not reveal whether the organization exists.
            .ok_or(CoreError::Forbidden)?;

        self.publish(
            Scope::organization(updated.id),
            EntityKind::Organization,
            updated.id,
            ChangeOp::Update,
        );
        Ok(updated)
    }

    pub async fn delete_organization(
        &self,
        caller: Uuid,
        organization_id: Uuid,
    ) -> Result<Organization, CoreError> {
        let deleted = self
            .organizations
            .delete_organization(caller, organization_id)
            .await?
            .ok_or(CoreError::Forbidden)?;

        self.publish(
            Scope::organization(deleted.id),
            EntityKind::Organization,
            deleted.id,
            ChangeOp::Delete,
        );
        Ok(deleted)
    }

    // Members

    pub async fn list_members(
        &self,
        caller: Uuid,
        organization_id: Uuid,
    ) -> Result<Vec<MemberWithProfile>, CoreError> {
        let scope = self.resolver.resolve(caller, Some(organization_id)).await?;
        self.guard.can_read(caller, scope).await?;
        Ok(retry_read(|| self.organizations.list_members(organization_id)).await?)
    }

    /// Admin-only. The new member is addressed by email. Authorization
    /// runs before the email lookup: a caller without management rights
    /// gets `Forbidden` whether or not the address is registered, so the
    /// endpoint never reveals which addresses have accounts. The role check,
    /// the uniqueness check and the insert are one transaction, so two
    /// concurrent adds of the same user produce exactly one row and one
    /// `AlreadyMember` answer.
    pub async fn add_member(
        &self,
        caller: Uuid,
        organization_id: Uuid,
        email: &str,
        role: OrganizationRole,
    ) -> Result<MemberWithProfile, CoreError> {
        let scope = self.resolver.resolve(caller, Some(organization_id)).await?;
        self.guard.can_manage_members(caller, scope).await?;

        let user = self
            .users
            .find_user_by_email(email)
            .await?
            .ok_or_else(|| CoreError::UserNotFound(email.to_string()))?;

        match self
            .organizations
            .add_member(caller, organization_id, user.id, role)
            .await?
        {
            AddMemberOutcome::Added(member) => {
                self.publish(
                    Scope::organization(organization_id),
                    EntityKind::Member,
                    member.id,
                    ChangeOp::Insert,
                );
                Ok(member)
            }
            AddMemberOutcome::AlreadyMember => Err(CoreError::AlreadyMember),
            AddMemberOutcome::NotAdmin => Err(CoreError::Forbidden),
        }
    }

    pub async fn update_member_role(
        &self,
        caller: Uuid,
        member_id: Uuid,
        role: OrganizationRole,
    ) -> Result<OrganizationMember, CoreError> {
        match self
            .organizations
            .update_member_role(caller, member_id, role)
            .await?
        {
            MemberMutationOutcome::Applied(member) => {
                self.publish(
                    Scope::organization(member.organization_id),
                    EntityKind::Member,
                    member.id,
                    ChangeOp::Update,
                );
                Ok(member)
            }
            MemberMutationOutcome::NotFound => Err(CoreError::NotFound),
            MemberMutationOutcome::NotAdmin => Err(CoreError::Forbidden),
            MemberMutationOutcome::LastAdmin => Err(CoreError::LastAdminViolation),
        }
    }

    pub async fn remove_member(
        &self,
        caller: Uuid,
        member_id: Uuid,
    ) -> Result<OrganizationMember, CoreError> {
        match self.organizations.remove_member(caller, member_id).await? {
            MemberMutationOutcome::Applied(member) => {
                self.publish(
                    Scope::organization(member.organization_id),
                    EntityKind::Member,
                    member.id,
                    ChangeOp::Delete,
                );
                Ok(member)
            }
            MemberMutationOutcome::NotFound => Err(CoreError::NotFound),
            MemberMutationOutcome::NotAdmin => Err(CoreError::Forbidden),
            MemberMutationOutcome::LastAdmin => Err(CoreError::LastAdminViolation),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;
    use crate::models::notebook::GenerationStatus;
    use std::sync::atomic::Ordering;

    fn store() -> (Arc<MemoryDb>, Arc<ChangeNotifier>, TenantStore) {
        let db = MemoryDb::shared();
        let notifier = Arc::new(ChangeNotifier::new());
        let store = TenantStore::new(db.clone(), db.clone(), db.clone(), notifier.clone());
        (db, notifier, store)
    }

    fn new_notebook(title: &str, organization_id: Option<Uuid>) -> CreateNotebook {
        CreateNotebook {
            title: title.to_string(),
            description: None,
            organization_id,
        }
    }

    #[tokio::test]
    async fn personal_notebooks_are_invisible_to_other_users() {
        let (db, _, store) = store();
        let owner = db.seed_user("a@example.com", None);
        let stranger = db.seed_user("b@example.com", None);

        let notebook = store
            .create_notebook(owner, new_notebook("Mine", None))
            .await
            .unwrap();

        assert!(store.get_notebook(owner, notebook.id).await.is_ok());
        assert!(matches!(
            store.get_notebook(stranger, notebook.id).await.unwrap_err(),
            CoreError::NotFound
        ));
        assert!(store.list_notebooks(stranger, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn organization_notebooks_require_membership() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let outsider = db.seed_user("c@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();

        let err = store
            .create_notebook(outsider, new_notebook("Sneaky", Some(org.id)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));

        let err = store.list_notebooks(outsider, Some(org.id)).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));
    }

    #[tokio::test]
    async fn members_share_organization_notebooks() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        db.seed_member(org.id, member, OrganizationRole::Member);

        let notebook = store
            .create_notebook(member, new_notebook("Shared", Some(org.id)))
            .await
            .unwrap();

        let seen = store.get_notebook(admin, notebook.id).await.unwrap();
        assert_eq!(seen.title, "Shared");
        assert_eq!(seen.generation_status, GenerationStatus::Pending);

        let listed = store.list_notebooks(admin, Some(org.id)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].source_count, 0);
    }

    #[tokio::test]
    async fn a_notebooks_scope_cannot_be_changed() {
        let (db, _, store) = store();
        let owner = db.seed_user("a@example.com", None);
        let notebook = store
            .create_notebook(owner, new_notebook("Fixed", None))
            .await
            .unwrap();

        let patch = NotebookPatch {
            organization_id: Some(Uuid::new_v4()),
            ..NotebookPatch::default()
        };
        let err = store
            .update_notebook(owner, notebook.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ScopeImmutable));

        let patch = NotebookPatch {
            user_id: Some(Uuid::new_v4()),
            ..NotebookPatch::default()
        };
        let err = store
            .update_notebook(owner, notebook.id, patch)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ScopeImmutable));

        // Legitimate fields still go through.
        let patch = NotebookPatch {
            title: Some("Renamed".to_string()),
            generation_status: Some(GenerationStatus::Ready),
            ..NotebookPatch::default()
        };
        let updated = store.update_notebook(owner, notebook.id, patch).await.unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.generation_status, GenerationStatus::Ready);
    }

    #[tokio::test]
    async fn a_null_description_clears_while_an_absent_one_keeps() {
        let (db, _, store) = store();
        let owner = db.seed_user("a@example.com", None);
        let notebook = store
            .create_notebook(
                owner,
                CreateNotebook {
                    title: "Notes".to_string(),
                    description: Some("draft".to_string()),
                    organization_id: None,
                },
            )
            .await
            .unwrap();

        let patch = NotebookPatch {
            title: Some("Notes v2".to_string()),
            ..NotebookPatch::default()
        };
        let kept = store.update_notebook(owner, notebook.id, patch).await.unwrap();
        assert_eq!(kept.description.as_deref(), Some("draft"));

        let patch = NotebookPatch {
            description: Some(None),
            ..NotebookPatch::default()
        };
        let cleared = store.update_notebook(owner, notebook.id, patch).await.unwrap();
        assert_eq!(cleared.description, None);
    }

    #[tokio::test]
    async fn deleting_twice_reports_not_found() {
        let (db, _, store) = store();
        let owner = db.seed_user("a@example.com", None);
        let notebook = store
            .create_notebook(owner, new_notebook("Ephemeral", None))
            .await
            .unwrap();

        store.delete_notebook(owner, notebook.id).await.unwrap();
        assert!(matches!(
            store.delete_notebook(owner, notebook.id).await.unwrap_err(),
            CoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn sources_follow_their_notebook() {
        let (db, _, store) = store();
        let owner = db.seed_user("a@example.com", None);
        let stranger = db.seed_user("b@example.com", None);
        let notebook = store
            .create_notebook(owner, new_notebook("Research", None))
            .await
            .unwrap();

        let source = store.add_source(owner, notebook.id, "Paper").await.unwrap();
        let listed = store.list_notebooks(owner, None).await.unwrap();
        assert_eq!(listed[0].source_count, 1);

        assert!(matches!(
            store.add_source(stranger, notebook.id, "Nope").await.unwrap_err(),
            CoreError::NotFound
        ));
        assert!(matches!(
            store.remove_source(stranger, source.id).await.unwrap_err(),
            CoreError::NotFound
        ));

        store.remove_source(owner, source.id).await.unwrap();
        let listed = store.list_notebooks(owner, None).await.unwrap();
        assert_eq!(listed[0].source_count, 0);
    }

    #[tokio::test]
    async fn creator_becomes_admin_and_sees_the_organization_listed() {
        let (db, _, store) = store();
        let creator = db.seed_user("a@example.com", Some("Ada"));

        let (org, member) = store.create_organization(creator, "Acme").await.unwrap();
        assert_eq!(member.role, OrganizationRole::Admin);
        assert_eq!(member.user_id, creator);

        let memberships = store.list_organizations(creator).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert_eq!(memberships[0].organization.id, org.id);
        assert_eq!(memberships[0].role, OrganizationRole::Admin);
        assert_eq!(memberships[0].member_count, 1);
    }

    #[tokio::test]
    async fn only_admins_manage_the_organization() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        db.seed_member(org.id, member, OrganizationRole::Member);

        assert!(matches!(
            store.update_organization(member, org.id, "Evil Corp").await.unwrap_err(),
            CoreError::Forbidden
        ));
        assert!(matches!(
            store.delete_organization(member, org.id).await.unwrap_err(),
            CoreError::Forbidden
        ));

        let renamed = store.update_organization(admin, org.id, "Acme Labs").await.unwrap();
        assert_eq!(renamed.name, "Acme Labs");
    }

    #[tokio::test]
    async fn deleting_an_organization_removes_its_notebooks() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        let notebook = store
            .create_notebook(admin, new_notebook("Org notes", Some(org.id)))
            .await
            .unwrap();

        store.delete_organization(admin, org.id).await.unwrap();

        assert!(matches!(
            store.get_notebook(admin, notebook.id).await.unwrap_err(),
            CoreError::NotFound
        ));
        assert!(store.list_organizations(admin).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn members_are_added_by_email() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        db.seed_user("b@example.com", Some("Bea"));
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();

        let err = store
            .add_member(admin, org.id, "nobody@example.com", OrganizationRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UserNotFound(_)));

        let added = store
            .add_member(admin, org.id, "b@example.com", OrganizationRole::Member)
            .await
            .unwrap();
        assert_eq!(added.user_email, "b@example.com");
        assert_eq!(added.user_full_name.as_deref(), Some("Bea"));

        let err = store
            .add_member(admin, org.id, "b@example.com", OrganizationRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyMember));

        let members = store.list_members(admin, org.id).await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn members_cannot_manage_membership() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        db.seed_user("c@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        let member_row = db.seed_member(org.id, member, OrganizationRole::Member);

        let err = store
            .add_member(member, org.id, "c@example.com", OrganizationRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));

        let err = store
            .update_member_role(member, member_row, OrganizationRole::Admin)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));

        let err = store.remove_member(member, member_row).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));
    }

    #[tokio::test]
    async fn unauthorized_callers_cannot_learn_which_emails_exist() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let outsider = db.seed_user("c@example.com", None);
        db.seed_user("known@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        db.seed_member(org.id, member, OrganizationRole::Member);

        // Registered or not, a caller without management rights gets the
        // same answer for every address.
        for caller in [member, outsider] {
            for email in ["known@example.com", "ghost@example.com"] {
                let err = store
                    .add_member(caller, org.id, email, OrganizationRole::Member)
                    .await
                    .unwrap_err();
                assert!(matches!(err, CoreError::Forbidden));
            }
        }
    }

    #[tokio::test]
    async fn concurrent_adds_of_the_same_email_yield_one_row() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        db.seed_user("b@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        let org_id = org.id;

        let first = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .add_member(admin, org_id, "b@example.com", OrganizationRole::Member)
                    .await
            })
        };
        let second = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .add_member(admin, org_id, "b@example.com", OrganizationRole::Member)
                    .await
            })
        };

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, Err(CoreError::AlreadyMember))));

        let members = store.list_members(admin, org_id).await.unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn the_last_admin_cannot_be_demoted_or_removed() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let (org, admin_row) = store.create_organization(admin, "Acme").await.unwrap();
        db.seed_member(org.id, member, OrganizationRole::Member);

        let err = store
            .update_member_role(admin, admin_row.id, OrganizationRole::Member)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::LastAdminViolation));

        let err = store.remove_member(admin, admin_row.id).await.unwrap_err();
        assert!(matches!(err, CoreError::LastAdminViolation));

        // With a second admin the original one can step down.
        db.seed_member(org.id, db.seed_user("c@example.com", None), OrganizationRole::Admin);
        let demoted = store
            .update_member_role(admin, admin_row.id, OrganizationRole::Member)
            .await
            .unwrap();
        assert_eq!(demoted.role, OrganizationRole::Member);
    }

    #[tokio::test]
    async fn the_sole_admin_of_an_empty_organization_may_leave() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let (_, admin_row) = store.create_organization(admin, "Solo").await.unwrap();

        let removed = store.remove_member(admin, admin_row.id).await.unwrap();
        assert_eq!(removed.user_id, admin);
    }

    #[tokio::test]
    async fn removing_a_member_twice_reports_not_found() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        let member_row = db.seed_member(org.id, member, OrganizationRole::Member);

        store.remove_member(admin, member_row).await.unwrap();
        assert!(matches!(
            store.remove_member(admin, member_row).await.unwrap_err(),
            CoreError::NotFound
        ));
    }

    #[tokio::test]
    async fn a_removed_member_loses_access_immediately() {
        let (db, _, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();
        let member_row = db.seed_member(org.id, member, OrganizationRole::Member);

        let notebook = store
            .create_notebook(member, new_notebook("Shared", Some(org.id)))
            .await
            .unwrap();

        store.remove_member(admin, member_row).await.unwrap();

        assert!(matches!(
            store.get_notebook(member, notebook.id).await.unwrap_err(),
            CoreError::NotFound
        ));
        assert!(matches!(
            store.list_notebooks(member, Some(org.id)).await.unwrap_err(),
            CoreError::Forbidden
        ));
        // The notebook itself stays with the organization.
        assert!(store.get_notebook(admin, notebook.id).await.is_ok());
    }

    #[tokio::test]
    async fn mutations_publish_one_event_into_the_right_scope() {
        let (db, notifier, store) = store();
        let admin = db.seed_user("a@example.com", None);
        let (org, _) = store.create_organization(admin, "Acme").await.unwrap();

        let mut org_rx = notifier.subscribe(Scope::organization(org.id));
        let mut personal_rx = notifier.subscribe(Scope::personal(admin));

        let notebook = store
            .create_notebook(admin, new_notebook("Org notes", Some(org.id)))
            .await
            .unwrap();

        let event = org_rx.recv().await.unwrap();
        assert_eq!(event.entity, EntityKind::Notebook);
        assert_eq!(event.entity_id, notebook.id);
        assert_eq!(event.op, ChangeOp::Insert);
        assert!(org_rx.try_recv().is_err());
        assert!(personal_rx.try_recv().is_err());

        let personal = store
            .create_notebook(admin, new_notebook("Diary", None))
            .await
            .unwrap();
        let event = personal_rx.recv().await.unwrap();
        assert_eq!(event.entity_id, personal.id);
        assert!(org_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn an_admin_always_survives_arbitrary_membership_churn() {
        let (db, _, store) = store();
        let founder = db.seed_user("founder@example.com", None);
        let (org, _) = store.create_organization(founder, "Churn").await.unwrap();

        let emails: Vec<String> = (0..5).map(|i| format!("u{i}@example.com")).collect();
        for email in &emails {
            db.seed_user(email, None);
        }

        // Deterministic pseudo-random op sequence (splitmix-style).
        let mut seed: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = move || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            seed >> 33
        };

        for _ in 0..200 {
            let members = db.list_members(org.id).await.unwrap();
            if members.is_empty() {
                // The sole admin of an empty organization left; nobody can
                // act on it any more, which is allowed.
                break;
            }
            assert!(
                members.iter().any(|m| m.role == OrganizationRole::Admin),
                "organization left without an admin"
            );
            let acting = members
                .iter()
                .find(|m| m.role == OrganizationRole::Admin)
                .unwrap()
                .user_id;

            let r = next();
            let role = if r % 2 == 0 {
                OrganizationRole::Member
            } else {
                OrganizationRole::Admin
            };
            let outcome = match r % 3 {
                0 => {
                    let email = &emails[(r as usize / 3) % emails.len()];
                    store.add_member(acting, org.id, email, role).await.map(|_| ())
                }
                1 => {
                    let target = &members[(r as usize / 3) % members.len()];
                    store.remove_member(acting, target.id).await.map(|_| ())
                }
                _ => {
                    let target = &members[(r as usize / 3) % members.len()];
                    store
                        .update_member_role(acting, target.id, role)
                        .await
                        .map(|_| ())
                }
            };
            if let Err(err) = outcome {
                assert!(
                    matches!(
                        err,
                        CoreError::AlreadyMember
                            | CoreError::LastAdminViolation
                            | CoreError::NotFound
                    ),
                    "unexpected failure during churn: {err}"
                );
            }
        }
    }

    #[tokio::test]
    async fn transient_read_failures_are_retried() {
        let (db, _, store) = store();
        let owner = db.seed_user("a@example.com", None);
        store
            .create_notebook(owner, new_notebook("Sturdy", None))
            .await
            .unwrap();

        db.fail_next_reads.store(2, Ordering::SeqCst);
        let listed = store.list_notebooks(owner, None).await.unwrap();
        assert_eq!(listed.len(), 1);

        db.fail_next_reads.store(3, Ordering::SeqCst);
        assert!(matches!(
            store.list_notebooks(owner, None).await.unwrap_err(),
            CoreError::Store(_)
        ));
    }
}
