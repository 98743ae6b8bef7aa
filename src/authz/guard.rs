use std::sync::Arc;

use uuid::Uuid;

use crate::authz::scope::Scope;
use crate::db::organization_repository::OrganizationRepository;
use crate::error::CoreError;
use crate::models::organization::OrganizationRole;

/// Operations gated by the permission table. Notebook CRUD collapses to
/// Read/Write; organization metadata and membership management are
/// ManageMembers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
    ManageMembers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    NotOwner,
    NotAMember,
    AdminRequired,
}

/// Role/action allow table. Adding a role later is an edit here, not a
/// hunt through conditionals.
const ALLOW: &[(OrganizationRole, Action)] = &[
    (OrganizationRole::Admin, Action::Read),
    (OrganizationRole::Admin, Action::Write),
    (OrganizationRole::Admin, Action::ManageMembers),
    (OrganizationRole::Member, Action::Read),
    (OrganizationRole::Member, Action::Write),
];

pub fn role_allows(role: OrganizationRole, action: Action) -> bool {
    ALLOW.contains(&(role, action))
}

/// Policy decisions for a caller against a scope. Membership is re-read
/// on every check: roles can change concurrently and a decision must
/// never outlive the single operation it gates.
#[derive(Clone)]
pub struct AuthorizationGuard {
    orgs: Arc<dyn OrganizationRepository>,
}

impl AuthorizationGuard {
    pub fn new(orgs: Arc<dyn OrganizationRepository>) -> Self {
        Self { orgs }
    }

    pub async fn can_read(&self, caller: Uuid, scope: Scope) -> Result<(), CoreError> {
        self.check(caller, scope, Action::Read).await
    }

    pub async fn can_write(&self, caller: Uuid, scope: Scope) -> Result<(), CoreError> {
        self.check(caller, scope, Action::Write).await
    }

    pub async fn can_manage_members(&self, caller: Uuid, scope: Scope) -> Result<(), CoreError> {
        self.check(caller, scope, Action::ManageMembers).await
    }

    /// Decision without the error mapping, for callers that want the
    /// reason (the subscription router logs it on revocation).
    pub async fn decide(
        &self,
        caller: Uuid,
        scope: Scope,
        action: Action,
    ) -> Result<Result<(), DenialReason>, sqlx::Error> {
        match scope {
            Scope::Personal { user_id } => {
                // No members in personal scope; only the owner, and there
                // is nothing to manage.
                if action == Action::ManageMembers {
                    return Ok(Err(DenialReason::AdminRequired));
                }
                if caller == user_id {
                    Ok(Ok(()))
                } else {
                    Ok(Err(DenialReason::NotOwner))
                }
            }
            Scope::Organization { organization_id } => {
                match self.orgs.find_role(organization_id, caller).await? {
                    Some(role) if role_allows(role, action) => Ok(Ok(())),
                    Some(_) => Ok(Err(DenialReason::AdminRequired)),
                    None => Ok(Err(DenialReason::NotAMember)),
                }
            }
        }
    }

    async fn check(&self, caller: Uuid, scope: Scope, action: Action) -> Result<(), CoreError> {
        match self.decide(caller, scope, action).await? {
            Ok(()) => Ok(()),
            Err(_) => Err(CoreError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;

    #[test]
    fn permission_table_matches_the_two_role_matrix() {
        assert!(role_allows(OrganizationRole::Admin, Action::Read));
        assert!(role_allows(OrganizationRole::Admin, Action::Write));
        assert!(role_allows(OrganizationRole::Admin, Action::ManageMembers));
        assert!(role_allows(OrganizationRole::Member, Action::Read));
        assert!(role_allows(OrganizationRole::Member, Action::Write));
        assert!(!role_allows(OrganizationRole::Member, Action::ManageMembers));
    }

    #[tokio::test]
    async fn personal_scope_is_owner_only() {
        let db = MemoryDb::shared();
        let guard = AuthorizationGuard::new(db.clone());
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let scope = Scope::personal(owner);

        assert!(guard.can_read(owner, scope).await.is_ok());
        assert!(guard.can_write(owner, scope).await.is_ok());
        assert!(matches!(
            guard.can_read(other, scope).await.unwrap_err(),
            CoreError::Forbidden
        ));
        // There is no membership concept to manage in personal scope.
        assert!(guard.can_manage_members(owner, scope).await.is_err());
    }

    #[tokio::test]
    async fn members_edit_notebooks_but_do_not_manage() {
        let db = MemoryDb::shared();
        let guard = AuthorizationGuard::new(db.clone());

        let admin = db.seed_user("a@example.com", None);
        let member = db.seed_user("b@example.com", None);
        let (org, _) = db
            .create_organization_with_admin("Acme", admin)
            .await
            .unwrap();
        db.seed_member(org.id, member, OrganizationRole::Member);

        let scope = Scope::organization(org.id);
        assert!(guard.can_write(member, scope).await.is_ok());
        assert!(guard.can_manage_members(admin, scope).await.is_ok());

        let denial = guard
            .decide(member, scope, Action::ManageMembers)
            .await
            .unwrap();
        assert_eq!(denial, Err(DenialReason::AdminRequired));
    }
}
