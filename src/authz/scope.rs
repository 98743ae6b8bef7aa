use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::organization_repository::OrganizationRepository;
use crate::error::CoreError;

/// The visibility boundary every read, write and subscription is keyed by:
/// one user's personal space or one organization. Never both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Scope {
    Personal { user_id: Uuid },
    Organization { organization_id: Uuid },
}

impl Scope {
    pub fn personal(user_id: Uuid) -> Self {
        Scope::Personal { user_id }
    }

    pub fn organization(organization_id: Uuid) -> Self {
        Scope::Organization { organization_id }
    }
}

/// Computes the authorized scope for a caller. Pure lookup, no side
/// effects; used as the gate in front of every store and subscription
/// call.
#[derive(Clone)]
pub struct ScopeResolver {
    orgs: Arc<dyn OrganizationRepository>,
}

impl ScopeResolver {
    pub fn new(orgs: Arc<dyn OrganizationRepository>) -> Self {
        Self { orgs }
    }

    /// No organization id means the caller's personal scope. With an
    /// organization id the caller must hold a current membership row;
    /// otherwise the request is rejected without revealing whether the
    /// organization exists.
    pub async fn resolve(
        &self,
        caller: Uuid,
        organization_id: Option<Uuid>,
    ) -> Result<Scope, CoreError> {
        match organization_id {
            None => Ok(Scope::personal(caller)),
            Some(org_id) => match self.orgs.find_role(org_id, caller).await? {
                Some(_) => Ok(Scope::organization(org_id)),
                None => Err(CoreError::Forbidden),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;

    #[tokio::test]
    async fn personal_scope_resolves_without_lookup() {
        let db = MemoryDb::shared();
        let resolver = ScopeResolver::new(db.clone());
        let caller = Uuid::new_v4();

        let scope = resolver.resolve(caller, None).await.unwrap();
        assert_eq!(scope, Scope::personal(caller));
    }

    #[tokio::test]
    async fn organization_scope_requires_membership() {
        let db = MemoryDb::shared();
        let resolver = ScopeResolver::new(db.clone());

        let admin = db.seed_user("a@example.com", Some("Ada"));
        let outsider = db.seed_user("c@example.com", None);
        let (org, _) = db
            .create_organization_with_admin("Acme", admin)
            .await
            .unwrap();

        let scope = resolver.resolve(admin, Some(org.id)).await.unwrap();
        assert_eq!(scope, Scope::organization(org.id));

        let err = resolver.resolve(outsider, Some(org.id)).await.unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));
    }

    #[tokio::test]
    async fn unknown_organization_is_indistinguishable_from_foreign() {
        let db = MemoryDb::shared();
        let resolver = ScopeResolver::new(db.clone());
        let caller = db.seed_user("a@example.com", None);

        let err = resolver
            .resolve(caller, Some(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden));
    }
}
