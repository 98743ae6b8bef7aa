use async_trait::async_trait;
use uuid::Uuid;

use crate::models::user::PublicUser;

/// Read-only view of the identity provider's user table. Accounts are
/// created and verified elsewhere; this service only resolves them.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<PublicUser>, sqlx::Error>;

    async fn find_public_user_by_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PublicUser>, sqlx::Error>;
}
