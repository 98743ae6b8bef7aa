use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::user::PublicUser;

use super::user_repository::UserRepository;

pub struct PostgresUserRepository {
    pub pool: PgPool,
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<PublicUser>, sqlx::Error> {
        sqlx::query_as::<_, PublicUser>(
            r#"
            SELECT id, email, full_name
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_public_user_by_id(
        &self,
        user_id: Uuid,
    ) -> Result<Option<PublicUser>, sqlx::Error> {
        sqlx::query_as::<_, PublicUser>(
            r#"
            SELECT id, email, full_name
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }
}
