use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::notebook::{Notebook, NotebookSummary, Source};

use super::notebook_repository::{NotebookRepository, NotebookUpdate};

pub struct PostgresNotebookRepository {
    pub pool: PgPool,
}

const NOTEBOOK_COLUMNS: &str =
    "id, title, description, user_id, organization_id, generation_status, created_at, updated_at";

/// Caller-visibility predicate over a notebooks row aliased `n`:
/// personal owner, or current member of the owning organization.
const VISIBLE: &str = r#"(
    (n.organization_id IS NULL AND n.user_id = $1)
    OR (n.organization_id IS NOT NULL AND EXISTS (
        SELECT 1 FROM organization_members m
        WHERE m.organization_id = n.organization_id AND m.user_id = $1
    ))
)"#;

#[async_trait]
impl NotebookRepository for PostgresNotebookRepository {
    async fn create_notebook(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        sqlx::query_as::<_, Notebook>(&format!(
            r#"
            INSERT INTO notebooks
                (id, title, description, user_id, organization_id, generation_status, created_at, updated_at)
            SELECT gen_random_uuid(), $1, $2, $3, $4, 'pending', now(), now()
            WHERE $4::uuid IS NULL OR EXISTS (
                SELECT 1 FROM organization_members m
                WHERE m.organization_id = $4 AND m.user_id = $3
            )
            RETURNING {NOTEBOOK_COLUMNS}
            "#
        ))
        .bind(title)
        .bind(description)
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_personal_notebooks(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<NotebookSummary>, sqlx::Error> {
        sqlx::query_as::<_, NotebookSummary>(
            r#"
            SELECT n.id, n.title, n.description, n.user_id, n.organization_id,
                   n.generation_status, n.created_at, n.updated_at,
                   (SELECT COUNT(*) FROM sources s WHERE s.notebook_id = n.id) AS source_count
            FROM notebooks n
            WHERE n.organization_id IS NULL AND n.user_id = $1
            ORDER BY n.updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn list_organization_notebooks(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<NotebookSummary>, sqlx::Error> {
        sqlx::query_as::<_, NotebookSummary>(
            r#"
            SELECT n.id, n.title, n.description, n.user_id, n.organization_id,
                   n.generation_status, n.created_at, n.updated_at,
                   (SELECT COUNT(*) FROM sources s WHERE s.notebook_id = n.id) AS source_count
            FROM notebooks n
            WHERE n.organization_id = $1
            ORDER BY n.updated_at DESC
            "#,
        )
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn find_notebook_for_caller(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        sqlx::query_as::<_, Notebook>(&format!(
            r#"
            SELECT {NOTEBOOK_COLUMNS}
            FROM notebooks n
            WHERE n.id = $2 AND {VISIBLE}
            "#
        ))
        .bind(caller)
        .bind(notebook_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn update_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        update: NotebookUpdate<'_>,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        sqlx::query_as::<_, Notebook>(&format!(
            r#"
            UPDATE notebooks n
            SET title = COALESCE($3, title),
                description = CASE WHEN $4 THEN $5 ELSE description END,
                generation_status = COALESCE($6, generation_status),
                updated_at = now()
            WHERE n.id = $2 AND {VISIBLE}
            RETURNING {NOTEBOOK_COLUMNS}
            "#
        ))
        .bind(caller)
        .bind(notebook_id)
        .bind(update.title)
        .bind(update.description.is_some())
        .bind(update.description.flatten())
        .bind(update.generation_status)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Option<Notebook>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let notebook = sqlx::query_as::<_, Notebook>(&format!(
            r#"
            SELECT {NOTEBOOK_COLUMNS}
            FROM notebooks n
            WHERE n.id = $2 AND {VISIBLE}
            FOR UPDATE
            "#
        ))
        .bind(caller)
        .bind(notebook_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(notebook) = notebook else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(r#"DELETE FROM sources WHERE notebook_id = $1"#)
            .bind(notebook_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(r#"DELETE FROM notebooks WHERE id = $1"#)
            .bind(notebook_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(notebook))
    }

    async fn add_source(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        title: &str,
    ) -> Result<Option<Source>, sqlx::Error> {
        sqlx::query_as::<_, Source>(&format!(
            r#"
            INSERT INTO sources (id, notebook_id, title, created_at)
            SELECT gen_random_uuid(), n.id, $3, now()
            FROM notebooks n
            WHERE n.id = $2 AND {VISIBLE}
            RETURNING id, notebook_id, title, created_at
            "#
        ))
        .bind(caller)
        .bind(notebook_id)
        .bind(title)
        .fetch_optional(&self.pool)
        .await
    }

    async fn remove_source(
        &self,
        caller: Uuid,
        source_id: Uuid,
    ) -> Result<Option<(Source, Notebook)>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        #[derive(sqlx::FromRow)]
        struct SourceWithParent {
            id: Uuid,
            notebook_id: Uuid,
            title: String,
            created_at: time::OffsetDateTime,
        }

        let source = sqlx::query_as::<_, SourceWithParent>(&format!(
            r#"
            SELECT s.id, s.notebook_id, s.title, s.created_at
            FROM sources s
            JOIN notebooks n ON n.id = s.notebook_id
            WHERE s.id = $2 AND {VISIBLE}
            FOR UPDATE OF s
            "#
        ))
        .bind(caller)
        .bind(source_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(source) = source else {
            tx.rollback().await?;
            return Ok(None);
        };

        let notebook = sqlx::query_as::<_, Notebook>(&format!(
            r#"SELECT {NOTEBOOK_COLUMNS} FROM notebooks n WHERE n.id = $1"#
        ))
        .bind(source.notebook_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(r#"DELETE FROM sources WHERE id = $1"#)
            .bind(source.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((
            Source {
                id: source.id,
                notebook_id: source.notebook_id,
                title: source.title,
                created_at: source.created_at,
            },
            notebook,
        )))
    }
}
