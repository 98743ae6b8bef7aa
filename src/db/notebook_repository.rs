use async_trait::async_trait;
use uuid::Uuid;

use crate::models::notebook::{GenerationStatus, Notebook, NotebookSummary, Source};

/// Field-level patch applied by `update_notebook`. Scope fields are
/// deliberately absent: the owning scope is fixed at creation and the
/// store rejects any attempt to touch it before this layer is reached.
/// `Some(None)` for `description` clears the stored value; `None` leaves
/// it alone.
#[derive(Debug, Default)]
pub struct NotebookUpdate<'a> {
    pub title: Option<&'a str>,
    pub description: Option<Option<&'a str>>,
    pub generation_status: Option<GenerationStatus>,
}

/// Notebook persistence. Every caller-facing query embeds the caller's
/// visibility predicate (personal owner, or member of the owning
/// organization) so the check and the data access are one atomic
/// statement.
#[async_trait]
pub trait NotebookRepository: Send + Sync {
    /// Inserts a notebook in the caller's personal scope, or in an
    /// organization the caller is currently a member of. The membership
    /// predicate is part of the INSERT, so a concurrent removal cannot
    /// slip a notebook into a scope the caller just lost. `None` means
    /// the predicate failed.
    async fn create_notebook(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        title: &str,
        description: Option<&str>,
    ) -> Result<Option<Notebook>, sqlx::Error>;

    /// Personal notebooks of one user (no organization), newest-updated
    /// first, with read-consistent source counts.
    async fn list_personal_notebooks(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<NotebookSummary>, sqlx::Error>;

    /// All notebooks of one organization, newest-updated first, with
    /// read-consistent source counts. Membership is checked by the
    /// caller.
    async fn list_organization_notebooks(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<NotebookSummary>, sqlx::Error>;

    /// The notebook iff it is visible to the caller; out-of-scope rows
    /// are indistinguishable from absent ones.
    async fn find_notebook_for_caller(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Option<Notebook>, sqlx::Error>;

    /// Applies the patch iff the notebook is visible to the caller, in
    /// one statement.
    async fn update_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        update: NotebookUpdate<'_>,
    ) -> Result<Option<Notebook>, sqlx::Error>;

    /// Deletes (with sources) iff visible to the caller; returns the
    /// deleted row so the change event can carry its scope.
    async fn delete_notebook(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
    ) -> Result<Option<Notebook>, sqlx::Error>;

    async fn add_source(
        &self,
        caller: Uuid,
        notebook_id: Uuid,
        title: &str,
    ) -> Result<Option<Source>, sqlx::Error>;

    /// Removes a source iff its parent notebook is visible to the
    /// caller; returns the source and the parent for event scoping.
    async fn remove_source(
        &self,
        caller: Uuid,
        source_id: Uuid,
    ) -> Result<Option<(Source, Notebook)>, sqlx::Error>;
}
