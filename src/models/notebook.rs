use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use time::OffsetDateTime;
use uuid::Uuid;

/// Progress of the asynchronous content generation performed by an
/// external collaborator. New notebooks start as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "generation_status")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

/// A notebook belongs to exactly one scope: `organization_id` set means
/// organization-owned, unset means personal to `user_id`. The scope is
/// fixed at creation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Notebook {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub generation_status: GenerationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Listing entry: the notebook plus its derived source count, computed in
/// the same query so the two cannot drift apart.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NotebookSummary {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub generation_status: GenerationStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub source_count: i64,
}

/// Child of a notebook; only its count is surfaced through the API today.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Source {
    pub id: Uuid,
    pub notebook_id: Uuid,
    pub title: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateNotebook {
    pub title: String,
    pub description: Option<String>,
    pub organization_id: Option<Uuid>,
}

/// Update payload. `user_id` / `organization_id` are accepted by serde so
/// a caller trying to move a notebook between scopes gets a typed
/// rejection instead of silent field drop. `description` is nested so an
/// absent field (keep) and an explicit `null` (clear) stay distinct.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct NotebookPatch {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present_or_absent")]
    pub description: Option<Option<String>>,
    pub generation_status: Option<GenerationStatus>,
    pub user_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
}

fn present_or_absent<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

impl NotebookPatch {
    /// True when the payload tries to touch the owning scope.
    pub fn touches_scope(&self) -> bool {
        self.user_id.is_some() || self.organization_id.is_some()
    }
}
