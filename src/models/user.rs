use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Identity rows are owned by the external identity provider; this service
/// only ever reads the fields it joins into member listings.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
}
