use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Claims {
    pub id: String, // user UUID
    pub email: String,
    pub full_name: Option<String>,
    /// Session identifier minted at login. The change feed holds one
    /// live subscription per session, keyed by this value.
    pub sid: String,
    pub exp: usize, // expiration (as UNIX timestamp)
}
