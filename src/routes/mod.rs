pub mod auth;
pub mod events;
pub mod notebooks;
pub mod organizations;
