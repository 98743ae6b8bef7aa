pub mod notebook;
pub mod organization;
pub mod user;
