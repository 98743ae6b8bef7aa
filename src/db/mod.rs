pub mod memory;
pub mod notebook_repository;
pub mod organization_repository;
pub mod postgres_notebook_repository;
pub mod postgres_organization_repository;
pub mod postgres_user_repository;
pub mod user_repository;
