pub mod change_notifier;
pub mod subscription_router;
pub mod tenant_store;
