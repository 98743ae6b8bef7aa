use std::sync::Arc;

use crate::config::Config;
use crate::services::subscription_router::SubscriptionRouter;
use crate::services::tenant_store::TenantStore;

#[derive(Clone)]
pub struct AppState {
    pub store: TenantStore,
    pub subscriptions: Arc<SubscriptionRouter>,
    pub config: Arc<Config>,
}
