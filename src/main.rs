mod authz;
mod config;
mod db;
mod error;
mod models;
mod responses;
mod routes;
mod services;
mod state;
pub mod utils;

use std::{net::SocketAddr, sync::Arc};

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use config::Config;
use db::notebook_repository::NotebookRepository;
use db::organization_repository::OrganizationRepository;
use db::postgres_notebook_repository::PostgresNotebookRepository;
use db::postgres_organization_repository::PostgresOrganizationRepository;
use db::postgres_user_repository::PostgresUserRepository;
use db::user_repository::UserRepository;
use responses::JsonResponse;
use routes::events::subscribe_events;
use routes::notebooks::{
    add_source, create_notebook, delete_notebook, get_notebook, list_notebooks, remove_source,
    update_notebook,
};
use routes::organizations::{
    add_member, create_organization, delete_organization, list_members, list_organizations,
    remove_member, update_member_role, update_organization,
};
use services::change_notifier::ChangeNotifier;
use services::subscription_router::SubscriptionRouter;
use services::tenant_store::TenantStore;
use state::AppState;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let rate_limit_ms: u64 = std::env::var("RATE_LIMITER_MILLISECONDS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        // Default: 200ms/token (~5 req/sec)
        .unwrap_or(200);
    let rate_limit_burst: u32 = std::env::var("RATE_LIMITER_BURST")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        // Default: allow short bursts during client polling
        .unwrap_or(20);
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_millisecond(rate_limit_ms)
            .burst_size(rate_limit_burst)
            .use_headers()
            .error_handler(|_err| {
                JsonResponse::too_many_requests(
                    "Too many requests. Please wait a moment and try again.",
                )
                .into_response()
            })
            .finish()
            .unwrap(),
    );

    // Background task to cleanup old IPs
    let governor_limiter = governor_conf.limiter().clone();
    std::thread::spawn(move || {
        let interval = std::time::Duration::from_secs(60);
        loop {
            std::thread::sleep(interval);
            governor_limiter.retain_recent();
        }
    });

    let config = Config::from_env();
    utils::jwt::init();

    let pg_pool = establish_connection(&config.database_url).await;
    let user_repo = Arc::new(PostgresUserRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn UserRepository>;
    let organization_repo = Arc::new(PostgresOrganizationRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn OrganizationRepository>;
    let notebook_repo = Arc::new(PostgresNotebookRepository {
        pool: pg_pool.clone(),
    }) as Arc<dyn NotebookRepository>;

    let notifier = Arc::new(ChangeNotifier::new());
    let store = TenantStore::new(
        notebook_repo,
        organization_repo.clone(),
        user_repo,
        notifier.clone(),
    );
    let subscriptions = Arc::new(SubscriptionRouter::new(organization_repo, notifier));

    let state = AppState {
        store,
        subscriptions,
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(
            state
                .config
                .frontend_origin
                .parse::<HeaderValue>()
                .unwrap(),
        )
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    let notebook_routes = Router::new()
        .route("/", get(list_notebooks).post(create_notebook))
        .route(
            "/{notebook_id}",
            get(get_notebook)
                .put(update_notebook)
                .delete(delete_notebook),
        )
        .route("/{notebook_id}/sources", axum::routing::post(add_source))
        .route(
            "/{notebook_id}/sources/{source_id}",
            axum::routing::delete(remove_source),
        );

    let organization_routes = Router::new()
        .route("/", get(list_organizations).post(create_organization))
        .route(
            "/{organization_id}",
            axum::routing::put(update_organization).delete(delete_organization),
        )
        .route(
            "/{organization_id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/{organization_id}/members/{member_id}",
            axum::routing::put(update_member_role).delete(remove_member),
        );

    let app = Router::new()
        .route("/", get(root))
        .nest("/api/notebooks", notebook_routes)
        .nest("/api/organizations", organization_routes)
        .route("/api/events", get(subscribe_events))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer {
            config: governor_conf,
        })
        .layer(cors);

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = SocketAddr::from(([127, 0, 0, 1], 3000));

    let listener = TcpListener::bind(addr).await.unwrap();
    println!("Running at http://{}", addr);
    axum::serve(listener, make_service).await.unwrap();
}

/// A simple root route.
async fn root() -> Response {
    JsonResponse::success("Hello, Notebase!").into_response()
}

/// Establish a connection to the database and verify it.
async fn establish_connection(database_url: &str) -> PgPool {
    let pool = PgPool::connect(database_url)
        .await
        .expect("Failed to connect to the database");

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .expect("Failed to verify database connection");

    info!("Successfully connected to the database");
    pool
}
