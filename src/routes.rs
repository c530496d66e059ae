use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::accounts;
use crate::auth::middleware::JwtSecret;
use crate::chat::direct;
use crate::groups::routes as group_routes;
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on credential endpoints: 5 requests per minute per IP.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Background task cleaning up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let auth_routes = Router::new()
        .route("/api/auth/register", axum::routing::post(accounts::register))
        .route("/api/auth/login", axum::routing::post(accounts::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated API (Claims extractor validates the bearer token)
    let api_routes = Router::new()
        .route("/api/users", axum::routing::get(users::list_peers))
        // GET/POST take a peer id, DELETE takes a message id — one route
        // pattern, the Path extractor is positional.
        .route(
            "/api/messages/{id}",
            axum::routing::get(direct::get_direct_messages)
                .post(direct::send_direct_message)
                .delete(direct::delete_message),
        )
        .route(
            "/api/groups",
            axum::routing::post(group_routes::create_group)
                .get(group_routes::list_my_groups),
        )
        .route(
            "/api/groups/{id}/messages",
            axum::routing::get(group_routes::get_group_messages)
                .post(group_routes::send_group_message),
        )
        .route(
            "/api/groups/{id}/members",
            axum::routing::post(group_routes::add_member),
        )
        .route(
            "/api/groups/{id}/members/{user_id}",
            axum::routing::delete(group_routes::remove_member),
        )
        .route(
            "/api/groups/{id}/leave",
            axum::routing::post(group_routes::leave_group),
        )
        .route(
            "/api/groups/{id}",
            axum::routing::delete(group_routes::delete_group),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
