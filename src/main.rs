use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use harbor_server::chat::store::ConversationStore;
use harbor_server::config::{generate_config_template, Config};
use harbor_server::groups::registry::GroupRegistry;
use harbor_server::presence::PresenceTracker;
use harbor_server::state::AppState;
use harbor_server::{auth, db, fanout, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "harbor_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "harbor_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("HARBOR server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Wire up the core components: registry and store over the shared DB,
    // presence tracking, and the fanout dispatcher task over both.
    let groups = Arc::new(GroupRegistry::new(db.clone()));
    let store = Arc::new(ConversationStore::new(db.clone()));
    let presence = Arc::new(PresenceTracker::new());
    let fanout = fanout::spawn_dispatcher(groups.clone(), presence.clone());

    let app_state = AppState {
        db,
        jwt_secret,
        groups,
        store,
        presence,
        fanout,
    };

    let app = routes::build_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
