// LakeSync HTTP gateway server.
// Configuration comes from the environment; see ServerConfig below.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lakesync_gateway::{FlushFormat, GatewayConfig, SyncGateway};
use lakesync_server::{router, ServerState};
use lakesync_store::{LocalFsObjectStore, MemoryObjectStore, ObjectStore};

struct ServerConfig {
    gateway_id: String,
    jwt_secret: String,
    data_dir: Option<String>,
    flush_format: FlushFormat,
    port: u16,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            gateway_id: std::env::var("LAKESYNC_GATEWAY_ID").unwrap_or_else(|_| "default".into()),
            jwt_secret: std::env::var("LAKESYNC_JWT_SECRET")
                .unwrap_or_else(|_| "lakesync-dev-secret-change-me".into()),
            data_dir: std::env::var("LAKESYNC_DATA_DIR").ok(),
            flush_format: match std::env::var("LAKESYNC_FLUSH_FORMAT").as_deref() {
                Ok("parquet") => FlushFormat::Parquet,
                _ => FlushFormat::Json,
            },
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lakesync=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();

    let object_store: Arc<dyn ObjectStore> = match &config.data_dir {
        Some(dir) => match LocalFsObjectStore::new(dir) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::error!(dir = %dir, error = %e, "cannot open data directory");
                std::process::exit(1);
            }
        },
        None => Arc::new(MemoryObjectStore::new()),
    };

    let gateway = SyncGateway::new(
        GatewayConfig::new(config.gateway_id.clone()).with_flush_format(config.flush_format),
        object_store,
    );

    let state = ServerState::new(config.jwt_secret.as_bytes());
    state.register_gateway(gateway);

    let app = router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!(addr = %addr, gateway = %config.gateway_id, "LakeSync server listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "cannot bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "server exited with error");
    }
}
