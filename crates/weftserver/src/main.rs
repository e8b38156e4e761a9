mod session;

use actix_cors::Cors;
use actix_web::{get, web, App, HttpResponse, HttpServer, Responder, Result as ActixResult};
use session::SessionManager;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weftcore::NodeSchema;
use weftruntime::{
    Engine, EngineConfig, IsolationConfig, NodeRegistry, RemoteCache, SchedulerBridge,
};

/// Application state shared across handlers
pub struct AppState {
    pub engine: Arc<Engine>,
    pub bridge: Arc<SchedulerBridge>,
    pub sessions: Arc<SessionManager>,
    /// When set, session jobs run inside worker child processes.
    pub isolation: Option<IsolationConfig>,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "weft"
    }))
}

/// List registered node types with their full schemas
#[get("/api/nodes")]
async fn list_nodes(data: web::Data<AppState>) -> ActixResult<impl Responder> {
    let registry = data.engine.registry();
    let nodes: Vec<NodeSchema> = registry
        .list_node_types()
        .iter()
        .filter_map(|node_type| registry.schema(node_type))
        .collect();
    Ok(HttpResponse::Ok().json(nodes))
}

/// WebSocket endpoint for job sessions
#[get("/ws")]
async fn websocket_session(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    session::run_session(req, stream, data).await
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("🚀 Starting Weft Server");

    let mut registry = NodeRegistry::new();
    weftnodes::register_all(&mut registry);

    let engine = Engine::with_registry(Arc::new(registry), EngineConfig::default());
    let engine = match std::env::var("WEFT_REMOTE_CACHE") {
        Ok(url) if !url.is_empty() => {
            info!("Using remote result cache at {}", url);
            engine.with_cache(Arc::new(RemoteCache::new(url)))
        }
        _ => engine,
    };

    let isolation = match std::env::var("WEFT_WORKER") {
        Ok(program) if !program.is_empty() => {
            info!("Isolation mode: jobs run under worker {}", program);
            Some(IsolationConfig::new(program))
        }
        _ => None,
    };

    let mut bridge = SchedulerBridge::new();
    bridge.start()?;
    let bridge = Arc::new(bridge);

    let sessions = Arc::new(SessionManager::new());
    sessions.start();

    info!("✅ Runtime initialized with standard nodes");

    let app_state = web::Data::new(AppState {
        engine: Arc::new(engine),
        bridge,
        sessions: sessions.clone(),
        isolation,
    });

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .service(health_check)
            .service(list_nodes)
            .service(websocket_session)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    sessions.stop().await;

    Ok(())
}
