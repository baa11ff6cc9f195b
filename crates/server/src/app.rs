//! Listener wiring and process lifecycle.
//!
//! Three listeners share one [`AppState`]: the management API (which also
//! carries the `/proxy` prefix route and `/health`), the agent WebSocket
//! endpoint, and the proxy front door. All state is constructed here and
//! passed down; nothing is a process global, so tests can run several
//! servers in one process.

use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use skyhook_common::{TunnelError, TunnelResult};
use skyhook_config::ServerConfig;

use crate::store::{self, ClientStore, RouteStore};
use crate::tunnel::TunnelManager;
use crate::{api, proxy, ws};

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub clients: ClientStore,
    pub routes: RouteStore,
    pub manager: TunnelManager,
    pub started_at: Instant,
}

/// Construct all collaborators from configuration.
pub fn build_state(config: ServerConfig) -> TunnelResult<AppState> {
    let config = Arc::new(config);
    let (clients, routes) = store::open(config.store_path.clone())?;
    let manager = TunnelManager::new(config.clone(), clients.clone(), routes.clone());
    Ok(AppState {
        config,
        clients,
        routes,
        manager,
        started_at: Instant::now(),
    })
}

/// Management API router: auth, CRUD, stats, health, `/proxy` prefix.
pub fn api_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/clients", get(api::list_clients).post(api::create_client))
        .route(
            "/clients/:id",
            get(api::get_client)
                .put(api::update_client)
                .delete(api::delete_client),
        )
        .route("/clients/:id/enable", post(api::enable_client))
        .route("/clients/:id/disable", post(api::disable_client))
        .route("/routes", get(api::list_routes).post(api::create_route))
        .route(
            "/routes/:id",
            get(api::get_route)
                .put(api::update_route)
                .delete(api::delete_route),
        )
        .route("/routes/:id/enable", post(api::enable_route))
        .route("/routes/:id/disable", post(api::disable_route))
        .route("/stats", get(api::stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::require_auth,
        ));

    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .route("/auth/login", post(api::login))
                .merge(authenticated),
        )
        .route("/health", get(api::health))
        .route("/proxy", any(proxy::handle_prefixed))
        .route("/proxy/*path", any(proxy::handle_prefixed))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Agent WebSocket router.
pub fn ws_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Proxy front-door router: every method, every path.
pub fn proxy_router(state: AppState) -> Router {
    Router::new()
        .fallback(proxy::handle_direct)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// A started server: three bound listeners plus the shared state.
pub struct RunningServer {
    pub api_addr: SocketAddr,
    pub ws_addr: SocketAddr,
    pub proxy_addr: SocketAddr,
    pub state: AppState,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

/// Bind all three listeners and start serving.
pub async fn serve(config: ServerConfig) -> TunnelResult<RunningServer> {
    if config.tls.enabled {
        // TLS termination is expected in front of the server; the listener
        // itself speaks plaintext.
        warn!("tls material configured; terminate TLS in front of skyhook and serve plaintext");
    }

    let state = build_state(config)?;
    let (shutdown, _) = watch::channel(false);
    let mut tasks = Vec::new();

    let api_addr = bind_and_spawn(
        &state.config.host,
        state.config.api_port,
        api_router(state.clone()),
        &shutdown,
        &mut tasks,
        "api",
    )
    .await?;
    let ws_addr = bind_and_spawn(
        &state.config.host,
        state.config.websocket_port,
        ws_router(state.clone()),
        &shutdown,
        &mut tasks,
        "websocket",
    )
    .await?;
    let proxy_addr = bind_and_spawn(
        &state.config.host,
        state.config.proxy_port,
        proxy_router(state.clone()),
        &shutdown,
        &mut tasks,
        "proxy",
    )
    .await?;

    info!(
        api = %api_addr,
        websocket = %ws_addr,
        proxy = %proxy_addr,
        "skyhook server listening"
    );

    Ok(RunningServer {
        api_addr,
        ws_addr,
        proxy_addr,
        state,
        shutdown,
        tasks,
    })
}

async fn bind_and_spawn(
    host: &str,
    port: u16,
    router: Router,
    shutdown: &watch::Sender<bool>,
    tasks: &mut Vec<JoinHandle<()>>,
    name: &'static str,
) -> TunnelResult<SocketAddr> {
    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| TunnelError::Config {
            message: format!("failed to bind {name} listener on {host}:{port}: {e}"),
        })?;
    let addr = listener.local_addr()?;

    let mut rx = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = rx.changed().await;
            })
            .await;
        if let Err(err) = result {
            warn!(listener = name, error = %err, "listener exited with error");
        }
    }));

    Ok(addr)
}

impl RunningServer {
    /// Graceful shutdown: stop accepting, tear down agent connections,
    /// wait for the listeners to exit.
    pub async fn shutdown(self) {
        info!("shutting down");
        let _ = self.shutdown.send(true);
        self.state.manager.shutdown().await;
        for task in self.tasks {
            let _ = task.await;
        }
        info!("shutdown complete");
    }
}
