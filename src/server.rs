//! Server assembly and lifecycle.
//!
//! [`LiveServer::new`] does all fallible setup (reload snippet, watcher
//! subscription) before anything listens, so a broken watcher aborts startup
//! instead of leaving a server that silently never reloads.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::middleware;
use axum::routing::get;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::broadcast::Broadcaster;
use crate::client::reload_snippet;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::endpoint::{ReloadEndpoint, reload_socket};
use crate::error::{Error, Result};
use crate::inject::{Injector, inject_reload_script};
use crate::site::Site;
use crate::watcher::DirWatcher;

/// Build the HTTP surface: the reload route, and the static file service
/// behind the injection middleware for everything else.
pub fn build_router(
    site: &Site,
    config: &Config,
    broadcaster: Arc<Broadcaster>,
    snippet: String,
) -> Router {
    let injector = Arc::new(Injector::new(site.clone(), snippet));
    let endpoint = Arc::new(ReloadEndpoint::new(broadcaster, config.send_timeout()));

    let static_files = ServiceBuilder::new()
        .layer(middleware::from_fn_with_state(injector, inject_reload_script))
        .service(ServeDir::new(site.root()));

    Router::new()
        .route(&config.reload_path, get(reload_socket))
        .with_state(endpoint)
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured address.
pub async fn bind(config: &Config) -> Result<TcpListener> {
    let addr = config.bind_addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Bind(format!("bind failed on {addr}: {e}")))
}

/// A fully prepared server: watcher attached, router built.
pub struct LiveServer {
    router: Router,
    broadcaster: Arc<Broadcaster>,
    dispatcher: Dispatcher,
    watcher: DirWatcher,
}

impl LiveServer {
    pub fn new(site: Site, config: &Config) -> Result<Self> {
        let snippet = reload_snippet(&config.reload_path)?;
        let watcher = DirWatcher::new(site.root())?;
        info!(root = %site.root().display(), dirs = watcher.watched_dirs(), "watching for changes");

        let broadcaster = Arc::new(Broadcaster::new(config.client_buffer));
        let dispatcher = Dispatcher::new(Arc::clone(&broadcaster), config.debounce());
        let router = build_router(&site, config, Arc::clone(&broadcaster), snippet);

        Ok(Self { router, broadcaster, dispatcher, watcher })
    }

    /// Registry of connected reload clients.
    pub fn broadcaster(&self) -> Arc<Broadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Serve on `listener` until `shutdown` resolves.
    ///
    /// On shutdown every reload client is released so its socket closes, and
    /// the watch loop is stopped.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { router, broadcaster, dispatcher, watcher } = self;
        let watch_loop = tokio::spawn(dispatcher.run(watcher));

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let clients = broadcaster.close_all();
                info!(clients, "shutting down");
            })
            .await;

        watch_loop.abort();
        result.map_err(|e| Error::Serve(e.to_string()))
    }
}
