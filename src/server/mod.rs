//! HTTP + WebSocket host for the module views.
//!
//! Views are static files served from the application directory under
//! `/views`. Each loaded view opens `/ws` and exchanges the channel frames
//! from [`crate::ipc`] with the [`MessageRouter`].

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::{
    extract::{Request, State, WebSocketUpgrade},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::config::{ShellConfig, APP_CONFIG_FILE};
use crate::error::Error;
use crate::ipc::{MessageRouter, ServerMessage};
use crate::pipeline::{Pipeline, ViewHost, ViewHostError};
use crate::subprocess::SubprocessManager;

/// URL prefix the view files are served under
pub const VIEWS_PREFIX: &str = "/views";

/// Extensions served next to the views, besides the views themselves
const ASSET_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "map", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff",
    "woff2", "ttf",
];

/// Whether `path` (relative to the app dir) may be served to a view.
///
/// Views and static assets only; the stage directory, the transfer file and
/// the shell's own config stay private.
fn is_servable(config: &ShellConfig, path: &str) -> bool {
    let path = path.trim_start_matches('/');
    let relative = std::path::Path::new(path);

    if path.is_empty() || path.split('/').any(|part| part == "..") {
        return false;
    }
    if relative.starts_with(&config.stage_dir)
        || relative == config.transfer_file
        || relative == std::path::Path::new(APP_CONFIG_FILE)
    {
        return false;
    }

    let Some(file_name) = relative.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    let is_view = file_name
        .strip_prefix(config.view_prefix.as_str())
        .and_then(|rest| rest.strip_suffix(config.view_extension.as_str()))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|index| !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()));

    is_view
        || relative
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

async fn guard_views(
    State(config): State<Arc<ShellConfig>>,
    request: Request,
    next: Next,
) -> Response {
    if is_servable(&config, request.uri().path()) {
        next.run(request).await
    } else {
        debug!("Refusing to serve {}", request.uri().path());
        StatusCode::NOT_FOUND.into_response()
    }
}

/// View host that tells every connected view to load the next module
#[derive(Clone)]
pub struct BroadcastViewHost {
    events: broadcast::Sender<ServerMessage>,
}

impl BroadcastViewHost {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }
}

impl ViewHost for BroadcastViewHost {
    fn load_view(&self, module: usize, file_name: &str) -> Result<(), ViewHostError> {
        let url = format!("{}/{}", VIEWS_PREFIX, file_name);
        match self.events.send(ServerMessage::Navigate(url)) {
            Ok(receivers) => debug!("Asked {} view(s) to load module {}", receivers, module),
            Err(_) => debug!("No view connected while loading module {}", module),
        }
        Ok(())
    }
}

pub struct ShellServer {
    config: Arc<ShellConfig>,
    router: MessageRouter,
    host: BroadcastViewHost,
}

impl ShellServer {
    pub fn new(config: ShellConfig, subprocess: SubprocessManager) -> Self {
        let config = Arc::new(config);
        let host = BroadcastViewHost::new(16);
        let pipeline = Pipeline::new(Arc::clone(&config), subprocess, Arc::new(host.clone()));

        Self {
            config,
            router: MessageRouter::new(Arc::new(pipeline)),
            host,
        }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        self.router.pipeline()
    }

    pub fn app(self: &Arc<Self>) -> Router {
        let first_view = format!("{}/{}", VIEWS_PREFIX, self.config.view_file_name(0));
        let views = Router::new()
            .fallback_service(ServeDir::new(&self.config.app_dir))
            .layer(middleware::from_fn_with_state(
                Arc::clone(&self.config),
                guard_views,
            ));

        Router::new()
            .route(
                "/",
                get(move || {
                    let target = first_view.clone();
                    async move { Redirect::temporary(&target) }
                }),
            )
            .route("/api/state", get(state_endpoint))
            .route("/ws", get(websocket_handler))
            .nest(VIEWS_PREFIX, views)
            .layer(CorsLayer::permissive())
            .with_state(Arc::clone(self))
    }

    /// Serve on an already bound listener until the server stops
    pub async fn serve_on(self: Arc<Self>, listener: TcpListener) -> crate::Result<()> {
        let app = self.app();
        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Server(format!("server stopped: {e}")))
    }

    pub async fn start(self: Arc<Self>) -> crate::Result<()> {
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Server(format!("failed to bind {addr}: {e}")))?;
        info!(
            "Pipeline shell available at http://{}/ (app dir: {})",
            listener.local_addr()?,
            self.config.app_dir.display()
        );
        self.serve_on(listener).await
    }
}

async fn state_endpoint(State(server): State<Arc<ShellServer>>) -> Response {
    Json(server.pipeline().snapshot().await).into_response()
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(server): State<Arc<ShellServer>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(socket: WebSocket, server: Arc<ShellServer>) {
    let (mut sender, mut receiver) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut events = server.host.subscribe();

    debug!("View connected");

    let writer = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                Some(message) = reply_rx.recv() => message,
                event = events.recv() => match event {
                    Ok(message) => message,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("View lagged behind by {} navigation events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                else => break,
            };

            let text = match message.encode() {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {:?}: {}", message, e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => server.router.handle_text(text.as_str(), &reply_tx).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    debug!("View disconnected");
    writer.abort();
}
