//! WebSocket transport for shell clients.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use remote_shell_core::Backend;
use remote_shell_session::ShellEngine;
use tokio::{sync::mpsc, task::JoinSet};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    dispatch::dispatch,
    protocol::{ClientMessage, ClientRequest, ServerMessage, ServerReply},
};

/// WebSocket handler state.
pub struct WsState<B>
where
    B: Backend,
{
    /// Engine every connection dispatches onto.
    pub engine: Arc<ShellEngine<B>>,
}

impl<B> WsState<B>
where
    B: Backend,
{
    /// Create new WebSocket state.
    #[must_use]
    pub const fn new(engine: Arc<ShellEngine<B>>) -> Self {
        Self { engine }
    }
}

impl<B> Clone for WsState<B>
where
    B: Backend,
{
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler<B>(ws: WebSocketUpgrade, State(state): State<WsState<B>>) -> impl IntoResponse
where
    B: Backend + 'static,
{
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket<B>(socket: WebSocket, state: WsState<B>)
where
    B: Backend + 'static,
{
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending replies to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerReply>();

    let send_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let json = match reply.to_json() {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("{e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Requests run concurrently: a receive may wait for data for a long time.
    let mut requests = JoinSet::new();

    while let Some(msg) = receiver.next().await {
        while requests.try_join_next().is_some() {}

        let text = match msg {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!("WebSocket error: {e}");
                break;
            }
        };

        let request = match ClientRequest::parse(&text) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("{e}");
                let _ = tx.send(ServerReply::new(
                    None,
                    ServerMessage::Error {
                        kind: remote_shell_core::ErrorKind::InvalidParameter,
                        message: e.to_string(),
                    },
                ));
                continue;
            }
        };

        let ClientRequest {
            request_id,
            message,
        } = request;

        if message == ClientMessage::Ping {
            let _ = tx.send(ServerReply::new(request_id, ServerMessage::Pong));
            continue;
        }

        let engine = Arc::clone(&state.engine);
        let tx = tx.clone();
        requests.spawn(async move {
            let reply = dispatch(&engine, message).await;
            let _ = tx.send(ServerReply::new(request_id, reply));
        });
    }

    // Dropping in-flight receives frees their pending slots.
    requests.abort_all();
    send_task.abort();
    tracing::info!("WebSocket client disconnected");
}

/// Create WebSocket router serving `/ws`.
///
/// # Example
/// ```ignore
/// let engine = Arc::new(ShellEngine::new(EchoBackend::new()));
/// let app = Router::new().merge(create_ws_router(engine));
/// ```
#[must_use]
pub fn create_ws_router<B>(engine: Arc<ShellEngine<B>>) -> Router
where
    B: Backend + 'static,
{
    Router::new()
        .route("/ws", get(ws_handler::<B>))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(WsState::new(engine))
}
