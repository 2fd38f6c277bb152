use std::collections::HashMap;
use std::sync::Arc;

use application::{Connection, Transport};
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        MatchedPath, Query, State,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::{state::AppState, transport::WsTransport};

/// 为注册表中每个已挂载的应用生成一条 WebSocket 路由，外加 `/health`
pub fn router(state: AppState) -> Router {
    let mut router = Router::new().route("/health", get(health));
    for path in state.registry.routes() {
        router = router.route(path, get(websocket_upgrade));
    }
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "room": state.room_id,
        "sessions": state.registry.len(),
    }))
}

async fn websocket_upgrade(
    State(state): State<AppState>,
    path: MatchedPath,
    Query(query): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let path = path.as_str().to_owned();
    ws.on_upgrade(move |socket| websocket_handler(socket, state, path, query))
}

async fn websocket_handler(
    socket: WebSocket,
    state: AppState,
    path: String,
    query: HashMap<String, String>,
) {
    let (sender, mut incoming) = socket.split();
    let transport = Arc::new(WsTransport::new(sender));

    let connection = match state
        .registry
        .accept(transport.clone() as Arc<dyn Transport>, &path, query)
        .await
    {
        Ok(connection) => connection,
        Err(err) => {
            warn!(path = %path, error = %err, "websocket connection refused");
            transport.close().await;
            return;
        }
    };

    while let Some(message) = incoming.next().await {
        match message {
            Ok(WsMessage::Text(text)) => connection.receive(text.as_str()).await,
            Ok(WsMessage::Pong(_)) => connection.pong(),
            Ok(WsMessage::Close(_)) => break,
            // ping 由底层自动应答
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Binary(_)) => {}
            Err(err) => {
                debug!(session_id = %connection.session().id(), error = %err, "websocket read failed");
                break;
            }
        }
        if !connection.is_current() {
            break;
        }
    }

    finish(connection).await;
}

async fn finish(connection: Connection) {
    debug!(
        session_id = %connection.session().id(),
        current = connection.is_current(),
        "websocket reader finished"
    );
    connection.closed().await;
}
