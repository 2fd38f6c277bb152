use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::controller::RoomController;

#[derive(Debug, Deserialize)]
struct ControlQuery {
    action: Option<String>,
    roomid: Option<String>,
}

type Reply = (StatusCode, Json<Value>);

pub fn router(controller: Arc<RoomController>) -> Router {
    Router::new()
        .route("/chatroomctrl", get(control))
        .fallback(no_such_method)
        .layer(TraceLayer::new_for_http())
        .with_state(controller)
}

async fn control(
    State(controller): State<Arc<RoomController>>,
    Query(query): Query<ControlQuery>,
) -> Reply {
    let action = query.action.filter(|action| !action.is_empty());
    let room_id = query.roomid.filter(|room_id| !room_id.is_empty());
    let (Some(action), Some(room_id)) = (action, room_id) else {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "invalid_params");
    };

    let result = match action.as_str() {
        "start" => controller.start(&room_id).await,
        "stop" => controller.stop(&room_id).await,
        _ => return error(StatusCode::INTERNAL_SERVER_ERROR, "invalid_request"),
    };

    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(err) => error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

async fn no_such_method() -> Reply {
    error(StatusCode::NOT_FOUND, "no such method")
}

fn error(status: StatusCode, message: &str) -> Reply {
    (status, Json(json!({ "status": "error", "error": message })))
}
