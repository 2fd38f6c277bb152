//! Web API 层。
//!
//! 提供 Axum 路由：每个已挂载应用的路径上接受 WebSocket 升级，
//! 并把 socket 适配为应用层的 `Transport`。

mod routes;
mod state;
mod transport;

pub use routes::router;
pub use state::AppState;
pub use transport::WsTransport;
