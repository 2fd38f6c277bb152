use std::sync::Arc;

use application::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    /// 本进程服务的房间 ID，用于健康检查
    pub room_id: String,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, room_id: impl Into<String>) -> Self {
        Self {
            registry,
            room_id: room_id.into(),
        }
    }
}
