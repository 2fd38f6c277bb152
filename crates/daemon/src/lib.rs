//! 房间进程守护服务
//!
//! 通过 `GET /chatroomctrl?action=start|stop&roomid=<id>` 启停单个房间进程。

mod controller;
mod routes;

pub use controller::{ControlError, RoomController};
pub use routes::router;
