//! 房间服务核心领域模型
//!
//! 包含线路帧、消息作者、历史消息条目和序列号等值类型，以及相关的校验规则。

pub mod errors;
pub mod frame;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use frame::*;
pub use message::*;
pub use value_objects::*;
