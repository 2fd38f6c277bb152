//! 基础设施层实现。
//!
//! 提供 RedisJSON 文档存储与 HTTP 成员校验两个适配器，实现应用层定义的接口。

pub mod membership;
pub mod redis_store;

pub use membership::HttpMembershipVerifier;
pub use redis_store::RedisJsonStore;
