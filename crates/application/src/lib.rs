//! 应用层实现。
//!
//! 会话协议（准入控制、出站队列、心跳、断线重连）、会话注册与广播、
//! 聊天室业务以及有界历史日志都在这里；传输连接、文档存储与成员校验
//! 以 trait 的形式抽象，由 infrastructure / web-api 层提供实现。

pub mod admission;
pub mod chat;
pub mod clock;
pub mod error;
pub mod history;
pub mod membership;
pub mod registry;
pub mod request;
pub mod retry;
pub mod routing;
pub mod sequencer;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use admission::{AdmissionCap, AdmissionError};
pub use chat::{ChatRoom, ChatRoomDependencies};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::ApplicationError;
pub use history::{HistoryError, HistoryStore};
pub use membership::{Credentials, MembershipVerifier, Verification, VerifyReply};
pub use registry::{Registry, RegistryError, RegistrySettings};
pub use request::Request;
pub use retry::{retry_async, Backoff, RetryConfig};
pub use routing::{Endpoint, EventTable};
pub use sequencer::MessageSequencer;
pub use session::{Connection, Session, SessionSettings};
pub use store::{memory::MemoryDocumentStore, DocumentShape, DocumentStore, StoreError};
pub use transport::{Transport, TransportError};
