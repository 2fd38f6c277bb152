use domain::DomainError;
use thiserror::Error;

use crate::admission::AdmissionError;
use crate::history::HistoryError;
use crate::registry::RegistryError;
use crate::store::StoreError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("history error: {0}")]
    History(#[from] HistoryError),
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("admission error: {0}")]
    Admission(#[from] AdmissionError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl ApplicationError {
    /// 创建配置错误
    pub fn config(message: impl Into<String>) -> Self {
        ApplicationError::Config(message.into())
    }

    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure(message.into())
    }
}
