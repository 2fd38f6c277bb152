//! 房间成员校验
//!
//! 外部接口根据房间 ID、房间口令和用户 ID 判断用户能否进入房间，
//! 成功时返回用户身份。

use async_trait::async_trait;
use domain::{Author, UserId};
use serde::Deserialize;

use crate::error::ApplicationError;

/// 校验所需的连接凭据，来自连接查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub room_id: String,
    pub credential: String,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Accepted(Author),
    Rejected { error_code: Option<String> },
}

/// 校验接口的应答体
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyReply {
    pub status: String,
    #[serde(default)]
    pub user: Option<VerifiedUser>,
    #[serde(default)]
    pub error_code: Option<String>,
}

/// 应答中的用户信息，缺少显示名时回退为用户 ID
#[derive(Debug, Clone, Deserialize)]
pub struct VerifiedUser {
    #[serde(alias = "uid")]
    pub id: UserId,
    #[serde(default, rename = "displayName", alias = "nickname")]
    pub display_name: Option<String>,
}

impl VerifyReply {
    pub fn into_verification(self) -> Result<Verification, ApplicationError> {
        if self.status != "ok" {
            return Ok(Verification::Rejected {
                error_code: self.error_code.filter(|code| !code.is_empty()),
            });
        }
        let user = self.user.ok_or_else(|| {
            ApplicationError::infrastructure("verification succeeded without user identity")
        })?;
        let display_name = user
            .display_name
            .unwrap_or_else(|| user.id.as_str().to_owned());
        Ok(Verification::Accepted(Author::new(user.id, display_name)))
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipVerifier: Send + Sync {
    async fn verify(&self, credentials: &Credentials) -> Result<Verification, ApplicationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_reply_becomes_author() {
        let reply: VerifyReply = serde_json::from_value(json!({
            "status": "ok",
            "user": {"id": 42, "displayName": "alice"}
        }))
        .unwrap();
        assert_eq!(
            reply.into_verification().unwrap(),
            Verification::Accepted(Author::new(UserId::from("42"), "alice"))
        );
    }

    #[test]
    fn missing_display_name_falls_back_to_id() {
        let reply: VerifyReply =
            serde_json::from_value(json!({"status": "ok", "user": {"uid": "9"}})).unwrap();
        assert_eq!(
            reply.into_verification().unwrap(),
            Verification::Accepted(Author::new(UserId::from("9"), "9"))
        );
    }

    #[test]
    fn error_reply_keeps_code() {
        let reply: VerifyReply =
            serde_json::from_value(json!({"status": "error", "error_code": "wrong_password"})).unwrap();
        assert_eq!(
            reply.into_verification().unwrap(),
            Verification::Rejected {
                error_code: Some("wrong_password".into())
            }
        );

        let reply: VerifyReply = serde_json::from_value(json!({"status": "denied"})).unwrap();
        assert_eq!(
            reply.into_verification().unwrap(),
            Verification::Rejected { error_code: None }
        );
    }

    #[test]
    fn ok_without_user_is_an_error() {
        let reply: VerifyReply = serde_json::from_value(json!({"status": "ok"})).unwrap();
        assert!(reply.into_verification().is_err());
    }
}
