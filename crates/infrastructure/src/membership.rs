//! HTTP 成员校验
//!
//! `GET {api_host}{verify_path}?cid=..&cpassword=..&uid=..`，应答为
//! `{status: "ok", user: {...}}` 或 `{status: <error>, error_code?}`。

use application::membership::{Credentials, MembershipVerifier, Verification, VerifyReply};
use application::ApplicationError;
use async_trait::async_trait;
use config::MembershipConfig;
use tracing::debug;

pub struct HttpMembershipVerifier {
    client: reqwest::Client,
    url: String,
}

impl HttpMembershipVerifier {
    pub fn new(config: &MembershipConfig) -> Result<Self, ApplicationError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|err| ApplicationError::infrastructure(format!("http client: {err}")))?;
        Ok(Self {
            client,
            url: config.verify_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl MembershipVerifier for HttpMembershipVerifier {
    async fn verify(&self, credentials: &Credentials) -> Result<Verification, ApplicationError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[
                ("cid", credentials.room_id.as_str()),
                ("cpassword", credentials.credential.as_str()),
                ("uid", credentials.user_id.as_str()),
            ])
            .send()
            .await
            .map_err(|err| ApplicationError::infrastructure(format!("verify request failed: {err}")))?;

        let status = response.status();
        let reply: VerifyReply = response.json().await.map_err(|err| {
            ApplicationError::infrastructure(format!("verify reply unreadable (HTTP {status}): {err}"))
        })?;
        debug!(user_id = %credentials.user_id, status = %reply.status, "membership verified");
        reply.into_verification()
    }
}
