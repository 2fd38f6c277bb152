//! 统一配置中心
//!
//! 提供房间进程的全局配置管理，包括：
//! - 监听地址与连接上限
//! - 房间标识与历史消息存储
//! - 会话心跳与事件准入规则
//! - 外部成员校验接口
//! - 运维守护进程
//!
//! 加载优先级：内置默认值 -> `ROOM_CONFIG_FILE` 指向的文件 -> `ROOM_` 前缀环境变量。

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    /// 监听配置
    #[validate(nested)]
    pub server: ServerConfig,
    /// 房间配置
    #[validate(nested)]
    pub room: RoomConfig,
    /// 会话配置
    #[validate(nested)]
    pub session: SessionConfig,
    /// 成员校验接口配置
    #[validate(nested)]
    pub membership: MembershipConfig,
    /// Redis配置
    #[serde(default)]
    pub redis: RedisConfig,
    /// 运维守护进程配置
    #[validate(nested)]
    pub daemon: DaemonConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 同时在线的会话上限
    #[validate(range(min = 1))]
    pub max_connections: usize,
}

/// 房间配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RoomConfig {
    /// 本进程服务的房间 ID
    #[validate(length(min = 1))]
    pub id: String,
    /// 聊天应用挂载的路径，同时也是广播频道
    #[validate(length(min = 1))]
    pub path: String,
    /// 历史消息文档的存储键，缺省按房间 ID 生成
    #[serde(default)]
    pub history_key: Option<String>,
    /// 内存历史消息上限
    #[validate(range(min = 1))]
    pub history_capacity: usize,
}

impl RoomConfig {
    pub fn history_key(&self) -> String {
        self.history_key
            .clone()
            .unwrap_or_else(|| format!("chatroom:{}:history", self.id))
    }
}

/// 会话配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    #[validate(range(min = 1))]
    pub heartbeat_interval_ms: u64,
    #[validate(range(min = 1))]
    pub pong_timeout_ms: u64,
    /// 事件名 -> 准入上限（0 表示不限），未列出的事件一律拒绝
    pub event_rules: BTreeMap<String, u32>,
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }
}

/// 成员校验接口配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MembershipConfig {
    #[validate(length(min = 1))]
    pub api_host: String,
    pub verify_path: String,
    #[validate(range(min = 1))]
    pub timeout_ms: u64,
}

impl MembershipConfig {
    pub fn verify_url(&self) -> String {
        format!(
            "{}/{}",
            self.api_host.trim_end_matches('/'),
            self.verify_path.trim_start_matches('/')
        )
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Redis配置
///
/// 未配置 `url` 时房间使用进程内文档存储。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default)]
    pub url: Option<String>,
}

/// 运维守护进程配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DaemonConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 启动房间进程的命令模板，`{roomid}` 会被替换
    #[validate(length(min = 1))]
    pub start_command: String,
    /// 停止房间进程的命令模板
    #[validate(length(min = 1))]
    pub stop_command: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 60000,
                max_connections: 500,
            },
            room: RoomConfig {
                id: String::new(),
                path: "/chat".into(),
                history_key: None,
                history_capacity: 500,
            },
            session: SessionConfig {
                heartbeat_interval_ms: 1000,
                pong_timeout_ms: 5000,
                event_rules: BTreeMap::from([("init".to_owned(), 1), ("send".to_owned(), 5)]),
            },
            membership: MembershipConfig {
                api_host: "http://127.0.0.1:8080".into(),
                verify_path: "/api/wsv2_0/user_chatroom_verify".into(),
                timeout_ms: 5000,
            },
            redis: RedisConfig::default(),
            daemon: DaemonConfig {
                host: "0.0.0.0".into(),
                port: 60001,
                start_command: "systemctl start chatroom-{roomid}.service".into(),
                stop_command: "systemctl stop chatroom-{roomid}.service".into(),
            },
        }
    }
}

impl AppConfig {
    /// 按优先级加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let cfg = Self::load_unchecked()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 守护进程只关心 `daemon` 段，不要求房间 ID
    pub fn load_daemon() -> Result<Self, ConfigError> {
        let cfg = Self::load_unchecked()?;
        cfg.daemon.validate()?;
        Ok(cfg)
    }

    fn load_unchecked() -> Result<Self, ConfigError> {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = env::var("ROOM_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("ROOM_").split("__"));

        let mut cfg = Self::from_figment(fig)?;
        cfg.apply_legacy_env()?;
        Ok(cfg)
    }

    /// 从给定的 figment 提取配置（不做校验）
    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        fig.extract().map_err(|err| ConfigError::Load(Box::new(err)))
    }

    /// 兼容旧部署方式的环境变量：`CHATROOMID` 与 `PORT`
    fn apply_legacy_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(id) = env::var("CHATROOMID") {
            self.room.id = id;
        }
        if let Ok(port) = env::var("PORT") {
            self.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
                key: "PORT".into(),
                reason: format!("not a port number: {port}"),
            })?;
        }
        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_require_room_id() {
        let config = AppConfig::default();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.room.id = "1001".into();
        assert!(config.validate().is_ok());
        assert_eq!(config.room.history_key(), "chatroom:1001:history");
        assert_eq!(config.session.event_rules.get("init"), Some(&1));
    }

    #[test]
    fn load_merges_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "room.toml",
                r#"
                [room]
                id = "from-file"

                [session.event_rules]
                init = 1
                send = 0
                "#,
            )?;
            jail.set_env("ROOM_CONFIG_FILE", "room.toml");
            jail.set_env("ROOM_SERVER__MAX_CONNECTIONS", "3");

            let config = AppConfig::load().map_err(|err| err.to_string())?;
            assert_eq!(config.room.id, "from-file");
            assert_eq!(config.server.max_connections, 3);
            assert_eq!(config.session.event_rules.get("send"), Some(&0));
            Ok(())
        });
    }

    #[test]
    fn legacy_env_overrides_room_and_port() {
        Jail::expect_with(|jail| {
            jail.set_env("CHATROOMID", "77");
            jail.set_env("PORT", "61000");

            let config = AppConfig::load().map_err(|err| err.to_string())?;
            assert_eq!(config.room.id, "77");
            assert_eq!(config.server.port, 61000);
            Ok(())
        });
    }

    #[test]
    fn invalid_legacy_port_is_rejected() {
        Jail::expect_with(|jail| {
            jail.set_env("CHATROOMID", "77");
            jail.set_env("PORT", "not-a-port");

            let err = AppConfig::load().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
            Ok(())
        });
    }

    #[test]
    fn daemon_loads_without_room_id() {
        Jail::expect_with(|jail| {
            jail.set_env("ROOM_DAEMON__PORT", "61001");

            assert!(AppConfig::load().is_err());
            let config = AppConfig::load_daemon().map_err(|err| err.to_string())?;
            assert_eq!(config.daemon.port, 61001);
            Ok(())
        });
    }

    #[test]
    fn verify_url_joins_host_and_path() {
        let mut membership = AppConfig::default().membership;
        membership.api_host = "http://api.example.com/".into();
        assert_eq!(
            membership.verify_url(),
            "http://api.example.com/api/wsv2_0/user_chatroom_verify"
        );
    }
}
