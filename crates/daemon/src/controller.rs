use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use config::DaemonConfig;
use thiserror::Error;
use tokio::process::Command;
use tracing::{info, warn};

const ROOM_PLACEHOLDER: &str = "{roomid}";

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("command template is empty")]
    EmptyCommand,
    #[error("failed to run `{command}`: {reason}")]
    Spawn { command: String, reason: String },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// 执行启停命令并记录由本守护进程启动的房间
pub struct RoomController {
    start_command: String,
    stop_command: String,
    rooms: Mutex<BTreeSet<String>>,
}

impl RoomController {
    pub fn new(config: &DaemonConfig) -> Self {
        Self::with_commands(config.start_command.clone(), config.stop_command.clone())
    }

    pub fn with_commands(start_command: impl Into<String>, stop_command: impl Into<String>) -> Self {
        Self {
            start_command: start_command.into(),
            stop_command: stop_command.into(),
            rooms: Mutex::new(BTreeSet::new()),
        }
    }

    pub async fn start(&self, room_id: &str) -> Result<(), ControlError> {
        run(&self.start_command, room_id).await?;
        self.lock().insert(room_id.to_owned());
        info!(room_id = %room_id, "room started");
        Ok(())
    }

    pub async fn stop(&self, room_id: &str) -> Result<(), ControlError> {
        run(&self.stop_command, room_id).await?;
        self.lock().remove(room_id);
        info!(room_id = %room_id, "room stopped");
        Ok(())
    }

    /// 当前记录为运行中的房间
    pub fn running(&self) -> Vec<String> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 按空白切分模板并逐段替换房间 ID，不经过 shell
fn render(template: &str, room_id: &str) -> Vec<String> {
    template
        .split_whitespace()
        .map(|part| part.replace(ROOM_PLACEHOLDER, room_id))
        .collect()
}

async fn run(template: &str, room_id: &str) -> Result<(), ControlError> {
    let parts = render(template, room_id);
    let (program, args) = parts.split_first().ok_or(ControlError::EmptyCommand)?;
    let command = parts.join(" ");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|err| ControlError::Spawn {
            command: command.clone(),
            reason: err.to_string(),
        })?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    warn!(command = %command, status = %output.status, stderr = %stderr, "room command failed");
    Err(ControlError::Failed {
        command,
        status: output.status.to_string(),
        stderr,
    })
}
