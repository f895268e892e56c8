//! 运行配置
//!
//! `DeployConfig` 描述一次部署的输入（由命令行层构造），
//! `SyncConfig` 是重试、保活、刷写等调优参数，可从配置文件的 `"sync"` 段读取。

use crate::transport::Endpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 默认状态文件名
pub const DEFAULT_STATE_NAME: &str = ".deploy-sync-state.json";

/// 默认连接超时（毫秒）
pub const DEFAULT_TIMEOUT_MS: u64 = 3_600_000;

/// 登录凭据
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// 密码不进日志
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// 部署配置
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub endpoint: Endpoint,
    pub credentials: Credentials,
    /// 本地同步根目录
    pub local_dir: PathBuf,
    /// 远端同步根目录（相对服务器根目录）
    pub remote_dir: String,
    pub state_name: String,
    /// 排除规则，每行一条
    pub exclude: String,
    pub timeout: Duration,
}

impl DeployConfig {
    pub fn new(endpoint: Endpoint, local_dir: impl Into<PathBuf>, remote_dir: &str) -> Self {
        Self {
            endpoint,
            credentials: Credentials::default(),
            local_dir: local_dir.into(),
            remote_dir: remote_dir.to_string(),
            state_name: DEFAULT_STATE_NAME.to_string(),
            exclude: String::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// 同步调优参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 建立连接的最大尝试次数
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// 连接失败后的等待（毫秒）
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    /// 单个远端操作的最大尝试次数（含重连）
    #[serde(default = "default_operation_attempts")]
    pub operation_attempts: u32,
    /// 重连前的等待（毫秒）
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// 心跳间隔（毫秒），0 表示关闭心跳
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// 每完成多少个操作刷写一次检查点
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
    /// 失败条目的重试轮数
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,
}

fn default_connect_attempts() -> u32 {
    3
}

fn default_connect_retry_delay_ms() -> u64 {
    3000
}

fn default_operation_attempts() -> u32 {
    4
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_flush_threshold() -> usize {
    5
}

fn default_retry_rounds() -> u32 {
    3
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            operation_attempts: default_operation_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            flush_threshold: default_flush_threshold(),
            retry_rounds: default_retry_rounds(),
        }
    }
}

impl SyncConfig {
    /// 从配置文件加载，文件不存在或内容无效时使用默认值
    pub fn load(config_file: &Path) -> Self {
        read_section(config_file, "sync").unwrap_or_default()
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

/// 读取配置文件中的某一段
pub(crate) fn read_section<T: serde::de::DeserializeOwned>(
    config_file: &Path,
    key: &str,
) -> Option<T> {
    let content = fs::read_to_string(config_file).ok()?;
    let config: serde_json::Value = serde_json::from_str(&content).ok()?;
    let section = config.get(key)?;
    match serde_json::from_value::<T>(section.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("配置段 \"{}\" 无效，使用默认值: {}", key, e);
            None
        }
    }
}
