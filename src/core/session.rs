//! 传输会话 - 单连接上的重试、重连与心跳
//!
//! 连接句柄放在一把互斥锁后面：前台操作在整个重试过程中持有锁，
//! 心跳任务只用 `try_lock` 取锁，取不到就跳过本轮，因此两者不会在连接上交错。

use crate::config::{Credentials, SyncConfig};
use crate::core::path::normalize_path;
use crate::error::SyncError;
use crate::transport::{Endpoint, Transport, TransportError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// 会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Idle,
    Busy,
}

/// 经由重试执行的远端操作
enum RemoteOp<'a> {
    ChangeToRoot(&'a str),
    EnsureDir(&'a str),
    Upload { local: &'a Path, remote: &'a str },
    Download { remote: &'a str, local: &'a Path },
    CurrentDir,
}

impl RemoteOp<'_> {
    /// 只有 `CurrentDir` 返回内容
    async fn apply(&self, transport: &mut dyn Transport) -> Result<Option<String>, TransportError> {
        match self {
            RemoteOp::ChangeToRoot(base) => {
                transport.change_dir("/").await?;
                if !base.is_empty() {
                    transport.change_dir(base).await?;
                }
            }
            RemoteOp::EnsureDir(path) => transport.ensure_dir(path).await?,
            RemoteOp::Upload { local, remote } => transport.upload_from(local, remote).await?,
            RemoteOp::Download { remote, local } => transport.download_to(local, remote).await?,
            RemoteOp::CurrentDir => return transport.current_dir().await.map(Some),
        }
        Ok(None)
    }
}

impl fmt::Display for RemoteOp<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteOp::ChangeToRoot(base) => write!(f, "切换到根目录 /{}", base),
            RemoteOp::EnsureDir(path) => write!(f, "创建目录 {}", path),
            RemoteOp::Upload { remote, .. } => write!(f, "上传 {}", remote),
            RemoteOp::Download { remote, .. } => write!(f, "下载 {}", remote),
            RemoteOp::CurrentDir => write!(f, "获取当前目录"),
        }
    }
}

/// 传输会话
pub struct TransferSession {
    transport: SharedTransport,
    endpoint: Endpoint,
    credentials: Credentials,
    config: SyncConfig,
    state: SessionState,
    /// 重连后需要恢复的工作目录
    base_dir: Option<String>,
    heartbeat: Option<JoinHandle<()>>,
}

impl TransferSession {
    pub fn new(
        transport: Box<dyn Transport>,
        endpoint: Endpoint,
        credentials: Credentials,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            endpoint,
            credentials,
            config,
            state: SessionState::Disconnected,
            base_dir: None,
            heartbeat: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 建立连接，失败按固定间隔重试，耗尽后返回 `Connection` 错误
    pub async fn connect(&mut self) -> Result<(), SyncError> {
        self.stop_heartbeat();
        self.state = SessionState::Connecting;

        let transport = Arc::clone(&self.transport);
        let mut guard = transport.lock().await;
        let result =
            Self::establish(&mut **guard, &self.endpoint, &self.credentials, &self.config).await;
        drop(guard);

        match result {
            Ok(()) => {
                self.state = SessionState::Idle;
                self.start_heartbeat();
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(
        transport: &mut dyn Transport,
        endpoint: &Endpoint,
        credentials: &Credentials,
        config: &SyncConfig,
    ) -> Result<(), SyncError> {
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!("连接服务器 {} (第 {}/{} 次)...", endpoint, attempt, attempts);

            match transport.connect(endpoint, credentials).await {
                Ok(()) => {
                    info!("已连接: {}", transport.name());
                    return Ok(());
                }
                Err(e) => {
                    error!("连接失败 (第 {}/{} 次): {}", attempt, attempts, e);
                    if attempt >= attempts {
                        return Err(SyncError::Connection {
                            attempts,
                            source: e,
                        });
                    }
                    warn!("{}ms 后重试连接...", config.connect_retry_delay_ms);
                    tokio::time::sleep(config.connect_retry_delay()).await;
                    attempt += 1;
                }
            }
        }
    }

    /// 关闭旧连接后重新建立，并恢复工作目录
    async fn reconnect(&self, transport: &mut dyn Transport) -> Result<(), SyncError> {
        if let Err(e) = transport.close().await {
            debug!("关闭旧连接出错: {}", e);
        }

        Self::establish(transport, &self.endpoint, &self.credentials, &self.config).await?;

        if let Some(base) = &self.base_dir {
            RemoteOp::ChangeToRoot(base)
                .apply(transport)
                .await
                .map_err(|e| SyncError::Connection {
                    attempts: 1,
                    source: e,
                })?;
        }

        Ok(())
    }

    /// 在连接上执行操作
    ///
    /// 可恢复错误会等待、重连、再试，直到 `max_attempts`；
    /// 不可恢复错误直接返回。整个过程持有连接锁，期间心跳暂停。
    async fn with_retry(
        &mut self,
        op: RemoteOp<'_>,
        max_attempts: u32,
    ) -> Result<Option<String>, SyncError> {
        let max_attempts = max_attempts.max(1);
        let transport = Arc::clone(&self.transport);
        let mut guard = transport.lock().await;
        self.state = SessionState::Busy;

        let mut attempt = 1;
        let result = loop {
            match op.apply(&mut **guard).await {
                Ok(output) => break Ok(output),
                Err(e) if e.is_transient() => {
                    error!("{} 失败 (第 {}/{} 次): {}", op, attempt, max_attempts, e);
                    if attempt >= max_attempts {
                        error!("已达到最大重试次数: {}", op);
                        break Err(SyncError::Transient {
                            op: op.to_string(),
                            attempts: attempt,
                            source: e,
                        });
                    }

                    warn!("{}ms 后重新连接...", self.config.reconnect_delay_ms);
                    tokio::time::sleep(self.config.reconnect_delay()).await;
                    if let Err(e) = self.reconnect(&mut **guard).await {
                        break Err(e);
                    }
                    warn!("重试: {}", op);
                    attempt += 1;
                }
                Err(TransportError::Local { path, source }) => {
                    break Err(SyncError::Io { path, source });
                }
                Err(e) => {
                    break Err(SyncError::Permanent {
                        op: op.to_string(),
                        source: e,
                    });
                }
            }
        };
        drop(guard);

        if matches!(result, Err(SyncError::Connection { .. })) {
            self.state = SessionState::Disconnected;
            self.stop_heartbeat();
        } else {
            self.state = SessionState::Idle;
            // 心跳失败会自行退出，连接恢复后重新启动
            if !self.heartbeat_running() {
                self.start_heartbeat();
            }
        }

        result
    }

    pub async fn ensure_remote_dir(&mut self, path: &str) -> Result<(), SyncError> {
        let attempts = self.config.operation_attempts;
        self.with_retry(RemoteOp::EnsureDir(path), attempts).await?;
        Ok(())
    }

    pub async fn upload_file(&mut self, local: &Path, remote: &str) -> Result<(), SyncError> {
        let attempts = self.config.operation_attempts;
        self.with_retry(RemoteOp::Upload { local, remote }, attempts)
            .await?;
        Ok(())
    }

    pub async fn download_file(&mut self, remote: &str, local: &Path) -> Result<(), SyncError> {
        let attempts = self.config.operation_attempts;
        self.with_retry(RemoteOp::Download { remote, local }, attempts)
            .await?;
        Ok(())
    }

    /// 进入远端同步根目录，之后的相对路径都以此为基准
    pub async fn change_to_root(&mut self, base_dir: &str) -> Result<(), SyncError> {
        let base = normalize_path(base_dir).trim_end_matches('/').to_string();
        let attempts = self.config.operation_attempts;
        self.with_retry(RemoteOp::ChangeToRoot(&base), attempts)
            .await?;
        self.base_dir = Some(base);
        Ok(())
    }

    /// 当前远端工作目录
    pub async fn current_dir(&mut self) -> Result<String, SyncError> {
        let attempts = self.config.operation_attempts;
        let dir = self.with_retry(RemoteOp::CurrentDir, attempts).await?;
        Ok(dir.unwrap_or_else(|| "/".to_string()))
    }

    /// 断开连接，可重复调用，不返回错误
    pub async fn disconnect(&mut self) {
        self.stop_heartbeat();

        let transport = Arc::clone(&self.transport);
        let mut guard = transport.lock().await;
        if let Err(e) = guard.close().await {
            warn!("断开连接时出错: {}", e);
        }
        drop(guard);

        if self.state != SessionState::Disconnected {
            info!("已断开连接");
        }
        self.state = SessionState::Disconnected;
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();

        let interval = self.config.heartbeat_interval();
        if interval.is_zero() {
            return;
        }

        let transport = Arc::clone(&self.transport);
        self.heartbeat = Some(tokio::spawn(heartbeat_loop(transport, interval)));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
            debug!("心跳已停止");
        }
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}

async fn heartbeat_loop(transport: SharedTransport, interval: Duration) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        // 前台操作占用连接时跳过本轮
        let Ok(mut guard) = transport.try_lock() else {
            continue;
        };

        debug!("发送心跳...");
        if let Err(e) = guard.send_keep_alive().await {
            warn!("心跳失败，停止心跳: {}", e);
            break;
        }
    }
}
