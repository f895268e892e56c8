//! 同步引擎
//!
//! 一次运行的完整流程：连接 → 进入远端根目录 → 扫描本地并保存本地状态 →
//! 下载远端状态 → 比较 → 创建目录、上传文件（带检查点和轮次重试）→ 提交远端状态 → 断开。

use crate::config::{DeployConfig, SyncConfig};
use crate::core::checkpoint::Checkpoint;
use crate::core::path::{normalize_path, ExcludeRules};
use crate::core::scanner::LocalScanner;
use crate::core::session::TransferSession;
use crate::core::state::{diff, StateEntry, StateStore};
use crate::error::SyncError;
use crate::transport::Transport;
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 运行结果
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Completed,
    /// 部分条目在所有重试轮次后仍失败
    PartiallyCompleted,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    File,
}

/// 最终失败的条目
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub kind: ItemKind,
    pub path: String,
    pub error: String,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub start_time: i64,
    pub end_time: i64,
    /// 毫秒
    pub duration: u64,
    pub status: SyncStatus,
    pub entries_scanned: usize,
    pub folders_planned: usize,
    pub files_planned: usize,
    pub folders_created: usize,
    pub files_uploaded: usize,
    pub failed: Vec<FailedItem>,
    pub state_committed: bool,
    /// 导致运行终止的错误
    pub error: Option<String>,
}

impl SyncReport {
    fn started() -> Self {
        Self {
            start_time: chrono::Utc::now().timestamp_millis(),
            end_time: 0,
            duration: 0,
            status: SyncStatus::Failed,
            entries_scanned: 0,
            folders_planned: 0,
            files_planned: 0,
            folders_created: 0,
            files_uploaded: 0,
            failed: Vec::new(),
            state_committed: false,
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            SyncStatus::Completed | SyncStatus::PartiallyCompleted
        )
    }
}

/// 同步引擎
pub struct SyncEngine {
    deploy: DeployConfig,
    config: SyncConfig,
    session: TransferSession,
    store: StateStore,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(deploy: DeployConfig, config: SyncConfig, transport: Box<dyn Transport>) -> Self {
        let session = TransferSession::new(
            transport,
            deploy.endpoint.clone(),
            deploy.credentials.clone(),
            config.clone(),
        );
        let store = StateStore::new(deploy.local_dir.clone(), deploy.state_name.clone());

        Self {
            deploy,
            config,
            session,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// 远端状态的临时文件目录，默认为系统临时目录
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store = self.store.with_scratch_dir(dir);
        self
    }

    /// 断开连接；用于 `run` 被中途丢弃之后
    pub async fn disconnect(&mut self) {
        self.session.disconnect().await;
    }

    /// 执行一次同步，无论成败都会断开连接
    pub async fn run(&mut self) -> SyncReport {
        let mut report = SyncReport::started();
        info!(
            "开始同步: {} -> {}/{}",
            self.deploy.local_dir.display(),
            self.deploy.endpoint,
            normalize_path(&self.deploy.remote_dir)
        );

        let result = self.execute(&mut report).await;
        self.session.disconnect().await;

        report.status = match result {
            Err(SyncError::Cancelled) => {
                warn!("同步已取消");
                report.error = Some(SyncError::Cancelled.to_string());
                SyncStatus::Cancelled
            }
            Err(e) => {
                error!("同步失败: {}", e);
                report.error = Some(e.to_string());
                SyncStatus::Failed
            }
            Ok(()) if !report.state_committed => {
                report.error = Some("远端状态提交失败".to_string());
                SyncStatus::Failed
            }
            Ok(()) if !report.failed.is_empty() => SyncStatus::PartiallyCompleted,
            Ok(()) => SyncStatus::Completed,
        };

        report.end_time = chrono::Utc::now().timestamp_millis();
        report.duration = (report.end_time - report.start_time).max(0) as u64;
        report
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn execute(&mut self, report: &mut SyncReport) -> Result<(), SyncError> {
        // 配置问题在连接前暴露
        let rules = ExcludeRules::parse(&self.deploy.exclude)
            .map_err(|e| SyncError::Config(format!("排除规则无效: {}", e)))?;
        if !self.deploy.local_dir.is_dir() {
            return Err(SyncError::Config(format!(
                "本地目录不存在: {}",
                self.deploy.local_dir.display()
            )));
        }
        self.check_cancelled()?;

        self.session.connect().await?;
        self.check_cancelled()?;

        let remote_root = normalize_path(&self.deploy.remote_dir)
            .trim_end_matches('/')
            .to_string();
        if !remote_root.is_empty() {
            self.session.ensure_remote_dir(&remote_root).await?;
        }
        self.session.change_to_root(&remote_root).await?;
        self.check_cancelled()?;

        // 扫描在阻塞线程池中进行
        let scanner = LocalScanner::new(
            self.deploy.local_dir.clone(),
            self.deploy.state_name.clone(),
            rules,
        );
        let cancel = self.cancel.clone();
        let entries = tokio::task::spawn_blocking(move || scanner.scan_with_cancel(&cancel))
            .await
            .map_err(|e| SyncError::io(&self.deploy.local_dir, std::io::Error::other(e)))??;
        report.entries_scanned = entries.len();

        let local = self.store.compute_local(entries);
        self.store.write_local(&local)?;
        let local = self.store.read_local()?;
        self.check_cancelled()?;

        let remote = self.store.load_remote(&mut self.session).await?;
        let plan = diff(&local, &remote);
        report.folders_planned = plan.folders.len();
        report.files_planned = plan.files.len();
        info!(
            "需要创建 {} 个目录, 上传 {} 个文件 (本地 {} 个条目, 远端 {} 个条目)",
            plan.folders.len(),
            plan.files.len(),
            local.data.len(),
            remote.data.len()
        );

        let mut checkpoint = Checkpoint::new(&remote, self.config.flush_threshold);
        self.process_items(plan.folders, ItemKind::Folder, &mut checkpoint, report)
            .await?;
        self.process_items(plan.files, ItemKind::File, &mut checkpoint, report)
            .await?;

        // 提交：上次的远端状态加上本次成功的条目
        match self
            .store
            .checkpoint(&checkpoint.to_state(), &mut self.session)
            .await
        {
            Ok(()) => {
                info!("远端状态已更新: {} 个条目", checkpoint.len());
                report.state_committed = true;
            }
            Err(e) => error!("上传远端状态失败: {}", e),
        }

        Ok(())
    }

    /// 先逐个执行一遍，失败的条目进入重试队列，最多再重试 `retry_rounds` 轮
    async fn process_items(
        &mut self,
        items: Vec<StateEntry>,
        kind: ItemKind,
        checkpoint: &mut Checkpoint,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        let mut pending: Vec<(StateEntry, String)> =
            items.into_iter().map(|e| (e, String::new())).collect();

        for round in 0..=self.config.retry_rounds {
            if pending.is_empty() {
                break;
            }
            if round > 0 {
                warn!("第 {} 轮重试: {} 个条目", round, pending.len());
            }

            let mut failed = Vec::new();
            for (entry, _) in pending {
                self.check_cancelled()?;

                match self.apply(&entry).await {
                    Ok(()) => {
                        match kind {
                            ItemKind::Folder => report.folders_created += 1,
                            ItemKind::File => report.files_uploaded += 1,
                        }
                        if checkpoint.record(entry) {
                            self.flush(checkpoint).await?;
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        error!("{} 处理失败: {}", entry.path(), e);
                        failed.push((entry, e.to_string()));
                    }
                }
            }
            pending = failed;
        }

        for (entry, error) in pending {
            error!("放弃: {} ({})", entry.path(), error);
            report.failed.push(FailedItem {
                kind,
                path: entry.path().to_string(),
                error,
            });
        }

        Ok(())
    }

    async fn apply(&mut self, entry: &StateEntry) -> Result<(), SyncError> {
        match entry {
            StateEntry::Folder { path } => {
                debug!("创建目录: {}", path);
                self.session.ensure_remote_dir(path).await
            }
            StateEntry::File { path, .. } => {
                let local = self.deploy.local_dir.join(path);
                debug!("上传文件: {}", path);
                self.session.upload_file(&local, path).await
            }
        }
    }

    /// 刷写检查点，失败只记录日志
    async fn flush(&mut self, checkpoint: &Checkpoint) -> Result<(), SyncError> {
        debug!("刷写检查点: 已完成 {} 个操作", checkpoint.recorded());
        match self
            .store
            .checkpoint(&checkpoint.to_state(), &mut self.session)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("刷写检查点失败: {}", e);
                Ok(())
            }
        }
    }
}
