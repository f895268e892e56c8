//! 同步状态文档
//!
//! 记录已同步的目录和文件指纹。本地状态每次运行重新生成，
//! 远端状态在运行开始时下载一次，结束时整体替换。

use crate::core::session::TransferSession;
use crate::error::SyncError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 当前状态文档版本
pub const STATE_VERSION: &str = "1.0.0";

const STATE_DESCRIPTION: &str = "State for tracking uploaded files and folders";

/// 状态条目，只有文件携带指纹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StateEntry {
    Folder { path: String },
    File { path: String, hash: String },
}

impl StateEntry {
    pub fn folder(path: impl Into<String>) -> Self {
        StateEntry::Folder { path: path.into() }
    }

    pub fn file(path: impl Into<String>, hash: impl Into<String>) -> Self {
        StateEntry::File {
            path: path.into(),
            hash: hash.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            StateEntry::Folder { path } | StateEntry::File { path, .. } => path,
        }
    }

    pub fn hash(&self) -> Option<&str> {
        match self {
            StateEntry::Folder { .. } => None,
            StateEntry::File { hash, .. } => Some(hash),
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, StateEntry::Folder { .. })
    }
}

/// 状态文档
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub description: String,
    pub version: String,
    /// 生成时间（毫秒时间戳）
    pub generated_time: i64,
    #[serde(default)]
    pub data: Vec<StateEntry>,
}

impl SyncState {
    pub fn new(data: Vec<StateEntry>) -> Self {
        Self {
            description: STATE_DESCRIPTION.to_string(),
            version: STATE_VERSION.to_string(),
            generated_time: chrono::Utc::now().timestamp_millis(),
            data,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 本次需要执行的操作
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadPlan {
    pub folders: Vec<StateEntry>,
    pub files: Vec<StateEntry>,
}

impl UploadPlan {
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty() && self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.folders.len() + self.files.len()
    }
}

/// 比较本地与远端状态，得到需要创建的目录和需要上传的文件
///
/// 只增不删：远端独有的条目保持不变。结果保持本地条目的顺序。
pub fn diff(local: &SyncState, remote: &SyncState) -> UploadPlan {
    let known: HashMap<&str, &StateEntry> =
        remote.data.iter().map(|e| (e.path(), e)).collect();

    let mut plan = UploadPlan::default();

    for entry in &local.data {
        let existing = known.get(entry.path());
        match entry {
            StateEntry::Folder { path } => {
                if !existing.is_some_and(|e| e.is_folder()) {
                    debug!("需要创建目录: {}", path);
                    plan.folders.push(entry.clone());
                }
            }
            StateEntry::File { path, hash } => {
                let unchanged = existing.and_then(|e| e.hash()) == Some(hash.as_str());
                if !unchanged {
                    debug!("需要上传文件: {}", path);
                    plan.files.push(entry.clone());
                }
            }
        }
    }

    plan
}

/// 本地写状态文件时使用的临时文件名
pub(crate) fn temp_state_name(state_name: &str) -> String {
    format!("{}.tmp", state_name)
}

/// 状态文件本身（及其临时文件）不参与同步
pub(crate) fn is_state_file(name: &str, state_name: &str) -> bool {
    name == state_name || name == temp_state_name(state_name)
}

/// 状态存取
pub struct StateStore {
    local_root: PathBuf,
    state_name: String,
    scratch_dir: PathBuf,
    run_id: Uuid,
}

impl StateStore {
    pub fn new(local_root: impl Into<PathBuf>, state_name: impl Into<String>) -> Self {
        Self {
            local_root: local_root.into(),
            state_name: state_name.into(),
            scratch_dir: std::env::temp_dir(),
            run_id: Uuid::new_v4(),
        }
    }

    /// 指定下载/上传远端状态时使用的临时目录
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    pub fn local_path(&self) -> PathBuf {
        self.local_root.join(&self.state_name)
    }

    fn scratch_file(&self, tag: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("deploysync-{}-{}.json", self.run_id, tag))
    }

    pub fn compute_local(&self, entries: Vec<StateEntry>) -> SyncState {
        SyncState::new(entries)
    }

    /// 写入本地状态文件：先删除旧文件，再写临时文件并重命名
    pub fn write_local(&self, state: &SyncState) -> Result<(), SyncError> {
        let path = self.local_path();

        if path.exists() {
            info!("删除旧的本地状态文件: {}", path.display());
            if let Err(e) = fs::remove_file(&path) {
                warn!("删除旧的本地状态文件失败: {}", e);
            }
        }

        let tmp = self.local_root.join(temp_state_name(&self.state_name));
        let content =
            serde_json::to_vec_pretty(state).map_err(|e| SyncError::io(&tmp, e.into()))?;
        fs::write(&tmp, content).map_err(|e| SyncError::io(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| SyncError::io(&path, e))?;

        info!("本地状态已保存: {} 个条目", state.data.len());
        Ok(())
    }

    pub fn read_local(&self) -> Result<SyncState, SyncError> {
        let path = self.local_path();
        read_state_file(&path)
    }

    /// 下载远端状态，不存在或无法解析时返回空状态
    ///
    /// 只有连接彻底丢失时返回错误。
    pub async fn load_remote(&self, session: &mut TransferSession) -> Result<SyncState, SyncError> {
        let scratch = self.scratch_file("remote");
        let _cleanup = scopeguard::guard(scratch.clone(), |p| {
            let _ = fs::remove_file(p);
        });

        debug!("下载远端状态: {}", self.state_name);
        match session.download_file(&self.state_name, &scratch).await {
            Ok(()) => {}
            Err(e) if matches!(e, SyncError::Connection { .. }) => return Err(e),
            Err(e) => {
                info!("远端状态不存在或无法读取，按空状态处理: {}", e);
                return Ok(SyncState::empty());
            }
        }

        match read_state_file(&scratch) {
            Ok(state) if state.version == STATE_VERSION => {
                info!("远端状态已加载: {} 个条目", state.data.len());
                Ok(state)
            }
            Ok(state) => {
                warn!("远端状态版本不受支持 ({})，按空状态处理", state.version);
                Ok(SyncState::empty())
            }
            Err(e) => {
                warn!("远端状态无法解析，按空状态处理: {}", e);
                Ok(SyncState::empty())
            }
        }
    }

    /// 把状态上传到远端状态文件位置
    pub async fn checkpoint(
        &self,
        state: &SyncState,
        session: &mut TransferSession,
    ) -> Result<(), SyncError> {
        let scratch = self.scratch_file("checkpoint");
        let _cleanup = scopeguard::guard(scratch.clone(), |p| {
            let _ = fs::remove_file(p);
        });

        let content =
            serde_json::to_vec_pretty(state).map_err(|e| SyncError::io(&scratch, e.into()))?;
        fs::write(&scratch, content).map_err(|e| SyncError::io(&scratch, e))?;

        session.upload_file(&scratch, &self.state_name).await?;
        debug!("状态已上传: {} 个条目", state.data.len());
        Ok(())
    }
}

fn read_state_file(path: &Path) -> Result<SyncState, SyncError> {
    let content = fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    serde_json::from_str(&content).map_err(|e| SyncError::StateParse {
        path: path.to_path_buf(),
        source: e,
    })
}
