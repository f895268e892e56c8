//! 同步错误类型
//!
//! 按照处理方式划分：连接类错误终止整次运行，单个条目的错误只记录并进入重试队列。

use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// 连接重试耗尽
    #[error("连接服务器失败 (已尝试 {attempts} 次): {source}")]
    Connection {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// 可恢复错误，重连重试后依然失败
    #[error("{op} 失败 (已尝试 {attempts} 次): {source}")]
    Transient {
        op: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// 远端拒绝，不重试
    #[error("{op} 失败: {source}")]
    Permanent {
        op: String,
        #[source]
        source: TransportError,
    },

    #[error("本地文件读写失败 {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("状态文件解析失败 {}: {source}", path.display())]
    StateParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("配置无效: {0}")]
    Config(String),

    #[error("操作已取消")]
    Cancelled,
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    /// 是否需要终止整次运行
    ///
    /// 单个条目的失败（远端拒绝、重试耗尽、本地读文件失败）只影响该条目；
    /// 连接丢失、取消和配置错误则无法继续。
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Connection { .. } | SyncError::Cancelled | SyncError::Config(_)
        )
    }
}
