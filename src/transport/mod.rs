pub mod ftp;
pub mod local;
pub mod operator;
pub mod webdav;

use crate::config::{Credentials, DeployConfig};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use operator::OperatorTransport;

/// 传输错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 连接断开、被重置等，重连后可重试
    Transient,
    /// 远端路径不存在
    NotFound,
    /// 权限、参数等错误，重试无意义
    Permanent,
}

/// 传输层错误
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("连接已关闭")]
    Closed,

    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    #[error("本地文件 {}: {source}", path.display())]
    Local {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub fn transient(message: impl Into<String>) -> Self {
        TransportError::Remote {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        TransportError::Remote {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        TransportError::Remote {
            kind: ErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Closed => ErrorKind::Transient,
            TransportError::Remote { kind, .. } => *kind,
            TransportError::Local { .. } => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

/// 连接协议
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Ftp,
    Ftps,
    WebDav,
    WebDavs,
    File,
}

/// 服务器地址
///
/// 形如 `ftps://host:21/base`，未写协议时按 `ftps` 处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    /// host[:port]，本地目录时为空
    pub host: String,
    /// 远端根路径，以 `/` 开头
    pub root: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("服务器地址不能为空".to_string());
        }

        let (scheme, rest) = match raw.split_once("://") {
            Some((s, rest)) => {
                let scheme = match s.to_lowercase().as_str() {
                    "ftp" => Scheme::Ftp,
                    "ftps" => Scheme::Ftps,
                    "webdav" | "http" => Scheme::WebDav,
                    "webdavs" | "https" => Scheme::WebDavs,
                    "file" => Scheme::File,
                    other => return Err(format!("不支持的协议: {}", other)),
                };
                (scheme, rest)
            }
            None => (Scheme::Ftps, raw),
        };

        if scheme == Scheme::File {
            if rest.is_empty() {
                return Err("本地目标路径不能为空".to_string());
            }
            return Ok(Self {
                scheme,
                host: String::new(),
                root: rest.to_string(),
            });
        }

        let (host, root) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };
        if host.is_empty() {
            return Err(format!("服务器地址缺少主机名: {}", raw));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            root: root.to_string(),
        })
    }

    /// 传给底层客户端的地址
    pub fn url(&self) -> String {
        match self.scheme {
            Scheme::Ftp => format!("ftp://{}", self.host),
            Scheme::Ftps => format!("ftps://{}", self.host),
            Scheme::WebDav => format!("http://{}", self.host),
            Scheme::WebDavs => format!("https://{}", self.host),
            Scheme::File => self.root.clone(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::File => write!(f, "file://{}", self.root),
            _ => write!(f, "{}{}", self.url(), self.root.trim_end_matches('/')),
        }
    }
}

/// 远端传输能力
///
/// 同步核心只依赖这些语义。实现不需要支持并发调用，
/// 会话层保证同一时刻只有一个操作在连接上执行。
#[async_trait]
pub trait Transport: Send {
    /// 建立连接，已有连接时替换
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<(), TransportError>;

    /// 切换工作目录，`/` 开头为绝对路径
    async fn change_dir(&mut self, path: &str) -> Result<(), TransportError>;

    async fn current_dir(&mut self) -> Result<String, TransportError>;

    /// 递归创建目录，已存在时不报错
    async fn ensure_dir(&mut self, path: &str) -> Result<(), TransportError>;

    async fn upload_from(&mut self, local: &Path, remote: &str) -> Result<(), TransportError>;

    async fn download_to(&mut self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// 空闲保活
    async fn send_keep_alive(&mut self) -> Result<(), TransportError>;

    async fn close(&mut self) -> Result<(), TransportError>;

    /// 用于日志
    fn name(&self) -> &str;
}

/// 根据配置创建传输实例
pub fn create_transport(config: &DeployConfig) -> Box<dyn Transport> {
    tracing::info!("初始化传输: {}", config.endpoint);
    Box::new(OperatorTransport::new(config.timeout))
}

/// 以 `cwd` 为基准解析远端路径，返回不带前导 `/` 的路径（空串表示根目录）
pub fn resolve_path(cwd: &str, path: &str) -> String {
    let mut parts: Vec<&str> = if path.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).collect()
    };

    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    parts.join("/")
}
