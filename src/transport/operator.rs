use super::{resolve_path, Endpoint, ErrorKind, Scheme, Transport, TransportError};
use crate::config::Credentials;
use async_trait::async_trait;
use opendal::Operator;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

/// 基于 opendal 的传输实现
///
/// opendal 的路径相对于操作器根目录，这里额外维护一个工作目录，
/// 使相对路径的语义与 FTP 客户端一致。
pub struct OperatorTransport {
    timeout: Duration,
    operator: Option<Operator>,
    cwd: String,
    name: String,
}

impl OperatorTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            operator: None,
            cwd: String::new(),
            name: "opendal:未连接".to_string(),
        }
    }

    fn operator(&self) -> Result<&Operator, TransportError> {
        self.operator.as_ref().ok_or(TransportError::Closed)
    }

    fn resolve(&self, path: &str) -> String {
        resolve_path(&self.cwd, path)
    }
}

/// opendal 错误分类
///
/// 网络层失败在 opendal 中表现为 `Unexpected`，与临时错误一起按可重试处理。
fn remote_error(op: &str, path: &str, err: opendal::Error) -> TransportError {
    let kind = match err.kind() {
        opendal::ErrorKind::NotFound => ErrorKind::NotFound,
        opendal::ErrorKind::RateLimited | opendal::ErrorKind::Unexpected => ErrorKind::Transient,
        _ if err.is_temporary() => ErrorKind::Transient,
        _ => ErrorKind::Permanent,
    };

    TransportError::Remote {
        kind,
        message: format!("{} /{}: {}", op, path, err),
    }
}

#[async_trait]
impl Transport for OperatorTransport {
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<(), TransportError> {
        self.operator = None;

        let operator = match endpoint.scheme {
            Scheme::Ftp | Scheme::Ftps => super::ftp::build(endpoint, credentials, self.timeout),
            Scheme::WebDav | Scheme::WebDavs => {
                super::webdav::build(endpoint, credentials, self.timeout)
            }
            Scheme::File => super::local::build(endpoint),
        }
        .map_err(|e| remote_error("初始化", "", e))?;

        // opendal 懒连接，这里主动探测一次
        operator
            .check()
            .await
            .map_err(|e| remote_error("连接", "", e))?;

        self.operator = Some(operator);
        self.cwd = String::new();
        self.name = endpoint.to_string();
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> Result<(), TransportError> {
        let target = self.resolve(path);

        if !target.is_empty() {
            let meta = self
                .operator()?
                .stat(&format!("{}/", target))
                .await
                .map_err(|e| remote_error("切换目录", &target, e))?;
            if !meta.is_dir() {
                return Err(TransportError::permanent(format!("不是目录: /{}", target)));
            }
        }

        self.cwd = target;
        Ok(())
    }

    async fn current_dir(&mut self) -> Result<String, TransportError> {
        self.operator()?;
        Ok(format!("/{}", self.cwd))
    }

    async fn ensure_dir(&mut self, path: &str) -> Result<(), TransportError> {
        let target = self.resolve(path);
        let operator = self.operator()?;

        // 逐级创建，部分服务器不支持一次创建多级目录
        let mut current = String::new();
        for part in target.split('/').filter(|s| !s.is_empty()) {
            current.push_str(part);
            current.push('/');
            match operator.create_dir(&current).await {
                Ok(()) => {}
                Err(e) if e.kind() == opendal::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(remote_error("创建目录", &current, e)),
            }
        }

        Ok(())
    }

    async fn upload_from(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let target = self.resolve(remote);
        let operator = self.operator()?;

        let data = fs::read(local).await.map_err(|e| TransportError::Local {
            path: local.to_path_buf(),
            source: e,
        })?;
        let size = data.len();

        operator
            .write(&target, data)
            .await
            .map_err(|e| remote_error("上传", &target, e))?;

        debug!("上传完成: {} -> /{} ({}字节)", local.display(), target, size);
        Ok(())
    }

    async fn download_to(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let target = self.resolve(remote);

        let data = self
            .operator()?
            .read(&target)
            .await
            .map_err(|e| remote_error("下载", &target, e))?;

        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::Local {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        fs::write(local, data.to_vec())
            .await
            .map_err(|e| TransportError::Local {
                path: local.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    async fn send_keep_alive(&mut self) -> Result<(), TransportError> {
        self.operator()?
            .check()
            .await
            .map_err(|e| remote_error("保活", "", e))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.operator = None;
        self.cwd = String::new();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_endpoint(root: &Path) -> Endpoint {
        Endpoint::parse(&format!("file://{}", root.display())).unwrap()
    }

    #[tokio::test]
    async fn test_closed_transport_is_transient() {
        let mut t = OperatorTransport::new(Duration::from_secs(5));
        let err = t.ensure_dir("a").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fs_roundtrip() {
        let remote = tempdir().unwrap();
        let local = tempdir().unwrap();
        let src = local.path().join("x.txt");
        std::fs::write(&src, b"hello").unwrap();

        let mut t = OperatorTransport::new(Duration::from_secs(5));
        t.connect(&file_endpoint(remote.path()), &Credentials::default())
            .await
            .unwrap();

        t.ensure_dir("site/a").await.unwrap();
        t.ensure_dir("site/a").await.unwrap();
        t.change_dir("/site").await.unwrap();
        assert_eq!(t.current_dir().await.unwrap(), "/site");

        t.upload_from(&src, "a/x.txt").await.unwrap();
        assert_eq!(
            std::fs::read(remote.path().join("site/a/x.txt")).unwrap(),
            b"hello"
        );

        let back = local.path().join("back/x.txt");
        t.download_to(&back, "a/x.txt").await.unwrap();
        assert_eq!(std::fs::read(&back).unwrap(), b"hello");

        let missing = t.download_to(&back, "nope.json").await.unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        t.close().await.unwrap();
        assert!(t.send_keep_alive().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_is_permanent() {
        let remote = tempdir().unwrap();
        let mut t = OperatorTransport::new(Duration::from_secs(5));
        t.connect(&file_endpoint(remote.path()), &Credentials::default())
            .await
            .unwrap();

        let err = t
            .upload_from(Path::new("/definitely/not/here.txt"), "x.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Local { .. }));
        assert!(!err.is_transient());
    }
}
