//! 测试用内存远端：记录事件、注入故障

use crate::config::{Credentials, SyncConfig, DEFAULT_STATE_NAME};
use crate::transport::{resolve_path, Endpoint, ErrorKind, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect,
    Close,
    KeepAlive,
    OpStart(String),
    OpEnd(String),
}

#[derive(Default)]
struct RemoteState {
    connected: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    events: Vec<Event>,
    connect_attempts: usize,
    fail_connects: u32,
    faults: HashMap<String, (u32, ErrorKind)>,
    keep_alive_failures: u32,
    /// 条目上传次数达到该值后远端整体不可用
    die_after_uploads: Option<usize>,
    item_uploads: usize,
    dead: bool,
}

impl RemoteState {
    fn take_fault(&mut self, path: &str) -> Option<TransportError> {
        let (left, kind) = self.faults.get_mut(path)?;
        if *left == 0 {
            return None;
        }
        *left -= 1;
        let message = format!("注入故障: /{}", path);
        Some(match kind {
            ErrorKind::Transient => TransportError::transient(message),
            ErrorKind::NotFound => TransportError::not_found(message),
            ErrorKind::Permanent => TransportError::permanent(message),
        })
    }

    fn parent_exists(&self, path: &str) -> bool {
        match path.rsplit_once('/') {
            Some((parent, _)) => self.dirs.contains(parent),
            None => true,
        }
    }
}

/// 共享的内存远端，多个传输实例可以指向同一个远端
#[derive(Clone, Default)]
pub struct Remote(Arc<Mutex<RemoteState>>);

impl Remote {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut RemoteState) -> R) -> R {
        let mut state = self.0.lock().unwrap();
        f(&mut state)
    }

    pub fn transport(&self) -> Box<dyn Transport> {
        self.slow_transport(Duration::ZERO)
    }

    /// 每个操作执行期间等待 `delay`
    pub fn slow_transport(&self, delay: Duration) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            remote: self.clone(),
            cwd: String::new(),
            delay,
        })
    }

    pub fn fail_connects(&self, times: u32) {
        self.with(|s| s.fail_connects = times);
    }

    /// 对某个路径（相对远端根目录）的后续 `times` 次操作返回指定错误
    pub fn fail_path(&self, path: &str, times: u32, kind: ErrorKind) {
        self.with(|s| {
            s.faults.insert(path.to_string(), (times, kind));
        });
    }

    pub fn fail_keep_alive(&self) {
        self.with(|s| s.keep_alive_failures = 1);
    }

    /// 模拟进程中途失联：完成 `n` 次条目上传后，远端不再响应（状态文件上传不计数）
    pub fn die_after_uploads(&self, n: usize) {
        self.with(|s| {
            s.die_after_uploads = Some(n);
            s.item_uploads = 0;
        });
    }

    pub fn revive(&self) {
        self.with(|s| {
            s.dead = false;
            s.die_after_uploads = None;
        });
    }

    pub fn put_file(&self, path: &str, content: &[u8]) {
        self.with(|s| {
            s.files.insert(path.to_string(), content.to_vec());
        });
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.with(|s| s.dirs.contains(path))
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.with(|s| s.files.get(path).cloned())
    }

    pub fn file_names(&self) -> Vec<String> {
        self.with(|s| s.files.keys().cloned().collect())
    }

    pub fn events(&self) -> Vec<Event> {
        self.with(|s| s.events.clone())
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.with(|s| s.events.iter().filter(|e| pred(e)).count())
    }

    /// 某个操作（如 `"upload site/a.txt"`）开始的次数
    pub fn op_count(&self, op: &str) -> usize {
        self.count(|e| matches!(e, Event::OpStart(name) if name == op))
    }

    pub fn connect_attempts(&self) -> usize {
        self.with(|s| s.connect_attempts)
    }

    pub fn clear_events(&self) {
        self.with(|s| s.events.clear());
    }
}

struct MemoryTransport {
    remote: Remote,
    cwd: String,
    delay: Duration,
}

impl MemoryTransport {
    /// 记录操作开始，执行期间释放锁并等待，再执行并记录结束
    async fn run<R>(
        &mut self,
        name: String,
        path: &str,
        f: impl FnOnce(&mut RemoteState) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        self.remote.with(|s| s.events.push(Event::OpStart(name.clone())));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = self.remote.with(|s| {
            if !s.connected {
                return Err(TransportError::Closed);
            }
            if s.dead {
                return Err(TransportError::transient("远端无响应"));
            }
            if let Some(err) = s.take_fault(path) {
                return Err(err);
            }
            f(s)
        });

        self.remote.with(|s| s.events.push(Event::OpEnd(name)));
        result
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(
        &mut self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> Result<(), TransportError> {
        self.remote.with(|s| {
            s.connect_attempts += 1;
            if s.dead {
                return Err(TransportError::transient("远端无响应"));
            }
            if s.fail_connects > 0 {
                s.fail_connects -= 1;
                return Err(TransportError::transient("连接被拒绝"));
            }
            s.connected = true;
            s.events.push(Event::Connect);
            Ok(())
        })?;
        self.cwd = String::new();
        Ok(())
    }

    async fn change_dir(&mut self, path: &str) -> Result<(), TransportError> {
        let target = resolve_path(&self.cwd, path);
        let check = target.clone();
        self.run(format!("cd /{}", target), &target, move |s| {
            if check.is_empty() || s.dirs.contains(&check) {
                Ok(())
            } else {
                Err(TransportError::not_found(format!("目录不存在: /{}", check)))
            }
        })
        .await?;
        self.cwd = target;
        Ok(())
    }

    async fn current_dir(&mut self) -> Result<String, TransportError> {
        let cwd = self.cwd.clone();
        self.run(format!("pwd /{}", cwd), &cwd, |_| Ok(())).await?;
        Ok(format!("/{}", cwd))
    }

    async fn ensure_dir(&mut self, path: &str) -> Result<(), TransportError> {
        let target = resolve_path(&self.cwd, path);
        let dirs = target.clone();
        self.run(format!("mkdir {}", target), &target, move |s| {
            let mut current = String::new();
            for part in dirs.split('/').filter(|p| !p.is_empty()) {
                if !current.is_empty() {
                    current.push('/');
                }
                current.push_str(part);
                s.dirs.insert(current.clone());
            }
            Ok(())
        })
        .await
    }

    async fn upload_from(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let content = std::fs::read(local).map_err(|e| TransportError::Local {
            path: local.to_path_buf(),
            source: e,
        })?;

        let target = resolve_path(&self.cwd, remote);
        let key = target.clone();
        let is_state = target.rsplit('/').next() == Some(DEFAULT_STATE_NAME);
        self.run(format!("upload {}", target), &target, move |s| {
            if !is_state {
                if let Some(limit) = s.die_after_uploads {
                    if s.item_uploads >= limit {
                        s.dead = true;
                        return Err(TransportError::transient("远端无响应"));
                    }
                }
            }
            if !s.parent_exists(&key) {
                return Err(TransportError::permanent(format!("上级目录不存在: /{}", key)));
            }
            if !is_state {
                s.item_uploads += 1;
            }
            s.files.insert(key, content);
            Ok(())
        })
        .await
    }

    async fn download_to(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let target = resolve_path(&self.cwd, remote);
        let key = target.clone();
        let content = self
            .run(format!("download {}", target), &target, move |s| {
                s.files
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| TransportError::not_found(format!("文件不存在: /{}", key)))
            })
            .await?;

        std::fs::write(local, content).map_err(|e| TransportError::Local {
            path: local.to_path_buf(),
            source: e,
        })
    }

    async fn send_keep_alive(&mut self) -> Result<(), TransportError> {
        self.remote.with(|s| {
            if s.keep_alive_failures > 0 {
                s.keep_alive_failures -= 1;
                return Err(TransportError::transient("保活超时"));
            }
            if !s.connected {
                return Err(TransportError::Closed);
            }
            s.events.push(Event::KeepAlive);
            Ok(())
        })
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.remote.with(|s| {
            if s.connected {
                s.events.push(Event::Close);
            }
            s.connected = false;
        });
        self.cwd = String::new();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

pub fn test_endpoint() -> Endpoint {
    Endpoint::parse("ftp://mock.test/").unwrap()
}

/// 去掉所有等待的配置，并关闭心跳
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        connect_retry_delay_ms: 0,
        reconnect_delay_ms: 0,
        heartbeat_interval_ms: 0,
        ..SyncConfig::default()
    }
}
