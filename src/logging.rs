//! 日志模块 - 控制台输出和可选的文件日志

use crate::config::read_section;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志配置，对应配置文件的 `"log"` 段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志文件，不设置时只输出到控制台
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// 最大日志文件大小（MB）
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_size_mb() -> u32 {
    5
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            file: None,
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl LogConfig {
    pub fn load(config_file: &Path) -> Self {
        read_section(config_file, "log").unwrap_or_default()
    }

    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 初始化日志
///
/// `RUST_LOG` 优先于配置的级别；`verbose` 至少打开 debug 级别。
pub fn init_logging(config: &LogConfig, verbose: bool) -> io::Result<()> {
    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return Ok(());
    }

    let level = if verbose {
        config.tracing_level().max(tracing::Level::DEBUG)
    } else {
        config.tracing_level()
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},opendal=warn", level.as_str().to_lowercase()))
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let file_layer = match &config.file {
        Some(path) => {
            let writer = SizeRotatingWriter::new(path, config.max_size_mb)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

type SharedFile = Arc<Mutex<Option<BufWriter<File>>>>;

fn lock(file: &SharedFile) -> MutexGuard<'_, Option<BufWriter<File>>> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 带大小限制的日志写入器，超过上限时把 `<file>` 轮转为 `<file>.old`
#[derive(Clone)]
pub struct SizeRotatingWriter {
    file_path: PathBuf,
    max_size: u64,
    writer: SharedFile,
}

impl SizeRotatingWriter {
    pub fn new(file_path: &Path, max_size_mb: u32) -> io::Result<Self> {
        Self::with_max_bytes(file_path, (max_size_mb as u64) * 1024 * 1024)
    }

    pub fn with_max_bytes(file_path: &Path, max_size: u64) -> io::Result<Self> {
        if let Some(parent) = file_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let writer = Self::open_file(file_path, max_size)?;

        Ok(Self {
            file_path: file_path.to_path_buf(),
            max_size,
            writer: Arc::new(Mutex::new(Some(writer))),
        })
    }

    fn open_file(file_path: &Path, max_size: u64) -> io::Result<BufWriter<File>> {
        if Self::oversized(file_path, max_size) {
            Self::rotate_log(file_path)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file_path)?;

        Ok(BufWriter::new(file))
    }

    fn oversized(file_path: &Path, max_size: u64) -> bool {
        fs::metadata(file_path)
            .map(|m| m.len() > max_size)
            .unwrap_or(false)
    }

    fn backup_path(file_path: &Path) -> PathBuf {
        let mut name = file_path.as_os_str().to_owned();
        name.push(".old");
        PathBuf::from(name)
    }

    fn rotate_log(file_path: &Path) -> io::Result<()> {
        let backup_path = Self::backup_path(file_path);

        if backup_path.exists() {
            fs::remove_file(&backup_path)?;
        }

        fs::rename(file_path, &backup_path)
    }

    /// 超过上限时关闭当前文件、轮转并重新打开
    fn rotate_if_needed(file_path: &Path, max_size: u64, shared: &SharedFile) -> io::Result<()> {
        if !Self::oversized(file_path, max_size) {
            return Ok(());
        }

        let mut guard = lock(shared);
        if let Some(mut w) = guard.take() {
            let _ = w.flush();
        }

        Self::rotate_log(file_path)?;
        *guard = Some(Self::open_file(file_path, max_size)?);
        Ok(())
    }
}

/// 单次日志事件的写入器
pub struct LogWriter {
    inner: SharedFile,
    file_path: PathBuf,
    max_size: u64,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = {
            let mut guard = lock(&self.inner);
            let writer = guard
                .as_mut()
                .ok_or_else(|| io::Error::other("日志文件不可用"))?;
            let n = writer.write(buf)?;
            writer.flush()?;
            n
        };

        let _ = SizeRotatingWriter::rotate_if_needed(&self.file_path, self.max_size, &self.inner);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        match lock(&self.inner).as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SizeRotatingWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        let _ = Self::rotate_if_needed(&self.file_path, self.max_size, &self.writer);

        LogWriter {
            inner: self.writer.clone(),
            file_path: self.file_path.clone(),
            max_size: self.max_size,
        }
    }
}
