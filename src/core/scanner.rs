//! 本地目录扫描 - 遍历、排除并计算文件哈希

use crate::core::hasher::hash_file;
use crate::core::path::{is_excluded, normalize_path, ExcludeRules};
use crate::core::state::{is_state_file, StateEntry};
use crate::error::SyncError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// 扫描单个条目时的错误，不影响其余条目
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("读取目录失败: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("计算指纹失败 {path}: {source}")]
    Hash {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// 本地目录扫描器
#[derive(Debug, Clone)]
pub struct LocalScanner {
    root: PathBuf,
    state_name: String,
    rules: ExcludeRules,
}

impl LocalScanner {
    pub fn new(root: impl Into<PathBuf>, state_name: impl Into<String>, rules: ExcludeRules) -> Self {
        Self {
            root: root.into(),
            state_name: state_name.into(),
            rules,
        }
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        Some(normalize_path(&rel.to_string_lossy()))
    }

    /// 状态文件和被排除的条目不进入结果，被排除的目录不再深入
    fn keep(&self, entry: &DirEntry) -> bool {
        if is_state_file(&entry.file_name().to_string_lossy(), &self.state_name) {
            return false;
        }
        match self.relative(entry.path()) {
            Some(rel) => !is_excluded(&rel, &self.rules),
            None => true,
        }
    }

    /// 惰性遍历，返回每个条目的扫描结果
    pub fn entries(&self) -> impl Iterator<Item = Result<StateEntry, ScanError>> + '_ {
        WalkDir::new(&self.root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| self.keep(e))
            .filter_map(move |result| {
                let entry = match result {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(ScanError::from(e))),
                };
                let rel = self.relative(entry.path())?;

                if entry.file_type().is_dir() {
                    return Some(Ok(StateEntry::folder(rel)));
                }

                // 符号链接等非目录条目一律按文件处理
                Some(
                    hash_file(entry.path(), &rel)
                        .map(|hash| StateEntry::file(rel.clone(), hash))
                        .map_err(|source| ScanError::Hash { path: rel, source }),
                )
            })
    }

    /// 扫描全部条目，失败的条目记录日志后跳过
    pub fn scan(&self) -> Vec<StateEntry> {
        self.scan_with_cancel(&CancellationToken::new())
            .unwrap_or_default()
    }

    /// 每处理一个条目检查一次取消
    pub fn scan_with_cancel(&self, cancel: &CancellationToken) -> Result<Vec<StateEntry>, SyncError> {
        info!("开始扫描本地目录: {}", self.root.display());

        let mut entries = Vec::new();
        let mut failed = 0;

        for result in self.entries() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            match result {
                Ok(entry) => {
                    debug!("扫描到: {}", entry.path());
                    entries.push(entry);
                }
                Err(e) => {
                    warn!("跳过: {}", e);
                    failed += 1;
                }
            }
        }

        let dirs = entries.iter().filter(|e| e.is_folder()).count();
        info!(
            "扫描完成: {} 个文件, {} 个目录, {} 个失败",
            entries.len() - dirs,
            dirs,
            failed
        );

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_STATE_NAME;
    use crate::core::hasher::hash_bytes;
    use std::fs;
    use tempfile::tempdir;

    fn paths(entries: &[StateEntry]) -> Vec<&str> {
        let mut p: Vec<&str> = entries.iter().map(|e| e.path()).collect();
        p.sort_unstable();
        p
    }

    #[test]
    fn test_scan_folders_and_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/x.txt"), b"hello").unwrap();
        fs::write(dir.path().join("a/b/y.txt"), b"y").unwrap();
        fs::write(dir.path().join("index.html"), b"<html>").unwrap();

        let scanner = LocalScanner::new(dir.path(), DEFAULT_STATE_NAME, ExcludeRules::empty());
        let entries = scanner.scan();

        assert_eq!(paths(&entries), ["a", "a/b", "a/b/y.txt", "a/x.txt", "index.html"]);
        let x = entries.iter().find(|e| e.path() == "a/x.txt").unwrap();
        assert_eq!(x.hash().unwrap(), hash_bytes(b"hello", "a/x.txt"));
        assert!(entries.iter().find(|e| e.path() == "a").unwrap().is_folder());
    }

    #[test]
    fn test_state_file_skipped_everywhere() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join(DEFAULT_STATE_NAME), b"{}").unwrap();
        fs::write(dir.path().join("sub").join(DEFAULT_STATE_NAME), b"{}").unwrap();
        fs::write(dir.path().join("keep.txt"), b"k").unwrap();

        let scanner = LocalScanner::new(dir.path(), DEFAULT_STATE_NAME, ExcludeRules::empty());
        assert_eq!(paths(&scanner.scan()), ["keep.txt", "sub"]);
    }

    #[test]
    fn test_excluded_dir_not_descended() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("logs/deep")).unwrap();
        fs::write(dir.path().join("logs/a.txt"), b"a").unwrap();
        fs::write(dir.path().join("logs/deep/b.txt"), b"b").unwrap();
        fs::write(dir.path().join("app.js"), b"js").unwrap();
        fs::write(dir.path().join("app.js.map"), b"map").unwrap();

        let rules = ExcludeRules::parse("logs/**\n*.map").unwrap();
        let scanner = LocalScanner::new(dir.path(), DEFAULT_STATE_NAME, rules);
        assert_eq!(paths(&scanner.scan()), ["app.js"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_omitted() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ok.txt"), b"ok").unwrap();
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("dangling")).unwrap();

        let scanner = LocalScanner::new(dir.path(), DEFAULT_STATE_NAME, ExcludeRules::empty());
        let results: Vec<_> = scanner.entries().collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().any(|r| matches!(r, Err(ScanError::Hash { .. }))));

        assert_eq!(paths(&scanner.scan()), ["ok.txt"]);
    }

    #[test]
    fn test_cancelled_scan() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let token = CancellationToken::new();
        token.cancel();

        let scanner = LocalScanner::new(dir.path(), DEFAULT_STATE_NAME, ExcludeRules::empty());
        assert!(matches!(
            scanner.scan_with_cancel(&token),
            Err(SyncError::Cancelled)
        ));
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempdir().unwrap();
        let scanner = LocalScanner::new(dir.path(), DEFAULT_STATE_NAME, ExcludeRules::empty());
        assert!(scanner.scan().is_empty());
    }
}
