//! 路径规范化与排除规则

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use tracing::debug;

/// 规范化相对路径
///
/// 统一使用 `/`，合并连续分隔符，去掉开头的 `./`、`../` 和 `/`。
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");

    let mut collapsed = String::with_capacity(path.len());
    for ch in path.chars() {
        if ch == '/' && collapsed.ends_with('/') {
            continue;
        }
        collapsed.push(ch);
    }

    let mut rest = collapsed.as_str();
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix("../") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        } else {
            break;
        }
    }

    rest.to_string()
}

/// 排除规则集合
#[derive(Debug, Clone)]
pub struct ExcludeRules {
    patterns: Vec<String>,
    set: GlobSet,
}

impl ExcludeRules {
    /// 解析排除规则，每行一条，忽略空行和 `#` 注释
    pub fn parse(raw: &str) -> Result<Self, globset::Error> {
        let patterns: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        let mut builder = GlobSetBuilder::new();
        for pattern in &patterns {
            // `*` 不跨目录，`**` 跨目录
            let glob = GlobBuilder::new(pattern).literal_separator(true).build()?;
            builder.add(glob);
        }

        Ok(Self {
            set: builder.build()?,
            patterns,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for ExcludeRules {
    fn default() -> Self {
        Self::empty()
    }
}

/// 按文件和目录两种形式匹配：`logs/**` 同时排除 `logs/a.txt` 和 `logs` 本身
pub fn is_excluded(path: &str, rules: &ExcludeRules) -> bool {
    if rules.is_empty() {
        return false;
    }

    let path = normalize_path(path);
    let dir_form = format!("{}/", path.trim_end_matches('/'));
    let excluded = rules.set.is_match(&path) || rules.set.is_match(&dir_form);

    if excluded {
        debug!("排除: {}", path);
    }
    excluded
}
