use super::Endpoint;
use opendal::Operator;
use std::path::Path;

/// 本地目录作为同步目标（镜像目录、测试）
pub(super) fn build(endpoint: &Endpoint) -> opendal::Result<Operator> {
    use opendal::services::Fs;

    let root = Path::new(&endpoint.root);
    if !root.exists() {
        std::fs::create_dir_all(root).map_err(|e| {
            opendal::Error::new(opendal::ErrorKind::PermissionDenied, "无法创建本地目标目录")
                .set_source(e)
        })?;
    }

    let builder = Fs::default().root(&endpoint.root);
    Ok(Operator::new(builder)?.finish())
}
