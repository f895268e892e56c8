use super::Endpoint;
use crate::config::Credentials;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

/// 创建 FTP / FTPS 操作器，是否启用 TLS 由地址协议决定
///
/// FTPS 总是校验服务器证书，不支持自签名证书
pub(super) fn build(
    endpoint: &Endpoint,
    credentials: &Credentials,
    timeout: Duration,
) -> opendal::Result<Operator> {
    use opendal::services::Ftp;

    let builder = Ftp::default()
        .endpoint(&endpoint.url())
        .user(&credentials.username)
        .password(&credentials.password)
        .root(&endpoint.root);

    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(timeout)
                .with_io_timeout(timeout),
        )
        .finish();

    Ok(operator)
}
