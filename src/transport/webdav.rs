use super::Endpoint;
use crate::config::Credentials;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

pub(super) fn build(
    endpoint: &Endpoint,
    credentials: &Credentials,
    timeout: Duration,
) -> opendal::Result<Operator> {
    use opendal::services::Webdav;

    let mut builder = Webdav::default()
        .endpoint(&endpoint.url())
        .root(&endpoint.root);

    // 匿名访问时不带认证信息
    if !credentials.username.is_empty() {
        builder = builder
            .username(&credentials.username)
            .password(&credentials.password);
    }

    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(timeout)
                .with_io_timeout(timeout),
        )
        .finish();

    Ok(operator)
}
