//! 退出信号处理
//!
//! 第一次收到 SIGINT / SIGTERM / SIGHUP 时取消令牌，同步在当前条目结束后停止并断开连接；
//! 第二次要求强制退出，主流程放弃当前操作，在限定时间内断开连接后退出。

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 强制退出时的退出码
pub const FORCE_EXIT_CODE: u8 = 130;

/// 强制退出时等待断开连接的最长时间
pub const FORCE_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 两级退出信号：先优雅停止，再强制退出
#[derive(Clone, Default)]
pub struct Shutdown {
    graceful: CancellationToken,
    force: CancellationToken,
}

impl Shutdown {
    /// 交给同步引擎的取消令牌
    pub fn token(&self) -> CancellationToken {
        self.graceful.clone()
    }

    pub fn is_forced(&self) -> bool {
        self.force.is_cancelled()
    }

    /// 等待第二次信号
    pub async fn forced(&self) {
        self.force.cancelled().await
    }

    fn on_signal(&self) {
        if !self.graceful.is_cancelled() {
            tracing::info!("收到退出信号，完成当前操作后停止...");
            tracing::info!("再次按 Ctrl+C 强制退出");
            self.graceful.cancel();
        } else {
            tracing::warn!("强制退出，正在断开连接...");
            self.force.cancel();
        }
    }
}

pub fn install_signal_handler() -> Shutdown {
    let shutdown = Shutdown::default();

    let handler = shutdown.clone();
    tokio::spawn(async move {
        loop {
            if !wait_for_signal().await {
                tracing::warn!("无法监听退出信号");
                return;
            }

            handler.on_signal();
            if handler.is_forced() {
                break;
            }
        }

        // 主流程没能在时限内退出时兜底
        tokio::time::sleep(FORCE_DISCONNECT_TIMEOUT + Duration::from_secs(1)).await;
        std::process::exit(FORCE_EXIT_CODE.into());
    });

    shutdown
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sighup) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(term), Ok(hup)) => (term, hup),
        _ => return tokio::signal::ctrl_c().await.is_ok(),
    };

    tokio::select! {
        r = tokio::signal::ctrl_c() => r.is_ok(),
        _ = sigterm.recv() => true,
        _ = sighup.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
