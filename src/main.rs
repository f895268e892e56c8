use clap::Parser;
use deploysync_lib::cli::Cli;
use deploysync_lib::logging::{init_logging, LogConfig};
use deploysync_lib::shutdown::{
    install_signal_handler, FORCE_DISCONNECT_TIMEOUT, FORCE_EXIT_CODE,
};
use deploysync_lib::{create_transport, SyncConfig, SyncEngine, SyncReport, SyncStatus};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

fn log_report(report: &SyncReport) {
    for item in &report.failed {
        warn!("失败: {} ({:?}): {}", item.path, item.kind, item.error);
    }

    match report.status {
        SyncStatus::Completed | SyncStatus::PartiallyCompleted => info!(
            "同步完成: 创建 {} 个目录, 上传 {} 个文件, 失败 {} 个, 耗时 {}ms",
            report.folders_created,
            report.files_uploaded,
            report.failed.len(),
            report.duration
        ),
        SyncStatus::Cancelled => warn!("同步已取消, 耗时 {}ms", report.duration),
        SyncStatus::Failed => error!(
            "同步失败: {}",
            report.error.as_deref().unwrap_or("未知错误")
        ),
    }

    if let Ok(json) = serde_json::to_string(report) {
        debug!("同步报告: {}", json);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (log_config, sync_config) = match &cli.config {
        Some(path) => (LogConfig::load(path), SyncConfig::load(path)),
        None => (LogConfig::default(), SyncConfig::default()),
    };
    if let Err(e) = init_logging(&log_config, cli.verbose) {
        eprintln!("初始化日志失败: {}", e);
    }
    if let Some(path) = cli.config.as_ref().filter(|p| !p.exists()) {
        warn!("配置文件不存在，使用默认配置: {}", path.display());
    }

    let deploy = match cli.deploy_config() {
        Ok(config) => config,
        Err(e) => {
            error!("参数无效: {:#}", e);
            return ExitCode::from(2);
        }
    };
    debug!("部署配置: {:?}", deploy);
    debug!("同步参数: {:?}", sync_config);

    let shutdown = install_signal_handler();
    let transport = create_transport(&deploy);
    let mut engine =
        SyncEngine::new(deploy, sync_config, transport).with_cancel(shutdown.token());

    let outcome = tokio::select! {
        report = engine.run() => Some(report),
        _ = shutdown.forced() => None,
    };
    let Some(report) = outcome else {
        if tokio::time::timeout(FORCE_DISCONNECT_TIMEOUT, engine.disconnect())
            .await
            .is_err()
        {
            warn!("断开连接超时");
        }
        return ExitCode::from(FORCE_EXIT_CODE);
    };
    log_report(&report);

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
