use crate::config::{Credentials, DeployConfig, DEFAULT_STATE_NAME, DEFAULT_TIMEOUT_MS};
use crate::transport::Endpoint;
use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "deploysync",
    version,
    about = "把本地目录增量部署到 FTP/FTPS/WebDAV 服务器"
)]
pub struct Cli {
    /// 服务器地址，如 ftps://example.com:21 (未写协议时按 ftps 处理)
    #[arg(short = 's', long, env = "DEPLOY_SERVER")]
    pub server: String,

    #[arg(short = 'u', long, env = "DEPLOY_USERNAME", default_value = "")]
    pub username: String,

    /// 建议通过 DEPLOY_PASSWORD 环境变量传入，命令行参数在进程列表中可见
    #[arg(
        short = 'p',
        long,
        env = "DEPLOY_PASSWORD",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    pub password: String,

    /// 要部署的本地目录
    #[arg(short = 'l', long, env = "DEPLOY_LOCAL_DIR", default_value = ".")]
    pub local_dir: PathBuf,

    /// 服务器上的目标目录
    #[arg(short = 'r', long, env = "DEPLOY_SERVER_DIR", default_value = "./")]
    pub server_dir: String,

    /// 状态文件名
    #[arg(long, env = "DEPLOY_STATE_NAME", default_value = DEFAULT_STATE_NAME)]
    pub state_name: String,

    /// 排除规则 (glob)，可重复，也可以一个值里按行分隔
    #[arg(short = 'e', long = "exclude", env = "DEPLOY_EXCLUDE")]
    pub exclude: Vec<String>,

    /// 连接超时（毫秒）
    #[arg(long, env = "DEPLOY_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout: u64,

    /// JSON 配置文件，包含 "sync" 和 "log" 两段
    #[arg(short = 'c', long, env = "DEPLOY_CONFIG")]
    pub config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl Cli {
    pub fn deploy_config(&self) -> Result<DeployConfig> {
        let endpoint = Endpoint::parse(&self.server).map_err(|e| anyhow!(e))?;

        if self.state_name.is_empty() || self.state_name.contains(['/', '\\']) {
            return Err(anyhow!("状态文件名无效: {:?}", self.state_name));
        }
        if self.timeout == 0 {
            return Err(anyhow!("超时必须大于 0"));
        }

        let mut config = DeployConfig::new(endpoint, &self.local_dir, &self.server_dir);
        config.credentials = Credentials::new(&self.username, &self.password);
        config.state_name = self.state_name.clone();
        config.exclude = self.exclude.join("\n");
        config.timeout = Duration::from_millis(self.timeout);
        Ok(config)
    }
}
