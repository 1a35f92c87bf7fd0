//! OverDrive 有声书下载器。
//!
//! 读取 `.odm` 清单，获取（或复用）License，按清单顺序下载全部 MP3 分段与封面，
//! 可选地写入 ID3 标签并修改文件属主。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/错误/落盘路径等基础设施
//! - `odm_parser`：`.odm` 清单解析
//! - `license`：设备标识与 License 获取
//! - `network`：HTTP 客户端
//! - `download`：分段下载引擎、封面与主流程编排
//! - `post_process`：ID3 标签与属主

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing::{debug, error, info};

mod base_system;
mod download;
mod license;
mod network;
mod odm_parser;
mod post_process;
#[cfg(test)]
mod test_support;

use base_system::config::{ConfigSource, load};
use base_system::context::{Config, resolve_data_dir};
use base_system::logging::{LogOptions, LogSystem};
use download::downloader::{DownloadOptions, Downloader};
use download::progress::ConsoleProgress;
use license::device::DeviceIdentity;
use network::client::{HttpClient, HttpOptions};
use post_process::owner::ChownOwnership;
use post_process::tags::Id3TagWriter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "overdrive-dl")]
#[command(about = "Download OverDrive audiobooks from an .odm file")]
struct Cli {
    /// 要处理的 .odm 清单文件
    #[arg(required_unless_present = "version")]
    filename: Option<PathBuf>,

    /// 启用调试日志输出
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// 下载完成后按配置写入 ID3 标签
    #[arg(short, long, default_value_t = false)]
    tags: bool,

    /// 下载完成后按配置修改文件属主
    #[arg(short, long, default_value_t = false)]
    owner: bool,

    /// 不下载，只对已有文件执行 --tags / --owner
    #[arg(short, long, default_value_t = false)]
    skip_download: bool,

    /// 覆盖已存在且大小一致的文件
    #[arg(short, long, default_value_t = false)]
    force: bool,

    /// 配置文件路径（默认使用数据目录下的 config.yml）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 数据目录路径（用于存放 config.yml 和 logs）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,
}

impl Cli {
    fn options(&self) -> DownloadOptions {
        DownloadOptions {
            force_overwrite: self.force,
            update_tags: self.tags,
            update_owner: self.owner,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("overdrive-dl v{}", VERSION);
        return ExitCode::SUCCESS;
    }
    if cli.skip_download && !cli.tags && !cli.owner {
        Cli::command()
            .error(
                ErrorKind::MissingRequiredArgument,
                "--skip-download requires --tags and/or --owner",
            )
            .exit();
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let data_dir = resolve_data_dir(cli.data_dir.as_deref());
    let _log = init_logging(cli.debug, &data_dir)?;

    let result = execute(cli, &data_dir);
    if let Err(err) = &result {
        error!("{err:#}");
    }
    result
}

fn execute(cli: &Cli, data_dir: &Path) -> Result<()> {
    let filename = cli
        .filename
        .as_deref()
        .ok_or_else(|| anyhow!("no .odm file given"))?;

    let source = ConfigSource::from_args(cli.config.as_deref(), data_dir);
    let (config, config_path) = load::<Config>(&source).context("load config")?;
    debug!("配置文件: {}", config_path.display());

    let http = HttpClient::new(HttpOptions::from_config(&config)).context("build HTTP client")?;
    let identity = DeviceIdentity::default_location()?;
    let downloader = Downloader::new(&config, &http, identity, &Id3TagWriter, &ChownOwnership);

    if cli.skip_download {
        info!("跳过下载，仅处理已有文件");
        return downloader.process_existing(filename, cli.options());
    }

    let mut progress = ConsoleProgress::stdout();
    let report = downloader.download_audiobook(filename, cli.options(), &mut progress)?;
    info!("完成：共 {} 个分段", report.parts.len());
    Ok(())
}

fn init_logging(debug: bool, base_dir: &Path) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
