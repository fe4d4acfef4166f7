//! 图片批量下载器命令行入口。
//!
//! 加载 `config.yml`（命令行参数可覆盖），初始化日志，然后执行一次批量下载。

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::{debug, info};

use image_batch_downloader::base_system::config::{ConfigSpec, load_or_create};
use image_batch_downloader::base_system::context::Config;
use image_batch_downloader::base_system::diagnostics::{
    CompositeSink, Level, LevelCounter, SharedDiagnostics, TracingSink,
};
use image_batch_downloader::base_system::logging::{LogOptions, LogSystem};
use image_batch_downloader::download::{BatchDownloader, BatchOptions, BatchStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "image-batch-downloader", version)]
#[command(about = "Download every image URL listed in a text file, a few at a time")]
struct Cli {
    /// 配置文件路径（默认 ./config.yml，不存在时自动生成）
    #[arg(long)]
    config: Option<PathBuf>,

    /// URL 列表文件，覆盖配置中的 file_path
    #[arg(long)]
    list: Option<PathBuf>,

    /// 图片保存目录，覆盖配置中的 images_folder
    #[arg(long)]
    output: Option<PathBuf>,

    /// 并发下载数，覆盖配置中的 concurrency
    #[arg(long)]
    concurrency: Option<usize>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 关闭控制台彩色输出
    #[arg(long, default_value_t = false)]
    no_color: bool,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    let _log = init_logging(&cli, &config)?;
    info!(target: "startup", "image-batch-downloader v{}", VERSION);
    debug!(target: "startup", "config: {:?}", config);

    let counter = Arc::new(LevelCounter::new());
    let console_and_file: SharedDiagnostics = Arc::new(TracingSink);
    let tally: SharedDiagnostics = counter.clone();
    let sink: SharedDiagnostics = Arc::new(CompositeSink::new(vec![console_and_file, tally]));

    let options = BatchOptions {
        list_path: config.list_path(),
        images_dir: config.images_dir(),
        concurrency: config.concurrency,
    };
    info!(
        "reading {} into {} with {} worker(s)",
        options.list_path.display(),
        options.images_dir.display(),
        options.concurrency
    );

    // Construction failures were already reported through the sink.
    let Ok(batch) = BatchDownloader::with_http(options, &config.http_options(), sink) else {
        return Ok(ExitCode::FAILURE);
    };
    let status = batch.download();

    info!(
        "finished with {} error(s) and {} warning(s)",
        counter.count(Level::Error),
        counter.count(Level::Warn)
    );

    match status {
        BatchStatus::Completed { .. } if status.is_clean() => Ok(ExitCode::SUCCESS),
        BatchStatus::Completed { .. } | BatchStatus::Aborted { .. } => Ok(ExitCode::FAILURE),
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(Config::FILE_NAME));
    let base_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let mut config = load_or_create::<Config>(Some(&config_path))
        .with_context(|| format!("failed to load {}", config_path.display()))?
        .with_base_dir(base_dir);

    // Command-line paths are relative to the working directory, not the config file.
    if let Some(list) = &cli.list {
        config.file_path = absolute_string(list)?;
    }
    if let Some(output) = &cli.output {
        config.images_folder = absolute_string(output)?;
    }
    if let Some(n) = cli.concurrency {
        config.concurrency = n;
    }
    config.validate().map_err(|e| anyhow!(e))?;
    Ok(config)
}

fn absolute_string(path: &Path) -> Result<String> {
    let abs = std::path::absolute(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    Ok(abs.to_string_lossy().into_owned())
}

fn init_logging(cli: &Cli, config: &Config) -> Result<LogSystem> {
    let opts = LogOptions {
        debug: cli.debug,
        use_color: !cli.no_color,
        console: true,
        log_file: config.log_path(),
    };
    LogSystem::init(opts).map_err(|e| anyhow!(e))
}
