use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use cadpreview_config::{AppConfig, ConfigError};
use cadpreview_engine::{PreviewPipeline, SourceFormat, ThumbnailStore};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

/// 为 CAD 图纸生成预览图
#[derive(Parser, Debug)]
#[command(name = "cadpreview", version)]
struct Cli {
    /// 配置文件路径，缺省时按 CADPREVIEW_CONFIG 或 ./config/default.toml 查找
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 生成 `<id>.png` 与 `<id>_full.png`
    Generate {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// 图纸 id，用作输出文件名
        #[arg(long)]
        id: String,

        /// 覆盖 storage.thumbnail_dir
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// 输出识别到的格式、策略顺序与转换工具状态
    Inspect {
        #[arg(value_name = "INPUT")]
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let (config, fallback) = load_configuration(cli.config.as_deref());
    init_logging(&config);
    if let Some(fallback) = fallback {
        fallback.report();
    }

    let pipeline = PreviewPipeline::from_config(&config);
    match cli.command {
        Command::Generate {
            input,
            id,
            output_dir,
        } => match generate(&pipeline, &config, &input, &id, output_dir) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
        Command::Inspect { input } => {
            inspect(&pipeline, &input);
            ExitCode::SUCCESS
        }
    }
}

fn generate(
    pipeline: &PreviewPipeline,
    config: &AppConfig,
    input: &Path,
    id: &str,
    output_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut storage = config.storage.clone();
    if let Some(dir) = output_dir {
        storage.thumbnail_dir = dir;
    }
    let store = ThumbnailStore::from_config(&storage);
    let stored = pipeline
        .generate(input, id, &store)
        .with_context(|| format!("{}: 预览生成失败", input.display()))?;
    println!("{}", stored.thumbnail.display());
    println!("{}", stored.full.display());
    Ok(())
}

fn inspect(pipeline: &PreviewPipeline, input: &Path) {
    let format = SourceFormat::from_path(input);
    let strategies = format
        .strategies()
        .iter()
        .map(|strategy| strategy.name())
        .collect::<Vec<_>>()
        .join(" -> ");
    info!(
        path = %input.display(),
        exists = input.is_file(),
        %format,
        strategies = %strategies,
        converter = pipeline.converter_available(),
        "输入检查"
    );
}

/// 配置加载失败的记录；日志初始化之后再输出。
struct ConfigFallback {
    explicit: bool,
    error: ConfigError,
}

impl ConfigFallback {
    fn report(&self) {
        let err = &self.error;
        match (err, self.explicit) {
            (ConfigError::Io { path, .. } | ConfigError::Parse { path, .. }, true) => {
                warn!(path = %path.display(), error = %err, "加载指定配置失败，使用默认配置");
            }
            (ConfigError::Io { path, .. } | ConfigError::Parse { path, .. }, false) => {
                warn!(path = %path.display(), error = %err, "加载默认配置失败，使用内建默认值");
            }
            (ConfigError::Context { .. }, _) => {
                warn!(error = %err, "加载默认配置失败，使用内建默认值");
            }
        }
    }
}

fn load_configuration(override_path: Option<&Path>) -> (AppConfig, Option<ConfigFallback>) {
    let (loaded, explicit) = match override_path {
        Some(path) => (AppConfig::from_file(path), true),
        None => (AppConfig::discover(), false),
    };
    match loaded {
        Ok(config) => (config, None),
        Err(error) => (AppConfig::default(), Some(ConfigFallback { explicit, error })),
    }
}

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    // 重复初始化时忽略
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
