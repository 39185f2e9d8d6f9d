use anyhow::Context;
use clap::Parser;
use resumable_uploader::{
    format_size, logging, uploader::UploadFile, AppConfig, UploadCallbacks, UploadController,
    UploadState,
};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// 默认配置文件路径
const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 分片断点续传上传客户端
#[derive(Parser, Debug)]
#[command(name = "resumable-uploader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// 待上传文件
    file: PathBuf,

    /// 配置文件路径
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file_path = cli.file;
    let config_path = cli.config;

    let config = AppConfig::load_or_default(&config_path).await;

    // 日志守卫需要保持到程序结束
    let _log_guard = logging::init_logging(&config.log);

    info!("Resumable Uploader v{}", env!("CARGO_PKG_VERSION"));

    let file = UploadFile::from_path(&file_path, None).await?;
    info!(
        "待上传文件: {} ({})",
        file.name(),
        format_size(file.size())
    );

    let callbacks = UploadCallbacks::default()
        .on_hash_progress(|p| info!("计算文件标识: {}%", p))
        .on_progress(|p| info!("上传进度: {}%", p))
        .on_complete(|result| info!("✓ 上传完成: {}", result))
        .on_error(|message| warn!("{}", message));

    let controller = UploadController::new(config.upload.clone(), callbacks)
        .context("上传配置无效，请检查配置文件中的 [upload] 部分")?;
    controller.set_file(file)?;

    let runner = controller.clone();
    let upload = tokio::spawn(async move { runner.start().await });

    tokio::select! {
        joined = upload => {
            match joined.context("上传任务异常退出")? {
                Ok(()) => {}
                Err(e) => {
                    error!("上传失败: {}", e);
                    return Err(e.into());
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，暂停上传...");
            controller.pause();
        }
    }

    let session = controller.session();
    match session.state {
        UploadState::Complete => info!("文件标识: {}", session.file_id.unwrap_or_default()),
        UploadState::Paused => info!(
            "已暂停，进度 {}%（{}/{} 个分片），重新运行同一命令即可继续上传",
            session.progress, session.completed_chunks, session.total_chunks
        ),
        state => warn!("上传结束，状态: {:?}", state),
    }

    Ok(())
}
