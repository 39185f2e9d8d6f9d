// 上传控制器工厂
//
// 宿主程序在启动时解析一次配置，之后通过工厂为每个文件创建控制器。
// 工厂创建的所有控制器共享同一份上传选项和同一个 HTTP 连接池。

use crate::config::UploadConfig;
use crate::error::{Result, UploadError};
use crate::uploader::hash::ContentIdentifier;
use crate::uploader::{UploadApi, UploadCallbacks, UploadController, UploadOptions};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// 可在组件之间共享的工厂句柄
pub type SharedUploaderFactory = Arc<UploaderFactory>;

/// 上传控制器工厂
#[derive(Debug, Clone)]
pub struct UploaderFactory {
    options: Arc<UploadOptions>,
    client: Client,
}

impl UploaderFactory {
    /// 校验配置并创建工厂
    pub fn new(config: UploadConfig, callbacks: UploadCallbacks) -> Result<Self> {
        let options = UploadOptions::new(config, callbacks)?;
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| UploadError::validation("http_client", e.to_string()))?;

        info!(
            "上传工厂已创建: upload={}, 并发数={}, 分片大小={} bytes",
            options.endpoints.upload, options.config.concurrency, options.config.chunk_size
        );

        Ok(Self {
            options: Arc::new(options),
            client,
        })
    }

    /// 创建共享句柄
    pub fn shared(self) -> SharedUploaderFactory {
        Arc::new(self)
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// 创建新的上传控制器
    pub fn create(&self) -> UploadController {
        let api = UploadApi::with_client(self.client.clone(), self.options.clone());
        let identifier = ContentIdentifier::new(self.options.hash_timeout());
        UploadController::from_parts(api, identifier)
    }
}
