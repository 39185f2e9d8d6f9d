// 配置管理模块

use crate::error::UploadError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

/// 上传接口地址配置
///
/// 两种写法：
/// - 基础地址字符串，自动拼接 `/check`、`/upload`、`/merge`
/// - 分别指定三个接口的完整地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointConfig {
    Base(String),
    Explicit {
        upload: String,
        check: String,
        merge: String,
    },
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// 分片大小（字节，默认 2MB）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    /// 允许的文件类型，可以是 MIME 类型或扩展名；为空表示不限制
    #[serde(default)]
    pub allowed_types: Vec<String>,
    /// 单文件大小上限（字节，默认 50MB）
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// 同时上传的分片数
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 查询已上传分片的超时时间（毫秒）
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    /// 是否启用分片上传，关闭后整个文件一次性上传
    #[serde(default = "default_use_chunked_upload")]
    pub use_chunked_upload: bool,
    /// 文件标识在请求中的字段名
    #[serde(default = "default_file_id_field_name")]
    pub file_id_field_name: String,
    /// 单个分片的最大重试次数
    #[serde(default = "default_chunk_max_retries")]
    pub chunk_max_retries: u32,
    /// 分片重试的初始退避时间（毫秒）
    #[serde(default = "default_chunk_retry_backoff_ms")]
    pub chunk_retry_backoff_ms: u64,
    /// 文件哈希计算超时（毫秒）
    #[serde(default = "default_hash_timeout_ms")]
    pub hash_timeout_ms: u64,
    /// 上传接口地址
    #[serde(default)]
    pub endpoints: Option<EndpointConfig>,
}

fn default_chunk_size() -> u64 {
    2 * 1024 * 1024
}

fn default_max_size() -> u64 {
    50 * 1024 * 1024
}

fn default_concurrency() -> usize {
    3
}

fn default_check_timeout_ms() -> u64 {
    5000
}

fn default_use_chunked_upload() -> bool {
    true
}

fn default_file_id_field_name() -> String {
    "fileId".to_string()
}

fn default_chunk_max_retries() -> u32 {
    5
}

fn default_chunk_retry_backoff_ms() -> u64 {
    2000
}

fn default_hash_timeout_ms() -> u64 {
    30_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            allowed_types: Vec::new(),
            max_size: default_max_size(),
            concurrency: default_concurrency(),
            check_timeout_ms: default_check_timeout_ms(),
            use_chunked_upload: default_use_chunked_upload(),
            file_id_field_name: default_file_id_field_name(),
            chunk_max_retries: default_chunk_max_retries(),
            chunk_retry_backoff_ms: default_chunk_retry_backoff_ms(),
            hash_timeout_ms: default_hash_timeout_ms(),
            endpoints: None,
        }
    }
}

impl UploadConfig {
    /// 使用基础地址创建默认配置
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            endpoints: Some(EndpointConfig::Base(base_url.into())),
            ..Self::default()
        }
    }

    /// 校验配置项
    ///
    /// 只检查数值与字段名，接口地址在解析时校验
    pub fn validate(&self) -> std::result::Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::validation(
                "chunk_size",
                "无效的分片大小: 必须是正数",
            ));
        }
        if self.concurrency == 0 {
            return Err(UploadError::validation(
                "concurrency",
                "无效的并发数: 必须是正整数",
            ));
        }
        if self.check_timeout_ms == 0 {
            return Err(UploadError::validation(
                "check_timeout_ms",
                "无效的查询超时时间: 必须是正数",
            ));
        }
        if self.hash_timeout_ms == 0 {
            return Err(UploadError::validation(
                "hash_timeout_ms",
                "无效的哈希超时时间: 必须是正数",
            ));
        }
        if self.file_id_field_name.trim().is_empty() {
            return Err(UploadError::validation(
                "file_id_field_name",
                "文件标识字段名不能为空",
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        config
            .upload
            .validate()
            .context("配置文件中的上传参数验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        self.upload.validate().context("保存配置失败：上传参数无效")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);

        Ok(())
    }

    /// 加载或创建默认配置
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                Self::default()
            }
        }
    }
}
