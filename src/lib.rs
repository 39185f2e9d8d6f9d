// Resumable Uploader Library
// 分片断点续传上传客户端核心库

// 配置管理模块
pub mod config;

// 错误类型
pub mod error;

// 日志系统
pub mod logging;

// 分片上传模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, EndpointConfig, LogConfig, UploadConfig};
pub use error::{Result, UploadError};
pub use uploader::{
    format_size, SharedUploaderFactory, UploadCallbacks, UploadChunk, UploadController,
    UploadFile, UploadOptions, UploadSession, UploadState, UploaderFactory,
};
