// 上传选项：校验后的配置快照 + 接口地址 + 回调
//
// 控制器构造时解析一次，之后只读

use crate::config::{EndpointConfig, UploadConfig};
use crate::error::{Result, UploadError};
use reqwest::Url;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;
pub type CompleteCallback = Arc<dyn Fn(Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(String) + Send + Sync>;

/// 上传事件回调
#[derive(Clone, Default)]
pub struct UploadCallbacks {
    /// 上传进度 (0-100)
    pub on_progress: Option<ProgressCallback>,
    /// 文件哈希计算进度 (0-100)
    pub on_hash_progress: Option<ProgressCallback>,
    /// 上传完成，参数为服务器返回内容
    pub on_complete: Option<CompleteCallback>,
    /// 上传出错，参数为可读的错误描述
    pub on_error: Option<ErrorCallback>,
}

impl UploadCallbacks {
    pub fn on_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(f));
        self
    }

    pub fn on_hash_progress(mut self, f: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_hash_progress = Some(Arc::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn(Value) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub(crate) fn progress(&self, progress: u8) {
        if let Some(cb) = &self.on_progress {
            cb(progress);
        }
    }

    pub(crate) fn hash_progress(&self, progress: u8) {
        if let Some(cb) = &self.on_hash_progress {
            cb(progress);
        }
    }

    pub(crate) fn complete(&self, result: Value) {
        if let Some(cb) = &self.on_complete {
            cb(result);
        }
    }

    pub(crate) fn error(&self, message: String) {
        if let Some(cb) = &self.on_error {
            cb(message);
        }
    }
}

impl fmt::Debug for UploadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_hash_progress", &self.on_hash_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// 解析后的接口地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub upload: Url,
    pub check: Url,
    pub merge: Url,
}

impl Endpoints {
    /// 解析接口地址配置
    pub fn resolve(config: Option<&EndpointConfig>) -> Result<Self> {
        match config {
            None => Err(UploadError::validation("endpoints", "上传接口地址未配置")),
            Some(EndpointConfig::Base(base)) => {
                let base = base.trim_end_matches('/');
                Ok(Self {
                    upload: parse_url(&format!("{}/upload", base))?,
                    check: parse_url(&format!("{}/check", base))?,
                    merge: parse_url(&format!("{}/merge", base))?,
                })
            }
            Some(EndpointConfig::Explicit {
                upload,
                check,
                merge,
            }) => Ok(Self {
                upload: parse_url(upload)?,
                check: parse_url(check)?,
                merge: parse_url(merge)?,
            }),
        }
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|_| UploadError::InvalidUrl {
        url: raw.to_string(),
    })
}

/// 上传选项
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub config: UploadConfig,
    pub endpoints: Endpoints,
    pub callbacks: UploadCallbacks,
}

impl UploadOptions {
    /// 校验配置并解析接口地址
    pub fn new(config: UploadConfig, callbacks: UploadCallbacks) -> Result<Self> {
        config.validate()?;
        let endpoints = Endpoints::resolve(config.endpoints.as_ref())?;
        Ok(Self {
            config,
            endpoints,
            callbacks,
        })
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.config.check_timeout_ms)
    }

    pub fn hash_timeout(&self) -> Duration {
        Duration::from_millis(self.config.hash_timeout_ms)
    }

    pub fn file_id_field(&self) -> &str {
        &self.config.file_id_field_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_base_url() {
        let endpoints = Endpoints::resolve(Some(&EndpointConfig::Base(
            "http://127.0.0.1:8090/api/upload/".to_string(),
        )))
        .unwrap();
        assert_eq!(endpoints.upload.as_str(), "http://127.0.0.1:8090/api/upload/upload");
        assert_eq!(endpoints.check.as_str(), "http://127.0.0.1:8090/api/upload/check");
        assert_eq!(endpoints.merge.as_str(), "http://127.0.0.1:8090/api/upload/merge");
    }

    #[test]
    fn test_resolve_explicit_urls() {
        let endpoints = Endpoints::resolve(Some(&EndpointConfig::Explicit {
            upload: "https://api.example.com/upload/chunk".to_string(),
            check: "https://api.example.com/check/chunks".to_string(),
            merge: "https://api.example.com/merge/chunks".to_string(),
        }))
        .unwrap();
        assert_eq!(endpoints.check.path(), "/check/chunks");
    }

    #[test]
    fn test_invalid_urls_are_rejected() {
        let err = Endpoints::resolve(Some(&EndpointConfig::Base("not a url".to_string())))
            .unwrap_err();
        assert!(matches!(err, UploadError::InvalidUrl { .. }));

        let err = Endpoints::resolve(Some(&EndpointConfig::Explicit {
            upload: "https://api.example.com/upload".to_string(),
            check: "::bad::".to_string(),
            merge: "https://api.example.com/merge".to_string(),
        }))
        .unwrap_err();
        assert!(matches!(err, UploadError::InvalidUrl { ref url } if url == "::bad::"));

        assert!(matches!(
            Endpoints::resolve(None),
            Err(UploadError::Validation { .. })
        ));
    }

    #[test]
    fn test_options_validate_config_first() {
        let mut config = UploadConfig::with_base_url("http://localhost/api");
        config.concurrency = 0;
        assert!(UploadOptions::new(config, UploadCallbacks::default()).is_err());
    }
}
