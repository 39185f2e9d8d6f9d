// 带重试的请求发送
//
// 重试规则：
// - 5xx 服务器错误：重试
// - 连接失败、传输超时、请求发送中断：重试
// - 4xx 客户端错误：不重试
// - 用户取消：不重试，立即返回 Cancelled
//
// 退避延迟从第一次重试开始计算：base, 2·base, 4·base, ...

use crate::error::{Result, UploadError};
use reqwest::{RequestBuilder, Response};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// 分片上传默认最大重试次数
pub const CHUNK_MAX_RETRIES: u32 = 5;

/// 分片上传初始退避延迟（毫秒）
pub const CHUNK_INITIAL_BACKOFF_MS: u64 = 2000;

/// 整文件上传默认最大重试次数
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 整文件上传初始退避延迟（毫秒）
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大重试次数（不含首次请求）
    pub max_retries: u32,
    /// 初始退避延迟（毫秒）
    pub initial_backoff_ms: u64,
}

impl RetryPolicy {
    /// 只请求一次，不重试
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        initial_backoff_ms: 0,
    };

    pub fn new(max_retries: u32, initial_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_INITIAL_BACKOFF_MS)
    }
}

/// 计算指数退避延迟
///
/// # 延迟序列（base=1000）
/// - retry_count=0: 1000ms
/// - retry_count=1: 2000ms
/// - retry_count=2: 4000ms
pub fn calculate_backoff_delay(retry_count: u32, initial_backoff_ms: u64) -> u64 {
    initial_backoff_ms.saturating_mul(2u64.saturating_pow(retry_count))
}

/// 网络层错误分类
///
/// 连接、超时、请求发送失败视为可重试的网络错误，其余（如构建请求失败）不重试
fn classify_transport_error(e: reqwest::Error) -> UploadError {
    if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
        UploadError::Network(e.to_string())
    } else {
        UploadError::validation("request", e.to_string())
    }
}

/// 发送请求，失败时按策略重试
///
/// `build` 每次尝试都会被调用一次，因为 multipart 请求体只能使用一次。
/// 非 5xx 的响应原样返回，由调用方校验状态码。
pub async fn send_with_retry<F>(
    build: F,
    policy: RetryPolicy,
    cancel_token: &CancellationToken,
) -> Result<Response>
where
    F: Fn() -> RequestBuilder,
{
    let mut attempt = 0u32;

    loop {
        if cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        let sent = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(UploadError::Cancelled),
            sent = build().send() => sent,
        };

        let error = match sent {
            Ok(response) if response.status().is_server_error() => {
                let status = response.status().as_u16();
                let url = response.url().to_string();
                let body = response.text().await.unwrap_or_default();
                UploadError::Http { status, url, body }
            }
            Ok(response) => return Ok(response),
            Err(e) => classify_transport_error(e),
        };

        if !error.is_retriable() || attempt >= policy.max_retries {
            debug!("请求失败，不再重试 (已重试 {} 次): {}", attempt, error);
            return Err(error);
        }

        let backoff_ms = calculate_backoff_delay(attempt, policy.initial_backoff_ms);
        attempt += 1;
        warn!(
            "请求失败，等待 {}ms 后重试 ({}/{}): {}",
            backoff_ms, attempt, policy.max_retries, error
        );

        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => return Err(UploadError::Cancelled),
            _ = tokio::time::sleep(Duration::from_millis(backoff_ms)) => {}
        }
    }
}
