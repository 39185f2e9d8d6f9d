// 上传接口客户端
//
// 封装三个远程接口：
// - GET  {check}?<fileIdField>=<id>   查询已上传分片
// - POST {upload}                     上传分片 / 整个文件（multipart）
// - POST {merge}                      合并分片（JSON）

use crate::error::{Result, UploadError};
use crate::uploader::retry::{send_with_retry, RetryPolicy};
use crate::uploader::{UploadChunk, UploadFile, UploadOptions};
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 建立连接的超时时间
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// 查询已上传分片接口的响应
#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(rename = "uploadedIndexes", default)]
    uploaded_indexes: Vec<usize>,
}

/// 上传接口客户端
#[derive(Debug, Clone)]
pub struct UploadApi {
    /// HTTP客户端
    client: Client,
    /// 上传选项
    options: Arc<UploadOptions>,
}

impl UploadApi {
    pub fn new(options: Arc<UploadOptions>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| UploadError::validation("http_client", e.to_string()))?;
        Ok(Self { client, options })
    }

    /// 使用已有的 HTTP 客户端（共享连接池）
    pub fn with_client(client: Client, options: Arc<UploadOptions>) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// 查询服务器上已存在的分片索引
    ///
    /// 只发送一次请求，超时由调用方控制
    pub async fn check_uploaded(
        &self,
        file_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<Vec<usize>> {
        let url = format!(
            "{}?{}={}",
            self.options.endpoints.check,
            urlencoding::encode(self.options.file_id_field()),
            urlencoding::encode(file_id)
        );
        debug!("查询已上传分片: {}", url);

        let response =
            send_with_retry(|| self.client.get(&url), RetryPolicy::NONE, cancel_token).await?;
        let body = validate_response(response).await?;

        let parsed: CheckResponse = serde_json::from_value(body).map_err(|e| {
            UploadError::Network(format!("解析已上传分片响应失败 ({}): {}", url, e))
        })?;
        Ok(parsed.uploaded_indexes)
    }

    /// 上传单个分片
    ///
    /// 表单字段：`<fileIdField>`、`chunkIndex`、`chunk`（文件名 `<name>.part<index>`）、`totalChunks`
    pub async fn upload_chunk(
        &self,
        file: &UploadFile,
        file_id: &str,
        chunk: &UploadChunk,
        total_chunks: usize,
        policy: RetryPolicy,
        cancel_token: &CancellationToken,
    ) -> Result<Value> {
        let payload = chunk.payload(file);
        let part_name = format!("{}.part{}", file.name(), chunk.index);
        let field = self.options.file_id_field().to_string();
        let url = self.options.endpoints.upload.clone();

        debug!(
            "上传分片: fileId={}, part={}, size={} bytes",
            file_id,
            chunk.index,
            payload.len()
        );

        let response = send_with_retry(
            || {
                let part = Part::stream_with_length(payload.clone(), payload.len() as u64)
                    .file_name(part_name.clone());
                let form = Form::new()
                    .text(field.clone(), file_id.to_string())
                    .text("chunkIndex", chunk.index.to_string())
                    .part("chunk", part)
                    .text("totalChunks", total_chunks.to_string());
                self.client.post(url.clone()).multipart(form)
            },
            policy,
            cancel_token,
        )
        .await?;

        validate_response(response).await
    }

    /// 不分片，直接上传整个文件
    pub async fn upload_file(
        &self,
        file: &UploadFile,
        file_id: &str,
        policy: RetryPolicy,
        cancel_token: &CancellationToken,
    ) -> Result<Value> {
        let data = file.bytes();
        let field = self.options.file_id_field().to_string();
        let url = self.options.endpoints.upload.clone();

        info!(
            "整文件上传: name={}, size={} bytes",
            file.name(),
            file.size()
        );

        let response = send_with_retry(
            || {
                let part = Part::stream_with_length(data.clone(), data.len() as u64)
                    .file_name(file.name().to_string());
                let form = Form::new()
                    .text(field.clone(), file_id.to_string())
                    .part("file", part);
                self.client.post(url.clone()).multipart(form)
            },
            policy,
            cancel_token,
        )
        .await?;

        validate_response(response).await
    }

    /// 通知服务器合并分片
    ///
    /// 请求体：`{<fileIdField>: id, fileName, totalChunks}`，不自动重试
    pub async fn merge(
        &self,
        file_id: &str,
        file_name: &str,
        total_chunks: usize,
        cancel_token: &CancellationToken,
    ) -> Result<Value> {
        let mut body = json!({
            "fileName": file_name,
            "totalChunks": total_chunks,
        });
        body[self.options.file_id_field()] = Value::String(file_id.to_string());

        let url = self.options.endpoints.merge.clone();
        info!(
            "请求合并分片: fileId={}, fileName={}, totalChunks={}",
            file_id, file_name, total_chunks
        );

        let response = send_with_retry(
            || self.client.post(url.clone()).json(&body),
            RetryPolicy::NONE,
            cancel_token,
        )
        .await?;

        validate_response(response).await
    }
}

/// 校验响应状态并解析内容
///
/// - 非 2xx：返回 `Http` 错误，携带状态码、地址和响应体
/// - `Content-Type` 为 JSON：解析为 JSON
/// - 其他：包装为 `{"data": "<文本>"}`
pub async fn validate_response(response: Response) -> Result<Value> {
    let status = response.status();
    let url = response.url().to_string();

    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "无法获取错误详情".to_string());
        return Err(UploadError::Http {
            status: status.as_u16(),
            url,
            body,
        });
    }

    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false);

    let text = response
        .text()
        .await
        .map_err(|e| UploadError::Network(format!("读取响应失败 ({}): {}", url, e)))?;

    if is_json {
        serde_json::from_str(&text)
            .map_err(|e| UploadError::Network(format!("响应解析失败 ({}): {}", url, e)))
    } else {
        Ok(json!({ "data": text }))
    }
}
