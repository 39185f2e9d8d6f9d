// 分片合并
//
// 所有分片都已在服务器上时，请求服务器按顺序拼接成完整文件。
// 合并请求只发送一次，失败后由调用方决定是否重新 start()。

use crate::error::Result;
use crate::uploader::UploadApi;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// 分片合并器
pub struct Finalizer<'a> {
    api: &'a UploadApi,
}

impl<'a> Finalizer<'a> {
    pub fn new(api: &'a UploadApi) -> Self {
        Self { api }
    }

    /// 请求合并
    ///
    /// # 返回
    /// 服务器返回内容（JSON，或包装为 `{"data": text}` 的文本）
    pub async fn merge(
        &self,
        file_id: &str,
        file_name: &str,
        total_chunks: usize,
        cancel_token: &CancellationToken,
    ) -> Result<Value> {
        match self
            .api
            .merge(file_id, file_name, total_chunks, cancel_token)
            .await
        {
            Ok(result) => {
                info!("✓ 分片合并成功: fileName={}, totalChunks={}", file_name, total_chunks);
                Ok(result)
            }
            Err(e) => {
                if !e.is_cancelled() {
                    error!("分片合并失败: fileName={}, 错误: {}", file_name, e);
                }
                Err(e)
            }
        }
    }
}
