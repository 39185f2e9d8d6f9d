// 断点续传协商
//
// 上传前向服务器查询该文件标识已经存在哪些分片。
// 查询失败（超时、非 2xx、网络错误、响应无法解析）时按"没有任何分片"处理，
// 宁可重新上传，也不阻塞用户或猜测服务器状态。

use crate::error::UploadError;
use crate::uploader::UploadApi;
use bit_set::BitSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// 断点续传协商器
pub struct ResumeNegotiator<'a> {
    api: &'a UploadApi,
    timeout: Duration,
}

impl<'a> ResumeNegotiator<'a> {
    pub fn new(api: &'a UploadApi, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    /// 查询已上传分片
    ///
    /// # 参数
    /// * `file_id` - 文件标识
    /// * `chunk_count` - 分片总数，超出范围的索引会被丢弃
    /// * `on_error` - 查询失败时的错误汇报
    /// * `cancel_token` - 取消令牌
    ///
    /// # 返回
    /// 已上传分片集合；失败或被取消时为空集合
    pub async fn check_uploaded<F>(
        &self,
        file_id: &str,
        chunk_count: usize,
        on_error: F,
        cancel_token: &CancellationToken,
    ) -> BitSet
    where
        F: Fn(String),
    {
        let result =
            tokio::time::timeout(self.timeout, self.api.check_uploaded(file_id, cancel_token))
                .await;

        match result {
            Ok(Ok(indexes)) => {
                let uploaded: BitSet = indexes
                    .into_iter()
                    .filter(|&index| index < chunk_count)
                    .collect();
                info!(
                    "服务器已有分片: fileId={}, 数量={}/{}",
                    file_id,
                    uploaded.len(),
                    chunk_count
                );
                uploaded
            }
            Ok(Err(UploadError::Cancelled)) => BitSet::new(),
            Ok(Err(e)) => {
                warn!("检查已上传分片失败，将重新上传全部分片: {}", e);
                on_error(format!("检查已上传分片失败: {}", e));
                BitSet::new()
            }
            Err(_) => {
                warn!(
                    "查询已上传分片超时 ({:?})，将重新上传全部分片",
                    self.timeout
                );
                on_error(format!("查询超时: 超过 {}ms 未响应", self.timeout.as_millis()));
                BitSet::new()
            }
        }
    }
}
