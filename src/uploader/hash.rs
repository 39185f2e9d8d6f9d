// 文件标识计算
//
// 文件标识 = "<内容 MD5>-<文件名>-<文件大小>"
//
// 同样的内容、文件名、大小总是得到同样的标识，服务器据此识别断点续传。
// 哈希在阻塞线程池中按固定块大小流式计算（与上传分片大小无关），
// 每读完一块汇报一次进度，不会阻塞异步运行时。

use crate::error::{Result, UploadError};
use crate::uploader::UploadFile;
use async_trait::async_trait;
use bytes::Bytes;
use md5::Context as Md5Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// 哈希计算每次读取的块大小: 2MB
pub const HASH_BLOCK_SIZE: usize = 2 * 1024 * 1024;

/// 哈希计算超时上限: 30 秒
pub const DEFAULT_HASH_TIMEOUT: Duration = Duration::from_secs(30);

/// 内容哈希计算
///
/// 通过 `progress` 发送 0-100 的进度，要求单调不减且最后一次为 100
#[async_trait]
pub trait ContentHasher: Send + Sync {
    async fn hash(
        &self,
        data: Bytes,
        progress: mpsc::UnboundedSender<u8>,
        cancel_token: CancellationToken,
    ) -> Result<String>;
}

/// MD5 哈希（默认实现）
#[derive(Debug, Clone)]
pub struct Md5Hasher {
    block_size: usize,
}

impl Md5Hasher {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }
}

impl Default for Md5Hasher {
    fn default() -> Self {
        Self::new(HASH_BLOCK_SIZE)
    }
}

#[async_trait]
impl ContentHasher for Md5Hasher {
    async fn hash(
        &self,
        data: Bytes,
        progress: mpsc::UnboundedSender<u8>,
        cancel_token: CancellationToken,
    ) -> Result<String> {
        let block_size = self.block_size;

        // 在阻塞线程池中执行哈希计算
        tokio::task::spawn_blocking(move || {
            md5_blocks_sync(&data, block_size, &progress, &cancel_token)
        })
        .await
        .map_err(|e| UploadError::HashComputation(format!("哈希任务执行失败: {}", e)))?
    }
}

/// 同步分块计算 MD5（内部方法）
fn md5_blocks_sync(
    data: &[u8],
    block_size: usize,
    progress: &mpsc::UnboundedSender<u8>,
    cancel_token: &CancellationToken,
) -> Result<String> {
    let total = data.len();
    let mut hasher = Md5Context::new();
    let mut offset = 0usize;
    let mut last_reported = 0u8;

    for block in data.chunks(block_size) {
        if cancel_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        hasher.consume(block);
        offset += block.len();

        if offset < total {
            let percent = (offset as u128 * 100 / total as u128) as u8;
            if percent > last_reported {
                last_reported = percent;
                // 接收端已关闭时忽略
                let _ = progress.send(percent);
            }
        }
    }

    let _ = progress.send(100);
    Ok(format!("{:x}", hasher.compute()))
}

/// 文件标识计算器
#[derive(Clone)]
pub struct ContentIdentifier {
    hasher: Arc<dyn ContentHasher>,
    timeout: Duration,
}

impl ContentIdentifier {
    /// 使用 MD5 哈希
    pub fn new(timeout: Duration) -> Self {
        Self::with_hasher(Arc::new(Md5Hasher::default()), timeout)
    }

    pub fn with_hasher(hasher: Arc<dyn ContentHasher>, timeout: Duration) -> Self {
        Self { hasher, timeout }
    }

    /// 计算文件标识
    ///
    /// # 参数
    /// * `file` - 待上传文件
    /// * `on_progress` - 哈希进度回调
    /// * `cancel_token` - 取消令牌（暂停/取消上传时触发）
    ///
    /// # 返回
    /// `"<hash>-<fileName>-<fileSize>"`；超时返回 `HashTimeout`
    pub async fn identify<F>(
        &self,
        file: &UploadFile,
        on_progress: F,
        cancel_token: &CancellationToken,
    ) -> Result<String>
    where
        F: Fn(u8) + Send + Sync,
    {
        let started = std::time::Instant::now();

        // 任何退出路径都会通知后台哈希任务停止
        let hash_cancel = cancel_token.child_token();
        let _hash_guard = hash_cancel.clone().drop_guard();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hash_future = self.hasher.hash(file.bytes(), tx, hash_cancel.clone());

        let work = async {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => break Err(UploadError::Cancelled),
                    Some(percent) = rx.recv() => on_progress(percent),
                    result = &mut hash_future => {
                        // 补发哈希完成前积压的进度
                        while let Ok(percent) = rx.try_recv() {
                            on_progress(percent);
                        }
                        break result;
                    }
                }
            }
        };

        let hash = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result?,
            Err(_) => {
                info!(
                    "文件哈希计算超时: name={}, size={}, timeout={:?}",
                    file.name(),
                    file.size(),
                    self.timeout
                );
                return Err(UploadError::HashTimeout);
            }
        };

        debug!(
            "文件哈希计算完成: name={}, size={}, hash={}, 耗时={:?}",
            file.name(),
            file.size(),
            hash,
            started.elapsed()
        );

        Ok(format!("{}-{}-{}", hash, file.name(), file.size()))
    }
}

impl Default for ContentIdentifier {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_TIMEOUT)
    }
}
