// 分片传输调度器
//
// 调度规则：
// - 待上传分片按索引升序派发
// - 同时在途的请求不超过 concurrency（Semaphore 控制，JoinSet 管理任务）
// - 任务结果只在协调任务中处理，已上传集合与进度不会被并发修改
// - 任一分片重试耗尽后失败：取消整批任务，返回 ChunkFailed
// - 被暂停/取消的请求返回 Cancelled，不计为失败

use crate::error::{Result, UploadError};
use crate::uploader::retry::RetryPolicy;
use crate::uploader::{UploadApi, UploadChunkManager, UploadFile};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// 单个分片任务的输出：(分片索引, 上传结果)
type ChunkOutcome = (usize, Result<Value>);

/// 一次批量传输的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// 本次上传成功的分片数
    pub uploaded_chunks: usize,
    /// 同时在途请求数的峰值
    pub peak_in_flight: usize,
}

/// 在途请求计数
#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// 分片传输调度器
pub struct TransferScheduler {
    api: UploadApi,
    concurrency: usize,
    chunk_policy: RetryPolicy,
}

impl TransferScheduler {
    pub fn new(api: UploadApi) -> Self {
        let config = &api.options().config;
        let concurrency = config.concurrency.max(1);
        let chunk_policy = RetryPolicy::new(config.chunk_max_retries, config.chunk_retry_backoff_ms);
        Self {
            api,
            concurrency,
            chunk_policy,
        }
    }

    /// 上传所有未完成的分片
    ///
    /// # 参数
    /// * `file` - 待上传文件
    /// * `file_id` - 文件标识
    /// * `chunk_manager` - 分片管理器（已合并服务器报告的分片）
    /// * `on_chunk_done` - 每个分片成功后调用，参数为 (分片索引, 最新进度)
    /// * `cancel_token` - 本次上传尝试的取消令牌
    pub async fn upload_all<F>(
        &self,
        file: &UploadFile,
        file_id: &str,
        chunk_manager: &mut UploadChunkManager,
        mut on_chunk_done: F,
        cancel_token: &CancellationToken,
    ) -> Result<TransferReport>
    where
        F: FnMut(usize, u8),
    {
        let total_chunks = chunk_manager.chunk_count();
        let mut pending = chunk_manager.pending().into_iter().peekable();
        let mut report = TransferReport::default();

        if pending.peek().is_none() {
            return Ok(report);
        }

        info!(
            "[并发上传] 开始上传 {} 个分片（共 {} 个），并发数: {}",
            chunk_manager.chunk_count() - chunk_manager.uploaded_count(),
            total_chunks,
            self.concurrency
        );

        // 本批次的取消令牌，退出时（包括出错返回）自动取消剩余请求
        let batch_token = cancel_token.child_token();
        let _batch_guard = batch_token.clone().drop_guard();

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let in_flight = Arc::new(InFlight::default());
        let mut join_set: JoinSet<ChunkOutcome> = JoinSet::new();

        while pending.peek().is_some() {
            if batch_token.is_cancelled() {
                join_set.abort_all();
                return Err(UploadError::Cancelled);
            }

            let permit = match semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    // 窗口已满，等待一个任务完成
                    let joined = tokio::select! {
                        biased;
                        _ = batch_token.cancelled() => {
                            join_set.abort_all();
                            return Err(UploadError::Cancelled);
                        }
                        joined = join_set.join_next() => joined,
                    };
                    if let Some(result) = joined {
                        self.handle_chunk_result(
                            result,
                            chunk_manager,
                            &mut on_chunk_done,
                            &mut report,
                            &batch_token,
                            &mut join_set,
                        )?;
                    }
                    continue;
                }
            };

            let Some(chunk) = pending.next() else {
                break;
            };

            let api = self.api.clone();
            let file = file.clone();
            let file_id = file_id.to_string();
            let policy = self.chunk_policy;
            let request_token = batch_token.child_token();
            let in_flight = in_flight.clone();

            join_set.spawn(async move {
                in_flight.enter();
                let result = api
                    .upload_chunk(&file, &file_id, &chunk, total_chunks, policy, &request_token)
                    .await;
                in_flight.leave();

                // 释放窗口
                drop(permit);

                (chunk.index, result)
            });

            // 非阻塞处理已经完成的任务
            while let Some(result) = join_set.try_join_next() {
                self.handle_chunk_result(
                    result,
                    chunk_manager,
                    &mut on_chunk_done,
                    &mut report,
                    &batch_token,
                    &mut join_set,
                )?;
            }
        }

        // 等待剩余任务
        loop {
            let joined = tokio::select! {
                biased;
                _ = batch_token.cancelled() => {
                    join_set.abort_all();
                    return Err(UploadError::Cancelled);
                }
                joined = join_set.join_next() => joined,
            };
            let Some(result) = joined else {
                break;
            };
            self.handle_chunk_result(
                result,
                chunk_manager,
                &mut on_chunk_done,
                &mut report,
                &batch_token,
                &mut join_set,
            )?;
        }

        if batch_token.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        report.peak_in_flight = in_flight.peak();
        info!(
            "[并发上传] 本次上传 {} 个分片，已完成 {}/{}，最大并发 {}",
            report.uploaded_chunks,
            chunk_manager.uploaded_count(),
            total_chunks,
            report.peak_in_flight
        );

        Ok(report)
    }

    /// 处理分片上传结果
    fn handle_chunk_result<F>(
        &self,
        result: std::result::Result<ChunkOutcome, JoinError>,
        chunk_manager: &mut UploadChunkManager,
        on_chunk_done: &mut F,
        report: &mut TransferReport,
        batch_token: &CancellationToken,
        join_set: &mut JoinSet<ChunkOutcome>,
    ) -> Result<()>
    where
        F: FnMut(usize, u8),
    {
        match result {
            Ok((index, Ok(_))) => {
                if chunk_manager.mark_uploaded(index) {
                    report.uploaded_chunks += 1;
                }
                let progress = chunk_manager.progress();
                debug!(
                    "分片 #{} 上传成功，进度 {}% ({}/{})",
                    index,
                    progress,
                    chunk_manager.uploaded_count(),
                    chunk_manager.chunk_count()
                );
                on_chunk_done(index, progress);
                Ok(())
            }
            Ok((index, Err(UploadError::Cancelled))) => {
                debug!("分片 #{} 已取消", index);
                Ok(())
            }
            Ok((index, Err(e))) => {
                error!("分片 #{} 上传失败，取消剩余分片: {}", index, e);
                batch_token.cancel();
                join_set.abort_all();
                Err(UploadError::ChunkFailed {
                    index,
                    source: Box::new(e),
                })
            }
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => {
                error!("分片任务异常: {}", e);
                batch_token.cancel();
                join_set.abort_all();
                Err(UploadError::Network(format!("分片任务异常: {}", e)))
            }
        }
    }

    /// 不分片，直接上传整个文件
    ///
    /// 使用整文件重试策略（3 次，初始退避 1 秒）
    pub async fn upload_whole(
        &self,
        file: &UploadFile,
        file_id: &str,
        cancel_token: &CancellationToken,
    ) -> Result<Value> {
        let request_token = cancel_token.child_token();
        self.api
            .upload_file(file, file_id, RetryPolicy::default(), &request_token)
            .await
    }
}
