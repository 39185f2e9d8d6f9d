// 上传分片管理
//
// 分片规则：
// - 分片数量 = ceil(文件大小 / 分片大小)
// - 最后一个分片可能小于分片大小
// - 空文件没有分片，视为已经上传完成

use crate::uploader::UploadFile;
use bit_set::BitSet;
use bytes::Bytes;
use std::ops::Range;
use tracing::{debug, info};

/// 默认上传分片大小: 2MB
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 2 * 1024 * 1024;

/// 上传分片信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    /// 分片索引
    pub index: usize,
    /// 字节范围
    pub range: Range<u64>,
}

impl UploadChunk {
    pub fn new(index: usize, range: Range<u64>) -> Self {
        Self { index, range }
    }

    /// 分片大小
    pub fn size(&self) -> u64 {
        self.range.end - self.range.start
    }

    /// 分片内容（共享文件内存）
    pub fn payload(&self, file: &UploadFile) -> Bytes {
        file.slice(self.range.clone())
    }
}

/// 将文件切分为分片
///
/// 调用方保证 `chunk_size > 0`（配置阶段已校验）
pub fn split(total_size: u64, chunk_size: u64) -> Vec<UploadChunk> {
    debug_assert!(chunk_size > 0);

    let mut chunks = Vec::with_capacity(total_size.div_ceil(chunk_size) as usize);
    let mut offset = 0u64;
    let mut index = 0;

    while offset < total_size {
        let end = std::cmp::min(offset + chunk_size, total_size);
        chunks.push(UploadChunk::new(index, offset..end));
        offset = end;
        index += 1;
    }

    chunks
}

/// 根据已上传字节数计算进度百分比（四舍五入）
///
/// 空文件没有需要上传的内容，进度视为 100
pub fn progress_percent(uploaded_bytes: u64, total_size: u64) -> u8 {
    if total_size == 0 {
        return 100;
    }
    ((uploaded_bytes as f64 / total_size as f64) * 100.0).round() as u8
}

/// 上传分片管理器
///
/// 持有分片列表和已上传分片集合，集合只会在一次上传尝试内增长
#[derive(Debug)]
pub struct UploadChunkManager {
    /// 所有分片
    chunks: Vec<UploadChunk>,
    /// 已确认上传的分片索引
    uploaded: BitSet,
    /// 文件总大小
    total_size: u64,
}

impl UploadChunkManager {
    /// 创建新的上传分片管理器
    ///
    /// # 参数
    /// * `total_size` - 文件总大小
    /// * `chunk_size` - 分片大小
    pub fn new(total_size: u64, chunk_size: u64) -> Self {
        let chunks = split(total_size, chunk_size);

        info!(
            "创建上传分片管理器: 文件大小={} bytes, 分片大小={} bytes, 分片数量={}",
            total_size,
            chunk_size,
            chunks.len()
        );

        Self {
            uploaded: BitSet::with_capacity(chunks.len()),
            chunks,
            total_size,
        }
    }

    /// 使用默认分片大小创建（2MB）
    pub fn with_default_chunk_size(total_size: u64) -> Self {
        Self::new(total_size, DEFAULT_UPLOAD_CHUNK_SIZE)
    }

    /// 合并服务器报告的已上传分片
    ///
    /// 超出分片范围的索引会被忽略，返回实际采纳的数量
    pub fn seed_uploaded<I>(&mut self, indexes: I) -> usize
    where
        I: IntoIterator<Item = usize>,
    {
        let mut accepted = 0;
        for index in indexes {
            if self.mark_uploaded(index) {
                accepted += 1;
            } else if index >= self.chunks.len() {
                debug!("忽略越界的已上传分片索引: {}", index);
            }
        }
        accepted
    }

    /// 标记分片为已上传
    ///
    /// 返回 false 表示索引越界或已经标记过
    pub fn mark_uploaded(&mut self, index: usize) -> bool {
        if index >= self.chunks.len() {
            return false;
        }
        self.uploaded.insert(index)
    }

    /// 待上传分片（按索引升序）
    pub fn pending(&self) -> Vec<UploadChunk> {
        self.chunks
            .iter()
            .filter(|c| !self.uploaded.contains(c.index))
            .cloned()
            .collect()
    }

    /// 获取分片数量
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// 获取已上传的分片数量
    pub fn uploaded_count(&self) -> usize {
        self.uploaded.len()
    }

    /// 已上传分片索引（升序）
    pub fn uploaded_indexes(&self) -> Vec<usize> {
        self.uploaded.iter().collect()
    }

    /// 获取已上传的字节数
    pub fn uploaded_bytes(&self) -> u64 {
        self.uploaded.iter().map(|i| self.chunks[i].size()).sum()
    }

    /// 计算上传进度（0-100）
    pub fn progress(&self) -> u8 {
        progress_percent(self.uploaded_bytes(), self.total_size)
    }

    /// 是否全部完成
    pub fn is_completed(&self) -> bool {
        self.uploaded.len() == self.chunks.len()
    }
}
