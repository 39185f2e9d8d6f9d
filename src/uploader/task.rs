// 上传会话定义
//
// UploadSession 是控制器对外暴露的只读快照

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 上传状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// 未选择文件
    #[default]
    Idle,
    /// 文件已通过校验，等待开始
    Ready,
    /// 上传中（包括计算文件标识、查询已上传分片、合并）
    Uploading,
    /// 已暂停
    Paused,
    /// 已完成
    Complete,
    /// 失败
    Error,
}

/// 上传会话快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// 会话ID，cancel 后重新生成
    pub id: String,
    /// 当前状态
    pub state: UploadState,
    /// 文件标识（计算完成后才有）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// 文件名
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// 文件大小
    pub file_size: u64,
    /// 总分片数
    #[serde(default)]
    pub total_chunks: usize,
    /// 已完成分片数
    #[serde(default)]
    pub completed_chunks: usize,
    /// 上传进度 (0-100)
    pub progress: u8,
    /// 最近一次错误
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
}

impl UploadSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            state: UploadState::Idle,
            file_id: None,
            file_name: None,
            file_size: 0,
            total_chunks: 0,
            completed_chunks: 0,
            progress: 0,
            error: None,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 选择了新文件
    pub fn mark_ready(&mut self, file_name: &str, file_size: u64) {
        self.state = UploadState::Ready;
        self.file_name = Some(file_name.to_string());
        self.file_size = file_size;
        self.file_id = None;
        self.total_chunks = 0;
        self.completed_chunks = 0;
        self.progress = 0;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self) {
        self.state = UploadState::Uploading;
        self.error = None;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 记录分片信息
    pub fn set_chunks(&mut self, total_chunks: usize, completed_chunks: usize, progress: u8) {
        self.total_chunks = total_chunks;
        self.completed_chunks = completed_chunks;
        self.progress = progress;
    }

    /// 标记为已暂停
    pub fn mark_paused(&mut self) {
        self.state = UploadState::Paused;
    }

    /// 标记为已完成
    pub fn mark_complete(&mut self) {
        self.state = UploadState::Complete;
        self.progress = 100;
        self.completed_chunks = self.total_chunks;
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.state = UploadState::Error;
        self.error = Some(error);
    }

    /// 回到初始状态（新的会话ID）
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, UploadState::Complete | UploadState::Error)
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}
