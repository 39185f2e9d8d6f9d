// 分片上传模块
//
// 上传流程：
// 1. 计算文件标识（MD5 + 文件名 + 大小），阻塞线程池中执行
// 2. 按固定大小切分分片
// 3. 查询服务器已有分片（断点续传），失败时视为没有分片
// 4. 滑动窗口并发上传剩余分片，5xx/网络错误指数退避重试
// 5. 所有分片到齐后请求合并
//
// 支持暂停、继续、取消，也可以关闭分片直接上传整个文件

pub mod chunk;
pub mod client;
pub mod controller;
pub mod factory;
pub mod file;
pub mod hash;
pub mod merge;
pub mod negotiator;
pub mod options;
pub mod retry;
pub mod scheduler;
pub mod task;
pub mod validation;

pub use chunk::{
    progress_percent, split, UploadChunk, UploadChunkManager, DEFAULT_UPLOAD_CHUNK_SIZE,
};
pub use client::{validate_response, UploadApi};
pub use controller::UploadController;
pub use factory::{SharedUploaderFactory, UploaderFactory};
pub use file::{UploadFile, DEFAULT_MIME_TYPE};
pub use hash::{ContentHasher, ContentIdentifier, Md5Hasher};
pub use merge::Finalizer;
pub use negotiator::ResumeNegotiator;
pub use options::{Endpoints, UploadCallbacks, UploadOptions};
pub use retry::{calculate_backoff_delay, send_with_retry, RetryPolicy};
pub use scheduler::{TransferReport, TransferScheduler};
pub use task::{UploadSession, UploadState};
pub use validation::{format_size, get_file_ext, validate_file_size, validate_file_type};
