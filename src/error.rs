// 上传错误类型
//
// 每一类错误对应一个变体，携带定位问题所需的字段：
// - 配置/调用顺序错误：Validation
// - 上传前校验：FileType / FileTooLarge
// - 接口地址：InvalidUrl
// - 网络：Http / Network
// - 文件标识计算：HashTimeout / HashComputation

use thiserror::Error;

/// 上传过程中的错误
#[derive(Debug, Error)]
pub enum UploadError {
    /// 配置或调用顺序错误
    #[error("参数校验失败 [{param}]: {message}")]
    Validation { param: String, message: String },

    /// 文件类型不在允许列表中
    #[error("不支持的文件类型: {actual_type} ({file_name})")]
    FileType {
        file_name: String,
        actual_type: String,
        allowed_types: Vec<String>,
    },

    /// 文件大小超出限制
    #[error("文件大小超出限制: {} > {}", size_label(.actual_size), size_label(.max_size))]
    FileTooLarge {
        file_name: String,
        max_size: u64,
        actual_size: u64,
    },

    /// 接口地址格式错误
    #[error("无效的URL格式: {url}")]
    InvalidUrl { url: String },

    /// 非 2xx 响应
    #[error("HTTP错误: {status} ({url})")]
    Http { status: u16, url: String, body: String },

    /// 连接失败、传输超时等网络层错误
    #[error("网络错误: {0}")]
    Network(String),

    /// 文件标识计算超时
    #[error("文件哈希计算超时")]
    HashTimeout,

    /// 文件标识计算失败
    #[error("文件哈希计算失败: {0}")]
    HashComputation(String),

    /// 分片在重试耗尽后仍然失败
    #[error("分片 {index} 上传失败: {source}")]
    ChunkFailed {
        index: usize,
        #[source]
        source: Box<UploadError>,
    },

    /// 用户主动暂停或取消（不是失败）
    #[error("上传已取消")]
    Cancelled,

    #[error("I/O错误: {0}")]
    Io(#[from] std::io::Error),
}

fn size_label(bytes: &u64) -> String {
    crate::uploader::format_size(*bytes)
}

impl UploadError {
    pub fn validation(param: impl Into<String>, message: impl Into<String>) -> Self {
        UploadError::Validation {
            param: param.into(),
            message: message.into(),
        }
    }

    /// 是否可重试
    ///
    /// 只有 5xx 响应和网络层错误会重试，4xx 与取消永远不重试
    pub fn is_retriable(&self) -> bool {
        match self {
            UploadError::Http { status, .. } => (500..600).contains(status),
            UploadError::Network(_) => true,
            _ => false,
        }
    }

    /// 是否为用户取消
    pub fn is_cancelled(&self) -> bool {
        matches!(self, UploadError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        let server_error = UploadError::Http {
            status: 503,
            url: "http://localhost/upload".to_string(),
            body: String::new(),
        };
        assert!(server_error.is_retriable());

        let not_found = UploadError::Http {
            status: 404,
            url: "http://localhost/upload".to_string(),
            body: String::new(),
        };
        assert!(!not_found.is_retriable());

        assert!(UploadError::Network("connection reset".to_string()).is_retriable());
        assert!(!UploadError::Cancelled.is_retriable());
        assert!(!UploadError::HashTimeout.is_retriable());
    }

    #[test]
    fn test_chunk_failed_message_carries_index() {
        let err = UploadError::ChunkFailed {
            index: 7,
            source: Box::new(UploadError::Http {
                status: 404,
                url: "http://localhost/upload".to_string(),
                body: "missing".to_string(),
            }),
        };
        let message = err.to_string();
        assert!(message.contains("分片 7"));
        assert!(message.contains("404"));
    }

    #[test]
    fn test_file_too_large_message() {
        let err = UploadError::FileTooLarge {
            file_name: "a.bin".to_string(),
            max_size: 50 * 1024 * 1024,
            actual_size: 60 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "文件大小超出限制: 60.00 MB > 50.00 MB");
    }
}
