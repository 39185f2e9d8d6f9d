// 待上传文件

use anyhow::Context;
use bytes::Bytes;
use std::ops::Range;
use std::path::Path;

/// 未知类型时使用的 MIME
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 待上传的文件
///
/// 内容只读，分片通过 `slice` 共享同一块内存，不会复制数据
#[derive(Debug, Clone)]
pub struct UploadFile {
    name: String,
    mime_type: String,
    data: Bytes,
}

impl UploadFile {
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// 从本地路径读取文件
    ///
    /// # 参数
    /// * `path` - 本地文件路径
    /// * `mime_type` - 文件 MIME 类型，未提供时使用 `application/octet-stream`
    pub async fn from_path(path: &Path, mime_type: Option<&str>) -> anyhow::Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("无法获取文件名: {:?}", path))?
            .to_string();

        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取上传文件失败: {:?}", path))?;

        Ok(Self::new(
            name,
            mime_type.unwrap_or(DEFAULT_MIME_TYPE),
            data,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// 完整文件内容
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// 指定字节范围的内容视图
    pub fn slice(&self, range: Range<u64>) -> Bytes {
        self.data.slice(range.start as usize..range.end as usize)
    }
}
