// 上传前的文件校验

use crate::error::{Result, UploadError};
use crate::uploader::UploadFile;

const SIZE_UNITS: [&str; 6] = ["Bytes", "KB", "MB", "GB", "TB", "PB"];

/// 获取文件扩展名（小写，不带点）
///
/// `.bashrc` 这类以点开头且没有其他点的文件名视为无扩展名
pub fn get_file_ext(file_name: &str) -> String {
    match file_name.rfind('.') {
        Some(0) | None => String::new(),
        Some(pos) => file_name[pos + 1..].to_lowercase(),
    }
}

/// 格式化文件大小，保留两位小数
pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, SIZE_UNITS[unit])
}

/// 校验文件类型
///
/// `allowed_types` 中每一项可以是 MIME 类型，也可以是扩展名（带点或不带点，大小写不敏感）
pub fn validate_file_type(file: &UploadFile, allowed_types: &[String]) -> Result<()> {
    if allowed_types.is_empty() {
        return Ok(());
    }

    let ext = get_file_ext(file.name());
    let matched = allowed_types.iter().any(|allowed| {
        let normalized = allowed.trim_start_matches('.').to_lowercase();
        file.mime_type() == allowed.as_str() || (!ext.is_empty() && ext == normalized)
    });

    if matched {
        Ok(())
    } else {
        Err(UploadError::FileType {
            file_name: file.name().to_string(),
            actual_type: file.mime_type().to_string(),
            allowed_types: allowed_types.to_vec(),
        })
    }
}

/// 校验文件大小
pub fn validate_file_size(file: &UploadFile, max_size: u64) -> Result<()> {
    if file.size() > max_size {
        return Err(UploadError::FileTooLarge {
            file_name: file.name().to_string(),
            max_size,
            actual_size: file.size(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_file() -> UploadFile {
        UploadFile::new("test.txt", "text/plain", b"test content".to_vec())
    }

    #[test]
    fn test_get_file_ext() {
        assert_eq!(get_file_ext(""), "");
        assert_eq!(get_file_ext("README"), "");
        assert_eq!(get_file_ext(".bashrc"), "");
        assert_eq!(get_file_ext("photo.JPG"), "jpg");
        assert_eq!(get_file_ext("archive.tar.gz"), "gz");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(512), "512.00 Bytes");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(50 * 1024 * 1024), "50.00 MB");
    }

    #[test]
    fn test_validate_file_type() {
        let file = text_file();
        assert!(validate_file_type(&file, &[]).is_ok());
        assert!(validate_file_type(&file, &["text/plain".to_string()]).is_ok());
        assert!(validate_file_type(&file, &["image/jpeg".to_string(), ".TXT".to_string()]).is_ok());
        assert!(validate_file_type(&file, &["txt".to_string()]).is_ok());

        let err = validate_file_type(&file, &["image/jpeg".to_string()]).unwrap_err();
        assert!(matches!(
            err,
            UploadError::FileType { ref actual_type, .. } if actual_type == "text/plain"
        ));
    }

    #[test]
    fn test_validate_file_size() {
        let file = text_file();
        assert!(validate_file_size(&file, 12).is_ok());
        assert!(matches!(
            validate_file_size(&file, 11),
            Err(UploadError::FileTooLarge {
                max_size: 11,
                actual_size: 12,
                ..
            })
        ));
    }
}
