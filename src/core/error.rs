use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 错误分类 - 对外暴露的稳定类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SourceUnavailable,
    ConfigInvalid,
    ModelLoadError,
    UnsupportedFormat,
    IOFailure,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::SourceUnavailable => "SourceUnavailable",
            ErrorKind::ConfigInvalid => "ConfigInvalid",
            ErrorKind::ModelLoadError => "ModelLoadError",
            ErrorKind::UnsupportedFormat => "UnsupportedFormat",
            ErrorKind::IOFailure => "IOFailure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("Video source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("Model load failed: {0}")]
    ModelLoad(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LabelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LabelError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            LabelError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            LabelError::ModelLoad(_) | LabelError::Inference(_) => ErrorKind::ModelLoadError,
            LabelError::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            LabelError::Io(_)
            | LabelError::Image(_)
            | LabelError::Archive(_)
            | LabelError::Storage(_) => ErrorKind::IOFailure,
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        LabelError::ConfigInvalid(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        LabelError::UnsupportedFormat(message.into())
    }
}

impl From<serde_yaml::Error> for LabelError {
    fn from(e: serde_yaml::Error) -> Self {
        LabelError::ConfigInvalid(format!("YAML: {}", e))
    }
}

impl From<json5::Error> for LabelError {
    fn from(e: json5::Error) -> Self {
        LabelError::ConfigInvalid(format!("JSON5: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, LabelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            LabelError::SourceUnavailable("x".into()).kind(),
            ErrorKind::SourceUnavailable
        );
        assert_eq!(LabelError::config("x").kind(), ErrorKind::ConfigInvalid);
        assert_eq!(LabelError::ModelLoad("x".into()).kind(), ErrorKind::ModelLoadError);
        assert_eq!(LabelError::unsupported("x").kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(LabelError::Storage("x".into()).kind(), ErrorKind::IOFailure);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(LabelError::from(io).kind(), ErrorKind::IOFailure);
    }

    #[test]
    fn test_yaml_error_is_config() {
        let err: LabelError = serde_yaml::from_str::<Vec<u32>>("{ not: [a list").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
    }
}
