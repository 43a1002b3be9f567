//! 导出格式 - 按消费工具约定的目录结构落盘
//!
//! 通过 [`make_exporter`] 选定一次策略，流水线只依赖 [`Exporter`] trait。

pub mod archived;
pub mod flat;

use crate::core::annotation::NormalizedAnnotation;
use crate::core::catalog::ClassCatalog;
use crate::core::error::{LabelError, Result};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use archived::ArchivedExporter;
pub use flat::FlatExporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Roboflow / YOLO: `images/`, `labels/`, `data.yaml`
    Flat,
    /// CVAT YOLO 1.1: `data/obj_train_data/` plus descriptors, optionally zipped
    Archived,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Flat => "flat",
            ExportFormat::Archived => "archived",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roboflow" | "yolo" | "flat" => Ok(ExportFormat::Flat),
            "cvat" | "archived" => Ok(ExportFormat::Archived),
            other => Err(LabelError::config(format!("unknown export format '{}'", other))),
        }
    }
}

impl std::fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `finalize` 的产出汇总
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub format: ExportFormat,
    pub output_dir: PathBuf,
    pub frames_written: u64,
    pub annotation_files: u64,
    pub annotations_written: u64,
    pub descriptor_files: Vec<PathBuf>,
    pub archive: Option<PathBuf>,
}

/// 导出器，一次运行内独占一个输出目录
pub trait Exporter {
    fn format(&self) -> ExportFormat;

    fn output_dir(&self) -> &Path;

    /// 创建目录结构。首次调用会清理上次运行的输出，之后的调用只确保目录存在
    fn ensure_layout(&mut self) -> Result<()>;

    /// 写入图片，返回文件路径
    fn write_frame(&mut self, image: &RgbImage, basename: &str, variant: &str) -> Result<PathBuf>;

    /// 总会写出标注文件，无检测时为空文件
    fn write_annotations(
        &mut self,
        basename: &str,
        variant: &str,
        annotations: &[NormalizedAnnotation],
    ) -> Result<PathBuf>;

    /// 写数据集描述文件，最后一帧之后调用一次
    fn finalize(&mut self, catalog: &ClassCatalog) -> Result<ExportSummary>;
}

/// 按格式构建导出器，`archive` 只对 CVAT 布局生效
pub fn make_exporter(format: ExportFormat, output_dir: &Path, archive: bool) -> Box<dyn Exporter> {
    match format {
        ExportFormat::Flat => Box::new(FlatExporter::new(output_dir)),
        ExportFormat::Archived => Box::new(ArchivedExporter::new(output_dir, archive)),
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct ExportCounters {
    pub frames: u64,
    pub annotation_files: u64,
    pub annotations: u64,
}

pub(crate) fn annotation_text(annotations: &[NormalizedAnnotation]) -> String {
    let mut text = String::new();
    for a in annotations {
        text.push_str(&a.to_line());
        text.push('\n');
    }
    text
}

/// YAML 描述文件序列化，失败属于写出错误而非配置错误
pub(crate) fn yaml_descriptor<T: Serialize>(name: &str, value: &T) -> Result<String> {
    serde_yaml::to_string(value).map_err(|e| {
        LabelError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("cannot encode {}: {}", name, e),
        ))
    })
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!("Roboflow".parse::<ExportFormat>().unwrap(), ExportFormat::Flat);
        assert_eq!("yolo".parse::<ExportFormat>().unwrap(), ExportFormat::Flat);
        assert_eq!("CVAT".parse::<ExportFormat>().unwrap(), ExportFormat::Archived);
        let err = "coco".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_make_exporter_picks_strategy() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            make_exporter(ExportFormat::Flat, dir.path(), true).format(),
            ExportFormat::Flat
        );
        let archived = make_exporter(ExportFormat::Archived, dir.path(), false);
        assert_eq!(archived.format(), ExportFormat::Archived);
        assert_eq!(archived.output_dir(), dir.path());
    }

    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("no YAML form"))
        }
    }

    #[test]
    fn test_descriptor_encode_failure_is_io() {
        let err = yaml_descriptor("data.yaml", &Unencodable).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::IOFailure);
        assert!(err.to_string().contains("data.yaml"));

        let text = yaml_descriptor("data.yaml", &vec!["person"]).unwrap();
        assert_eq!(text.trim(), "- person");
    }

    #[test]
    fn test_annotation_text() {
        let a = NormalizedAnnotation {
            class_id: 1,
            x_center: 0.5,
            y_center: 0.25,
            width: 0.1,
            height: 0.2,
        };
        assert_eq!(annotation_text(&[]), "");
        assert_eq!(
            annotation_text(&[a, a]),
            "1 0.500000 0.250000 0.100000 0.200000\n1 0.500000 0.250000 0.100000 0.200000\n"
        );
    }
}
