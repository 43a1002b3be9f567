use crate::core::annotation::NormalizedAnnotation;
use crate::core::catalog::ClassCatalog;
use crate::core::error::Result;
use crate::core::export::{
    annotation_text, remove_if_exists, yaml_descriptor, ExportCounters, ExportFormat, ExportSummary,
    Exporter,
};
use crate::core::video::variant_stem;
use image::{ImageFormat, RgbImage};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

const DESCRIPTOR: &str = "data.yaml";

#[derive(Debug, Serialize)]
struct DataYaml {
    train: String,
    val: String,
    nc: usize,
    names: Vec<String>,
}

/// Roboflow 风格：images/ 与 labels/ 平行目录 + data.yaml
pub struct FlatExporter {
    output_dir: PathBuf,
    images_dir: PathBuf,
    labels_dir: PathBuf,
    prepared: bool,
    counters: ExportCounters,
}

impl FlatExporter {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            images_dir: output_dir.join("images"),
            labels_dir: output_dir.join("labels"),
            prepared: false,
            counters: ExportCounters::default(),
        }
    }
}

impl Exporter for FlatExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Flat
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn ensure_layout(&mut self) -> Result<()> {
        if !self.prepared {
            // 覆盖上一次运行的结果，不做合并
            remove_if_exists(&self.images_dir)?;
            remove_if_exists(&self.labels_dir)?;
            remove_if_exists(&self.output_dir.join(DESCRIPTOR))?;
            self.prepared = true;
            debug!("Flat layout prepared at {}", self.output_dir.display());
        }
        fs::create_dir_all(&self.images_dir)?;
        fs::create_dir_all(&self.labels_dir)?;
        Ok(())
    }

    fn write_frame(&mut self, image: &RgbImage, basename: &str, variant: &str) -> Result<PathBuf> {
        self.ensure_layout()?;
        let path = self
            .images_dir
            .join(format!("{}.jpg", variant_stem(basename, variant)));
        image.save_with_format(&path, ImageFormat::Jpeg)?;
        self.counters.frames += 1;
        Ok(path)
    }

    fn write_annotations(
        &mut self,
        basename: &str,
        variant: &str,
        annotations: &[NormalizedAnnotation],
    ) -> Result<PathBuf> {
        self.ensure_layout()?;
        let path = self
            .labels_dir
            .join(format!("{}.txt", variant_stem(basename, variant)));
        fs::write(&path, annotation_text(annotations))?;
        self.counters.annotation_files += 1;
        self.counters.annotations += annotations.len() as u64;
        Ok(path)
    }

    fn finalize(&mut self, catalog: &ClassCatalog) -> Result<ExportSummary> {
        self.ensure_layout()?;
        if !catalog.is_dense() {
            warn!("⚠️ Class ids {:?} are not contiguous from 0; names are listed in id order", catalog.ids());
        }

        let images_abs = fs::canonicalize(&self.images_dir)?.to_string_lossy().into_owned();
        let descriptor = DataYaml {
            train: images_abs.clone(),
            val: images_abs,
            nc: catalog.len(),
            names: catalog.names(),
        };
        let descriptor_path = self.output_dir.join(DESCRIPTOR);
        fs::write(&descriptor_path, yaml_descriptor(DESCRIPTOR, &descriptor)?)?;

        info!(
            "📦 Flat export finalized: {} images, {} label files, {} annotations",
            self.counters.frames, self.counters.annotation_files, self.counters.annotations
        );
        Ok(ExportSummary {
            format: ExportFormat::Flat,
            output_dir: self.output_dir.clone(),
            frames_written: self.counters.frames,
            annotation_files: self.counters.annotation_files,
            annotations_written: self.counters.annotations,
            descriptor_files: vec![descriptor_path],
            archive: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ClassCatalog {
        ClassCatalog::new(vec![(0, "person".into()), (1, "car".into()), (2, "dog".into())]).unwrap()
    }

    #[test]
    fn test_descriptor_write_failure_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = FlatExporter::new(dir.path());
        exporter.ensure_layout().unwrap();
        // a directory squatting on the descriptor path
        fs::create_dir(dir.path().join(DESCRIPTOR)).unwrap();

        let err = exporter.finalize(&catalog()).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::IOFailure);
    }

    #[test]
    fn test_ensure_layout_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = FlatExporter::new(dir.path());
        exporter.ensure_layout().unwrap();
        exporter
            .write_annotations("v_image0", "original", &[])
            .unwrap();
        exporter.ensure_layout().unwrap();

        assert!(dir.path().join("images").is_dir());
        assert!(dir.path().join("labels/v_image0.txt").is_file());
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 2);
    }

    #[test]
    fn test_three_empty_frames_write_empty_labels_and_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = FlatExporter::new(dir.path());
        exporter.ensure_layout().unwrap();

        for i in 0..3 {
            let basename = format!("clip_image{}", i * 30);
            exporter
                .write_frame(&RgbImage::new(8, 8), &basename, "original")
                .unwrap();
            exporter.write_annotations(&basename, "original", &[]).unwrap();
        }
        let summary = exporter.finalize(&catalog()).unwrap();

        let labels: Vec<_> = fs::read_dir(dir.path().join("labels")).unwrap().collect();
        assert_eq!(labels.len(), 3);
        for entry in labels {
            assert_eq!(fs::read_to_string(entry.unwrap().path()).unwrap(), "");
        }
        assert!(dir.path().join("images/clip_image60.jpg").is_file());

        let yaml: serde_yaml::Value =
            serde_yaml::from_str(&fs::read_to_string(dir.path().join("data.yaml")).unwrap()).unwrap();
        assert_eq!(yaml["nc"].as_u64(), Some(3));
        let names: Vec<&str> = yaml["names"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|n| n.as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["person", "car", "dog"]);
        assert!(Path::new(yaml["train"].as_str().unwrap()).is_absolute());

        assert_eq!(summary.frames_written, 3);
        assert_eq!(summary.annotation_files, 3);
        assert_eq!(summary.annotations_written, 0);
        assert!(summary.archive.is_none());
    }

    #[test]
    fn test_variant_names_and_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = FlatExporter::new(dir.path());
        let a = NormalizedAnnotation {
            class_id: 2,
            x_center: 0.375,
            y_center: 0.375,
            width: 0.25,
            height: 0.25,
        };
        let path = exporter
            .write_annotations("v_image0", "grayscale", &[a])
            .unwrap();

        assert!(path.ends_with("labels/v_image0_grayscale.txt"));
        assert_eq!(
            fs::read_to_string(path).unwrap(),
            "2 0.375000 0.375000 0.250000 0.250000\n"
        );
    }

    #[test]
    fn test_rerun_clears_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut first = FlatExporter::new(dir.path());
            first.write_annotations("old_image0", "original", &[]).unwrap();
            first.finalize(&catalog()).unwrap();
        }
        let mut second = FlatExporter::new(dir.path());
        second.ensure_layout().unwrap();

        assert!(!dir.path().join("labels/old_image0.txt").exists());
        assert!(!dir.path().join("data.yaml").exists());
    }
}
