//! CVAT (YOLO 1.1) 布局，图片与标注同目录，可选打包为 cvat_data.zip

use crate::core::annotation::NormalizedAnnotation;
use crate::core::catalog::ClassCatalog;
use crate::core::error::Result;
use crate::core::export::{
    annotation_text, remove_if_exists, ExportCounters, ExportFormat, ExportSummary, Exporter,
};
use crate::core::video::variant_stem;
use image::{ImageFormat, RgbImage};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const DATA_DIR: &str = "data";
const FRAMES_DIR: &str = "obj_train_data";
const NAMES_FILE: &str = "obj.names";
const CONFIG_FILE: &str = "obj.data";
const MANIFEST_FILE: &str = "train.txt";
const ARCHIVE_NAME: &str = "cvat_data.zip";
const ARCHIVE_PART: &str = "cvat_data.zip.part";

pub struct ArchivedExporter {
    output_dir: PathBuf,
    data_dir: PathBuf,
    frames_dir: PathBuf,
    archive: bool,
    prepared: bool,
    images: BTreeSet<String>,
    counters: ExportCounters,
}

impl ArchivedExporter {
    pub fn new(output_dir: &Path, archive: bool) -> Self {
        let data_dir = output_dir.join(DATA_DIR);
        Self {
            output_dir: output_dir.to_path_buf(),
            frames_dir: data_dir.join(FRAMES_DIR),
            data_dir,
            archive,
            prepared: false,
            images: BTreeSet::new(),
            counters: ExportCounters::default(),
        }
    }

    pub fn archive_path(&self) -> PathBuf {
        self.output_dir.join(ARCHIVE_NAME)
    }

    fn write_descriptors(&self, catalog: &ClassCatalog) -> Result<Vec<PathBuf>> {
        let names_path = self.data_dir.join(NAMES_FILE);
        let mut names = String::new();
        for name in catalog.names() {
            names.push_str(&name);
            names.push('\n');
        }
        fs::write(&names_path, names)?;

        let config_path = self.data_dir.join(CONFIG_FILE);
        let config = format!(
            "classes = {}\ntrain = {}/{}\nnames = {}/{}\nbackup = backup/\n",
            catalog.len(),
            DATA_DIR,
            MANIFEST_FILE,
            DATA_DIR,
            NAMES_FILE
        );
        fs::write(&config_path, config)?;

        let manifest_path = self.data_dir.join(MANIFEST_FILE);
        let mut manifest = String::new();
        for image in &self.images {
            manifest.push_str(&format!("{}/{}/{}\n", DATA_DIR, FRAMES_DIR, image));
        }
        fs::write(&manifest_path, manifest)?;

        Ok(vec![names_path, config_path, manifest_path])
    }

    /// 先写 `cvat_data.zip.part`，成功后再重命名
    fn build_archive(&self) -> Result<PathBuf> {
        let part = self.output_dir.join(ARCHIVE_PART);
        let target = self.archive_path();

        let result = self
            .write_zip(&part)
            .and_then(|()| fs::rename(&part, &target).map_err(Into::into));
        if let Err(e) = result {
            error!("❌ Archiving failed, keeping {}: {}", self.data_dir.display(), e);
            if part.is_file() {
                let _ = fs::remove_file(&part);
            }
            return Err(e);
        }
        Ok(target)
    }

    fn write_zip(&self, path: &Path) -> Result<()> {
        let mut zip = ZipWriter::new(File::create(path)?);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for name in [NAMES_FILE, CONFIG_FILE, MANIFEST_FILE] {
            zip.start_file(name, options)?;
            io::copy(&mut File::open(self.data_dir.join(name))?, &mut zip)?;
        }

        zip.add_directory(format!("{}/", FRAMES_DIR), options)?;
        let mut entries = fs::read_dir(&self.frames_dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()?;
        entries.sort();
        for entry in entries.iter().filter(|p| p.is_file()) {
            let file_name = entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            zip.start_file(format!("{}/{}", FRAMES_DIR, file_name), options)?;
            io::copy(&mut File::open(entry)?, &mut zip)?;
        }

        zip.finish()?;
        debug!("Wrote {} frame files into {}", entries.len(), path.display());
        Ok(())
    }
}

impl Exporter for ArchivedExporter {
    fn format(&self) -> ExportFormat {
        ExportFormat::Archived
    }

    fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn ensure_layout(&mut self) -> Result<()> {
        if !self.prepared {
            remove_if_exists(&self.data_dir)?;
            remove_if_exists(&self.archive_path())?;
            remove_if_exists(&self.output_dir.join(ARCHIVE_PART))?;
            self.prepared = true;
            debug!("Archived layout prepared at {}", self.output_dir.display());
        }
        fs::create_dir_all(&self.frames_dir)?;
        Ok(())
    }

    fn write_frame(&mut self, image: &RgbImage, basename: &str, variant: &str) -> Result<PathBuf> {
        self.ensure_layout()?;
        let file_name = format!("{}.png", variant_stem(basename, variant));
        let path = self.frames_dir.join(&file_name);
        image.save_with_format(&path, ImageFormat::Png)?;
        self.images.insert(file_name);
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
            .frames_dir
            .join(format!("{}.txt", variant_stem(basename, variant)));
        fs::write(&path, annotation_text(annotations))?;
        self.counters.annotation_files += 1;
        self.counters.annotations += annotations.len() as u64;
        Ok(path)
    }

    fn finalize(&mut self, catalog: &ClassCatalog) -> Result<ExportSummary> {
        self.ensure_layout()?;
        if !catalog.is_dense() {
            warn!("⚠️ Class ids {:?} are not contiguous from 0; obj.names follows id order", catalog.ids());
        }

        let mut descriptor_files = self.write_descriptors(catalog)?;

        let archive = if self.archive {
            let archive = self.build_archive()?;
            // 压缩包已完整落盘，删除原始目录
            fs::remove_dir_all(&self.data_dir)?;
            descriptor_files.clear();
            info!("🗜️ Archived export into {}", archive.display());
            Some(archive)
        } else {
            None
        };

        info!(
            "📦 CVAT export finalized: {} images, {} annotations",
            self.counters.frames, self.counters.annotations
        );
        Ok(ExportSummary {
            format: ExportFormat::Archived,
            output_dir: self.output_dir.clone(),
            frames_written: self.counters.frames,
            annotation_files: self.counters.annotation_files,
            annotations_written: self.counters.annotations,
            descriptor_files,
            archive,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn catalog() -> ClassCatalog {
        ClassCatalog::new(vec![(0, "person".into()), (1, "car".into())]).unwrap()
    }

    fn annotation() -> NormalizedAnnotation {
        NormalizedAnnotation {
            class_id: 1,
            x_center: 0.5,
            y_center: 0.5,
            width: 0.2,
            height: 0.2,
        }
    }

    fn write_pairs(exporter: &mut ArchivedExporter, count: u64) {
        exporter.ensure_layout().unwrap();
        for i in 0..count {
            let basename = format!("clip_image{}", i);
            exporter
                .write_frame(&RgbImage::new(4, 4), &basename, "original")
                .unwrap();
            exporter
                .write_annotations(&basename, "original", &[annotation()])
                .unwrap();
        }
    }

    #[test]
    fn test_descriptors_without_archive() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = ArchivedExporter::new(dir.path(), false);
        write_pairs(&mut exporter, 2);
        exporter.ensure_layout().unwrap();
        let summary = exporter.finalize(&catalog()).unwrap();

        let data = dir.path().join("data");
        assert_eq!(fs::read_to_string(data.join("obj.names")).unwrap(), "person\ncar\n");
        assert_eq!(
            fs::read_to_string(data.join("obj.data")).unwrap(),
            "classes = 2\ntrain = data/train.txt\nnames = data/obj.names\nbackup = backup/\n"
        );
        assert_eq!(
            fs::read_to_string(data.join("train.txt")).unwrap(),
            "data/obj_train_data/clip_image0.png\ndata/obj_train_data/clip_image1.png\n"
        );
        assert!(data.join("obj_train_data/clip_image1.txt").is_file());
        assert_eq!(summary.descriptor_files.len(), 3);
        assert_eq!(summary.annotations_written, 2);
        assert!(summary.archive.is_none());
    }

    #[test]
    fn test_archive_then_delete() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = ArchivedExporter::new(dir.path(), true);
        write_pairs(&mut exporter, 3);
        let summary = exporter.finalize(&catalog()).unwrap();

        assert!(!dir.path().join("data").exists());
        assert!(!dir.path().join(ARCHIVE_PART).exists());
        assert_eq!(summary.archive, Some(dir.path().join("cvat_data.zip")));

        let mut archive = zip::ZipArchive::new(File::open(dir.path().join("cvat_data.zip")).unwrap()).unwrap();
        for i in 0..3 {
            assert!(archive.by_name(&format!("obj_train_data/clip_image{}.png", i)).is_ok());
            assert!(archive.by_name(&format!("obj_train_data/clip_image{}.txt", i)).is_ok());
        }
        let mut names = String::new();
        archive.by_name("obj.names").unwrap().read_to_string(&mut names).unwrap();
        assert_eq!(names, "person\ncar\n");
        assert!(archive.by_name("train.txt").is_ok());
        assert!(archive.by_name("obj.data").is_ok());
    }

    #[test]
    fn test_failed_archive_keeps_tree() {
        let dir = tempfile::tempdir().unwrap();
        let mut exporter = ArchivedExporter::new(dir.path(), true);
        write_pairs(&mut exporter, 2);

        // a directory squatting on the archive name makes the final rename fail
        fs::create_dir_all(dir.path().join("cvat_data.zip/blocker")).unwrap();
        let err = exporter.finalize(&catalog()).unwrap_err();
        assert_eq!(err.kind(), crate::core::error::ErrorKind::IOFailure);

        let frames = dir.path().join("data/obj_train_data");
        for i in 0..2 {
            assert!(frames.join(format!("clip_image{}.png", i)).is_file());
            assert!(frames.join(format!("clip_image{}.txt", i)).is_file());
        }
        assert!(!dir.path().join(ARCHIVE_PART).exists());
    }

    #[test]
    fn test_rerun_removes_previous_archive() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut first = ArchivedExporter::new(dir.path(), true);
            write_pairs(&mut first, 1);
            first.finalize(&catalog()).unwrap();
        }
        assert!(dir.path().join("cvat_data.zip").is_file());

        let mut second = ArchivedExporter::new(dir.path(), false);
        second.ensure_layout().unwrap();
        assert!(!dir.path().join("cvat_data.zip").exists());
        assert!(dir.path().join("data/obj_train_data").is_dir());
    }
}
