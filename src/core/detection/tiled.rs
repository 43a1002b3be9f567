//! 切片推理 - 重叠切片逐块检测，再平移回整帧坐标

use crate::core::detection::direct::filter_detections;
use crate::core::detection::nms::non_max_suppression;
use crate::core::detection::{Detection, DetectionModel, Detector};
use crate::core::error::{LabelError, Result};
use image::{imageops, RgbImage};
use log::debug;
use serde::{Deserialize, Serialize};

/// 相邻切片检测结果的合并策略
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum TileMerge {
    /// 直接拼接，跨缝目标可能在每个切片各报一次
    #[default]
    KeepAll,
    /// 合并后按类别做贪心 NMS
    SuppressOverlaps { iou_threshold: f32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub tile_height: u32,
    pub tile_width: u32,
    pub overlap_height_ratio: f32,
    pub overlap_width_ratio: f32,
    pub merge: TileMerge,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tile_height: 256,
            tile_width: 256,
            overlap_height_ratio: 0.2,
            overlap_width_ratio: 0.2,
            merge: TileMerge::KeepAll,
        }
    }
}

impl TilingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tile_height == 0 || self.tile_width == 0 {
            return Err(LabelError::config(format!(
                "tile size must be non-zero, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        for ratio in [self.overlap_height_ratio, self.overlap_width_ratio] {
            if !(0.0..1.0).contains(&ratio) {
                return Err(LabelError::config(format!(
                    "overlap ratio must be in [0, 1), got {}",
                    ratio
                )));
            }
        }
        if let TileMerge::SuppressOverlaps { iou_threshold } = self.merge {
            if !(0.0..=1.0).contains(&iou_threshold) {
                return Err(LabelError::config(format!(
                    "merge IoU threshold must be in [0, 1], got {}",
                    iou_threshold
                )));
            }
        }
        Ok(())
    }
}

/// 切片在整图中的位置与尺寸
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 生成覆盖整图的重叠切片网格
///
/// Tiles advance by `tile - floor(tile * overlap)`; the last tile on each axis
/// is shifted back so it ends at the image edge.
pub fn tile_grid(image_width: u32, image_height: u32, config: &TilingConfig) -> Vec<Tile> {
    if image_width == 0 || image_height == 0 {
        return Vec::new();
    }
    let starts_x = axis_starts(image_width, config.tile_width, config.overlap_width_ratio);
    let starts_y = axis_starts(image_height, config.tile_height, config.overlap_height_ratio);

    let mut tiles = Vec::with_capacity(starts_x.len() * starts_y.len());
    for &(y, height) in &starts_y {
        for &(x, width) in &starts_x {
            tiles.push(Tile {
                x,
                y,
                width,
                height,
            });
        }
    }
    tiles
}

fn axis_starts(length: u32, tile: u32, overlap_ratio: f32) -> Vec<(u32, u32)> {
    let tile = tile.max(1);
    let overlap = ((tile as f32 * overlap_ratio).floor() as u32).min(tile - 1);

    let mut starts = Vec::new();
    let mut min = 0u32;
    loop {
        let raw_max = min.saturating_add(tile);
        let max = raw_max.min(length);
        let start = max.saturating_sub(tile);
        starts.push((start, max - start));
        if raw_max >= length {
            break;
        }
        min = raw_max - overlap;
    }
    starts
}

/// 切片检测器：每个切片按 Direct 方式检测，框加上切片原点偏移后合并
pub struct TiledDetector {
    model: Box<dyn DetectionModel>,
    config: TilingConfig,
}

impl TiledDetector {
    pub fn new(model: Box<dyn DetectionModel>, config: TilingConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }
}

impl Detector for TiledDetector {
    fn name(&self) -> &'static str {
        "tiled"
    }

    fn detect(
        &mut self,
        image: &RgbImage,
        confidence_threshold: f32,
        allowed_class_ids: &[u32],
    ) -> Result<Vec<Detection>> {
        let tiles = tile_grid(image.width(), image.height(), &self.config);
        let mut merged = Vec::new();

        for tile in &tiles {
            let crop = imageops::crop_imm(image, tile.x, tile.y, tile.width, tile.height).to_image();
            let raw = self
                .model
                .infer(&crop, confidence_threshold, allowed_class_ids)?;
            let local = filter_detections(
                raw,
                tile.width,
                tile.height,
                confidence_threshold,
                allowed_class_ids,
            );
            merged.extend(local.into_iter().map(|mut d| {
                d.bbox = d.bbox.translate(tile.x as f32, tile.y as f32);
                d
            }));
        }

        let before = merged.len();
        if let TileMerge::SuppressOverlaps { iou_threshold } = self.config.merge {
            non_max_suppression(&mut merged, iou_threshold);
        }
        debug!(
            "Tiled: {} tiles, {} detections ({} after merge)",
            tiles.len(),
            before,
            merged.len()
        );
        Ok(merged)
    }
}
