use crate::core::detection::{BoundingBox, Detection};

/// 两个 xyxy 框的 IoU
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x0 = a.xmin.max(b.xmin);
    let y0 = a.ymin.max(b.ymin);
    let x1 = a.xmax.min(b.xmax);
    let y1 = a.ymax.min(b.ymax);
    let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        return 0.0;
    }
    inter / union
}

/// 按类别贪心 NMS，原地保留高置信度框
///
/// Boxes of different classes never suppress each other. Survivors come out in
/// descending confidence.
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            if xs[prev_index].class_id == xs[index].class_id
                && iou(&xs[prev_index].bbox, &xs[index].bbox) > iou_threshold
            {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
