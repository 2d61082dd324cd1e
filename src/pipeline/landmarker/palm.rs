use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::prep::{LetterboxInfo, PALM_INPUT_SIZE, prepare_letterboxed};
use crate::types::Frame;

const PALM_KEYPOINTS: usize = 7;

/// A palm candidate in source-frame pixels: bounding box, the seven palm
/// keypoints, and the detector score.
#[derive(Clone, Debug)]
pub struct PalmRegion {
    pub bbox: [f32; 4],
    pub keypoints: Vec<(f32, f32)>,
    pub score: f32,
}

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 32,
        }
    }
}

pub struct PalmDetector {
    session: Session,
    anchors: Vec<[f32; 2]>,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self {
            session,
            anchors: generate_anchors(),
            cfg,
        })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = prepare_letterboxed(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;
        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;
        let box_shape = boxes.shape().to_vec();
        let score_shape = scores.shape().to_vec();

        decode_detections(
            boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            &box_shape,
            scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            &score_shape,
            &self.anchors,
            &letterbox,
            &self.cfg,
        )
    }
}

/// SSD anchor centers for the 192px palm model: a 24x24 grid with two
/// anchors per cell (stride 8) followed by a 12x12 grid with six (the three
/// stride-16 layers share one grid). 2016 anchors total, unit anchor size.
fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(2016);
    for (stride, anchors_per_cell) in [(8u32, 2usize), (16, 6)] {
        let cells = PALM_INPUT_SIZE / stride;
        for y in 0..cells {
            for x in 0..cells {
                let cx = (x as f32 + 0.5) / cells as f32;
                let cy = (y as f32 + 0.5) / cells as f32;
                for _ in 0..anchors_per_cell {
                    anchors.push([cx, cy]);
                }
            }
        }
    }
    anchors
}

fn decode_detections(
    boxes: &[f32],
    box_shape: &[usize],
    scores: &[f32],
    score_shape: &[usize],
    anchors: &[[f32; 2]],
    letterbox: &LetterboxInfo,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    let [anchor_dim, feature_dim] = trailing_dims(box_shape)
        .ok_or_else(|| anyhow!("unexpected palm box shape {box_shape:?}"))?;
    let [score_anchor_dim, score_feature_dim] = trailing_dims(score_shape)
        .ok_or_else(|| anyhow!("unexpected palm score shape {score_shape:?}"))?;

    if feature_dim < 4 + PALM_KEYPOINTS * 2 {
        return Err(anyhow!("palm feature dimension too small: {feature_dim}"));
    }
    if anchor_dim != score_anchor_dim {
        return Err(anyhow!(
            "anchor count mismatch: boxes {anchor_dim}, scores {score_anchor_dim}"
        ));
    }

    // Letterbox undo, in source-frame pixels.
    let pad_bias_x = letterbox.pad_x / letterbox.scale;
    let pad_bias_y = letterbox.pad_y / letterbox.scale;
    let frame_span = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let input_span = PALM_INPUT_SIZE as f32;

    let count = anchors.len().min(anchor_dim);
    let mut candidates = Vec::new();

    for (anchor_idx, anchor) in anchors.iter().enumerate().take(count) {
        let score = sigmoid(scores[anchor_idx * score_feature_dim]);
        if score < cfg.score_threshold {
            continue;
        }

        let features = &boxes[anchor_idx * feature_dim..(anchor_idx + 1) * feature_dim];
        let cx = features[0] / input_span + anchor[0];
        let cy = features[1] / input_span + anchor[1];
        let hw = features[2] / input_span / 2.0;
        let hh = features[3] / input_span / 2.0;

        let mut x1 = (cx - hw) * frame_span - pad_bias_x;
        let mut y1 = (cy - hh) * frame_span - pad_bias_y;
        let mut x2 = (cx + hw) * frame_span - pad_bias_x;
        let mut y2 = (cy + hh) * frame_span - pad_bias_y;
        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        clamp_box(
            &mut x1,
            &mut y1,
            &mut x2,
            &mut y2,
            letterbox.orig_w,
            letterbox.orig_h,
        );

        let keypoints = (0..PALM_KEYPOINTS)
            .map(|k| {
                let kx = features[4 + k * 2] / input_span + anchor[0];
                let ky = features[4 + k * 2 + 1] / input_span + anchor[1];
                (kx * frame_span - pad_bias_x, ky * frame_span - pad_bias_y)
            })
            .collect();

        candidates.push(PalmRegion {
            bbox: [x1, y1, x2, y2],
            keypoints,
            score,
        });
    }

    Ok(nms(candidates, cfg.nms_threshold, cfg.top_k))
}

fn trailing_dims(shape: &[usize]) -> Option<[usize; 2]> {
    if shape.len() < 3 {
        return None;
    }
    Some([shape[shape.len() - 2], shape[shape.len() - 1]])
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<PalmRegion>, threshold: f32, top_k: usize) -> Vec<PalmRegion> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    let mut kept: Vec<PalmRegion> = Vec::new();
    for candidate in candidates {
        if kept.len() >= top_k {
            break;
        }
        if kept
            .iter()
            .all(|k| iou(&candidate.bbox, &k.bbox) < threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn clamp_box(x1: &mut f32, y1: &mut f32, x2: &mut f32, y2: &mut f32, w: u32, h: u32) {
    let max_w = w.saturating_sub(1) as f32;
    let max_h = h.saturating_sub(1) as f32;
    *x1 = x1.clamp(0.0, max_w);
    *y1 = y1.clamp(0.0, max_h);
    *x2 = x2.clamp(0.0, max_w);
    *y2 = y2.clamp(0.0, max_h);
}

/// Derive the rotated handpose crop from a palm region: centered on the
/// keypoint centroid, expanded generously so fingers are not cropped away.
pub fn crop_from_palm(region: &PalmRegion) -> ((f32, f32), f32, f32) {
    let center = if region.keypoints.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        let (sx, sy) = region
            .keypoints
            .iter()
            .fold((0.0f32, 0.0f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        let n = region.keypoints.len() as f32;
        (sx / n, sy / n)
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    let keypoint_span = if region.keypoints.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region
            .keypoints
            .iter()
            .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
                (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
            });
        (max_x - min_x).max(max_y - min_y)
    };
    let side = base_w.max(base_h).max(keypoint_span).max(80.0) * 2.4;

    (center, side, estimate_orientation(region))
}

/// Principal direction of the palm keypoints via the 2x2 covariance
/// eigenvector, rotated so the palm faces roughly upward.
fn estimate_orientation(region: &PalmRegion) -> f32 {
    if region.keypoints.len() < 2 {
        return 0.0;
    }

    let n = region.keypoints.len() as f32;
    let (sx, sy) = region
        .keypoints
        .iter()
        .fold((0.0f32, 0.0f32), |acc, (x, y)| (acc.0 + x, acc.1 + y));
    let mean = (sx / n, sy / n);

    let (mut cov_xx, mut cov_xy, mut cov_yy) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in &region.keypoints {
        let dx = x - mean.0;
        let dy = y - mean.1;
        cov_xx += dx * dx;
        cov_xy += dx * dy;
        cov_yy += dy * dy;
    }
    cov_xx /= n;
    cov_xy /= n;
    cov_yy /= n;

    let trace = cov_xx + cov_yy;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let lambda = (trace * 0.5 + ((trace * 0.5).powi(2) - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if cov_xy.abs() > 1e-6 {
        (lambda - cov_yy, cov_xy)
    } else if cov_xx >= cov_yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_grid_matches_model_output() {
        let anchors = generate_anchors();
        assert_eq!(anchors.len(), 2016);
        // All centers are inside the unit square.
        assert!(
            anchors
                .iter()
                .all(|a| (0.0..1.0).contains(&a[0]) && (0.0..1.0).contains(&a[1]))
        );
    }

    #[test]
    fn nms_drops_overlapping_lower_scores() {
        let near_duplicate = |score: f32| PalmRegion {
            bbox: [10.0, 10.0, 50.0, 50.0],
            keypoints: Vec::new(),
            score,
        };
        let distant = PalmRegion {
            bbox: [200.0, 200.0, 240.0, 240.0],
            keypoints: Vec::new(),
            score: 0.6,
        };
        let kept = nms(
            vec![near_duplicate(0.7), near_duplicate(0.9), distant],
            0.3,
            32,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.9);
    }

    #[test]
    fn crop_covers_the_keypoints() {
        let region = PalmRegion {
            bbox: [100.0, 100.0, 160.0, 160.0],
            keypoints: vec![(110.0, 110.0), (150.0, 150.0)],
            score: 0.8,
        };
        let ((cx, cy), side, _angle) = crop_from_palm(&region);
        assert!((cx - 130.0).abs() < 1e-3);
        assert!((cy - 130.0).abs() < 1e-3);
        assert!(side >= 80.0 * 2.4);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(
            iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]),
            0.0
        );
    }
}
