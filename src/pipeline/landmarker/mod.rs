pub mod palm;
pub mod prep;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use self::palm::{PalmDetector, PalmDetectorConfig, PalmRegion, crop_from_palm};
use self::prep::{HANDPOSE_INPUT_SIZE, decode_hand, prepare_rotated_crop};
use crate::types::{Frame, Hand};

// At most two hands are refined per frame; lower-scored palm candidates are
// discarded after NMS ordering.
const MAX_HANDS: usize = 2;
const MIN_HAND_CONFIDENCE: f32 = 0.2;

/// A source of per-frame hand observations. Implementations return zero or
/// more complete hands in normalized image coordinates.
pub trait HandLandmarker: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Hand>>;
}

/// Model file locations for the production engine.
#[derive(Clone, Debug)]
pub struct LandmarkerBackend {
    pub palm_model_path: PathBuf,
    pub handpose_model_path: PathBuf,
}

impl Default for LandmarkerBackend {
    fn default() -> Self {
        Self {
            palm_model_path: crate::model_download::default_model_path(
                crate::model_download::ModelKind::PalmDetector,
            ),
            handpose_model_path: crate::model_download::default_model_path(
                crate::model_download::ModelKind::HandposeEstimator,
            ),
        }
    }
}

/// Two-stage ONNX engine: palm detection proposes regions, the handpose
/// estimator refines each region into 21 landmarks.
pub struct OrtLandmarker {
    palm: PalmDetector,
    handpose: Session,
}

impl OrtLandmarker {
    pub fn new(palm_model_path: &Path, handpose_model_path: &Path) -> Result<Self> {
        let palm = PalmDetector::new(palm_model_path, PalmDetectorConfig::default())?;
        let handpose = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(2)?
            .commit_from_file(handpose_model_path)
            .with_context(|| {
                format!(
                    "failed to load handpose model from {}",
                    handpose_model_path.display()
                )
            })?;

        Ok(Self { palm, handpose })
    }

    fn infer_region(&mut self, frame: &Frame, region: &PalmRegion) -> Result<Option<Hand>> {
        let (center, side, angle) = crop_from_palm(region);
        let (input, transform) =
            prepare_rotated_crop(frame, center, side, angle, HANDPOSE_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .handpose
            .run(ort::inputs![tensor])
            .context("failed to run handpose session")?;
        if outputs.len() < 1 {
            return Err(anyhow!("handpose model returned no outputs"));
        }

        let confidence = if outputs.len() > 1 {
            outputs[1]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            // Single-output models carry no confidence; trust the palm score.
            1.0
        };
        if (confidence * region.score).clamp(0.0, 1.0) < MIN_HAND_CONFIDENCE {
            return Ok(None);
        }

        let coords = outputs[0].try_extract_array::<f32>()?;
        let flat: Vec<f32> = coords.iter().copied().collect();
        Ok(Some(decode_hand(&flat, &transform)?))
    }
}

impl HandLandmarker for OrtLandmarker {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Hand>> {
        let regions = self.palm.detect(frame)?;

        let mut hands = Vec::with_capacity(MAX_HANDS);
        for region in regions.iter().take(MAX_HANDS) {
            match self.infer_region(frame, region) {
                Ok(Some(hand)) => hands.push(hand),
                Ok(None) => {}
                Err(err) => {
                    log::warn!("handpose refinement failed for a palm region: {err:?}");
                }
            }
        }
        Ok(hands)
    }
}
