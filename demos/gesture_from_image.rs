#[allow(dead_code)]
#[path = "../src/gesture.rs"]
mod gesture;
#[path = "../src/model_download.rs"]
mod model_download;
#[allow(dead_code)]
#[path = "../src/types.rs"]
mod types;

mod pipeline {
    #[path = "../../src/pipeline/landmarker/mod.rs"]
    pub mod landmarker;
}

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::gesture::GestureClassifier;
use crate::pipeline::landmarker::{HandLandmarker, LandmarkerBackend, OrtLandmarker};
use crate::types::Frame;

fn main() -> Result<()> {
    env_logger::init();

    let mut image_paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if image_paths.is_empty() {
        image_paths = demo_images()?;
    }
    if image_paths.is_empty() {
        anyhow::bail!("no test images given and none found under demo/");
    }

    let backend = LandmarkerBackend::default();
    model_download::ensure_model_ready(
        model_download::ModelKind::PalmDetector,
        &backend.palm_model_path,
    )?;
    model_download::ensure_model_ready(
        model_download::ModelKind::HandposeEstimator,
        &backend.handpose_model_path,
    )?;
    let mut engine = OrtLandmarker::new(&backend.palm_model_path, &backend.handpose_model_path)?;

    println!("classifying {} image(s)", image_paths.len());

    for path in image_paths {
        let frame = load_frame(&path)?;
        let hands = engine
            .detect(&frame)
            .with_context(|| format!("inference failed for {}", path.display()))?;

        if hands.is_empty() {
            println!("{} -> no hand detected", path.display());
            continue;
        }

        // Still images carry no motion, so a fresh classifier per image
        // keeps the wave window from mixing unrelated photos.
        let mut classifier = GestureClassifier::new();
        let mut verdict = None;
        for _ in 0..6 {
            verdict = classifier.classify(&hands);
        }

        match verdict {
            Some(gesture) => println!(
                "{} -> {} ({} hand(s)) | \"{}\"",
                path.display(),
                gesture.label(),
                hands.len(),
                gesture.announcement()
            ),
            None => println!(
                "{} -> hand detected, no gesture ({} hand(s))",
                path.display(),
                hands.len()
            ),
        }
    }

    Ok(())
}

fn load_frame(path: &PathBuf) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to open image {}", path.display()))?
        .to_rgba8();
    let (width, height) = image.dimensions();

    Ok(Frame {
        rgba: image.into_raw(),
        width,
        height,
        timestamp: std::time::Instant::now(),
    })
}

fn demo_images() -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in std::fs::read_dir("demo").context("failed to read demo directory")? {
        let path = entry?.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if ["png", "jpg", "jpeg"]
                .iter()
                .any(|v| ext.eq_ignore_ascii_case(v))
            {
                images.push(path);
            }
        }
    }
    images.sort();
    Ok(images)
}
