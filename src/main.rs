mod gesture;
mod model_download;
mod pipeline;
mod speech;
mod types;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;

use crate::pipeline::{CaptureConfig, LandmarkerBackend};
use crate::speech::{Announcer, GoogleTranslateTts, SpeechCache, start_speech_worker};
use crate::types::ClassifiedFrame;

const OVERLAY_DUMP_EVERY: usize = 10;

#[derive(Debug, Parser)]
#[command(name = "gesture-voice", version, about = "Hand gesture to speech announcer")]
struct Args {
    /// Camera device index.
    #[arg(long, default_value_t = 0)]
    camera: u32,

    /// Requested capture width.
    #[arg(long, default_value_t = pipeline::camera::DEFAULT_FRAME_WIDTH)]
    width: u32,

    /// Requested capture height.
    #[arg(long, default_value_t = pipeline::camera::DEFAULT_FRAME_HEIGHT)]
    height: u32,

    /// Language tag for the synthesized voice.
    #[arg(long, default_value = "id")]
    lang: String,

    /// Directory for memoized speech clips.
    #[arg(long, default_value = "tts_cache")]
    tts_cache: PathBuf,

    /// Disable audio output; captions are still logged.
    #[arg(long)]
    mute: bool,

    /// Save every 10th skeleton overlay as a PNG into this directory.
    #[arg(long, value_name = "DIR")]
    dump_overlay: Option<PathBuf>,

    /// List available cameras and exit.
    #[arg(long)]
    list_cameras: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.list_cameras {
        for device in pipeline::available_cameras()? {
            println!("{}: {}", device.index, device.label);
        }
        return Ok(());
    }

    let speech_tx = if args.mute {
        None
    } else {
        let synth = GoogleTranslateTts::new(args.lang.clone());
        let cache = SpeechCache::new(args.tts_cache.clone());
        let (tx, _worker) = start_speech_worker(synth, cache);
        Some(tx)
    };
    let announcer = Announcer::new(speech_tx);

    let (frame_tx, frame_rx) = bounded(1);
    let (result_tx, result_rx) = bounded(1);

    let capture = CaptureConfig {
        camera_index: args.camera,
        width: args.width,
        height: args.height,
    };
    let camera = pipeline::start_camera_stream(capture, frame_tx)
        .context("failed to start camera stream")?;
    let detector = pipeline::start_detector_worker(
        LandmarkerBackend::default(),
        frame_rx,
        result_tx,
        announcer,
    );

    if let Some(dir) = &args.dump_overlay {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create overlay directory {}", dir.display()))?;
    }

    log::info!("gesture-voice running; show a hand to the camera");

    let mut last_caption = None;
    let mut frame_index = 0usize;
    for classified in result_rx.iter() {
        if classified.caption != last_caption {
            if let Some(text) = classified.caption {
                log::info!("caption: {text}");
            }
            last_caption = classified.caption;
        }

        if let Some(dir) = &args.dump_overlay {
            if frame_index % OVERLAY_DUMP_EVERY == 0 {
                if let Err(err) = save_overlay(dir, frame_index, &classified) {
                    log::warn!("failed to save overlay frame {frame_index}: {err:?}");
                }
            }
        }
        frame_index += 1;
    }

    // The result channel only closes when the worker is gone; release the
    // camera promptly anyway.
    camera.stop();
    detector.stop();
    Ok(())
}

fn save_overlay(dir: &Path, frame_index: usize, classified: &ClassifiedFrame) -> Result<()> {
    let path = dir.join(format!("overlay_{frame_index:06}.png"));
    image::save_buffer(
        &path,
        &classified.overlay.rgba,
        classified.overlay.width,
        classified.overlay.height,
        image::ExtendedColorType::Rgba8,
    )
    .with_context(|| format!("failed to write {}", path.display()))
}
