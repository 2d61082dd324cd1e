use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use super::landmarker::{HandLandmarker, LandmarkerBackend, OrtLandmarker};
use super::skeleton;
use crate::{
    gesture::{GestureClassifier, select_active_hand},
    model_download::{ModelKind, ensure_model_ready},
    speech::Announcer,
    types::{ClassifiedFrame, Frame},
};

// Wake-up interval for the stop flag while no frames arrive; this bounds the
// shutdown grace period.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle to the classification worker thread. Stopping joins the thread;
/// classifier and announcer state die with it.
#[derive(Debug)]
pub struct DetectorWorker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DetectorWorker {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DetectorWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the classification worker: provision the models, load the ORT
/// engine, and run the per-frame loop until the frame channel disconnects or
/// the stop flag is raised.
pub fn start_detector_worker(
    backend: LandmarkerBackend,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<ClassifiedFrame>,
    announcer: Announcer,
) -> DetectorWorker {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        for (kind, path) in [
            (ModelKind::PalmDetector, &backend.palm_model_path),
            (ModelKind::HandposeEstimator, &backend.handpose_model_path),
        ] {
            if let Err(err) = ensure_model_ready(kind, path) {
                log::error!("failed to prepare {} model: {err:?}", kind.label());
                return;
            }
        }

        let engine = match OrtLandmarker::new(&backend.palm_model_path, &backend.handpose_model_path)
        {
            Ok(engine) => {
                log::info!("hand landmark engine ready");
                engine
            }
            Err(err) => {
                log::error!("failed to load hand landmark engine: {err:?}");
                return;
            }
        };

        run_worker_loop(engine, frame_rx, result_tx, announcer, stop_flag);
    });

    DetectorWorker {
        stop,
        handle: Some(handle),
    }
}

fn run_worker_loop<E: HandLandmarker>(
    mut engine: E,
    frame_rx: Receiver<Frame>,
    result_tx: Sender<ClassifiedFrame>,
    mut announcer: Announcer,
    stop: Arc<AtomicBool>,
) {
    let mut classifier = GestureClassifier::new();

    while !stop.load(Ordering::Relaxed) {
        let mut frame = match frame_rx.recv_timeout(STOP_POLL_INTERVAL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        // Drain to the newest frame; slow inference never builds a backlog.
        while let Ok(newer) = frame_rx.try_recv() {
            frame = newer;
        }

        // A failed inference counts as an empty observation so the wave
        // window keeps advancing.
        let hands = match engine.detect(&frame) {
            Ok(hands) => hands,
            Err(err) => {
                log::warn!("hand landmark inference failed: {err:?}");
                Vec::new()
            }
        };

        let active = select_active_hand(&hands);
        let overlay = skeleton::render_overlay(frame.width, frame.height, active);
        let gesture = classifier.classify(&hands);
        let caption = gesture.map(|gesture| announcer.announce(gesture, Instant::now()));

        let _ = result_tx.try_send(ClassifiedFrame {
            overlay: Frame {
                rgba: overlay,
                width: frame.width,
                height: frame.height,
                timestamp: frame.timestamp,
            },
            gesture,
            caption,
        });
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use crossbeam_channel::bounded;

    use super::*;
    use crate::types::{Gesture, Hand, Landmark, NUM_LANDMARKS};

    struct FixedHands(Vec<Hand>);

    impl HandLandmarker for FixedHands {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Hand>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEngine;

    impl HandLandmarker for FailingEngine {
        fn detect(&mut self, _frame: &Frame) -> Result<Vec<Hand>> {
            anyhow::bail!("inference exploded")
        }
    }

    fn black_frame() -> Frame {
        Frame {
            rgba: vec![0; 16 * 16 * 4],
            width: 16,
            height: 16,
            timestamp: Instant::now(),
        }
    }

    fn fist_hand() -> Hand {
        let mut points = [Landmark {
            x: 0.5,
            y: 0.5,
            z: 0.0,
        }; NUM_LANDMARKS];
        // Curl every finger: tips below their proximal joints.
        for tip in [4usize, 8, 12, 16, 20] {
            points[tip].y = 0.6;
        }
        Hand::new(points)
    }

    fn run_frames<E: HandLandmarker>(engine: E, frames: usize) -> Vec<ClassifiedFrame> {
        let (frame_tx, frame_rx) = bounded(frames.max(1));
        let (result_tx, result_rx) = bounded(frames.max(1));
        for _ in 0..frames {
            frame_tx.send(black_frame()).unwrap();
        }
        drop(frame_tx);

        let stop = Arc::new(AtomicBool::new(false));
        run_worker_loop(engine, frame_rx, result_tx, Announcer::new(None), stop);
        result_rx.try_iter().collect()
    }

    #[test]
    fn worker_classifies_and_captions() {
        let results = run_frames(FixedHands(vec![fist_hand()]), 1);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].gesture, Some(Gesture::No));
        assert_eq!(results[0].caption, Some("Tidak."));
    }

    #[test]
    fn worker_survives_engine_failures() {
        // run_frames drops the sender before the loop runs; reaching the
        // assertions also means the failing engine did not kill the worker.
        let results = run_frames(FailingEngine, 1);
        assert_eq!(results.len(), 1);
        assert!(results[0].gesture.is_none());
        assert!(results[0].caption.is_none());
    }

    #[test]
    fn queued_frames_collapse_to_the_newest() {
        let results = run_frames(FixedHands(Vec::new()), 4);
        // Everything queued before the loop woke up is drained into one
        // classification cycle.
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn raised_stop_flag_prevents_classification() {
        let (frame_tx, frame_rx) = bounded(1);
        let (result_tx, result_rx) = bounded(1);
        frame_tx.send(black_frame()).unwrap();

        let stop = Arc::new(AtomicBool::new(true));
        run_worker_loop(
            FixedHands(vec![fist_hand()]),
            frame_rx,
            result_tx,
            Announcer::new(None),
            stop,
        );
        assert_eq!(result_rx.try_iter().count(), 0);
    }
}
