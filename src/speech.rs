use std::{
    fs,
    io,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, bounded};
use thiserror::Error;

use crate::types::Gesture;

pub const ANNOUNCE_COOLDOWN: Duration = Duration::from_millis(1_500);
// The frame loop only ever try_sends; a full queue drops the request.
const SPEECH_QUEUE_DEPTH: usize = 4;

/// Failure kinds of the speech side. All of them are recovered inside the
/// worker thread and never reach the frame loop.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech synthesis request failed: {0}")]
    Synthesis(#[from] reqwest::Error),
    #[error("speech cache io failed: {0}")]
    Cache(#[from] io::Error),
    #[error("audio output unavailable: {0}")]
    AudioDevice(#[from] rodio::StreamError),
    #[error("audio sink failed: {0}")]
    Playback(#[from] rodio::PlayError),
    #[error("audio decode failed: {0}")]
    Decode(#[from] rodio::decoder::DecoderError),
}

/// Cooldown gate for repeated announcements. One instance per session,
/// owned by the classification worker.
pub struct Debouncer {
    last: Option<(&'static str, Instant)>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Whether `text` may be spoken at `now`. Records the announcement when
    /// permitted; a suppressed repeat does not refresh the timestamp, so a
    /// phrase held continuously re-announces once per cooldown period.
    pub fn permits(&mut self, text: &'static str, now: Instant) -> bool {
        if let Some((last_text, last_at)) = self.last {
            if last_text == text && now.duration_since(last_at) < ANNOUNCE_COOLDOWN {
                return false;
            }
        }
        self.last = Some((text, now));
        true
    }
}

/// Maps a gesture to its caption text and dispatches debounced speech
/// requests. The caption always updates; only the audio is gated.
pub struct Announcer {
    debouncer: Debouncer,
    speech_tx: Option<Sender<&'static str>>,
}

impl Announcer {
    /// `speech_tx = None` runs muted: captions still flow, nothing is spoken.
    pub fn new(speech_tx: Option<Sender<&'static str>>) -> Self {
        Self {
            debouncer: Debouncer::new(),
            speech_tx,
        }
    }

    pub fn announce(&mut self, gesture: Gesture, now: Instant) -> &'static str {
        let text = gesture.announcement();
        if self.debouncer.permits(text, now) {
            if let Some(tx) = &self.speech_tx {
                let _ = tx.try_send(text);
            }
        }
        text
    }
}

pub trait SpeechSynthesizer: Send + 'static {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

/// MP3 synthesis via the Google Translate TTS endpoint.
pub struct GoogleTranslateTts {
    client: reqwest::blocking::Client,
    lang: String,
}

const TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";

impl GoogleTranslateTts {
    pub fn new(lang: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            lang: lang.into(),
        }
    }
}

impl SpeechSynthesizer for GoogleTranslateTts {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        let response = self
            .client
            .get(TTS_ENDPOINT)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", self.lang.as_str()),
                ("q", text),
            ])
            .send()?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// On-disk memoization of synthesized clips, keyed by exact text.
pub struct SpeechCache {
    dir: PathBuf,
}

impl SpeechCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn clip_path(&self, text: &str) -> PathBuf {
        self.dir.join(format!("{}.mp3", sanitize_clip_name(text)))
    }

    /// Path to the cached clip for `text`, synthesizing on a miss. The clip
    /// is written to a temp file first so an interrupted synthesis never
    /// leaves a half-written MP3 behind.
    pub fn fetch(
        &self,
        synth: &dyn SpeechSynthesizer,
        text: &str,
    ) -> Result<PathBuf, SpeechError> {
        let path = self.clip_path(text);
        if path.exists() {
            return Ok(path);
        }

        fs::create_dir_all(&self.dir)?;
        let bytes = synth.synthesize(text)?;
        let tmp_path = path.with_extension("download");
        fs::write(&tmp_path, &bytes)?;
        fs::rename(&tmp_path, &path)?;
        Ok(path)
    }
}

fn sanitize_clip_name(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Spawn the playback worker. The returned sender is the only coupling to
/// the frame loop; dropping it ends the worker after the in-flight clip.
pub fn start_speech_worker<S: SpeechSynthesizer>(
    synth: S,
    cache: SpeechCache,
) -> (Sender<&'static str>, thread::JoinHandle<()>) {
    let (tx, rx) = bounded(SPEECH_QUEUE_DEPTH);
    let handle = thread::spawn(move || run_speech_loop(synth, cache, rx));
    (tx, handle)
}

fn run_speech_loop<S: SpeechSynthesizer>(
    synth: S,
    cache: SpeechCache,
    rx: Receiver<&'static str>,
) {
    while let Ok(text) = rx.recv() {
        if let Err(err) = speak(&synth, &cache, text) {
            log::warn!("announcement failed for {text:?}: {err}");
        }
    }
}

fn speak(
    synth: &dyn SpeechSynthesizer,
    cache: &SpeechCache,
    text: &str,
) -> Result<(), SpeechError> {
    let clip = cache.fetch(synth, text)?;
    let (_stream, handle) = rodio::OutputStream::try_default()?;
    let sink = rodio::Sink::try_new(&handle)?;
    let file = fs::File::open(&clip)?;
    sink.append(rodio::Decoder::new(io::BufReader::new(file))?);
    sink.sleep_until_end();
    Ok(())
}
