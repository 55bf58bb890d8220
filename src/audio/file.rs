use anyhow::{Context, Result};
use hound::WavReader;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read audio samples")?;

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Split the file into capture-sized frames
    pub fn frames(&self, frame_ms: u64) -> Vec<AudioFrame> {
        let samples_per_frame =
            (self.sample_rate as u64 * frame_ms / 1000).max(1) as usize * self.channels as usize;

        self.samples
            .chunks(samples_per_frame)
            .enumerate()
            .map(|(i, chunk)| AudioFrame {
                samples: chunk.to_vec(),
                sample_rate: self.sample_rate,
                channels: self.channels,
                timestamp_ms: i as u64 * frame_ms,
            })
            .collect()
    }
}

/// Capture backend that replays a WAV file
///
/// Stands in for a microphone: frames are delivered as fast as the session
/// consumes them, and `stop` releases the producer like a hardware track.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    producer: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Self {
        Self {
            path: path.into(),
            config,
            producer: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let file = AudioFile::open(&self.path)?;

        if file.sample_rate != self.config.target_sample_rate
            || file.channels != self.config.target_channels
        {
            warn!(
                "{} is {}Hz/{}ch, capture is configured for {}Hz/{}ch; sending as recorded",
                file.path,
                file.sample_rate,
                file.channels,
                self.config.target_sample_rate,
                self.config.target_channels
            );
        }

        let frames = file.frames(self.config.buffer_duration_ms);
        let (tx, rx) = mpsc::channel(frames.len().max(1));

        self.producer = Some(tokio::spawn(async move {
            for frame in frames {
                if tx.send(frame).await.is_err() {
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(producer) = self.producer.take() {
            // Let queued frames through; the channel closes when the producer ends
            if let Err(e) = producer.await {
                warn!("File capture task ended abnormally: {}", e);
            }
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.producer.as_ref().is_some_and(|p| !p.is_finished())
    }

    fn name(&self) -> &str {
        "file"
    }
}
