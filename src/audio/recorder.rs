use anyhow::{Context, Result};
use base64::Engine;
use std::io::Cursor;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::backend::{AudioBackend, AudioFrame};

/// One finished user recording, ready to upload
#[derive(Debug, Clone)]
pub struct RecordedAudio {
    /// Serialized container bytes
    pub bytes: Vec<u8>,
    /// Container name as understood by the agent (e.g. "wav")
    pub format: String,
    pub duration_ms: u64,
}

impl RecordedAudio {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

/// Microphone recorder
///
/// Buffers every captured frame from `start` until `stop`, then serializes the
/// whole take into one payload. Only one take can be active at a time.
pub struct MicRecorder {
    backend: Option<Box<dyn AudioBackend>>,
    collector: Option<JoinHandle<Vec<AudioFrame>>>,
}

impl MicRecorder {
    pub fn new() -> Self {
        Self {
            backend: None,
            collector: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.backend.is_some()
    }

    /// Start a take on `backend`
    ///
    /// No-op if a take is already running.
    pub async fn start(&mut self, mut backend: Box<dyn AudioBackend>) -> Result<()> {
        if self.is_recording() {
            warn!("Recording already started");
            return Ok(());
        }

        info!("Starting recording on {} backend", backend.name());

        let mut audio_rx = backend
            .start()
            .await
            .context("Failed to start audio capture")?;

        let collector = tokio::spawn(async move {
            let mut frames = Vec::new();
            while let Some(frame) = audio_rx.recv().await {
                frames.push(frame);
            }
            frames
        });

        self.backend = Some(backend);
        self.collector = Some(collector);

        Ok(())
    }

    /// Finish the take and serialize it
    ///
    /// Returns `None` when nothing was recording or nothing was captured.
    pub async fn stop(&mut self) -> Result<Option<RecordedAudio>> {
        let Some(mut backend) = self.backend.take() else {
            warn!("Recording not active");
            return Ok(None);
        };

        backend.stop().await.context("Failed to stop audio capture")?;

        let frames = match self.collector.take() {
            Some(collector) => collector.await.context("Recording task panicked")?,
            None => Vec::new(),
        };

        if frames.is_empty() {
            warn!("Recording stopped without any captured audio");
            return Ok(None);
        }

        let audio = encode_wav(&frames)?;
        info!(
            "Recording stopped: {} frames, {}ms, {} bytes",
            frames.len(),
            audio.duration_ms,
            audio.bytes.len()
        );

        Ok(Some(audio))
    }

    /// Abandon the take and release the capture device
    pub async fn cancel(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.stop().await {
                warn!("Failed to release {} capture: {}", backend.name(), e);
            }
            info!("Recording cancelled");
        }
        if let Some(collector) = self.collector.take() {
            collector.abort();
        }
    }
}

impl Default for MicRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Serialize captured frames into one 16-bit PCM WAV payload
///
/// The format of the first frame is used for the whole take.
pub fn encode_wav(frames: &[AudioFrame]) -> Result<RecordedAudio> {
    let first = frames.first().context("No audio frames to encode")?;

    let spec = hound::WavSpec {
        channels: first.channels,
        sample_rate: first.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("Failed to create WAV writer")?;
        for frame in frames {
            for &sample in &frame.samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write sample to WAV")?;
            }
        }
        writer.finalize().context("Failed to finalize WAV payload")?;
    }

    Ok(RecordedAudio {
        bytes: cursor.into_inner(),
        format: "wav".to_string(),
        duration_ms: frames.iter().map(AudioFrame::duration_ms).sum(),
    })
}
