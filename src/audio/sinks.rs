use anyhow::{Context, Result};
use std::io::Cursor;
use std::path::PathBuf;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as DecodeError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::AudioFrame;
use super::player::{AudioClip, AudioSink};

/// Discards audio (headless hosts)
pub struct NullSink;

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn render(&self, clip: AudioClip) -> Result<()> {
        debug!("Discarding utterance {} ({} bytes)", clip.utterance, clip.bytes.len());
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Writes every utterance to its own file
///
/// Files are named `{prefix}-utterance-{n}.{ext}` with the extension sniffed
/// from the payload.
pub struct FileSink {
    output_dir: PathBuf,
    prefix: String,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir).context("Failed to create playback directory")?;

        info!("File sink writing utterances to {}", output_dir.display());

        Ok(Self {
            output_dir,
            prefix: prefix.into(),
        })
    }

    pub fn path_for(&self, clip: &AudioClip) -> PathBuf {
        self.output_dir.join(format!(
            "{}-utterance-{:03}.{}",
            self.prefix,
            clip.utterance,
            clip.container_hint()
        ))
    }
}

#[async_trait::async_trait]
impl AudioSink for FileSink {
    async fn render(&self, clip: AudioClip) -> Result<()> {
        let path = self.path_for(&clip);
        tokio::fs::write(&path, &clip.bytes)
            .await
            .with_context(|| format!("Failed to write utterance to {:?}", path))?;

        info!("Utterance {} saved to {}", clip.utterance, path.display());
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Decodes utterances to PCM and streams the frames to an output device
///
/// With `realtime` set, frames are paced at their natural duration so `render`
/// completes when the last sample would have been heard.
pub struct DecodingSink {
    output: mpsc::Sender<AudioFrame>,
    realtime: bool,
}

impl DecodingSink {
    pub fn new(output: mpsc::Sender<AudioFrame>, realtime: bool) -> Self {
        Self { output, realtime }
    }
}

#[async_trait::async_trait]
impl AudioSink for DecodingSink {
    async fn render(&self, clip: AudioClip) -> Result<()> {
        let utterance = clip.utterance;
        let frames = tokio::task::spawn_blocking(move || decode_clip(&clip.bytes))
            .await
            .context("Decoder task panicked")??;

        debug!("Utterance {} decoded into {} frames", utterance, frames.len());

        for frame in frames {
            let pause = Duration::from_millis(frame.duration_ms());
            self.output
                .send(frame)
                .await
                .context("Audio output device is gone")?;
            if self.realtime {
                tokio::time::sleep(pause).await;
            }
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "decoder"
    }
}

/// Decode a complete container payload into interleaved 16-bit frames
pub fn decode_clip(bytes: &[u8]) -> Result<Vec<AudioFrame>> {
    let source = MediaSourceStream::new(Box::new(Cursor::new(bytes.to_vec())), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .context("Unsupported audio container")?;

    let mut format = probed.format;
    let track = format.default_track().context("No playable audio track")?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .context("Unsupported audio codec")?;

    let mut frames = Vec::new();
    let mut elapsed_ms = 0u64;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(DecodeError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("Failed to read audio packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(DecodeError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e).context("Failed to decode audio packet"),
        };

        let spec = *decoded.spec();
        let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);

        let frame = AudioFrame {
            samples: buffer.samples().to_vec(),
            sample_rate: spec.rate,
            channels: spec.channels.count() as u16,
            timestamp_ms: elapsed_ms,
        };
        elapsed_ms += frame.duration_ms();
        frames.push(frame);
    }

    Ok(frames)
}
