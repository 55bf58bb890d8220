use anyhow::Result;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One assembled assistant utterance
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Sequence number of the utterance within the session
    pub utterance: u64,
    /// Concatenated chunk payloads, in receipt order
    pub bytes: Vec<u8>,
    /// Number of chunks the clip was assembled from
    pub chunk_count: usize,
}

impl AudioClip {
    /// Best-effort container sniffing, used for file extensions and logs
    pub fn container_hint(&self) -> &'static str {
        let b = &self.bytes;
        if b.starts_with(b"RIFF") {
            "wav"
        } else if b.starts_with(b"OggS") {
            "ogg"
        } else if b.starts_with(b"fLaC") {
            "flac"
        } else if b.starts_with(b"ID3") || (b.len() > 1 && b[0] == 0xFF && b[1] & 0xE0 == 0xE0) {
            "mp3"
        } else {
            "bin"
        }
    }
}

/// Playback lifecycle notifications
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started { utterance: u64 },
    Finished { utterance: u64 },
    /// Playback was interrupted (mute, replacement, teardown)
    Stopped { utterance: u64 },
    Failed { utterance: u64, error: String },
}

/// Output device for assembled utterances
///
/// `render` resolves when the device reports the clip has finished playing.
/// Dropping the future must stop output.
#[async_trait::async_trait]
pub trait AudioSink: Send + Sync {
    async fn render(&self, clip: AudioClip) -> Result<()>;

    /// Get sink name for logging
    fn name(&self) -> &str;
}

/// Plays one clip at a time on a sink
///
/// Starting a clip tears down whatever is currently playing first, so at most
/// one utterance is ever audible.
pub struct AudioPlayer {
    sink: Arc<dyn AudioSink>,
    current: Option<(u64, JoinHandle<()>)>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl AudioPlayer {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sink,
            current: None,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|(_, task)| !task.is_finished())
    }

    pub fn play(&mut self, clip: AudioClip) {
        self.stop();

        let utterance = clip.utterance;
        let sink = Arc::clone(&self.sink);
        let events = self.events.clone();

        info!(
            "Playing utterance {} on {} ({} bytes, {} chunks, {})",
            utterance,
            sink.name(),
            clip.bytes.len(),
            clip.chunk_count,
            clip.container_hint()
        );

        let _ = events.send(PlaybackEvent::Started { utterance });

        let task = tokio::spawn(async move {
            match sink.render(clip).await {
                Ok(()) => {
                    debug!("Utterance {} finished", utterance);
                    let _ = events.send(PlaybackEvent::Finished { utterance });
                }
                Err(e) => {
                    warn!("Playback of utterance {} failed: {:#}", utterance, e);
                    let _ = events.send(PlaybackEvent::Failed {
                        utterance,
                        error: e.to_string(),
                    });
                }
            }
        });

        self.current = Some((utterance, task));
    }

    /// Stop and release the current clip, if any
    pub fn stop(&mut self) {
        if let Some((utterance, task)) = self.current.take() {
            if !task.is_finished() {
                task.abort();
                info!("Stopped utterance {}", utterance);
                let _ = self.events.send(PlaybackEvent::Stopped { utterance });
            }
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some((_, task)) = self.current.take() {
            task.abort();
        }
    }
}
