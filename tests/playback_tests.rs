// Tests for utterance assembly and playback sequencing

use anyhow::Result;
use pulsera_companion::audio::{AudioClip, AudioPlayer, AudioSink, PlaybackEvent};
use pulsera_companion::session::PlaybackBuffer;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::time::timeout;

/// Sink that holds every clip until released
struct GatedSink {
    gate: Notify,
}

#[async_trait::async_trait]
impl AudioSink for GatedSink {
    async fn render(&self, _clip: AudioClip) -> Result<()> {
        self.gate.notified().await;
        Ok(())
    }

    fn name(&self) -> &str {
        "gated"
    }
}

struct FailingSink;

#[async_trait::async_trait]
impl AudioSink for FailingSink {
    async fn render(&self, _clip: AudioClip) -> Result<()> {
        anyhow::bail!("output device unplugged")
    }

    fn name(&self) -> &str {
        "failing"
    }
}

fn clip(utterance: u64) -> AudioClip {
    AudioClip {
        utterance,
        bytes: vec![1, 2, 3],
        chunk_count: 1,
    }
}

async fn next_event(events: &mut broadcast::Receiver<PlaybackEvent>) -> PlaybackEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("playback event in time")
        .expect("player alive")
}

#[test]
fn test_buffer_concatenates_in_order() {
    let mut buffer = PlaybackBuffer::new();
    buffer.push(vec![1, 2]);
    buffer.push(Vec::new());
    buffer.push(vec![3]);

    assert_eq!(buffer.len(), 2, "Empty chunks are not buffered");
    assert_eq!(buffer.buffered_bytes(), 3);

    let clip = buffer.finish().expect("assembled clip");
    assert_eq!(clip.bytes, vec![1, 2, 3]);
    assert_eq!(clip.chunk_count, 2);
    assert_eq!(clip.utterance, 1);
    assert!(buffer.is_empty());
}

#[test]
fn test_buffer_numbers_utterances() {
    let mut buffer = PlaybackBuffer::new();

    buffer.push(vec![1]);
    assert_eq!(buffer.finish().map(|c| c.utterance), Some(1));

    assert!(buffer.finish().is_none(), "No audio means no utterance");

    buffer.push(vec![2]);
    assert_eq!(buffer.finish().map(|c| c.utterance), Some(2));
}

#[test]
fn test_buffer_clear() {
    let mut buffer = PlaybackBuffer::new();
    buffer.push(vec![1, 2, 3]);
    buffer.clear();

    assert!(buffer.is_empty());
    assert!(buffer.finish().is_none());
}

#[tokio::test]
async fn test_new_clip_stops_previous() {
    let sink = Arc::new(GatedSink { gate: Notify::new() });
    let mut player = AudioPlayer::new(sink.clone());
    let mut events = player.subscribe();

    player.play(clip(1));
    assert_eq!(next_event(&mut events).await, PlaybackEvent::Started { utterance: 1 });
    assert!(player.is_playing());

    player.play(clip(2));
    assert_eq!(next_event(&mut events).await, PlaybackEvent::Stopped { utterance: 1 });
    assert_eq!(next_event(&mut events).await, PlaybackEvent::Started { utterance: 2 });

    sink.gate.notify_one();
    assert_eq!(next_event(&mut events).await, PlaybackEvent::Finished { utterance: 2 });
}

#[tokio::test]
async fn test_stop_releases_playback() {
    let sink = Arc::new(GatedSink { gate: Notify::new() });
    let mut player = AudioPlayer::new(sink);
    let mut events = player.subscribe();

    player.play(clip(1));
    next_event(&mut events).await;

    player.stop();
    assert_eq!(next_event(&mut events).await, PlaybackEvent::Stopped { utterance: 1 });
    assert!(!player.is_playing());

    // Stopping again is a no-op
    player.stop();
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_sink_failure_is_reported() {
    let mut player = AudioPlayer::new(Arc::new(FailingSink));
    let mut events = player.subscribe();

    player.play(clip(7));
    assert_eq!(next_event(&mut events).await, PlaybackEvent::Started { utterance: 7 });

    match next_event(&mut events).await {
        PlaybackEvent::Failed { utterance, error } => {
            assert_eq!(utterance, 7);
            assert!(error.contains("unplugged"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}
