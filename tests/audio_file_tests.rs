// Integration tests for audio file processing
//
// These tests write small WAV files and verify reading, replay as capture
// frames, decoding and utterance files.

use anyhow::Result;
use pulsera_companion::audio::{
    decode_clip, encode_wav, AudioBackend, AudioBackendConfig, AudioClip, AudioFile, AudioFrame,
    FileBackend, FileSink,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Write a 16-bit mono ramp of `seconds` at `sample_rate`
fn write_test_wav(dir: &Path, name: &str, sample_rate: u32, seconds: f64) -> Result<PathBuf> {
    let path = dir.join(name);
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(&path, spec)?;
    let total = (sample_rate as f64 * seconds) as usize;
    for i in 0..total {
        writer.write_sample((i % 1000) as i16)?;
    }
    writer.finalize()?;

    Ok(path)
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_test_wav(temp_dir.path(), "take.wav", 16000, 0.5)?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 0.001);
    assert!(audio.path.contains("take.wav"));

    Ok(())
}

#[test]
fn test_audio_file_nonexistent() {
    let path = PathBuf::from("/nonexistent/path/to/audio.wav");
    let result = AudioFile::open(&path);

    assert!(result.is_err(), "Opening nonexistent file should fail");
}

#[test]
fn test_audio_file_frames() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_test_wav(temp_dir.path(), "take.wav", 16000, 0.25)?;
    let audio = AudioFile::open(&path)?;

    let frames = audio.frames(100);

    // 250ms in 100ms frames: two full frames and one half frame
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].samples.len(), 1600);
    assert_eq!(frames[2].samples.len(), 800);
    assert_eq!(frames[1].timestamp_ms, 100);
    assert_eq!(frames[2].timestamp_ms, 200);

    let total: usize = frames.iter().map(|f| f.samples.len()).sum();
    assert_eq!(total, audio.samples.len());

    Ok(())
}

#[tokio::test]
async fn test_file_backend_replays_all_frames() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = write_test_wav(temp_dir.path(), "take.wav", 16000, 1.0)?;

    let mut backend = FileBackend::new(&path, AudioBackendConfig::default());
    let mut rx = backend.start().await?;
    backend.stop().await?;

    let mut frames = Vec::new();
    while let Some(frame) = rx.recv().await {
        frames.push(frame);
    }

    assert_eq!(frames.len(), 10, "1 second in 100ms frames");
    assert!(!backend.is_capturing());

    Ok(())
}

#[tokio::test]
async fn test_file_backend_missing_file() {
    let mut backend = FileBackend::new("/nonexistent/take.wav", AudioBackendConfig::default());
    assert!(backend.start().await.is_err());
}

#[test]
fn test_wav_payload_decodes() -> Result<()> {
    let frames: Vec<AudioFrame> = (0..5)
        .map(|i| AudioFrame {
            samples: vec![(i * 100) as i16; 1600],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: i * 100,
        })
        .collect();

    let recorded = encode_wav(&frames)?;
    assert_eq!(recorded.format, "wav");
    assert_eq!(recorded.duration_ms, 500);
    assert!(recorded.bytes.starts_with(b"RIFF"));

    let decoded = decode_clip(&recorded.bytes)?;
    let samples: Vec<i16> = decoded.iter().flat_map(|f| f.samples.iter().copied()).collect();

    assert_eq!(samples.len(), 8000);
    assert_eq!(samples[0], 0);
    assert_eq!(samples[7999], 400);
    assert!(decoded.iter().all(|f| f.sample_rate == 16000 && f.channels == 1));

    Ok(())
}

#[test]
fn test_encode_wav_rejects_empty_take() {
    assert!(encode_wav(&[]).is_err());
}

#[test]
fn test_decode_clip_rejects_garbage() {
    assert!(decode_clip(b"definitely not audio").is_err());
}

#[test]
fn test_container_hint() {
    let clip = |bytes: &[u8]| AudioClip {
        utterance: 1,
        bytes: bytes.to_vec(),
        chunk_count: 1,
    };

    assert_eq!(clip(b"RIFF....WAVE").container_hint(), "wav");
    assert_eq!(clip(b"OggS\0").container_hint(), "ogg");
    assert_eq!(clip(b"ID3\x04").container_hint(), "mp3");
    assert_eq!(clip(&[0xFF, 0xFB, 0x90]).container_hint(), "mp3");
    assert_eq!(clip(b"\x00\x01").container_hint(), "bin");
}

#[tokio::test]
async fn test_file_sink_writes_utterance() -> Result<()> {
    use pulsera_companion::audio::AudioSink;

    let temp_dir = TempDir::new()?;
    let output_dir = temp_dir.path().join("playback");
    let sink = FileSink::new(&output_dir, "chat-test")?;

    let clip = AudioClip {
        utterance: 3,
        bytes: b"RIFFdata".to_vec(),
        chunk_count: 2,
    };
    sink.render(clip.clone()).await?;

    let path = sink.path_for(&clip);
    assert_eq!(path, output_dir.join("chat-test-utterance-003.wav"));
    assert_eq!(std::fs::read(&path)?, b"RIFFdata");

    Ok(())
}

#[tokio::test]
async fn test_decoding_sink_streams_pcm() -> Result<()> {
    use pulsera_companion::audio::{AudioSink, DecodingSink};

    let frames: Vec<AudioFrame> = (0..3)
        .map(|i| AudioFrame {
            samples: vec![7i16; 1600],
            sample_rate: 16000,
            channels: 1,
            timestamp_ms: i * 100,
        })
        .collect();
    let recorded = encode_wav(&frames)?;

    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let sink = DecodingSink::new(tx, false);
    sink.render(AudioClip {
        utterance: 1,
        bytes: recorded.bytes,
        chunk_count: 1,
    })
    .await?;
    drop(sink);

    let mut samples = 0;
    while let Some(frame) = rx.recv().await {
        assert!(frame.samples.iter().all(|&s| s == 7));
        samples += frame.samples.len();
    }
    assert_eq!(samples, 4800);

    Ok(())
}
