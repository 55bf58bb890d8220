use crate::audio::AudioClip;

/// Chunks of the assistant utterance currently being streamed
///
/// Non-empty only between the first chunk of an utterance and its terminal
/// chunk.
#[derive(Debug, Default)]
pub struct PlaybackBuffer {
    chunks: Vec<Vec<u8>>,
    utterances: u64,
}

impl PlaybackBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push(chunk);
        }
    }

    /// Assemble everything received so far into one clip and reset
    ///
    /// Returns `None` when the utterance carried no audio.
    pub fn finish(&mut self) -> Option<AudioClip> {
        if self.chunks.is_empty() {
            return None;
        }

        let chunk_count = self.chunks.len();
        let bytes = std::mem::take(&mut self.chunks).concat();
        self.utterances += 1;

        Some(AudioClip {
            utterance: self.utterances,
            bytes,
            chunk_count,
        })
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }
}
