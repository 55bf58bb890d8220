/// Gatekeeper for microphone access
///
/// Asked at most once per session; the session caches the answer.
#[async_trait::async_trait]
pub trait MicrophoneAccess: Send + Sync {
    /// Ask for permission to capture, `true` if granted
    async fn request(&self) -> bool;
}

/// A fixed answer, for hosts that decide up front
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub bool);

impl StaticPermission {
    pub fn granted() -> Self {
        Self(true)
    }

    pub fn denied() -> Self {
        Self(false)
    }
}

#[async_trait::async_trait]
impl MicrophoneAccess for StaticPermission {
    async fn request(&self) -> bool {
        self.0
    }
}
