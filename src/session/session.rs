use super::config::SessionConfig;
use super::message::{ChatMessage, VitalsSnapshot};
use super::state::{ConnectionState, Effect, SessionEvent, SessionState};
use super::summary::{SessionStatus, SessionSummary};
use crate::audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioPlayer, AudioSink, AudioSource,
    MicRecorder, MicrophoneAccess, NullSink, PlaybackEvent, StaticPermission,
};
use crate::protocol::{ClientFrame, ServerSummary};
use crate::transport::{Transport, TransportEvent, WebSocketTransport};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Called with the summary whenever `end_session` resolves
pub type SummaryCallback = Arc<dyn Fn(&SessionSummary) + Send + Sync>;

/// Creates a fresh capture backend for each recording
pub type CaptureFactory = Arc<dyn Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync>;

/// Background tasks owned by the session
#[derive(Default)]
struct SessionTasks {
    watchdog: Option<JoinHandle<()>>,
    connection: Option<JoinHandle<()>>,
}

impl SessionTasks {
    fn abort_all(&mut self) {
        if let Some(task) = self.watchdog.take() {
            task.abort();
        }
        if let Some(task) = self.connection.take() {
            task.abort();
        }
    }
}

/// State shared between the session, its handle and its background tasks
struct Shared {
    config: SessionConfig,

    state: Mutex<SessionState>,

    /// Sender half of the open connection; dropping it closes the socket
    outbound: Mutex<Option<mpsc::Sender<String>>>,

    player: Mutex<AudioPlayer>,

    events: broadcast::Sender<SessionEvent>,

    /// Waiting `end_session` call, if any
    pending_summary: Mutex<Option<oneshot::Sender<ServerSummary>>>,

    tasks: Mutex<SessionTasks>,

    /// Bumped by every `open` and `close`; stale tasks compare against it
    generation: AtomicU64,

    on_summary: Option<SummaryCallback>,
}

impl Shared {
    /// Run one state transition and perform its effects
    ///
    /// The state lock is held until every effect has been performed, so
    /// effects of concurrent handlers never interleave. Returns whether a
    /// frame was sent.
    async fn apply<F>(&self, transition: F) -> bool
    where
        F: FnOnce(&mut SessionState) -> Vec<Effect>,
    {
        let mut state = self.state.lock().await;
        let effects = transition(&mut state);
        self.dispatch(effects).await
    }

    /// Like `apply`, but skipped if the session was reopened or closed since
    /// `generation` was taken
    async fn apply_current<F>(&self, generation: u64, transition: F) -> bool
    where
        F: FnOnce(&mut SessionState) -> Vec<Effect>,
    {
        let mut state = self.state.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Ignoring event from a superseded connection");
            return false;
        }
        let effects = transition(&mut state);
        self.dispatch(effects).await
    }

    /// Perform effects in order; callers hold the state lock
    async fn dispatch(&self, effects: Vec<Effect>) -> bool {
        let mut sent = false;

        for effect in effects {
            match effect {
                Effect::Send(frame) => {
                    sent |= self.send_frame(frame).await;
                }
                Effect::Play(clip) => {
                    self.player.lock().await.play(clip);
                }
                Effect::StopPlayback => {
                    self.player.lock().await.stop();
                }
                Effect::ResolveSummary(summary) => match self.pending_summary.lock().await.take() {
                    Some(waiter) => {
                        let _ = waiter.send(summary);
                    }
                    None => debug!("Session summary arrived after end_session gave up"),
                },
                Effect::Emit(event) => {
                    // No subscribers is fine
                    let _ = self.events.send(event);
                }
            }
        }

        sent
    }

    async fn send_frame(&self, frame: ClientFrame) -> bool {
        let text = match frame.to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("{:#}", e);
                return false;
            }
        };

        let outbound = self.outbound.lock().await.clone();
        match outbound {
            Some(tx) => {
                if tx.send(text).await.is_err() {
                    warn!("Connection closed before frame could be sent");
                    return false;
                }
                true
            }
            None => {
                warn!("No open connection, dropping frame");
                false
            }
        }
    }

    async fn run_connection(
        self: Arc<Self>,
        transport: Arc<dyn Transport>,
        url: String,
        generation: u64,
    ) {
        let connection = match transport.connect(&url).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Connection attempt via {} failed: {:#}", transport.name(), e);
                self.apply_current(generation, |state| state.on_connect_failed()).await;
                return;
            }
        };

        let (outbound, mut inbound) = connection.split();
        {
            let mut slot = self.outbound.lock().await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!("Session closed while connecting, discarding connection");
                return;
            }
            *slot = Some(outbound);
        }

        if let Some(watchdog) = self.tasks.lock().await.watchdog.take() {
            watchdog.abort();
        }

        info!("Chat session {} connected", self.config.session_id);
        self.apply_current(generation, |state| state.on_connected()).await;

        while let Some(event) = inbound.recv().await {
            match event {
                TransportEvent::Frame(raw) => {
                    self.apply_current(generation, |state| state.handle_frame(&raw)).await;
                }
                TransportEvent::Error(detail) => {
                    self.state.lock().await.on_transport_error(&detail);
                }
                TransportEvent::Closed => break,
            }
        }

        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        self.outbound.lock().await.take();
        self.apply_current(generation, |state| state.on_disconnected()).await;
        // Wake a waiting end_session so it falls back right away
        self.pending_summary.lock().await.take();
    }

    async fn end_session(&self) -> SessionSummary {
        let (waiter, summary_rx) = oneshot::channel();

        let requested = {
            let mut state = self.state.lock().await;
            let request = state.request_summary();
            if request.is_empty() {
                false
            } else {
                *self.pending_summary.lock().await = Some(waiter);
                self.dispatch(request).await;
                true
            }
        };

        let server_summary = if requested {
            match tokio::time::timeout(self.config.summary_timeout, summary_rx).await {
                Ok(Ok(summary)) => {
                    info!("Received session summary from agent");
                    Some(summary)
                }
                Ok(Err(_)) => {
                    info!("Connection ended before the session summary arrived");
                    None
                }
                Err(_) => {
                    warn!(
                        "No session summary within {:?}, using local summary",
                        self.config.summary_timeout
                    );
                    self.pending_summary.lock().await.take();
                    self.state.lock().await.abandon_summary();
                    None
                }
            }
        } else {
            info!("No open connection, building local session summary");
            None
        };

        let messages = self.state.lock().await.messages().to_vec();
        let summary = SessionSummary::build(
            &self.config.session_id,
            &self.config.patient_id,
            self.config.endpoint,
            messages,
            server_summary,
        );

        if let Some(callback) = &self.on_summary {
            callback(&summary);
        }

        summary
    }

    async fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().await.messages().to_vec()
    }

    async fn is_idle(&self) -> bool {
        let state = self.state.lock().await;
        !state.is_processing() && !state.is_recording() && !self.player.lock().await.is_playing()
    }
}

/// One conversation with the remote agent
///
/// Owns the connection, the playback device and the capture device. All three
/// are released by [`ChatSession::close`], which hosts must call on teardown.
pub struct ChatSession {
    shared: Arc<Shared>,
    transport: Arc<dyn Transport>,
    microphone: Arc<dyn MicrophoneAccess>,
    capture: CaptureFactory,
    recorder: Mutex<MicRecorder>,
}

impl ChatSession {
    pub fn builder(config: SessionConfig) -> ChatSessionBuilder {
        ChatSessionBuilder::new(config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn session_id(&self) -> &str {
        &self.shared.config.session_id
    }

    /// Cloneable handle for hosts that only need the summary and status
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub async fn subscribe_playback(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.shared.player.lock().await.subscribe()
    }

    /// Connect to the agent endpoint
    ///
    /// No-op if a connection is already open or opening. Returns immediately;
    /// the outcome is reported through [`SessionEvent::Connection`].
    pub async fn open(&self) {
        let mut tasks = self.shared.tasks.lock().await;

        {
            let mut state = self.shared.state.lock().await;
            let Some(effects) = state.begin_connect() else {
                debug!("Connection already open or opening");
                return;
            };

            tasks.abort_all();
            self.shared.dispatch(effects).await;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let url = self.shared.config.url();

        info!(
            "Opening chat session {} for {} via {} ({})",
            self.shared.config.session_id,
            self.shared.config.patient_id,
            self.transport.name(),
            url
        );

        let watchdog = {
            let shared = Arc::clone(&self.shared);
            let timeout = self.shared.config.connect_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                shared.apply_current(generation, |state| state.on_watchdog()).await;
            })
        };

        let connection = {
            let shared = Arc::clone(&self.shared);
            let transport = Arc::clone(&self.transport);
            tokio::spawn(shared.run_connection(transport, url, generation))
        };

        tasks.watchdog = Some(watchdog);
        tasks.connection = Some(connection);
    }

    /// Tear down the connection, capture and playback
    ///
    /// Safe to call any number of times.
    pub async fn close(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        self.shared.tasks.lock().await.abort_all();

        if self.shared.outbound.lock().await.take().is_some() {
            info!("Closing chat session {}", self.shared.config.session_id);
        }

        self.recorder.lock().await.cancel().await;
        self.shared.pending_summary.lock().await.take();
        self.shared.apply(|state| state.close()).await;
    }

    /// Send a typed message
    ///
    /// Returns `false` without side effects for blank input or when not
    /// connected.
    pub async fn send_text(&self, content: &str) -> bool {
        self.shared.apply(|state| state.send_text(content)).await
    }

    /// Start capturing the user's voice
    ///
    /// Returns `Ok(false)` if a recording is already running or microphone
    /// access was denied.
    pub async fn start_recording(&self) -> Result<bool> {
        let mut recorder = self.recorder.lock().await;
        if recorder.is_recording() {
            debug!("Recording already in progress");
            return Ok(false);
        }

        let cached = self.shared.state.lock().await.has_permission();
        let granted = match cached {
            Some(granted) => granted,
            None => {
                let granted = self.microphone.request().await;
                self.shared.apply(|state| state.permission_result(granted)).await;
                granted
            }
        };

        if !granted {
            return Ok(false);
        }

        let backend = (self.capture)().context("Failed to create capture backend")?;
        recorder.start(backend).await?;
        self.shared.apply(|state| state.recording_changed(true)).await;

        Ok(true)
    }

    /// Finish the recording and upload it
    ///
    /// Returns whether an audio frame was sent.
    pub async fn stop_recording(&self) -> Result<bool> {
        let mut recorder = self.recorder.lock().await;
        if !recorder.is_recording() {
            debug!("No recording to stop");
            return Ok(false);
        }

        let recorded = recorder.stop().await;
        self.shared.apply(|state| state.recording_changed(false)).await;

        let Some(audio) = recorded? else {
            return Ok(false);
        };

        Ok(self.shared.apply(|state| state.audio_recorded(&audio)).await)
    }

    /// Report a completed vitals measurement
    ///
    /// Each distinct snapshot is sent once; a snapshot arriving before the
    /// connection opens is sent when it does.
    pub async fn send_vitals(&self, vitals: VitalsSnapshot) -> bool {
        self.shared.apply(|state| state.submit_vitals(vitals)).await
    }

    /// Flip mute; muting stops playback and drops buffered audio
    pub async fn toggle_mute(&self) -> bool {
        self.shared.apply(|state| state.toggle_mute()).await;
        self.shared.state.lock().await.is_muted()
    }

    /// Ask the agent for a summary, falling back to a local one on timeout
    pub async fn end_session(&self) -> SessionSummary {
        self.shared.end_session().await
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.shared.messages().await
    }

    pub async fn is_idle(&self) -> bool {
        self.shared.is_idle().await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.shared.state.lock().await.connection()
    }

    pub async fn status(&self) -> SessionStatus {
        let state = self.shared.state.lock().await;
        let playing = self.shared.player.lock().await.is_playing();

        SessionStatus {
            session_id: self.shared.config.session_id.clone(),
            patient_id: self.shared.config.patient_id.clone(),
            endpoint: self.shared.config.endpoint,
            connection: state.connection(),
            muted: state.is_muted(),
            processing: state.is_processing(),
            recording: state.is_recording(),
            playing,
            message_count: state.messages().len(),
        }
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // Tasks hold the shared state; abort them so nothing outlives the session
        if let Ok(mut tasks) = self.shared.tasks.try_lock() {
            tasks.abort_all();
        }
    }
}

/// The three operations a host needs after handing the session off
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub async fn end_session(&self) -> SessionSummary {
        self.shared.end_session().await
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.shared.messages().await
    }

    pub async fn is_idle(&self) -> bool {
        self.shared.is_idle().await
    }
}

/// Configures collaborators for a [`ChatSession`]
///
/// Anything not set falls back to: WebSocket transport, silent playback,
/// microphone permission granted, microphone capture.
pub struct ChatSessionBuilder {
    config: SessionConfig,
    transport: Option<Arc<dyn Transport>>,
    sink: Option<Arc<dyn AudioSink>>,
    microphone: Option<Arc<dyn MicrophoneAccess>>,
    capture: Option<CaptureFactory>,
    on_summary: Option<SummaryCallback>,
}

impl ChatSessionBuilder {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            transport: None,
            sink: None,
            microphone: None,
            capture: None,
            on_summary: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn microphone(mut self, microphone: Arc<dyn MicrophoneAccess>) -> Self {
        self.microphone = Some(microphone);
        self
    }

    pub fn capture<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn AudioBackend>> + Send + Sync + 'static,
    {
        self.capture = Some(Arc::new(factory));
        self
    }

    /// Capture from `source` with `config` for every recording
    pub fn capture_source(self, source: AudioSource, config: AudioBackendConfig) -> Self {
        self.capture(move || AudioBackendFactory::create(source.clone(), config.clone()))
    }

    pub fn on_summary<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SessionSummary) + Send + Sync + 'static,
    {
        self.on_summary = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> ChatSession {
        let sink: Arc<dyn AudioSink> = match self.sink {
            Some(sink) => sink,
            None => Arc::new(NullSink),
        };
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::new()),
        };
        let microphone: Arc<dyn MicrophoneAccess> = match self.microphone {
            Some(microphone) => microphone,
            None => Arc::new(StaticPermission::granted()),
        };
        let capture: CaptureFactory = match self.capture {
            Some(capture) => capture,
            None => Arc::new(|| {
                AudioBackendFactory::create(AudioSource::Microphone, AudioBackendConfig::default())
            }),
        };
        let (events, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            state: Mutex::new(SessionState::new(&self.config)),
            config: self.config,
            outbound: Mutex::new(None),
            player: Mutex::new(AudioPlayer::new(sink)),
            events,
            pending_summary: Mutex::new(None),
            tasks: Mutex::new(SessionTasks::default()),
            generation: AtomicU64::new(0),
            on_summary: self.on_summary,
        });

        ChatSession {
            shared,
            transport,
            microphone,
            capture,
            recorder: Mutex::new(MicRecorder::new()),
        }
    }
}
