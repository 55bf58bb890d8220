//! Session state machine
//!
//! Every input (user intent, transport event, timer) is one synchronous call
//! that mutates the state and returns the side effects to perform. The state
//! does no I/O; the driver holds its lock for one call and its effects.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::config::{SessionConfig, TriageContext, VitalsThreshold};
use super::message::{ChatMessage, Role, VitalsSnapshot};
use super::playback::PlaybackBuffer;
use crate::audio::{AudioClip, RecordedAudio};
use crate::protocol::{ClientFrame, EndpointKind, ServerFrame, ServerSummary};

/// Shown when the backend cannot be reached within the connect timeout
pub const CONNECT_FAILURE_NOTICE: &str =
    "Unable to connect to your care companion right now. Please check your connection and try again.";

/// Shown once when microphone access is refused
pub const MICROPHONE_BLOCKED_NOTICE: &str =
    "Microphone access is blocked. Allow microphone access in your settings to talk, or keep chatting by text.";

const FALLBACK_ERROR_TEXT: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Observable changes, in the order they happened
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connection(ConnectionState),
    MessageAppended(ChatMessage),
    MessageRetracted(ChatMessage),
    Processing(bool),
    Muted(bool),
    Recording(bool),
    PlaybackQueued { utterance: u64, bytes: usize },
}

/// Side effect requested by the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send(ClientFrame),
    Play(AudioClip),
    StopPlayback,
    /// Hand the agent's summary to the pending `end_session` call
    ResolveSummary(ServerSummary),
    Emit(SessionEvent),
}

pub struct SessionState {
    endpoint: EndpointKind,
    threshold: VitalsThreshold,
    triage: Option<TriageContext>,

    connection: ConnectionState,
    muted: bool,
    processing: bool,
    recording: bool,
    messages: Vec<ChatMessage>,
    playback: PlaybackBuffer,

    /// Cached microphone permission; `Some(false)` is sticky
    has_permission: Option<bool>,

    /// Snapshot received before the connection opened
    pending_vitals: Option<VitalsSnapshot>,
    last_vitals: Option<VitalsSnapshot>,

    awaiting_summary: bool,
}

impl SessionState {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            endpoint: config.endpoint,
            threshold: config.threshold,
            triage: config.triage.clone(),
            connection: ConnectionState::Idle,
            muted: false,
            processing: false,
            recording: false,
            messages: Vec::new(),
            playback: PlaybackBuffer::new(),
            has_permission: None,
            pending_vitals: None,
            last_vitals: None,
            awaiting_summary: false,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn has_permission(&self) -> Option<bool> {
        self.has_permission
    }

    pub fn buffered_chunks(&self) -> usize {
        self.playback.len()
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Start a connection attempt
    ///
    /// Returns `None` if a connection is already open or opening.
    pub fn begin_connect(&mut self) -> Option<Vec<Effect>> {
        if matches!(self.connection, ConnectionState::Connecting | ConnectionState::Open) {
            return None;
        }

        let mut fx = Vec::new();
        self.set_connection(ConnectionState::Connecting, &mut fx);
        Some(fx)
    }

    pub fn on_connected(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.set_connection(ConnectionState::Open, &mut fx);
        self.retract_connect_notice(&mut fx);

        let opening = match (self.endpoint, &self.triage) {
            (EndpointKind::Triage, Some(context)) => ClientFrame::Init {
                vitals: context.vitals,
                conversation_history: context.conversation_history.clone(),
                is_normal: self.threshold.is_normal(&context.vitals),
            },
            (EndpointKind::Triage, None) => {
                warn!("Triage session opened without check-in context, asking for a greeting");
                ClientFrame::GetGreeting
            }
            _ => ClientFrame::GetGreeting,
        };
        fx.push(Effect::Send(opening));

        if let Some(vitals) = self.pending_vitals.take() {
            self.send_vitals(vitals, &mut fx);
        }

        fx
    }

    /// The attempt failed before opening; the watchdog decides what the user sees
    pub fn on_connect_failed(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.connection == ConnectionState::Connecting {
            self.set_connection(ConnectionState::Closed, &mut fx);
        }
        fx
    }

    pub fn on_watchdog(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.connection == ConnectionState::Open {
            return fx;
        }

        if self.has_connect_notice() {
            debug!("Connection notice already shown");
        } else {
            info!("No connection after watchdog deadline, notifying user");
            self.append(ChatMessage::error(CONNECT_FAILURE_NOTICE), &mut fx);
        }
        fx
    }

    pub fn on_transport_error(&mut self, detail: &str) {
        // Details stay in the logs; the close event follows
        warn!("Transport error: {}", detail);
    }

    pub fn on_disconnected(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        if matches!(self.connection, ConnectionState::Connecting | ConnectionState::Open) {
            info!("Agent connection closed");
            self.set_connection(ConnectionState::Closed, &mut fx);
        }
        if !self.playback.is_empty() {
            debug!("Dropping {} chunks of an unfinished utterance", self.playback.len());
            self.playback.clear();
        }
        self.awaiting_summary = false;
        // No reply can arrive on a closed connection
        self.set_processing(false, &mut fx);
        fx
    }

    /// Teardown requested by the host
    pub fn close(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.set_connection(ConnectionState::Closed, &mut fx);
        self.playback.clear();
        self.awaiting_summary = false;
        self.set_recording(false, &mut fx);
        self.set_processing(false, &mut fx);
        fx.push(Effect::StopPlayback);
        fx
    }

    // ------------------------------------------------------------------
    // User intents
    // ------------------------------------------------------------------

    pub fn send_text(&mut self, content: &str) -> Vec<Effect> {
        let mut fx = Vec::new();
        let content = content.trim();

        if content.is_empty() {
            return fx;
        }
        if self.connection != ConnectionState::Open {
            debug!("Not connected, dropping text message");
            return fx;
        }

        self.append(ChatMessage::user(content), &mut fx);
        self.set_processing(true, &mut fx);
        fx.push(Effect::Send(ClientFrame::Text {
            content: content.to_string(),
        }));
        fx
    }

    pub fn audio_recorded(&mut self, audio: &RecordedAudio) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.connection != ConnectionState::Open {
            warn!("Not connected, discarding {}ms recording", audio.duration_ms);
            return fx;
        }

        self.set_processing(true, &mut fx);
        fx.push(Effect::Send(ClientFrame::Audio {
            data: audio.to_base64(),
            format: audio.format.clone(),
        }));
        fx
    }

    pub fn submit_vitals(&mut self, vitals: VitalsSnapshot) -> Vec<Effect> {
        let mut fx = Vec::new();

        if self.last_vitals == Some(vitals) {
            debug!("Vitals unchanged since last report, not resending");
            return fx;
        }
        if self.connection != ConnectionState::Open {
            debug!("Holding vitals until the connection opens");
            self.pending_vitals = Some(vitals);
            return fx;
        }

        self.send_vitals(vitals, &mut fx);
        fx
    }

    pub fn toggle_mute(&mut self) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.muted = !self.muted;

        if self.muted {
            self.playback.clear();
            fx.push(Effect::StopPlayback);
        }
        fx.push(Effect::Emit(SessionEvent::Muted(self.muted)));
        fx
    }

    pub fn permission_result(&mut self, granted: bool) -> Vec<Effect> {
        let mut fx = Vec::new();
        if self.has_permission == Some(false) {
            return fx;
        }

        self.has_permission = Some(granted);
        if !granted {
            info!("Microphone permission denied, continuing in text-only mode");
            self.append(ChatMessage::system(MICROPHONE_BLOCKED_NOTICE), &mut fx);
        }
        fx
    }

    pub fn recording_changed(&mut self, recording: bool) -> Vec<Effect> {
        let mut fx = Vec::new();
        self.set_recording(recording, &mut fx);
        fx
    }

    /// Ask the agent for its summary
    ///
    /// Returns no effects when there is no connection to ask on.
    pub fn request_summary(&mut self) -> Vec<Effect> {
        if self.connection != ConnectionState::Open {
            return Vec::new();
        }
        self.awaiting_summary = true;
        vec![Effect::Send(ClientFrame::EndSession)]
    }

    pub fn abandon_summary(&mut self) {
        self.awaiting_summary = false;
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    pub fn handle_frame(&mut self, raw: &str) -> Vec<Effect> {
        match ServerFrame::parse(raw) {
            Ok(frame) => self.handle_server_frame(frame),
            Err(e) => {
                warn!("Ignoring malformed frame: {:#}", e);
                Vec::new()
            }
        }
    }

    pub fn handle_server_frame(&mut self, frame: ServerFrame) -> Vec<Effect> {
        let mut fx = Vec::new();

        match frame {
            ServerFrame::Greeting { content } => {
                self.append(ChatMessage::assistant(content), &mut fx);
            }

            ServerFrame::Transcription { content } => {
                self.append(ChatMessage::transcription(content), &mut fx);
                self.set_processing(true, &mut fx);
            }

            ServerFrame::Response { content } => {
                self.append(ChatMessage::assistant(content), &mut fx);
                self.set_processing(false, &mut fx);
            }

            ServerFrame::VitalResponse { content } => {
                self.append(ChatMessage::vital_response(content), &mut fx);
                self.set_processing(false, &mut fx);
            }

            ServerFrame::AudioChunk { data, is_final } => {
                self.on_audio_chunk(&data, is_final, &mut fx);
            }

            ServerFrame::TtsError { message } => {
                warn!("Agent could not synthesize speech: {}", message);
            }

            ServerFrame::Error { message } => {
                let text = if message.trim().is_empty() {
                    FALLBACK_ERROR_TEXT.to_string()
                } else {
                    message
                };
                self.append(ChatMessage::error(text), &mut fx);
                self.set_processing(false, &mut fx);
            }

            ServerFrame::SessionSummary { summary } => {
                if self.awaiting_summary {
                    self.awaiting_summary = false;
                    fx.push(Effect::ResolveSummary(summary));
                } else {
                    info!(
                        "Received unsolicited session summary ({} history entries)",
                        summary.conversation_history.len()
                    );
                }
            }

            ServerFrame::SessionEnd { content, summary } => {
                if let Some(content) = content.filter(|c| !c.trim().is_empty()) {
                    self.append(ChatMessage::assistant(content), &mut fx);
                }
                self.set_processing(false, &mut fx);
                if self.awaiting_summary {
                    self.awaiting_summary = false;
                    fx.push(Effect::ResolveSummary(summary.unwrap_or_default()));
                } else {
                    info!("Agent ended the session");
                }
            }

            ServerFrame::Unknown => {
                debug!("Ignoring unrecognized frame type");
            }
        }

        fx
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn on_audio_chunk(&mut self, data: &str, is_final: bool, fx: &mut Vec<Effect>) {
        if self.muted {
            return;
        }

        if !data.is_empty() {
            match base64::engine::general_purpose::STANDARD.decode(data) {
                Ok(bytes) => self.playback.push(bytes),
                Err(e) => warn!("Dropping undecodable audio chunk: {}", e),
            }
        }

        if !is_final {
            return;
        }

        match self.playback.finish() {
            Some(clip) => {
                fx.push(Effect::Emit(SessionEvent::PlaybackQueued {
                    utterance: clip.utterance,
                    bytes: clip.bytes.len(),
                }));
                fx.push(Effect::Play(clip));
            }
            None => debug!("Utterance ended without audio"),
        }
    }

    fn send_vitals(&mut self, vitals: VitalsSnapshot, fx: &mut Vec<Effect>) {
        let is_normal = self.threshold.is_normal(&vitals);
        info!(
            "Reporting vitals: {} bpm, HRV {} ms (normal={})",
            vitals.heart_rate, vitals.hrv, is_normal
        );

        self.last_vitals = Some(vitals);
        fx.push(Effect::Send(ClientFrame::VitalResult {
            heart_rate: vitals.heart_rate,
            hrv: vitals.hrv,
            is_normal,
        }));
    }

    fn append(&mut self, message: ChatMessage, fx: &mut Vec<Effect>) {
        self.messages.push(message.clone());
        fx.push(Effect::Emit(SessionEvent::MessageAppended(message)));
    }

    fn is_connect_notice(message: &ChatMessage) -> bool {
        message.role == Role::System
            && message.is_error
            && message.content == CONNECT_FAILURE_NOTICE
    }

    fn has_connect_notice(&self) -> bool {
        self.messages.iter().any(Self::is_connect_notice)
    }

    fn retract_connect_notice(&mut self, fx: &mut Vec<Effect>) {
        let (retracted, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.messages)
            .into_iter()
            .partition(Self::is_connect_notice);
        self.messages = kept;

        for message in retracted {
            info!("Connection recovered, retracting notice");
            fx.push(Effect::Emit(SessionEvent::MessageRetracted(message)));
        }
    }

    fn set_connection(&mut self, state: ConnectionState, fx: &mut Vec<Effect>) {
        if self.connection != state {
            self.connection = state;
            fx.push(Effect::Emit(SessionEvent::Connection(state)));
        }
    }

    fn set_processing(&mut self, processing: bool, fx: &mut Vec<Effect>) {
        if self.processing != processing {
            self.processing = processing;
            fx.push(Effect::Emit(SessionEvent::Processing(processing)));
        }
    }

    fn set_recording(&mut self, recording: bool, fx: &mut Vec<Effect>) {
        if self.recording != recording {
            self.recording = recording;
            fx.push(Effect::Emit(SessionEvent::Recording(recording)));
        }
    }
}
