//! The single-consumer session engine.
//!
//! One task owns every piece of session state. Commands from the handle,
//! transport events, microphone frames and the results of background work
//! (connecting, waiting for the microphone) all arrive as messages and are
//! handled one at a time. Background results carry the generation of the
//! connection they were started for; results for a connection that has since
//! been torn down are released instead of applied.

use crate::capture::{AudioCaptureEncoder, MicStream, Microphone};
use crate::dispatcher::{LectureHost, ToolCallDispatcher, ToolEffect};
use crate::error::{CaptureError, ConnectError, PlaybackError, SessionError};
use crate::messages;
use crate::pending::{NavigationReply, PendingNavigations};
use crate::playback::{AudioOutputFactory, PlaybackScheduler};
use crate::resumption::ResumptionStore;
use crate::session::{Collaborators, Command, SessionEvent, SessionOptions, SessionSeed};
use crate::state::{SessionState, SessionStateMachine};
use crate::transport::Connector;
use gemini_live::LiveLink;
use gemini_live::client::ABNORMAL_CLOSURE;
use gemini_live::types::{
    ClientContent, ClientMessage, ServerContent, ServerMessage, SessionResumptionUpdate,
    ToolCallMessage, TransportEvent, UsageMetadata,
};
use lecture_core::{
    Attachment, Lecture, LectureConfig, SessionSnapshot, Speaker, ToolCall, TranscriptAggregator,
    TranscriptEntry, TranscriptUpdate, prompt,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shortest wait before checking again whether a finished turn has played out.
const DRAIN_POLL: Duration = Duration::from_millis(20);

pub(crate) enum Internal {
    Connected {
        generation: u64,
        used_handle: bool,
        result: Result<LiveLink, ConnectError>,
    },
    MicAcquired {
        generation: u64,
        result: Result<MicStream, CaptureError>,
    },
    ReconnectDue {
        generation: u64,
    },
}

#[derive(Debug, Default)]
struct UsageStats {
    prompt_tokens: u64,
    response_tokens: u64,
    total_tokens: u64,
    tool_calls: u64,
}

impl UsageStats {
    fn record(&mut self, usage: &UsageMetadata) {
        self.prompt_tokens += usage.prompt_token_count.unwrap_or(0);
        self.response_tokens += usage.response_token_count.unwrap_or(0);
        self.total_tokens += usage.total_token_count.unwrap_or(0);
    }
}

/// Everything owned by one open stream. Dropping it closes the socket.
struct Connection {
    generation: u64,
    outbound: mpsc::Sender<ClientMessage>,
    inbound: mpsc::Receiver<TransportEvent>,
    capture: AudioCaptureEncoder,
    playback: PlaybackScheduler,
    dispatcher: ToolCallDispatcher,
    used_handle: bool,
    /// `setupComplete` received.
    open: bool,
    closed: bool,
    /// The model is producing a turn that has not completed yet.
    generating: bool,
    stats: UsageStats,
}

enum ConnectionEvent {
    Transport(Option<TransportEvent>),
    Frame(Option<Vec<f32>>),
}

async fn next_connection_event(connection: &mut Option<Connection>) -> ConnectionEvent {
    match connection {
        Some(conn) => tokio::select! {
            event = conn.inbound.recv() => ConnectionEvent::Transport(event),
            frame = conn.capture.next_frame() => ConnectionEvent::Frame(frame),
        },
        None => std::future::pending().await,
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

pub(crate) struct Engine {
    lecture: Lecture,
    current_slide: usize,
    transcript: TranscriptAggregator,
    options: SessionOptions,
    machine: SessionStateMachine,
    connector: Arc<dyn Connector>,
    microphone: Arc<dyn Microphone>,
    output: Arc<dyn AudioOutputFactory>,
    resumption: ResumptionStore,
    host: Box<dyn LectureHost>,
    events: mpsc::UnboundedSender<SessionEvent>,
    internal: mpsc::Sender<Internal>,
    connection: Option<Connection>,
    generation: u64,
    /// Generation of the connect attempt in flight.
    connecting: Option<u64>,
    connect_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
    muted: bool,
    pending: PendingNavigations,
    snapshot_due: Option<Instant>,
    /// When to check whether a completed turn's audio has finished.
    drain_due: Option<Instant>,
}

impl Engine {
    pub(crate) fn new(
        seed: SessionSeed,
        options: SessionOptions,
        collaborators: Collaborators,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Self, mpsc::Receiver<Internal>) {
        let (internal, internal_rx) = mpsc::channel(16);
        let current_slide = seed
            .current_slide_index
            .min(seed.lecture.slide_count().saturating_sub(1));
        let mut transcript = TranscriptAggregator::with_entries(seed.transcript);
        transcript.set_current_slide(Some(current_slide as u32 + 1));

        let engine = Self {
            lecture: seed.lecture,
            current_slide,
            transcript,
            muted: options.start_muted,
            options,
            machine: SessionStateMachine::new(),
            connector: collaborators.connector,
            microphone: collaborators.microphone,
            output: collaborators.output,
            resumption: collaborators.resumption,
            host: collaborators.host,
            events,
            internal,
            connection: None,
            generation: 0,
            connecting: None,
            connect_task: None,
            reconnect_task: None,
            reconnect_attempts: 0,
            pending: PendingNavigations::new(),
            snapshot_due: None,
            drain_due: None,
        };
        (engine, internal_rx)
    }

    pub(crate) fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.machine.subscribe()
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<Internal>,
    ) {
        tracing::debug!(slides = self.lecture.slide_count(), "Session engine started");
        loop {
            let snapshot_due = self.snapshot_due;
            let drain_due = self.drain_due;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = internal.recv() => self.handle_internal(event),
                event = next_connection_event(&mut self.connection) => {
                    self.handle_connection_event(event).await
                }
                _ = sleep_until_due(snapshot_due) => self.emit_snapshot(),
                _ = sleep_until_due(drain_due) => self.on_playback_drained(),
            }
        }
        self.end();
        tracing::debug!("Session engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { config } => self.start(config),
            Command::End => self.end(),
            Command::Reconnect => self.reconnect(),
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::SendText {
                text,
                attachments,
                canvas_context,
            } => self.send_text(text, attachments, canvas_context).await,
            Command::Navigate { index, reply } => self.navigate(index, reply).await,
            Command::StopSpeaking => self.stop_speaking(),
            Command::ReportRenderError { payload, error } => {
                self.report_render_error(&payload, &error).await
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Connected {
                generation,
                used_handle,
                result,
            } => self.on_connected(generation, used_handle, result),
            Internal::MicAcquired { generation, result } => self.on_microphone(generation, result),
            Internal::ReconnectDue { generation } => {
                if generation == self.generation
                    && self.machine.state() == SessionState::Disconnected
                {
                    self.connect();
                }
            }
        }
    }

    async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Transport(Some(TransportEvent::Message(message))) => {
                self.handle_server_message(message).await
            }
            ConnectionEvent::Transport(Some(TransportEvent::Error(error))) => {
                tracing::warn!(%error, "Live stream error");
            }
            ConnectionEvent::Transport(Some(TransportEvent::Closed {
                code,
                reason,
                was_clean,
            })) => self.on_closed(code, &reason, was_clean),
            ConnectionEvent::Transport(None) => {
                self.on_closed(ABNORMAL_CLOSURE, "transport ended", false)
            }
            ConnectionEvent::Frame(Some(samples)) => self.on_frame(samples).await,
            ConnectionEvent::Frame(None) => {
                let error = CaptureError::DeviceUnavailable("microphone stream ended".to_string());
                self.fail(error.to_string());
            }
        }
    }

    // --- Lifecycle ---

    fn start(&mut self, config: Option<LectureConfig>) {
        if let Some(config) = config {
            self.lecture.config = config;
        }
        self.teardown("restarting");
        self.reconnect_attempts = 0;
        self.connect();
    }

    fn connect(&mut self) {
        self.cancel_reconnect();
        self.generation += 1;
        let generation = self.generation;
        self.transition(SessionState::Connecting);

        let handle = self.resumption.get(self.session_id()).map(|r| r.handle);
        let used_handle = handle.is_some();
        let instruction =
            prompt::render_system_instruction(&self.lecture, self.options.prompt_template.as_deref());
        let setup = messages::setup(&self.lecture, instruction, handle);
        tracing::info!(generation, used_handle, model = %setup.model, "Connecting");

        let connector = self.connector.clone();
        let internal = self.internal.clone();
        self.connecting = Some(generation);
        self.connect_task = Some(tokio::spawn(async move {
            let result = connector.connect(setup).await;
            let _ = internal
                .send(Internal::Connected {
                    generation,
                    used_handle,
                    result,
                })
                .await;
        }));
    }

    fn on_connected(
        &mut self,
        generation: u64,
        used_handle: bool,
        result: Result<LiveLink, ConnectError>,
    ) {
        if self.connecting != Some(generation) {
            tracing::debug!(generation, "Discarding stale connection attempt");
            return;
        }
        self.connecting = None;
        self.connect_task = None;

        let link = match result {
            Ok(link) => link,
            Err(e) if e.is_permanent() => {
                self.fail(e.to_string());
                return;
            }
            Err(e) => {
                tracing::warn!(generation, "Connection attempt failed: {}", e);
                self.transition(SessionState::Disconnected);
                self.notice(e.to_string());
                self.schedule_reconnect();
                return;
            }
        };

        let output = match self.output.open() {
            Ok(output) => output,
            Err(e) => {
                self.fail(e.to_string());
                return;
            }
        };

        self.connection = Some(Connection {
            generation,
            outbound: link.outbound,
            inbound: link.inbound,
            capture: AudioCaptureEncoder::new(),
            playback: PlaybackScheduler::new(output),
            dispatcher: ToolCallDispatcher::new(self.lecture.slide_count()),
            used_handle,
            open: false,
            closed: false,
            generating: false,
            stats: UsageStats::default(),
        });
    }

    /// The server accepted the setup: greet the model and open the mic.
    async fn on_open(&mut self) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.open {
            return;
        }
        conn.open = true;
        let generation = conn.generation;
        let used_handle = conn.used_handle;
        self.reconnect_attempts = 0;
        tracing::info!(generation, used_handle, "Live stream open");

        let turn = if used_handle {
            messages::resumption_turn(&self.lecture, self.current_slide, None)
        } else if self.transcript.is_empty() {
            messages::initial_turn(&self.lecture, self.current_slide)
        } else {
            messages::resumption_turn(
                &self.lecture,
                self.current_slide,
                Some(self.transcript.recent(self.options.context_lines)),
            )
        };
        self.send_client_content(turn).await;

        let microphone = self.microphone.clone();
        let internal = self.internal.clone();
        let frame_size = self.options.frame_size;
        tokio::spawn(async move {
            let result = microphone.acquire(frame_size).await;
            // If the engine is gone the stream is dropped, which releases it.
            let _ = internal
                .send(Internal::MicAcquired { generation, result })
                .await;
        });
    }

    fn on_microphone(&mut self, generation: u64, result: Result<MicStream, CaptureError>) {
        let live = matches!(&self.connection, Some(c) if c.generation == generation && !c.closed);
        match result {
            Ok(mut stream) if !live => {
                tracing::info!(generation, "Releasing microphone granted after teardown");
                stream.release();
            }
            Ok(stream) => {
                if let Some(conn) = self.connection.as_mut() {
                    conn.capture.attach(stream);
                }
                tracing::info!(generation, muted = self.muted, "Microphone capturing");
                self.transition(SessionState::Ready);
            }
            Err(e) if !live => {
                tracing::debug!(generation, "Ignoring microphone failure after teardown: {}", e);
            }
            Err(e) => self.fail(e.to_string()),
        }
    }

    fn on_closed(&mut self, code: u16, reason: &str, was_clean: bool) {
        let Some(conn) = self.connection.as_mut() else {
            tracing::debug!(code, "Close event without a connection ignored");
            return;
        };
        if conn.closed {
            tracing::debug!(code, "Duplicate close event ignored");
            return;
        }
        conn.closed = true;
        tracing::warn!(code, reason, was_clean, "Live stream closed");

        self.teardown("stream closed");
        self.transition(SessionState::Disconnected);
        self.notice(format!(
            "Connection lost (code {code}). Unmute or reconnect to continue."
        ));
        self.schedule_reconnect();
    }

    fn end(&mut self) {
        self.cancel_reconnect();
        self.teardown("session ended");
        if self.machine.state() == SessionState::Ended {
            return;
        }
        self.transition(SessionState::Ended);
        self.emit_snapshot();
    }

    fn reconnect(&mut self) {
        match self.machine.state() {
            SessionState::Idle | SessionState::Ended => {
                self.notice("There is no session to reconnect. Start one first.".to_string());
            }
            _ => {
                self.teardown("reconnecting");
                self.reconnect_attempts = 0;
                self.connect();
            }
        }
    }

    fn fail(&mut self, message: String) {
        tracing::error!("Session failed: {}", message);
        self.cancel_reconnect();
        self.teardown("error");
        self.transition(SessionState::Error);
        self.notice(message);
    }

    /// Releases everything the current connection holds. Synchronous and
    /// idempotent.
    fn teardown(&mut self, reason: &str) {
        self.connecting = None;
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(mut conn) = self.connection.take() {
            conn.capture.stop();
            conn.playback.close();
            tracing::info!(
                generation = conn.generation,
                reason,
                prompt_tokens = conn.stats.prompt_tokens,
                response_tokens = conn.stats.response_tokens,
                total_tokens = conn.stats.total_tokens,
                tool_calls = conn.stats.tool_calls,
                frames_sent = conn.capture.frames_sent(),
                frames_dropped = conn.capture.frames_dropped(),
                "Connection torn down"
            );
        }
        self.drain_due = None;
        self.pending.reject_all(reason);
        self.transcript.end_all_turns();
    }

    fn schedule_reconnect(&mut self) {
        let policy = &self.options.reconnect;
        if !policy.enabled {
            return;
        }
        if self.reconnect_attempts >= policy.max_attempts {
            let attempts = self.reconnect_attempts;
            tracing::warn!(attempts, "Giving up on reconnecting");
            self.notice(format!(
                "Could not reconnect after {attempts} attempts. Reconnect manually to continue."
            ));
            return;
        }
        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let delay = policy.delay(attempt);
        let generation = self.generation;
        let internal = self.internal.clone();
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.reconnect_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(Internal::ReconnectDue { generation }).await;
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect_task.take() {
            task.abort();
        }
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted != muted {
            tracing::info!(muted, "Microphone mute toggled");
        }
        self.muted = muted;
        if !muted && self.machine.state() == SessionState::Disconnected {
            tracing::info!("Unmuted while disconnected, reconnecting");
            self.reconnect_attempts = 0;
            self.connect();
        }
    }

    // --- Inbound ---

    async fn handle_server_message(&mut self, message: ServerMessage) {
        if message.setup_complete.is_some() {
            self.on_open().await;
        }
        if let Some(update) = message.session_resumption_update {
            self.on_resumption_update(update);
        }
        if let Some(go_away) = message.go_away {
            tracing::warn!(
                time_left = go_away.time_left.as_deref().unwrap_or("unknown"),
                "Server is about to close the stream"
            );
        }
        if let Some(usage) = message.usage_metadata {
            if let Some(conn) = self.connection.as_mut() {
                conn.stats.record(&usage);
            }
        }
        if let Some(cancellation) = message.tool_call_cancellation {
            if let Some(conn) = self.connection.as_mut() {
                conn.dispatcher.cancel(cancellation.ids);
            }
        }
        if let Some(content) = message.server_content {
            self.on_server_content(content);
        }
        if let Some(tool_call) = message.tool_call {
            self.on_tool_call(tool_call).await;
        }
    }

    fn on_resumption_update(&mut self, update: SessionResumptionUpdate) {
        if update.resumable == Some(false) {
            return;
        }
        let Some(handle) = update.new_handle.filter(|h| !h.is_empty()) else {
            return;
        };
        if let Err(e) = self.resumption.save(self.session_id(), &handle) {
            tracing::warn!("Failed to persist resumption handle: {}", e);
        }
    }

    fn on_server_content(&mut self, content: ServerContent) {
        let replied = content.model_turn.is_some()
            || content
                .output_transcription
                .as_ref()
                .is_some_and(|t| t.text.is_some());
        if replied {
            self.pending.resolve_armed();
            if let Some(conn) = self.connection.as_mut() {
                conn.generating = true;
            }
        }

        if content.interrupted == Some(true) {
            tracing::info!("Model interrupted by the student");
            self.interrupt_playback();
            self.end_generation();
        }

        if let Some(turn) = content.model_turn {
            for blob in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                if blob.mime_type.starts_with("audio/") {
                    self.play(&blob.data);
                }
            }
        }

        if let Some(text) = content.output_transcription.and_then(|t| t.text) {
            self.record_delta(Speaker::Ai, &text);
            self.set_activity(SessionState::Lecturing);
        }
        if let Some(text) = content.input_transcription.and_then(|t| t.text) {
            self.record_delta(Speaker::User, &text);
            self.set_activity(SessionState::Listening);
        }

        if content.turn_complete == Some(true) {
            self.transcript.end_all_turns();
            self.end_generation();
            self.on_playback_drained();
        }
    }

    /// The model's turn is over, so a navigation sent during it can now be
    /// confirmed by whatever the model says next.
    fn end_generation(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            conn.generating = false;
        }
        self.pending.arm_all();
    }

    /// Moves to `Ready` once a completed turn's audio has played out, and
    /// checks back later while it is still playing.
    fn on_playback_drained(&mut self) {
        self.drain_due = None;
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.generating {
            return;
        }
        match conn.playback.remaining() {
            Some(left) => self.drain_due = Some(Instant::now() + left.max(DRAIN_POLL)),
            None => self.set_activity(SessionState::Ready),
        }
    }

    /// Cuts off the model's audio and closes its transcript turn.
    fn interrupt_playback(&mut self) {
        if let Some(conn) = self.connection.as_mut() {
            conn.playback.flush();
        }
        self.drain_due = None;
        self.transcript.end_turn(Speaker::Ai);
        self.set_activity(SessionState::Listening);
    }

    fn play(&mut self, payload: &str) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        match conn.playback.enqueue(payload) {
            Ok(Some(_)) => self.set_activity(SessionState::Lecturing),
            Ok(None) => {}
            Err(e @ PlaybackError::Decode(_)) => tracing::warn!("Skipping audio chunk: {}", e),
            Err(e @ PlaybackError::Output(_)) => self.fail(e.to_string()),
        }
    }

    async fn on_tool_call(&mut self, message: ToolCallMessage) {
        for call in message.function_calls {
            let call = ToolCall {
                id: call.id,
                name: call.name,
                args: call.args,
            };
            let Some(conn) = self.connection.as_mut() else {
                return;
            };
            conn.stats.tool_calls += 1;
            let Some(dispatched) = conn.dispatcher.dispatch(&call, self.host.as_mut()) else {
                continue;
            };
            if let Some(effect) = dispatched.effect {
                self.apply_effect(effect);
            }
            self.send(messages::tool_response(&dispatched.response)).await;
        }
    }

    fn apply_effect(&mut self, effect: ToolEffect) {
        match effect {
            ToolEffect::SlideChanged(index) => self.set_current_slide(index),
            ToolEffect::CanvasRendered(blocks) => {
                let markdown = blocks
                    .iter()
                    .map(|b| b.markdown.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                if let Some(slide) = self.lecture.slides.get_mut(self.current_slide) {
                    slide.canvas_content = Some(markdown);
                }
                self.emit(SessionEvent::Canvas(blocks));
                self.schedule_snapshot();
            }
        }
    }

    async fn on_frame(&mut self, samples: Vec<f32>) {
        let muted = self.muted;
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        let open = conn.open && !conn.closed;
        if let Some(blob) = conn.capture.encode(&samples, muted, open) {
            self.send(messages::audio_frame(blob)).await;
        }
    }

    // --- User actions ---

    async fn send_text(
        &mut self,
        text: String,
        attachments: Vec<Attachment>,
        canvas_context: Option<String>,
    ) {
        let entry = TranscriptEntry::new(Speaker::User, text.clone())
            .with_slide_number(Some(self.current_slide as u32 + 1))
            .with_attachments(attachments.clone());
        let update = self.transcript.insert_local(entry);
        self.publish_transcript(update);

        if !self.is_open() {
            self.notice("Not connected. The message was kept in the transcript only.".to_string());
            return;
        }
        let turn = messages::user_turn(&text, &attachments, canvas_context.as_deref());
        self.send_client_content(turn).await;
    }

    async fn navigate(&mut self, index: usize, reply: NavigationReply) {
        let count = self.lecture.slide_count();
        if index >= count {
            let _ = reply.send(Err(SessionError::SlideOutOfRange { index, count }));
            return;
        }
        self.set_current_slide(index);
        if !self.is_open() {
            let _ = reply.send(Ok(index));
            return;
        }
        let in_flight = self.connection.as_ref().is_some_and(|c| c.generating);
        self.interrupt_playback();
        let id = self.pending.register(index, reply, !in_flight);
        tracing::debug!(%id, index, in_flight, "Announcing slide change to the model");
        let turn = messages::navigation_turn(&self.lecture, index);
        self.send_client_content(turn).await;
    }

    fn stop_speaking(&mut self) {
        self.interrupt_playback();
    }

    async fn report_render_error(&mut self, payload: &str, error: &str) {
        tracing::warn!(%error, "Canvas failed to render, asking the model to fix it");
        if !self.is_open() {
            self.notice("Not connected. The canvas error was not reported.".to_string());
            return;
        }
        self.send_client_content(messages::render_repair_turn(payload, error))
            .await;
    }

    // --- Outbound ---

    fn is_open(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.open && !c.closed)
    }

    async fn send(&mut self, message: ClientMessage) -> bool {
        let Some(outbound) = self
            .connection
            .as_ref()
            .filter(|c| c.open && !c.closed)
            .map(|c| c.outbound.clone())
        else {
            return false;
        };
        if outbound.send(message).await.is_err() {
            tracing::warn!("Outbound channel closed, message dropped");
            return false;
        }
        true
    }

    /// Sends a structured turn, falling back to piecewise realtime input
    /// when it is too large or cannot be sent.
    async fn send_client_content(&mut self, content: ClientContent) {
        let message = ClientMessage::ClientContent(content.clone());
        let fits = messages::encoded_len(&message)
            .is_some_and(|len| len <= self.options.max_client_content_bytes);
        if fits {
            if self.send(message).await {
                return;
            }
            tracing::warn!("Structured send failed, falling back to realtime input");
        } else {
            tracing::warn!("Structured turn too large, sending it piecewise");
        }
        for message in messages::fallback_inputs(&content) {
            if !self.send(message).await {
                tracing::warn!("Piecewise send failed");
                return;
            }
        }
    }

    // --- State and events ---

    fn session_id(&self) -> Option<&str> {
        self.options.session_id.as_deref()
    }

    fn transition(&mut self, next: SessionState) -> bool {
        match self.machine.transition(next) {
            Ok(true) => {
                self.emit(SessionEvent::StateChanged(next));
                true
            }
            Ok(false) => true,
            Err(_) => false,
        }
    }

    /// Speaking/listening changes only apply while the conversation is live.
    fn set_activity(&mut self, next: SessionState) {
        if self.machine.state().is_live() {
            self.transition(next);
        }
    }

    fn set_current_slide(&mut self, index: usize) {
        self.current_slide = index;
        self.transcript.set_current_slide(Some(index as u32 + 1));
        self.emit(SessionEvent::SlideChanged(index));
        self.schedule_snapshot();
    }

    fn record_delta(&mut self, speaker: Speaker, text: &str) {
        let update = self.transcript.append_delta(speaker, text, true);
        self.publish_transcript(update);
    }

    fn publish_transcript(&mut self, update: TranscriptUpdate) {
        let index = match update {
            TranscriptUpdate::Appended(index) | TranscriptUpdate::Updated(index) => index,
            TranscriptUpdate::Unchanged => return,
        };
        if let Some(entry) = self.transcript.entries().get(index) {
            self.emit(SessionEvent::Transcript {
                index,
                entry: entry.clone(),
            });
        }
        self.schedule_snapshot();
    }

    /// Arms the snapshot timer unless it is already running.
    fn schedule_snapshot(&mut self) {
        if self.snapshot_due.is_none() {
            self.snapshot_due = Some(Instant::now() + self.options.snapshot_debounce);
        }
    }

    fn emit_snapshot(&mut self) {
        self.snapshot_due = None;
        let snapshot = SessionSnapshot {
            session_id: self.session_id().unwrap_or("default").to_string(),
            slides: self.lecture.slides.clone(),
            transcript: self.transcript.entries().to_vec(),
            current_slide_index: self.current_slide,
        };
        self.emit(SessionEvent::Snapshot(snapshot));
    }

    fn notice(&self, message: String) {
        self.emit(SessionEvent::Notice(message));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}
