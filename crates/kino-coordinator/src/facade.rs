//! Per-view session facade
//!
//! A [`SessionFacade`] is what one UI attachment talks to. Commands are
//! executed directly against the session's shared native handle; everything
//! asynchronous (native events, position ticks, host lifecycle, signals from
//! the registry, the debounce timer) is funnelled into one event-loop task
//! per view, so a view's projection is only ever mutated in order.
//!
//! ```text
//!  execute(cmd) ──► native handle ──► session pump ──► SessionSignal ─┐
//!                                                                     ▼
//!  registry ── ViewSignal ──►  view event loop  ◄── HostEvent ── coordinator
//!                                  │
//!                                  ▼
//!                        EventEnvelope sink (UI)
//! ```

use crate::{
    coordinator::Coordinator,
    error::Error,
    events::*,
    native::NativePlayer,
    pip::PipController,
    platform::{PipRequest, ViewSurface},
    projection::StateProjection,
    quality::derive_qualities,
    types::*,
    Result,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use url::Url;

struct ViewState {
    projection: StateProjection,
    pip: PipController,
    controls_visible: bool,
}

pub(crate) struct ViewInner {
    session: SessionId,
    view: ViewId,
    coordinator: Coordinator,
    player: Arc<dyn NativePlayer>,
    surface: Arc<dyn ViewSurface>,
    sink: mpsc::UnboundedSender<EventEnvelope>,
    state: Mutex<ViewState>,
    sequence: AtomicU64,
    disposed: AtomicBool,
    /// Shared with the registry's link; cleared exactly once on teardown
    attached: Arc<AtomicBool>,
}

/// Channels a view's event loop listens on
pub(crate) struct ViewChannels {
    pub signals: mpsc::UnboundedReceiver<ViewSignal>,
    pub session: broadcast::Receiver<SessionSignal>,
    pub host: broadcast::Receiver<HostEvent>,
}

/// Handle held by one UI attachment of a session
pub struct SessionFacade {
    inner: Arc<ViewInner>,
    task: JoinHandle<()>,
}

impl SessionFacade {
    pub(crate) fn start(
        coordinator: Coordinator,
        session: SessionId,
        view: ViewId,
        player: Arc<dyn NativePlayer>,
        surface: Arc<dyn ViewSurface>,
        channels: ViewChannels,
        attached: Arc<AtomicBool>,
    ) -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (sink, events) = mpsc::unbounded_channel();
        let threshold = coordinator.config().buffering_debounce();
        let inner = Arc::new(ViewInner {
            session,
            view,
            coordinator,
            player,
            surface,
            sink,
            state: Mutex::new(ViewState {
                projection: StateProjection::new(threshold),
                pip: PipController::new(),
                controls_visible: true,
            }),
            sequence: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
            attached,
        });

        let task = tokio::spawn(inner.clone().run(channels));
        (Self { inner, task }, events)
    }

    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    pub fn view(&self) -> ViewId {
        self.inner.view
    }

    /// True once the session was disposed under this view
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Currently exposed activity state
    pub async fn activity(&self) -> ActivityState {
        self.inner.state.lock().await.projection.activity()
    }

    pub async fn pip_state(&self) -> PipState {
        self.inner.state.lock().await.pip.state()
    }

    pub async fn controls_visible(&self) -> bool {
        self.inner.state.lock().await.controls_visible
    }

    /// Execute one transport command against the shared session
    #[instrument(skip(self), fields(session = %self.inner.session, view = %self.inner.view))]
    pub async fn execute(&self, command: PlayerCommand) -> Result<CommandReply> {
        self.inner.execute(command).await
    }

    /// Request PiP. `Ok(false)` means an automatic request was skipped.
    pub async fn enter_pip(&self, trigger: PipTrigger) -> Result<bool> {
        self.inner.enter_pip(trigger).await
    }

    /// Leave PiP hosted by this view. `Ok(false)` if this view hosts none.
    pub async fn exit_pip(&self) -> Result<bool> {
        self.inner.exit_pip().await
    }

    /// Tear the attachment down.
    ///
    /// Cancels this view's subscriptions, delivers a pending PiP stop (through
    /// a sibling if this view's sink is gone), releases media-control
    /// ownership and unregisters the view. Session resources are untouched.
    #[instrument(skip(self), fields(session = %self.inner.session, view = %self.inner.view))]
    pub async fn detach(self) {
        self.task.abort();
        if self.inner.attached.swap(false, Ordering::SeqCst) {
            self.inner.detach().await;
        }
    }
}

/// Dropping a facade without [`SessionFacade::detach`] still tears the view
/// down: the link goes dead at once so no signal is queued for the aborted
/// loop, and the same bookkeeping runs on a spawned task.
impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.task.abort();
        if !self.inner.attached.swap(false, Ordering::SeqCst) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = self.inner.clone();
                runtime.spawn(async move { inner.detach().await });
            }
            Err(_) => {
                warn!(session = %self.inner.session, view = %self.inner.view, "View dropped outside a runtime; detach bookkeeping skipped");
            }
        }
    }
}

impl ViewInner {
    async fn run(self: Arc<Self>, mut channels: ViewChannels) {
        self.announce().await;

        let mut host_open = true;
        loop {
            let deadline = self.state.lock().await.projection.debounce_deadline();

            tokio::select! {
                biased;

                signal = channels.signals.recv() => match signal {
                    Some(ViewSignal::SessionDisposed) | None => {
                        self.on_session_disposed().await;
                        break;
                    }
                    Some(signal) => self.handle_signal(signal).await,
                },
                _ = sleep_until(deadline) => {
                    let event = self.state.lock().await.projection.poll_debounce(Instant::now());
                    self.emit_opt(event);
                }
                signal = channels.session.recv() => match signal {
                    Ok(signal) => self.handle_session_signal(signal).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(session = %self.session, view = %self.view, skipped, "View lagged behind session signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        self.on_session_disposed().await;
                        break;
                    }
                },
                event = channels.host.recv(), if host_open => match event {
                    Ok(event) => self.handle_host_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => host_open = false,
                },
            }
        }
    }

    /// Initial state for a new attachment; late joiners get a full resync
    async fn announce(&self) {
        let platform = self.coordinator.platform();
        let pip_config = self
            .coordinator
            .registry()
            .get_pip_config(self.session)
            .await
            .unwrap_or_default();

        let mut events = Vec::new();
        {
            let mut state = self.state.lock().await;
            events.extend(
                state
                    .projection
                    .set_pip_available(platform.supports_pip() && pip_config.allows_pip),
            );
            if !platform.supports_external_route() {
                events.extend(state.projection.set_route_available(false));
            }
            if self.player.item_status() == ItemStatus::ReadyToPlay {
                events.extend(state.projection.resync(
                    self.player.position(),
                    self.player.duration(),
                    self.player.buffered(),
                    self.player.is_playing(),
                ));
            }
        }
        self.emit_all(events);
    }

    fn emit(&self, event: PlayerEvent) {
        let envelope = EventEnvelope {
            session: self.session,
            view: self.view,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            timestamp: Utc::now(),
            event,
        };
        if self.sink.send(envelope).is_err() {
            debug!(session = %self.session, view = %self.view, "Event sink closed");
        }
    }

    fn emit_opt(&self, event: Option<PlayerEvent>) {
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn emit_all(&self, events: impl IntoIterator<Item = PlayerEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    fn sink_is_live(&self) -> bool {
        !self.sink.is_closed()
    }

    fn ensure_attached(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(Error::NoActiveSession(self.session))
        } else {
            Ok(())
        }
    }

    async fn execute(&self, command: PlayerCommand) -> Result<CommandReply> {
        self.ensure_attached()?;
        debug!(command = command.name(), "Executing command");

        match command {
            PlayerCommand::Load {
                url,
                headers,
                media_info,
            } => {
                self.load(url, headers, media_info).await?;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::Play => {
                self.play().await;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::Pause => {
                self.player.pause();
                Ok(CommandReply::Ack)
            }
            PlayerCommand::SeekTo { position_ms } => {
                self.player.seek(Duration::from_millis(position_ms)).await?;
                self.refresh_now_playing().await;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::SetVolume { volume } => {
                self.player.set_volume(volume.clamp(0.0, 1.0));
                Ok(CommandReply::Ack)
            }
            PlayerCommand::SetSpeed { speed } => {
                if !(speed.is_finite() && speed > 0.0) {
                    return Err(Error::InvalidState {
                        state: speed.to_string(),
                        expected: "positive playback speed",
                    });
                }
                self.player.set_rate(speed);
                let event = self.state.lock().await.projection.set_speed(speed);
                self.emit_opt(event);
                Ok(CommandReply::Ack)
            }
            PlayerCommand::SetLooping { looping } => {
                self.coordinator
                    .registry()
                    .set_looping(self.session, looping)
                    .await;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::SetQuality { url } => {
                self.set_quality(url).await?;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::GetAvailableQualities => {
                Ok(CommandReply::Qualities(self.available_qualities().await?))
            }
            PlayerCommand::EnterFullScreen => {
                self.set_fullscreen(true).await;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::ExitFullScreen => {
                self.set_fullscreen(false).await;
                Ok(CommandReply::Ack)
            }
            PlayerCommand::EnterPictureInPicture => {
                Ok(CommandReply::Bool(self.enter_pip(PipTrigger::Manual).await?))
            }
            PlayerCommand::ExitPictureInPicture => Ok(CommandReply::Bool(self.exit_pip().await?)),
            PlayerCommand::Dispose => {
                self.coordinator.dispose_session(self.session).await;
                Ok(CommandReply::Ack)
            }
        }
    }

    async fn load(
        &self,
        url: Url,
        headers: std::collections::HashMap<String, String>,
        media_info: Option<MediaInfo>,
    ) -> Result<()> {
        let registry = self.coordinator.registry();
        registry
            .set_source(
                self.session,
                MediaSource {
                    url: url.clone(),
                    headers: headers.clone(),
                },
            )
            .await;
        if let Some(media_info) = media_info {
            registry.set_media_info(self.session, media_info).await;
        }

        let event = self
            .state
            .lock()
            .await
            .projection
            .set_activity(ActivityState::Loading);
        self.emit_opt(event);

        if let Err(e) = self.player.load(&url, &headers).await {
            warn!(session = %self.session, url = %url, error = %e, "Load failed");
            self.report_failure(&e).await;
            return Err(e);
        }

        let event = {
            let mut state = self.state.lock().await;
            state.projection.update_duration(self.player.duration());
            state.projection.set_activity(ActivityState::Loaded)
        };
        self.emit_opt(event);
        info!(session = %self.session, url = %url, "Media loaded");

        self.refresh_now_playing().await;
        Ok(())
    }

    /// Surface a media failure once, however many paths observe it
    async fn report_failure(&self, error: &Error) {
        let event = {
            let mut state = self.state.lock().await;
            if state.projection.activity() == ActivityState::Error {
                return;
            }
            state.projection.set_activity(ActivityState::Error);
            PlayerEvent::Error {
                message: error.to_string(),
                code: error.error_code().to_string(),
            }
        };
        self.emit(event);
    }

    async fn play(&self) {
        self.player.play();

        let registry = self.coordinator.registry();
        registry.set_primary_view(self.session, self.view).await;
        let now_playing = registry.now_playing(self.session).await;
        registry
            .ownership()
            .try_become_owner(self.view, self.session, now_playing.as_ref())
            .await;
    }

    async fn refresh_now_playing(&self) {
        let registry = self.coordinator.registry();
        if let Some(now_playing) = registry.now_playing(self.session).await {
            registry
                .ownership()
                .publish_if_owner(self.session, self.view, &now_playing)
                .await;
        }
    }

    async fn available_qualities(&self) -> Result<Vec<Quality>> {
        let registry = self.coordinator.registry();
        let cached = registry.get_qualities(self.session).await;
        if !cached.is_empty() {
            return Ok(cached);
        }

        let Some(source) = registry.source(self.session).await else {
            return Ok(Vec::new());
        };
        let qualities =
            derive_qualities(self.coordinator.fetcher(), &source.url, &source.headers).await?;
        registry.set_qualities(self.session, qualities.clone()).await;
        info!(session = %self.session, count = qualities.len(), "Quality ladder cached");
        Ok(qualities)
    }

    async fn set_quality(&self, url: Url) -> Result<()> {
        let registry = self.coordinator.registry();
        let quality = self
            .available_qualities()
            .await?
            .into_iter()
            .find(|q| q.url == url);
        let headers = registry
            .source(self.session)
            .await
            .map(|s| s.headers)
            .unwrap_or_default();

        let position = self.player.position();
        let was_playing = self.player.is_playing();

        self.player.load(&url, &headers).await.map_err(|e| {
            warn!(session = %self.session, url = %url, error = %e, "Quality switch failed");
            e
        })?;
        self.player.seek(position).await?;
        if was_playing {
            self.player.play();
        }

        let (label, is_auto) = match quality {
            Some(q) => (q.label, q.is_auto),
            None => (Quality::label_for(None, None), false),
        };
        info!(session = %self.session, label = %label, "Quality switched");
        self.emit(PlayerEvent::QualityChange {
            url,
            label,
            is_auto,
        });
        Ok(())
    }

    async fn set_fullscreen(&self, fullscreen: bool) {
        self.surface.set_fullscreen(fullscreen);
        let event = self.state.lock().await.projection.set_fullscreen(fullscreen);
        self.emit_opt(event);
    }

    async fn enter_pip(&self, trigger: PipTrigger) -> Result<bool> {
        self.ensure_attached()?;
        let registry = self.coordinator.registry();
        let platform = self.coordinator.platform();
        let pip_config = registry
            .get_pip_config(self.session)
            .await
            .unwrap_or_default();

        if !pip_config.allows_pip || !platform.supports_pip() {
            return Err(Error::NotSupported("Picture-in-Picture".into()));
        }
        if trigger == PipTrigger::Automatic
            && (!self.player.is_playing() || registry.is_manual_pip_active(self.session).await)
        {
            debug!(session = %self.session, view = %self.view, "Automatic PiP skipped");
            return Ok(false);
        }
        if registry.is_pip_active(self.session).await {
            return match trigger {
                PipTrigger::Automatic => Ok(false),
                PipTrigger::Manual => Err(Error::InvalidState {
                    state: PipState::Active.to_string(),
                    expected: "inactive",
                }),
            };
        }

        let plan = {
            let mut state = self.state.lock().await;
            let plan = state.pip.begin_entry(trigger, self.surface.is_fullscreen())?;
            if plan.needs_fullscreen {
                // No fullscreenChange: the caller never sees this intermediate layout
                self.surface.set_fullscreen(true);
                state.projection.set_fullscreen_silently(true);
            }
            state.pip.fullscreen_established()?;
            plan
        };

        if let Err(e) = self.await_pip_possible().await {
            self.abandon_pip_entry().await;
            return Err(e);
        }

        let request = PipRequest {
            session: self.session,
            view: self.view,
            source_rect: if plan.needs_fullscreen {
                self.surface.screen_bounds()
            } else {
                self.surface.video_bounds()
            },
            aspect_ratio: AspectRatio::from_natural_size(
                self.player.natural_size(),
                self.coordinator.config().default_aspect_ratio,
            ),
            show_native_controls: pip_config.show_native_controls,
        };
        if let Err(e) = platform.request_pip(&request).await {
            warn!(session = %self.session, view = %self.view, error = %e, "PiP request rejected");
            self.abandon_pip_entry().await;
            return Err(e);
        }

        let event = {
            let mut state = self.state.lock().await;
            state.pip.activated()?;
            self.surface.set_controls_visible(false);
            state.controls_visible = false;
            state
                .projection
                .set_pip_enabled(true, Some(trigger == PipTrigger::Automatic))
        };
        registry.begin_pip(self.session, self.view, trigger).await;
        self.emit_opt(event);

        let now_playing = registry.now_playing(self.session).await;
        registry
            .ownership()
            .try_become_owner(self.view, self.session, now_playing.as_ref())
            .await;

        info!(session = %self.session, view = %self.view, ?trigger, "PiP active");
        self.coordinator.notify_host(HostEvent::PipEntered {
            session: self.session,
            automatic: trigger == PipTrigger::Automatic,
        });
        Ok(true)
    }

    /// Bounded wait for the item to become ready and PiP possible
    async fn await_pip_possible(&self) -> Result<()> {
        let config = self.coordinator.config();
        let platform = self.coordinator.platform();
        let attempts = config.pip_retry_attempts;

        for attempt in 1..=attempts {
            if self.player.item_status() == ItemStatus::ReadyToPlay
                && platform.is_pip_possible(self.session)
            {
                return Ok(());
            }
            if attempt < attempts {
                debug!(session = %self.session, attempt, "PiP not possible yet, retrying");
                tokio::time::sleep(config.pip_retry_backoff()).await;
            }
        }

        warn!(session = %self.session, view = %self.view, attempts, "PiP entry gave up");
        Err(Error::NotPossibleYet { attempts })
    }

    async fn abandon_pip_entry(&self) {
        let mut state = self.state.lock().await;
        let plan = state.pip.entry_failed();
        if plan.exit_fullscreen {
            self.surface.set_fullscreen(false);
            state.projection.set_fullscreen_silently(false);
        }
    }

    async fn exit_pip(&self) -> Result<bool> {
        self.ensure_attached()?;
        let hosting = self
            .coordinator
            .registry()
            .active_pip(self.session)
            .await
            .is_some_and(|pip| pip.host == self.view);
        if !hosting {
            return Ok(false);
        }

        self.state.lock().await.pip.begin_exit()?;
        if let Err(e) = self.coordinator.platform().exit_pip(self.session).await {
            warn!(session = %self.session, error = %e, "Platform PiP exit failed");
        }
        self.complete_pip_exit().await;
        Ok(true)
    }

    /// Drive the local PiP controller back to `Inactive`, restoring the
    /// layout captured at entry
    fn unwind_pip(&self, state: &mut ViewState) {
        let plan = match state.pip.state() {
            PipState::Inactive => None,
            PipState::EnteringFullscreenForPip | PipState::Requesting => {
                Some(state.pip.entry_failed())
            }
            PipState::Active | PipState::Exiting => {
                let _ = state.pip.begin_exit();
                state.pip.restoring().ok()
            }
            // Layout already restored by the interface-restore callback
            PipState::Restoring => None,
        };
        if let Some(plan) = plan {
            if plan.exit_fullscreen {
                self.surface.set_fullscreen(false);
                state.projection.set_fullscreen_silently(false);
            }
        }
        let _ = state.pip.finish();
        self.surface.set_controls_visible(true);
        state.controls_visible = true;
    }

    fn resync(&self, state: &mut ViewState) -> Vec<PlayerEvent> {
        state.projection.resync(
            self.player.position(),
            self.player.duration(),
            self.player.buffered(),
            self.player.is_playing(),
        )
    }

    /// Finish a PiP exit on the hosting view. Emits `pipStop` only if this
    /// view wins the session's single stop delivery.
    async fn complete_pip_exit(&self) {
        let claimed = self
            .coordinator
            .registry()
            .take_pip_stop(self.session)
            .await;

        let resync = {
            let mut state = self.state.lock().await;
            self.unwind_pip(&mut state);
            state.projection.set_pip_enabled(false, None);
            self.resync(&mut state)
        };
        if claimed.is_some() {
            self.emit_pip_stop().await;
        }
        self.emit_all(resync);

        if let Some(active) = claimed {
            info!(session = %self.session, view = %self.view, "PiP stopped");
            self.coordinator.finish_pip(self.session, active).await;
        }
    }

    /// Deliver an already-claimed `pipStop` for `host`
    async fn deliver_pip_stop_for(&self, host: ViewId) {
        let events = {
            let mut state = self.state.lock().await;
            if host == self.view {
                self.unwind_pip(&mut state);
            } else {
                self.surface.set_controls_visible(true);
                state.controls_visible = true;
            }
            state.projection.set_pip_enabled(false, None);
            let mut events = vec![PlayerEvent::pip_stop()];
            events.extend(self.resync(&mut state));
            events
        };
        if host != self.view {
            warn!(session = %self.session, view = %self.view, host = %host, "pipStop delivered on behalf of a detached view");
        }
        self.emit_all(events);
    }

    /// OS asked to bring the app interface back from PiP
    async fn restore_interface(&self) {
        let mut state = self.state.lock().await;
        if state.pip.state() == PipState::Active {
            let _ = state.pip.begin_exit();
        }
        match state.pip.restoring() {
            Ok(plan) => {
                if plan.exit_fullscreen {
                    self.surface.set_fullscreen(false);
                    state.projection.set_fullscreen_silently(false);
                }
            }
            // Alternate view standing in for a detached host
            Err(_) => self.surface.reconnect(),
        }
        self.surface.set_controls_visible(true);
        state.controls_visible = true;
        debug!(session = %self.session, view = %self.view, "Interface restored");
    }

    async fn handle_signal(&self, signal: ViewSignal) {
        match signal {
            ViewSignal::Reconnect => {
                debug!(session = %self.session, view = %self.view, "Reconnecting render surface");
                self.surface.reconnect();
            }
            ViewSignal::PipStopped => self.complete_pip_exit().await,
            ViewSignal::PipStopOnBehalfOf(host) => self.deliver_pip_stop_for(host).await,
            ViewSignal::RestoreInterface => self.restore_interface().await,
            ViewSignal::Transport(command) => self.handle_transport(command).await,
            ViewSignal::SessionDisposed => self.on_session_disposed().await,
        }
    }

    async fn handle_transport(&self, command: TransportCommand) {
        let skip = self.coordinator.config().skip_interval();
        let result = match command {
            TransportCommand::Play => {
                self.play().await;
                Ok(())
            }
            TransportCommand::Pause => {
                self.player.pause();
                Ok(())
            }
            TransportCommand::TogglePlayPause => {
                if self.player.is_playing() {
                    self.player.pause();
                } else {
                    self.play().await;
                }
                Ok(())
            }
            TransportCommand::SeekTo(ms) => self.player.seek(Duration::from_millis(ms)).await,
            TransportCommand::SkipForward => {
                let target = (self.player.position() + skip).min(self.player.duration());
                self.player.seek(target).await
            }
            TransportCommand::SkipBackward => {
                self.player
                    .seek(self.player.position().saturating_sub(skip))
                    .await
            }
        };
        if let Err(e) = result {
            debug!(session = %self.session, ?command, error = %e, "Transport command absorbed");
        }
        self.refresh_now_playing().await;
    }

    async fn handle_session_signal(&self, signal: SessionSignal) {
        let events = {
            let mut state = self.state.lock().await;
            let projection = &mut state.projection;
            match signal {
                SessionSignal::Tick {
                    position,
                    duration,
                    buffered,
                } => projection.apply_tick(position, duration, buffered),
                SessionSignal::Native(event) => match event {
                    NativeEvent::BufferingChanged(buffering) => {
                        projection.raw_buffering(buffering, Instant::now())
                    }
                    NativeEvent::PlayingChanged(true) => {
                        projection.set_activity(ActivityState::Playing)
                    }
                    NativeEvent::PlayingChanged(false) => {
                        projection.set_activity(ActivityState::Paused)
                    }
                    NativeEvent::DurationChanged(duration) => {
                        projection.update_duration(duration);
                        None
                    }
                    NativeEvent::RateChanged(rate) => projection.set_speed(rate),
                    NativeEvent::Completed => projection.set_activity(ActivityState::Completed),
                    NativeEvent::PipPossibleChanged(possible) => {
                        projection.set_pip_available(possible)
                    }
                    NativeEvent::ExternalRouteAvailable(available) => {
                        projection.set_route_available(available)
                    }
                    NativeEvent::ExternalRouteConnected(connected) => {
                        projection.set_route_connected(connected)
                    }
                    NativeEvent::Failed(message) => {
                        drop(state);
                        self.report_failure(&Error::LoadFailed(message)).await;
                        return;
                    }
                    NativeEvent::StatusChanged(_) | NativeEvent::Interruption { .. } => None,
                },
            }
        };
        self.emit_opt(events);
    }

    async fn handle_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::WillResignActive => {
                let registry = self.coordinator.registry();
                if registry.primary_view(self.session).await != Some(self.view) {
                    return;
                }
                let auto_start = registry
                    .get_pip_config(self.session)
                    .await
                    .is_some_and(|c| c.auto_start_pip && c.allows_pip);
                if !auto_start {
                    return;
                }
                if let Err(e) = self.enter_pip(PipTrigger::Automatic).await {
                    debug!(session = %self.session, view = %self.view, error = %e, "Automatic PiP not started");
                }
            }
            HostEvent::DidBecomeActive => {
                let automatic_here = self
                    .coordinator
                    .registry()
                    .active_pip(self.session)
                    .await
                    .is_some_and(|pip| pip.host == self.view && pip.trigger == PipTrigger::Automatic);
                if automatic_here {
                    if let Err(e) = self.exit_pip().await {
                        debug!(session = %self.session, error = %e, "Automatic PiP exit failed");
                    }
                }
            }
            HostEvent::PipEntered { .. } | HostEvent::PipExited { .. } => {}
        }
    }

    async fn on_session_disposed(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let event = {
            let mut state = self.state.lock().await;
            self.unwind_pip(&mut state);
            state.projection.set_activity(ActivityState::Stopped)
        };
        self.emit_opt(event);
        debug!(session = %self.session, view = %self.view, "Session disposed under view");
    }

    async fn detach(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        let registry = self.coordinator.registry();

        let hosting = registry
            .active_pip(self.session)
            .await
            .is_some_and(|pip| pip.host == self.view);
        if hosting {
            if let Err(e) = self.coordinator.platform().exit_pip(self.session).await {
                warn!(session = %self.session, error = %e, "Platform PiP exit failed during teardown");
            }
            if let Some(active) = registry.take_pip_stop(self.session).await {
                self.deliver_final_pip_stop().await;
                self.coordinator.finish_pip(self.session, active).await;
            }
        }

        let release = registry
            .release_ownership(self.session, self.view, true)
            .await;
        debug!(session = %self.session, view = %self.view, ?release, "Ownership released on detach");
        registry.unregister_view(self.session, self.view).await;
        info!(session = %self.session, view = %self.view, "View detached");
    }

    /// `pipStop` for a PiP this view hosted while being torn down
    async fn deliver_final_pip_stop(&self) {
        {
            let mut state = self.state.lock().await;
            self.unwind_pip(&mut state);
            state.projection.set_pip_enabled(false, None);
        }
        self.emit_pip_stop().await;
    }

    /// Emit the session's claimed `pipStop` here, or through a sibling when
    /// this view's sink is gone
    async fn emit_pip_stop(&self) {
        if self.sink_is_live() {
            self.emit(PlayerEvent::pip_stop());
            return;
        }

        let registry = self.coordinator.registry();
        match registry.find_another_view(self.session, self.view).await {
            Some(other)
                if registry
                    .deliver(self.session, other, ViewSignal::PipStopOnBehalfOf(self.view))
                    .await =>
            {
                warn!(session = %self.session, view = %self.view, via = %other, "pipStop routed to alternate view");
            }
            _ => {
                let err = Error::NoAlternateView {
                    session: self.session,
                };
                warn!(session = %self.session, view = %self.view, error = %err, "pipStop has no live recipient");
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::sim::{HeadlessPlatform, HeadlessSurface, SimulatedFactory};

    struct Fixture {
        coordinator: Coordinator,
        factory: Arc<SimulatedFactory>,
        platform: Arc<HeadlessPlatform>,
    }

    fn fixture() -> Fixture {
        let factory = Arc::new(SimulatedFactory::new());
        let platform = Arc::new(HeadlessPlatform::new());
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), factory.clone(), platform.clone())
                .unwrap();
        Fixture {
            coordinator,
            factory,
            platform,
        }
    }

    fn manifest() -> Url {
        Url::parse("https://cdn.example.com/master.m3u8").unwrap()
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<EventEnvelope>) -> PlayerEvent {
        events.recv().await.unwrap().event
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<EventEnvelope>,
        wanted: impl Fn(&PlayerEvent) -> bool,
    ) -> PlayerEvent {
        loop {
            let event = next_event(events).await;
            if wanted(&event) {
                return event;
            }
        }
    }

    fn load(url: Url) -> PlayerCommand {
        PlayerCommand::Load {
            url,
            headers: Default::default(),
            media_info: Some(MediaInfo {
                title: Some("Trailer".into()),
                ..Default::default()
            }),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_emits_loading_then_loaded() {
        let f = fixture();
        let surface = Arc::new(HeadlessSurface::new());
        let (view, mut events) = f
            .coordinator
            .attach(SessionId(1), ViewId(1), surface, PipConfig::default())
            .await
            .unwrap();

        view.execute(load(manifest())).await.unwrap();

        assert_eq!(
            wait_for(&mut events, |e| matches!(e, PlayerEvent::Loading)).await,
            PlayerEvent::Loading
        );
        assert_eq!(
            next_event(&mut events).await,
            PlayerEvent::Loaded {
                duration_ms: 120_000
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failure_reported_once() {
        let f = fixture();
        let (view, mut events) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        f.factory.player(SessionId(1)).unwrap().fail_next_load("404");

        let err = view.execute(load(manifest())).await.unwrap_err();
        assert!(err.is_recoverable());

        // Retrying on the same session works
        view.execute(load(manifest())).await.unwrap();
        let mut errors = 0;
        loop {
            match next_event(&mut events).await {
                PlayerEvent::Error { code, .. } => {
                    assert_eq!(code, "LOAD_FAILED");
                    errors += 1;
                }
                PlayerEvent::Loaded { .. } => break,
                _ => {}
            }
        }
        assert_eq!(errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_pip_uses_screen_bounds_from_inline() {
        let f = fixture();
        let surface = Arc::new(HeadlessSurface::new());
        let (view, mut events) = f
            .coordinator
            .attach(SessionId(1), ViewId(1), surface.clone(), PipConfig::default())
            .await
            .unwrap();
        view.execute(load(manifest())).await.unwrap();

        let reply = view.execute(PlayerCommand::EnterPictureInPicture).await.unwrap();
        assert_eq!(reply, CommandReply::Bool(true));
        assert_eq!(view.pip_state().await, PipState::Active);
        assert!(!surface.controls_visible());

        let request = f.platform.pip_requests().pop().unwrap();
        assert_eq!(request.source_rect, surface.screen_bounds());
        assert_eq!(request.aspect_ratio, AspectRatio::WIDESCREEN);

        // Fullscreen pre-transition is silent
        let event = wait_for(&mut events, |e| {
            matches!(e, PlayerEvent::PipStart { .. } | PlayerEvent::FullscreenChange { .. })
        })
        .await;
        assert_eq!(
            event,
            PlayerEvent::PipStart {
                is_picture_in_picture: true,
                auto: Some(false)
            }
        );
        assert!(f.coordinator.ownership().is_owner(SessionId(1), ViewId(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pip_exit_restores_inline_layout() {
        let f = fixture();
        let surface = Arc::new(HeadlessSurface::new());
        let (view, mut events) = f
            .coordinator
            .attach(SessionId(1), ViewId(1), surface.clone(), PipConfig::default())
            .await
            .unwrap();
        view.execute(load(manifest())).await.unwrap();
        view.enter_pip(PipTrigger::Manual).await.unwrap();

        assert!(view.exit_pip().await.unwrap());
        assert_eq!(view.pip_state().await, PipState::Inactive);
        assert_eq!(surface.fullscreen_changes(), vec![true, false]);
        assert!(surface.controls_visible());

        wait_for(&mut events, |e| matches!(e, PlayerEvent::PipStop { .. })).await;
        // Full resync follows the stop
        assert!(matches!(
            next_event(&mut events).await,
            PlayerEvent::TimeUpdate { .. }
        ));
        assert_eq!(next_event(&mut events).await, PlayerEvent::Pause);
        assert!(!f.coordinator.registry().is_manual_pip_active(SessionId(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pip_entry_retries_until_possible() {
        let f = fixture();
        let (view, _events) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        view.execute(load(manifest())).await.unwrap();
        f.platform.delay_pip_possible(2);

        assert!(view.enter_pip(PipTrigger::Manual).await.unwrap());
        assert_eq!(f.platform.pip_requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pip_entry_gives_up_before_ready() {
        let f = fixture();
        let surface = Arc::new(HeadlessSurface::new());
        let (view, _events) = f
            .coordinator
            .attach(SessionId(1), ViewId(1), surface.clone(), PipConfig::default())
            .await
            .unwrap();

        let err = view.enter_pip(PipTrigger::Manual).await.unwrap_err();
        assert!(matches!(err, Error::NotPossibleYet { attempts: 3 }));
        assert_eq!(view.pip_state().await, PipState::Inactive);
        assert!(!surface.is_fullscreen());
        assert!(f.platform.pip_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_automatic_pip_requires_playback() {
        let f = fixture();
        let (view, _events) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        view.execute(load(manifest())).await.unwrap();

        assert!(!view.enter_pip(PipTrigger::Automatic).await.unwrap());
        view.execute(PlayerCommand::Play).await.unwrap();
        assert!(view.enter_pip(PipTrigger::Automatic).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_pip_blocks_automatic() {
        let f = fixture();
        let (a, _ea) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        let (b, _eb) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(2),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        a.execute(load(manifest())).await.unwrap();
        a.execute(PlayerCommand::Play).await.unwrap();
        assert!(a.enter_pip(PipTrigger::Manual).await.unwrap());

        assert!(!b.enter_pip(PipTrigger::Automatic).await.unwrap());
        assert!(b.enter_pip(PipTrigger::Manual).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pip_not_supported() {
        let factory = Arc::new(SimulatedFactory::new());
        let platform = Arc::new(HeadlessPlatform::without_pip());
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), factory, platform).unwrap();
        let (view, mut events) = coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            next_event(&mut events).await,
            PlayerEvent::PipAvailabilityChanged {
                is_available: false
            }
        );
        let err = view.enter_pip(PipTrigger::Manual).await.unwrap_err();
        assert_eq!(err.error_code(), "NOT_SUPPORTED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_quality_preserves_position() {
        let f = fixture();
        let (view, mut events) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        view.execute(load(manifest())).await.unwrap();
        view.execute(PlayerCommand::Play).await.unwrap();
        let player = f.factory.player(SessionId(1)).unwrap();
        player.set_position(Duration::from_secs(42));

        let variant = Url::parse("https://cdn.example.com/720p.m3u8").unwrap();
        f.coordinator
            .registry()
            .set_qualities(
                SessionId(1),
                vec![
                    Quality::auto(manifest()),
                    Quality {
                        label: "720p".into(),
                        url: variant.clone(),
                        width: Some(1280),
                        height: Some(720),
                        bitrate: Some(2_500_000),
                        is_auto: false,
                    },
                ],
            )
            .await;
        view.execute(PlayerCommand::SetQuality {
            url: variant.clone(),
        })
        .await
        .unwrap();

        assert_eq!(player.loaded_url(), Some(variant.clone()));
        assert_eq!(player.position(), Duration::from_secs(42));
        assert!(player.is_playing());
        assert_eq!(
            wait_for(&mut events, |e| matches!(e, PlayerEvent::QualityChange { .. })).await,
            PlayerEvent::QualityChange {
                url: variant,
                label: "720p".into(),
                is_auto: false
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fullscreen_change_only() {
        let f = fixture();
        let (view, mut events) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(1),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();

        view.execute(PlayerCommand::EnterFullScreen).await.unwrap();
        view.execute(PlayerCommand::EnterFullScreen).await.unwrap();
        view.execute(PlayerCommand::ExitFullScreen).await.unwrap();

        let mut changes = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            if let PlayerEvent::FullscreenChange { is_fullscreen } = envelope.event {
                changes.push(is_fullscreen);
            }
        }
        assert_eq!(changes, vec![true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_envelopes_are_sequenced() {
        let f = fixture();
        let (view, mut events) = f
            .coordinator
            .attach(
                SessionId(1),
                ViewId(4),
                Arc::new(HeadlessSurface::new()),
                PipConfig::default(),
            )
            .await
            .unwrap();
        view.execute(PlayerCommand::EnterFullScreen).await.unwrap();
        view.execute(PlayerCommand::ExitFullScreen).await.unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.view, ViewId(4));
        assert_eq!(first.session, SessionId(1));
        assert_eq!(second.sequence, first.sequence + 1);
    }
}
