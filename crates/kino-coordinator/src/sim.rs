//! Headless backend
//!
//! In-process stand-ins for the native engine and the OS surfaces. They keep
//! enough state to drive the coordinator end to end without a device (the
//! CLI's scenario runner and the test suites use them) and record every
//! platform call for inspection.

use crate::{
    error::Error,
    events::NativeEvent,
    native::{NativePlayer, PlayerFactory},
    platform::{PipRequest, PlatformMedia, ViewSurface},
    types::*,
    Result,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PlayerState {
    status: ItemStatus,
    playing: bool,
    position: Duration,
    duration: Duration,
    buffered: Duration,
    rate: f64,
    volume: f64,
    natural_size: Option<(u32, u32)>,
    loaded: Option<Url>,
    load_count: u32,
    fail_next_load: Option<String>,
    released: bool,
}

/// Simulated native player handle
pub struct SimulatedPlayer {
    id: Uuid,
    session: SessionId,
    media_duration: Duration,
    state: Mutex<PlayerState>,
    events: broadcast::Sender<NativeEvent>,
}

impl SimulatedPlayer {
    pub fn new(session: SessionId, media_duration: Duration) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            id: Uuid::new_v4(),
            session,
            media_duration,
            state: Mutex::new(PlayerState {
                status: ItemStatus::Unknown,
                playing: false,
                position: Duration::ZERO,
                duration: Duration::ZERO,
                buffered: Duration::ZERO,
                rate: 1.0,
                volume: 1.0,
                natural_size: None,
                loaded: None,
                load_count: 0,
                fail_next_load: None,
                released: false,
            }),
            events,
        }
    }

    /// Unique id of this engine instance
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn is_released(&self) -> bool {
        self.state.lock().released
    }

    pub fn loaded_url(&self) -> Option<Url> {
        self.state.lock().loaded.clone()
    }

    pub fn load_count(&self) -> u32 {
        self.state.lock().load_count
    }

    pub fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    /// Make the next `load` fail with `message`
    pub fn fail_next_load(&self, message: impl Into<String>) {
        self.state.lock().fail_next_load = Some(message.into());
    }

    pub fn set_natural_size(&self, width: u32, height: u32) {
        self.state.lock().natural_size = Some((width, height));
    }

    /// Move the playhead and buffered range forward
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.position = (state.position + by).min(state.duration);
        state.buffered = (state.position + Duration::from_secs(10)).min(state.duration);
    }

    pub fn set_position(&self, position: Duration) {
        self.state.lock().position = position;
    }

    /// Report a duration; zero simulates a transient reset
    pub fn set_duration(&self, duration: Duration) {
        self.state.lock().duration = duration;
        self.emit(NativeEvent::DurationChanged(duration));
    }

    pub fn set_buffering(&self, buffering: bool) {
        self.emit(NativeEvent::BufferingChanged(buffering));
    }

    pub fn complete(&self) {
        {
            let mut state = self.state.lock();
            state.playing = false;
            state.position = state.duration;
        }
        self.emit(NativeEvent::Completed);
    }

    /// Report a failure of the current item mid-playback
    pub fn fail(&self, message: impl Into<String>) {
        {
            let mut state = self.state.lock();
            state.status = ItemStatus::Failed;
            state.playing = false;
        }
        self.emit(NativeEvent::Failed(message.into()));
    }

    pub fn interrupt(&self, began: bool) {
        self.emit(NativeEvent::Interruption { began });
    }

    pub fn set_pip_possible(&self, possible: bool) {
        self.emit(NativeEvent::PipPossibleChanged(possible));
    }

    pub fn set_external_route(&self, available: bool, connected: bool) {
        self.emit(NativeEvent::ExternalRouteAvailable(available));
        self.emit(NativeEvent::ExternalRouteConnected(connected));
    }

    fn emit(&self, event: NativeEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl NativePlayer for SimulatedPlayer {
    async fn load(&self, url: &Url, _headers: &HashMap<String, String>) -> Result<()> {
        let failure = {
            let mut state = self.state.lock();
            state.load_count += 1;
            state.playing = false;
            state.fail_next_load.take()
        };

        if let Some(message) = failure {
            self.state.lock().status = ItemStatus::Failed;
            self.emit(NativeEvent::StatusChanged(ItemStatus::Failed));
            return Err(Error::LoadFailed(message));
        }

        {
            let mut state = self.state.lock();
            state.status = ItemStatus::ReadyToPlay;
            state.loaded = Some(url.clone());
            state.position = Duration::ZERO;
            state.duration = self.media_duration;
            state.buffered = Duration::from_secs(10).min(self.media_duration);
        }
        debug!(session = %self.session, url = %url, "Simulated item ready");
        self.emit(NativeEvent::StatusChanged(ItemStatus::ReadyToPlay));
        self.emit(NativeEvent::DurationChanged(self.media_duration));
        Ok(())
    }

    fn play(&self) {
        let changed = {
            let mut state = self.state.lock();
            let changed = !state.playing && state.status == ItemStatus::ReadyToPlay;
            if changed {
                state.playing = true;
            }
            changed
        };
        if changed {
            self.emit(NativeEvent::PlayingChanged(true));
        }
    }

    fn pause(&self) {
        let changed = std::mem::replace(&mut self.state.lock().playing, false);
        if changed {
            self.emit(NativeEvent::PlayingChanged(false));
        }
    }

    async fn seek(&self, position: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.status != ItemStatus::ReadyToPlay {
            return Err(Error::InvalidState {
                state: format!("{:?}", state.status),
                expected: "ready_to_play",
            });
        }
        state.position = position.min(state.duration);
        Ok(())
    }

    fn set_rate(&self, rate: f64) {
        self.state.lock().rate = rate;
        self.emit(NativeEvent::RateChanged(rate));
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume;
    }

    fn position(&self) -> Duration {
        self.state.lock().position
    }

    fn duration(&self) -> Duration {
        self.state.lock().duration
    }

    fn buffered(&self) -> Duration {
        self.state.lock().buffered
    }

    fn rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn item_status(&self) -> ItemStatus {
        self.state.lock().status
    }

    fn natural_size(&self) -> Option<(u32, u32)> {
        self.state.lock().natural_size
    }

    fn stop(&self) {
        let was_playing = {
            let mut state = self.state.lock();
            state.loaded = None;
            state.status = ItemStatus::Unknown;
            std::mem::replace(&mut state.playing, false)
        };
        if was_playing {
            self.emit(NativeEvent::PlayingChanged(false));
        }
    }

    fn release(&self) {
        self.state.lock().released = true;
    }

    fn subscribe(&self) -> broadcast::Receiver<NativeEvent> {
        self.events.subscribe()
    }
}

/// Factory handing out [`SimulatedPlayer`]s and remembering them
pub struct SimulatedFactory {
    media_duration: Duration,
    players: Mutex<Vec<Arc<SimulatedPlayer>>>,
}

impl Default for SimulatedFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFactory {
    pub fn new() -> Self {
        Self::with_duration(Duration::from_secs(120))
    }

    pub fn with_duration(media_duration: Duration) -> Self {
        Self {
            media_duration,
            players: Mutex::new(Vec::new()),
        }
    }

    /// Number of handles ever created
    pub fn created(&self) -> usize {
        self.players.lock().len()
    }

    /// Most recent handle created for `session`
    pub fn player(&self, session: SessionId) -> Option<Arc<SimulatedPlayer>> {
        self.players
            .lock()
            .iter()
            .rev()
            .find(|p| p.session() == session)
            .cloned()
    }
}

impl PlayerFactory for SimulatedFactory {
    fn create(&self, session: SessionId) -> Arc<dyn NativePlayer> {
        let player = Arc::new(SimulatedPlayer::new(session, self.media_duration));
        self.players.lock().push(player.clone());
        player
    }
}

#[derive(Debug, Default)]
struct PlatformState {
    transport_view: Option<ViewId>,
    transport_registrations: u32,
    transport_clears: u32,
    now_playing: Option<NowPlaying>,
    pip_requests: Vec<PipRequest>,
    pip_exits: Vec<SessionId>,
    pip_rejections_left: u32,
    pip_shown: Option<SessionId>,
}

/// Headless OS media surfaces
pub struct HeadlessPlatform {
    supports_pip: bool,
    state: Mutex<PlatformState>,
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self {
            supports_pip: true,
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Platform without Picture-in-Picture support
    pub fn without_pip() -> Self {
        Self {
            supports_pip: false,
            state: Mutex::new(PlatformState::default()),
        }
    }

    /// Report PiP as not yet possible for the next `count` checks
    pub fn delay_pip_possible(&self, count: u32) {
        self.state.lock().pip_rejections_left = count;
    }

    /// View the OS transport handlers currently route to
    pub fn transport_view(&self) -> Option<ViewId> {
        self.state.lock().transport_view
    }

    pub fn transport_registrations(&self) -> u32 {
        self.state.lock().transport_registrations
    }

    pub fn transport_clear_count(&self) -> u32 {
        self.state.lock().transport_clears
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.state.lock().now_playing.clone()
    }

    pub fn pip_requests(&self) -> Vec<PipRequest> {
        self.state.lock().pip_requests.clone()
    }

    pub fn pip_exits(&self) -> Vec<SessionId> {
        self.state.lock().pip_exits.clone()
    }

    /// Session whose PiP window is on screen
    pub fn pip_shown(&self) -> Option<SessionId> {
        self.state.lock().pip_shown
    }
}

#[async_trait]
impl PlatformMedia for HeadlessPlatform {
    fn supports_pip(&self) -> bool {
        self.supports_pip
    }

    fn is_pip_possible(&self, _session: SessionId) -> bool {
        let mut state = self.state.lock();
        if state.pip_rejections_left > 0 {
            state.pip_rejections_left -= 1;
            return false;
        }
        self.supports_pip
    }

    async fn request_pip(&self, request: &PipRequest) -> Result<()> {
        if !self.supports_pip {
            return Err(Error::NotSupported("Picture-in-Picture".into()));
        }
        let mut state = self.state.lock();
        state.pip_requests.push(request.clone());
        state.pip_shown = Some(request.session);
        Ok(())
    }

    async fn exit_pip(&self, session: SessionId) -> Result<()> {
        let mut state = self.state.lock();
        state.pip_exits.push(session);
        if state.pip_shown == Some(session) {
            state.pip_shown = None;
        }
        Ok(())
    }

    fn supports_external_route(&self) -> bool {
        true
    }

    fn register_transport_handlers(&self, view: ViewId) {
        let mut state = self.state.lock();
        state.transport_view = Some(view);
        state.transport_registrations += 1;
    }

    fn clear_transport_handlers(&self) {
        let mut state = self.state.lock();
        state.transport_view = None;
        state.transport_clears += 1;
    }

    fn publish_now_playing(&self, now_playing: &NowPlaying) {
        self.state.lock().now_playing = Some(now_playing.clone());
    }

    fn clear_now_playing(&self) {
        self.state.lock().now_playing = None;
    }
}

#[derive(Debug)]
struct SurfaceState {
    fullscreen: bool,
    controls_visible: bool,
    reconnects: u32,
    fullscreen_changes: Vec<bool>,
}

/// Headless render surface of one view
pub struct HeadlessSurface {
    video_bounds: Rect,
    screen_bounds: Rect,
    state: Mutex<SurfaceState>,
}

impl Default for HeadlessSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessSurface {
    pub fn new() -> Self {
        Self::with_bounds(
            Rect::new(0.0, 120.0, 390.0, 219.0),
            Rect::new(0.0, 0.0, 390.0, 844.0),
        )
    }

    pub fn with_bounds(video_bounds: Rect, screen_bounds: Rect) -> Self {
        Self {
            video_bounds,
            screen_bounds,
            state: Mutex::new(SurfaceState {
                fullscreen: false,
                controls_visible: true,
                reconnects: 0,
                fullscreen_changes: Vec::new(),
            }),
        }
    }

    pub fn controls_visible(&self) -> bool {
        self.state.lock().controls_visible
    }

    pub fn reconnects(&self) -> u32 {
        self.state.lock().reconnects
    }

    /// Every layout change applied, in order
    pub fn fullscreen_changes(&self) -> Vec<bool> {
        self.state.lock().fullscreen_changes.clone()
    }
}

impl ViewSurface for HeadlessSurface {
    fn is_fullscreen(&self) -> bool {
        self.state.lock().fullscreen
    }

    fn set_fullscreen(&self, fullscreen: bool) {
        let mut state = self.state.lock();
        if state.fullscreen != fullscreen {
            state.fullscreen = fullscreen;
            state.fullscreen_changes.push(fullscreen);
        }
    }

    fn set_controls_visible(&self, visible: bool) {
        self.state.lock().controls_visible = visible;
    }

    fn video_bounds(&self) -> Rect {
        self.video_bounds
    }

    fn screen_bounds(&self) -> Rect {
        self.screen_bounds
    }

    fn reconnect(&self) {
        self.state.lock().reconnects += 1;
    }
}
