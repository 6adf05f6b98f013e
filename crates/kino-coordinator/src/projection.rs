//! Change-only state projection
//!
//! Each view keeps one [`StateProjection`]. It turns raw samples (ticks,
//! native events, layout changes) into [`PlayerEvent`]s, suppressing values
//! identical to the last one notified.

use crate::{
    debounce::BufferingDebouncer,
    events::PlayerEvent,
    native::millis,
    types::ActivityState,
};
use std::time::Duration;
use tokio::time::Instant;

/// Last notified value of one property
#[derive(Debug, Clone, Default)]
pub struct Observed<T> {
    value: Option<T>,
}

impl<T: PartialEq + Clone> Observed<T> {
    pub fn new() -> Self {
        Self { value: None }
    }

    /// Record `value`; true if it differs from the previous one
    pub fn update(&mut self, value: T) -> bool {
        if self.value.as_ref() == Some(&value) {
            return false;
        }
        self.value = Some(value);
        true
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

#[derive(Debug, Clone)]
pub struct StateProjection {
    debouncer: BufferingDebouncer,
    position_ms: Observed<u64>,
    /// Cached duration; never overwritten by a zero once non-zero
    duration_ms: u64,
    duration_notified: Observed<u64>,
    buffered_ms: Observed<u64>,
    is_buffering: Observed<bool>,
    speed: Observed<f64>,
    fullscreen: Observed<bool>,
    pip_enabled: Observed<bool>,
    pip_available: Observed<bool>,
    route_available: Observed<bool>,
    route_connected: Observed<bool>,
}

impl StateProjection {
    pub fn new(debounce_threshold: Duration) -> Self {
        Self {
            debouncer: BufferingDebouncer::new(debounce_threshold),
            position_ms: Observed::new(),
            duration_ms: 0,
            duration_notified: Observed::new(),
            buffered_ms: Observed::new(),
            is_buffering: Observed::new(),
            speed: Observed::new(),
            fullscreen: Observed::new(),
            pip_enabled: Observed::new(),
            pip_available: Observed::new(),
            route_available: Observed::new(),
            route_connected: Observed::new(),
        }
    }

    pub fn activity(&self) -> ActivityState {
        self.debouncer.current()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms.get().copied().unwrap_or_default()
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen.get().copied().unwrap_or_default()
    }

    pub fn is_pip_enabled(&self) -> bool {
        self.pip_enabled.get().copied().unwrap_or_default()
    }

    pub fn debounce_deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// Apply a raw duration, ignoring transient zero resets
    pub fn update_duration(&mut self, duration: Duration) {
        let ms = millis(duration);
        if ms == 0 && self.duration_ms > 0 {
            return;
        }
        self.duration_ms = ms;
    }

    /// Apply a position sample; emits `timeUpdate` if any time field changed
    pub fn apply_tick(
        &mut self,
        position: Duration,
        duration: Duration,
        buffered: Duration,
    ) -> Option<PlayerEvent> {
        self.update_duration(duration);
        let is_buffering = self.activity() == ActivityState::Buffering;

        let position_changed = self.position_ms.update(millis(position));
        let duration_changed = self.duration_notified.update(self.duration_ms);
        let buffered_changed = self.buffered_ms.update(millis(buffered));
        let buffering_changed = self.is_buffering.update(is_buffering);

        if position_changed || duration_changed || buffered_changed || buffering_changed {
            Some(self.time_update())
        } else {
            None
        }
    }

    /// Feed the raw buffering signal
    pub fn raw_buffering(&mut self, buffering: bool, now: Instant) -> Option<PlayerEvent> {
        let state = self.debouncer.on_raw_buffering(buffering, now)?;
        self.activity_event(state)
    }

    /// Fire the debounce timer
    pub fn poll_debounce(&mut self, now: Instant) -> Option<PlayerEvent> {
        let state = self.debouncer.poll(now)?;
        self.activity_event(state)
    }

    /// Feed a non-buffering activity change
    pub fn set_activity(&mut self, state: ActivityState) -> Option<PlayerEvent> {
        let state = self.debouncer.on_activity(state)?;
        self.activity_event(state)
    }

    pub fn set_speed(&mut self, speed: f64) -> Option<PlayerEvent> {
        self.speed
            .update(speed)
            .then_some(PlayerEvent::SpeedChange { speed })
    }

    pub fn set_fullscreen(&mut self, is_fullscreen: bool) -> Option<PlayerEvent> {
        self.fullscreen
            .update(is_fullscreen)
            .then_some(PlayerEvent::FullscreenChange { is_fullscreen })
    }

    /// Record the layout without notifying (silent PiP pre-transition)
    pub fn set_fullscreen_silently(&mut self, is_fullscreen: bool) {
        self.fullscreen.update(is_fullscreen);
    }

    pub fn set_pip_enabled(&mut self, enabled: bool, auto: Option<bool>) -> Option<PlayerEvent> {
        if !self.pip_enabled.update(enabled) {
            return None;
        }
        Some(if enabled {
            PlayerEvent::PipStart {
                is_picture_in_picture: true,
                auto,
            }
        } else {
            PlayerEvent::pip_stop()
        })
    }

    pub fn set_pip_available(&mut self, is_available: bool) -> Option<PlayerEvent> {
        self.pip_available
            .update(is_available)
            .then_some(PlayerEvent::PipAvailabilityChanged { is_available })
    }

    pub fn set_route_available(&mut self, is_available: bool) -> Option<PlayerEvent> {
        self.route_available
            .update(is_available)
            .then_some(PlayerEvent::ExternalRouteAvailabilityChanged { is_available })
    }

    pub fn set_route_connected(&mut self, is_connected: bool) -> Option<PlayerEvent> {
        self.route_connected
            .update(is_connected)
            .then_some(PlayerEvent::ExternalRouteConnectionChanged { is_connected })
    }

    /// Full re-emission of time and play state, bypassing change detection.
    ///
    /// Used after PiP exit so a view hidden during PiP resynchronizes.
    pub fn resync(
        &mut self,
        position: Duration,
        duration: Duration,
        buffered: Duration,
        is_playing: bool,
    ) -> Vec<PlayerEvent> {
        self.update_duration(duration);
        self.position_ms.update(millis(position));
        self.duration_notified.update(self.duration_ms);
        self.buffered_ms.update(millis(buffered));
        self.is_buffering
            .update(self.activity() == ActivityState::Buffering);

        let mut events = vec![self.time_update()];
        if self.activity() != ActivityState::Buffering {
            let state = if is_playing {
                ActivityState::Playing
            } else {
                ActivityState::Paused
            };
            self.debouncer.on_activity(state);
            events.push(if is_playing { PlayerEvent::Play } else { PlayerEvent::Pause });
        } else {
            events.push(PlayerEvent::Buffering);
        }
        events
    }

    fn time_update(&self) -> PlayerEvent {
        PlayerEvent::TimeUpdate {
            position_ms: self.position_ms.get().copied().unwrap_or_default(),
            duration_ms: self.duration_ms,
            buffered_position_ms: self.buffered_ms.get().copied().unwrap_or_default(),
            is_buffering: self.activity() == ActivityState::Buffering,
        }
    }

    fn activity_event(&self, state: ActivityState) -> Option<PlayerEvent> {
        PlayerEvent::from_activity(state, self.duration_ms)
    }
}
