//! Session pump - per-session event queue
//!
//! One pump runs per session, from creation until dispose. It:
//! - samples position/duration/buffered on a fixed interval (one ticker per
//!   session regardless of how many views are attached)
//! - forwards native engine events to every attached view
//! - applies session-wide reactions exactly once (looping restart, audio
//!   interruption pause/resume, Now-Playing refresh)

use crate::{
    events::{NativeEvent, SessionSignal},
    native::NativePlayer,
    registry::SessionRegistry,
    types::SessionId,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub(crate) struct SessionPump {
    session: SessionId,
    player: Arc<dyn NativePlayer>,
    native: broadcast::Receiver<NativeEvent>,
    signals: broadcast::Sender<SessionSignal>,
    registry: Arc<SessionRegistry>,
    interval: Duration,
    resume_after_interruption: bool,
}

impl SessionPump {
    pub(crate) fn new(
        session: SessionId,
        player: Arc<dyn NativePlayer>,
        signals: broadcast::Sender<SessionSignal>,
        registry: Arc<SessionRegistry>,
        interval: Duration,
    ) -> Self {
        // Subscribe before the task is spawned so no early engine event is lost
        let native = player.subscribe();
        Self {
            session,
            player,
            native,
            signals,
            registry,
            interval,
            resume_after_interruption: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(session = %self.session, "Session pump started");
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                event = self.native.recv() => match event {
                    Ok(event) => self.handle_native(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session = %self.session, skipped, "Session pump lagged behind native events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!(session = %self.session, "Session pump stopped");
    }

    fn tick(&self) {
        // Views may all be detached; the session keeps running
        let _ = self.signals.send(SessionSignal::Tick {
            position: self.player.position(),
            duration: self.player.duration(),
            buffered: self.player.buffered(),
        });
    }

    async fn handle_native(&mut self, event: NativeEvent) {
        match event {
            NativeEvent::Completed if self.registry.is_looping(self.session).await => {
                debug!(session = %self.session, "Looping back to start");
                if let Err(e) = self.player.seek(Duration::ZERO).await {
                    warn!(session = %self.session, error = %e, "Loop restart failed");
                    self.forward(NativeEvent::Completed);
                    return;
                }
                self.player.play();
            }
            NativeEvent::Interruption { began: true } => {
                self.resume_after_interruption = self.player.is_playing();
                info!(session = %self.session, resume = self.resume_after_interruption, "Audio interruption began");
                self.player.pause();
            }
            NativeEvent::Interruption { began: false } => {
                info!(session = %self.session, "Audio interruption ended");
                if std::mem::take(&mut self.resume_after_interruption) {
                    self.player.play();
                }
            }
            NativeEvent::PlayingChanged(_) | NativeEvent::RateChanged(_) => {
                self.refresh_now_playing().await;
                self.forward(event);
            }
            event => self.forward(event),
        }
    }

    fn forward(&self, event: NativeEvent) {
        let _ = self.signals.send(SessionSignal::Native(event));
    }

    /// Keep the OS Now-Playing position/rate current while this session owns it
    async fn refresh_now_playing(&self) {
        let ownership = self.registry.ownership();
        let Some(owner) = ownership.owner().await else {
            return;
        };
        if owner.session != self.session {
            return;
        }
        if let Some(now_playing) = self.registry.now_playing(self.session).await {
            ownership
                .publish_if_owner(owner.session, owner.view, &now_playing)
                .await;
        }
    }
}
