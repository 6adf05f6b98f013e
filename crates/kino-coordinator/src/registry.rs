//! Session registry
//!
//! Owns every native player handle plus the per-session caches (qualities,
//! media info, PiP configuration) and the set of attached views. A session
//! lives from its first [`get_or_create_session`] until an explicit
//! [`dispose_session`]; views detaching never release playback resources, so
//! navigating away and back does not reload the video.
//!
//! Views are referenced only by id plus a signal link into their queue. The
//! registry never calls into a view directly and never mutates playback
//! state; it only keeps the books.
//!
//! [`get_or_create_session`]: SessionRegistry::get_or_create_session
//! [`dispose_session`]: SessionRegistry::dispose_session

use crate::{
    error::Error,
    events::{SessionSignal, ViewSignal},
    native::{millis, NativePlayer, PlayerFactory},
    ownership::{FallbackTarget, OwnershipCoordinator, Release},
    types::*,
    Result,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// Signal path into one view's queue.
///
/// `attached` is cleared by the view's facade the moment it is detached or
/// dropped. An aborted event loop only releases its receiver later, so the
/// channel alone cannot tell a live view from one being torn down.
#[derive(Debug, Clone)]
pub(crate) struct ViewLink {
    signals: mpsc::UnboundedSender<ViewSignal>,
    attached: Arc<AtomicBool>,
}

impl ViewLink {
    pub(crate) fn new(
        signals: mpsc::UnboundedSender<ViewSignal>,
        attached: Arc<AtomicBool>,
    ) -> Self {
        Self { signals, attached }
    }

    fn is_live(&self) -> bool {
        self.attached.load(Ordering::SeqCst) && !self.signals.is_closed()
    }

    fn send(&self, signal: ViewSignal) -> bool {
        self.is_live() && self.signals.send(signal).is_ok()
    }
}

/// PiP window currently shown for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivePip {
    pub host: ViewId,
    pub trigger: PipTrigger,
}

/// Result of [`SessionRegistry::get_or_create_session`]
#[derive(Clone)]
pub struct SessionHandle {
    pub player: Arc<dyn NativePlayer>,
    pub existed: bool,
}

struct SessionEntry {
    player: Arc<dyn NativePlayer>,
    signals: broadcast::Sender<SessionSignal>,
    pump: Option<JoinHandle<()>>,
    media_info: Option<MediaInfo>,
    qualities: Vec<Quality>,
    source: Option<MediaSource>,
    pip_config: Option<PipConfig>,
    looping: bool,
    manual_pip_active: bool,
    primary_view: Option<ViewId>,
    active_pip: Option<ActivePip>,
    views: BTreeMap<ViewId, ViewLink>,
}

impl SessionEntry {
    fn another_live_view(&self, excluding: ViewId) -> Option<ViewId> {
        self.views
            .iter()
            .find(|(id, link)| **id != excluding && link.is_live())
            .map(|(id, _)| *id)
    }
}

pub struct SessionRegistry {
    factory: Arc<dyn PlayerFactory>,
    ownership: Arc<OwnershipCoordinator>,
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
    signal_capacity: usize,
}

impl SessionRegistry {
    pub fn new(
        factory: Arc<dyn PlayerFactory>,
        ownership: Arc<OwnershipCoordinator>,
        signal_capacity: usize,
    ) -> Self {
        Self {
            factory,
            ownership,
            sessions: RwLock::new(HashMap::new()),
            signal_capacity,
        }
    }

    pub fn ownership(&self) -> &OwnershipCoordinator {
        &self.ownership
    }

    /// Return the session's handle, allocating one on first use
    pub async fn get_or_create_session(&self, session: SessionId) -> SessionHandle {
        let mut sessions = self.sessions.write().await;
        if let Some(entry) = sessions.get(&session) {
            return SessionHandle {
                player: entry.player.clone(),
                existed: true,
            };
        }

        let player = self.factory.create(session);
        let (signals, _) = broadcast::channel(self.signal_capacity);
        sessions.insert(
            session,
            SessionEntry {
                player: player.clone(),
                signals,
                pump: None,
                media_info: None,
                qualities: Vec::new(),
                source: None,
                pip_config: None,
                looping: false,
                manual_pip_active: false,
                primary_view: None,
                active_pip: None,
                views: BTreeMap::new(),
            },
        );
        info!(session = %session, "Session created");

        SessionHandle {
            player,
            existed: false,
        }
    }

    pub async fn contains(&self, session: SessionId) -> bool {
        self.sessions.read().await.contains_key(&session)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn player(&self, session: SessionId) -> Option<Arc<dyn NativePlayer>> {
        self.sessions.read().await.get(&session).map(|e| e.player.clone())
    }

    /// Subscribe to the session's fan-out of native events and ticks
    pub async fn subscribe(&self, session: SessionId) -> Option<broadcast::Receiver<SessionSignal>> {
        self.sessions.read().await.get(&session).map(|e| e.signals.subscribe())
    }

    pub(crate) async fn signal_sender(
        &self,
        session: SessionId,
    ) -> Option<broadcast::Sender<SessionSignal>> {
        self.sessions.read().await.get(&session).map(|e| e.signals.clone())
    }

    /// Attach the session pump task; aborted on dispose
    pub(crate) async fn set_pump(&self, session: SessionId, pump: JoinHandle<()>) {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session) {
            Some(entry) => {
                if let Some(previous) = entry.pump.replace(pump) {
                    previous.abort();
                }
            }
            None => pump.abort(),
        }
    }

    /// Add a view. Idempotent per `(session, view)`: re-registering replaces
    /// the signal link. Returns true if the view was not registered before.
    pub(crate) async fn register_view(
        &self,
        session: SessionId,
        view: ViewId,
        link: ViewLink,
    ) -> Result<bool> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions
            .get_mut(&session)
            .ok_or(Error::NoActiveSession(session))?;

        let added = entry.views.insert(view, link).is_none();
        if entry.primary_view.is_none() {
            entry.primary_view = Some(view);
        }
        debug!(session = %session, view = %view, added, views = entry.views.len(), "View registered");
        Ok(added)
    }

    /// Remove a view and ask every remaining view to reconnect its surface
    #[instrument(skip(self))]
    pub async fn unregister_view(&self, session: SessionId, view: ViewId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session) else {
            return false;
        };
        if entry.views.remove(&view).is_none() {
            return false;
        }

        if entry.primary_view == Some(view) {
            entry.primary_view = entry.another_live_view(view);
            debug!(session = %session, primary = ?entry.primary_view, "Primary view reassigned");
        }

        for (id, link) in &entry.views {
            if !link.send(ViewSignal::Reconnect) {
                debug!(session = %session, view = %id, "Reconnect skipped for dead view");
            }
        }
        true
    }

    /// Views of the session that are still attached
    pub async fn find_all_views(&self, session: SessionId) -> BTreeSet<ViewId> {
        self.sessions
            .read()
            .await
            .get(&session)
            .map(|e| {
                e.views
                    .iter()
                    .filter(|(_, link)| link.is_live())
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Another live view of the session, used by fallback paths
    pub async fn find_another_view(&self, session: SessionId, excluding: ViewId) -> Option<ViewId> {
        self.sessions
            .read()
            .await
            .get(&session)
            .and_then(|e| e.another_live_view(excluding))
    }

    pub(crate) async fn deliver(&self, session: SessionId, view: ViewId, signal: ViewSignal) -> bool {
        self.sessions
            .read()
            .await
            .get(&session)
            .and_then(|e| e.views.get(&view))
            .is_some_and(|link| link.send(signal))
    }

    pub async fn set_qualities(&self, session: SessionId, qualities: Vec<Quality>) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            entry.qualities = qualities;
        }
    }

    pub async fn get_qualities(&self, session: SessionId) -> Vec<Quality> {
        self.sessions
            .read()
            .await
            .get(&session)
            .map(|e| e.qualities.clone())
            .unwrap_or_default()
    }

    pub async fn set_media_info(&self, session: SessionId, media_info: MediaInfo) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            entry.media_info = Some(media_info);
        }
    }

    pub async fn get_media_info(&self, session: SessionId) -> Option<MediaInfo> {
        self.sessions
            .read()
            .await
            .get(&session)
            .and_then(|e| e.media_info.clone())
    }

    pub async fn set_pip_config(&self, session: SessionId, config: PipConfig) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            entry.pip_config = Some(config);
        }
    }

    pub async fn get_pip_config(&self, session: SessionId) -> Option<PipConfig> {
        self.sessions.read().await.get(&session).and_then(|e| e.pip_config)
    }

    /// First writer fixes the session's PiP config; later joiners inherit it
    pub async fn pip_config_or_insert(&self, session: SessionId, config: PipConfig) -> PipConfig {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session) {
            Some(entry) => *entry.pip_config.get_or_insert(config),
            None => config,
        }
    }

    /// Record a newly loaded source; its cached ladder no longer applies
    pub async fn set_source(&self, session: SessionId, source: MediaSource) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            if entry.source.as_ref() != Some(&source) {
                entry.qualities.clear();
            }
            entry.source = Some(source);
        }
    }

    pub async fn source(&self, session: SessionId) -> Option<MediaSource> {
        self.sessions.read().await.get(&session).and_then(|e| e.source.clone())
    }

    pub async fn set_looping(&self, session: SessionId, looping: bool) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            entry.looping = looping;
        }
    }

    pub async fn is_looping(&self, session: SessionId) -> bool {
        self.sessions.read().await.get(&session).is_some_and(|e| e.looping)
    }

    /// The session's primary view. A primary that is being torn down yields
    /// to another live view until its unregistration lands.
    pub async fn primary_view(&self, session: SessionId) -> Option<ViewId> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&session)?;
        let primary = entry.primary_view?;
        if entry.views.get(&primary).is_some_and(ViewLink::is_live) {
            Some(primary)
        } else {
            entry.another_live_view(primary)
        }
    }

    pub async fn set_primary_view(&self, session: SessionId, view: ViewId) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            if entry.views.contains_key(&view) {
                entry.primary_view = Some(view);
            }
        }
    }

    pub async fn is_manual_pip_active(&self, session: SessionId) -> bool {
        self.sessions
            .read()
            .await
            .get(&session)
            .is_some_and(|e| e.manual_pip_active)
    }

    /// Clear the manual flag once a manual PiP has fully stopped
    pub async fn finish_manual_pip(&self, session: SessionId) {
        if let Some(entry) = self.sessions.write().await.get_mut(&session) {
            entry.manual_pip_active = false;
        }
    }

    /// Record that `host` is showing PiP for the session
    pub async fn begin_pip(&self, session: SessionId, host: ViewId, trigger: PipTrigger) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session) else {
            return false;
        };
        entry.active_pip = Some(ActivePip { host, trigger });
        if trigger == PipTrigger::Manual {
            entry.manual_pip_active = true;
        }
        true
    }

    pub async fn active_pip(&self, session: SessionId) -> Option<ActivePip> {
        self.sessions.read().await.get(&session).and_then(|e| e.active_pip)
    }

    pub async fn is_pip_active(&self, session: SessionId) -> bool {
        self.active_pip(session).await.is_some()
    }

    /// Claim the right to deliver the session's `pipStop`.
    ///
    /// Returns `Some` exactly once per PiP session; every delivery path goes
    /// through here so the stop event is never duplicated.
    pub async fn take_pip_stop(&self, session: SessionId) -> Option<ActivePip> {
        self.sessions
            .write()
            .await
            .get_mut(&session)
            .and_then(|e| e.active_pip.take())
    }

    /// Now-Playing snapshot for the session, if it has media info
    pub async fn now_playing(&self, session: SessionId) -> Option<NowPlaying> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&session)?;
        let media_info = entry.media_info.clone()?;
        Some(NowPlaying {
            media_info,
            position_ms: millis(entry.player.position()),
            duration_ms: millis(entry.player.duration()),
            rate: if entry.player.is_playing() {
                entry.player.rate()
            } else {
                0.0
            },
        })
    }

    /// Release `view`'s media-control ownership, handing it to a sibling when
    /// `allow_fallback_transfer` is set
    pub async fn release_ownership(
        &self,
        session: SessionId,
        view: ViewId,
        allow_fallback_transfer: bool,
    ) -> Release {
        let (fallback, pip_active) = {
            let sessions = self.sessions.read().await;
            match sessions.get(&session) {
                Some(entry) => {
                    let fallback = allow_fallback_transfer
                        .then(|| entry.another_live_view(view))
                        .flatten()
                        .map(|target| FallbackTarget {
                            view: target,
                            media_info: entry.media_info.clone(),
                        });
                    (fallback, entry.active_pip.is_some())
                }
                None => (None, false),
            }
        };
        self.ownership
            .release_if_owner(session, view, fallback, pip_active)
            .await
    }

    /// Stop and release the session's handle, drop every cache and notify
    /// remaining views. Idempotent.
    #[instrument(skip(self))]
    pub async fn dispose_session(&self, session: SessionId) -> bool {
        let entry = self.sessions.write().await.remove(&session);
        let Some(entry) = entry else {
            debug!(session = %session, "Dispose of unknown session ignored");
            return false;
        };

        if let Some(pump) = entry.pump {
            pump.abort();
        }
        entry.player.stop();
        entry.player.release();

        for link in entry.views.values() {
            link.send(ViewSignal::SessionDisposed);
        }
        self.ownership.release_session(session).await;

        info!(session = %session, views = entry.views.len(), "Session disposed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{HeadlessPlatform, SimulatedFactory};

    fn registry() -> (Arc<SimulatedFactory>, SessionRegistry) {
        let factory = Arc::new(SimulatedFactory::new());
        let platform = Arc::new(HeadlessPlatform::new());
        let ownership = Arc::new(OwnershipCoordinator::new(platform));
        (factory.clone(), SessionRegistry::new(factory, ownership, 16))
    }

    fn link() -> (ViewLink, mpsc::UnboundedReceiver<ViewSignal>) {
        let (link, _, rx) = attached_link();
        (link, rx)
    }

    fn attached_link() -> (ViewLink, Arc<AtomicBool>, mpsc::UnboundedReceiver<ViewSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let attached = Arc::new(AtomicBool::new(true));
        (ViewLink::new(tx, attached.clone()), attached, rx)
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_handle() {
        let (factory, registry) = registry();
        let first = registry.get_or_create_session(SessionId(7)).await;
        let second = registry.get_or_create_session(SessionId(7)).await;

        assert!(!first.existed);
        assert!(second.existed);
        assert!(Arc::ptr_eq(&first.player, &second.player));
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_register_requires_session() {
        let (_, registry) = registry();
        let (view, _rx) = link();
        let err = registry
            .register_view(SessionId(1), ViewId(1), view)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoActiveSession(SessionId(1))));
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let (a, _rx_a) = link();
        let (a_again, _rx_a_again) = link();

        assert!(registry.register_view(SessionId(7), ViewId(1), a).await.unwrap());
        assert!(!registry.register_view(SessionId(7), ViewId(1), a_again).await.unwrap());
        assert_eq!(registry.find_all_views(SessionId(7)).await.len(), 1);
        assert_eq!(registry.primary_view(SessionId(7)).await, Some(ViewId(1)));
    }

    #[tokio::test]
    async fn test_unregister_reconnects_remaining_views_only() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let (a, mut rx_a) = link();
        let (b, mut rx_b) = link();
        let (c, mut rx_c) = link();
        registry.register_view(SessionId(7), ViewId(1), a).await.unwrap();
        registry.register_view(SessionId(7), ViewId(2), b).await.unwrap();
        registry.register_view(SessionId(7), ViewId(3), c).await.unwrap();

        assert!(registry.unregister_view(SessionId(7), ViewId(1)).await);
        assert_eq!(rx_b.try_recv().unwrap(), ViewSignal::Reconnect);
        assert_eq!(rx_c.try_recv().unwrap(), ViewSignal::Reconnect);
        assert!(rx_a.try_recv().is_err());

        // Primary handed to a remaining view
        assert_eq!(registry.primary_view(SessionId(7)).await, Some(ViewId(2)));
        assert!(!registry.unregister_view(SessionId(7), ViewId(1)).await);
    }

    #[tokio::test]
    async fn test_find_another_view_skips_dead_links() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let (a, _rx_a) = link();
        let (b, rx_b) = link();
        let (c, _rx_c) = link();
        registry.register_view(SessionId(7), ViewId(1), a).await.unwrap();
        registry.register_view(SessionId(7), ViewId(2), b).await.unwrap();
        registry.register_view(SessionId(7), ViewId(3), c).await.unwrap();
        drop(rx_b);

        assert_eq!(
            registry.find_another_view(SessionId(7), ViewId(1)).await,
            Some(ViewId(3))
        );
        assert_eq!(registry.find_another_view(SessionId(8), ViewId(1)).await, None);
    }

    #[tokio::test]
    async fn test_detached_view_is_skipped_before_unregister() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let (a, a_attached, _rx_a) = attached_link();
        let (b, _rx_b) = link();
        registry.register_view(SessionId(7), ViewId(1), a).await.unwrap();
        registry.register_view(SessionId(7), ViewId(2), b).await.unwrap();

        // Receiver still open, as with an aborted but not yet dropped loop
        a_attached.store(false, Ordering::SeqCst);

        assert_eq!(registry.primary_view(SessionId(7)).await, Some(ViewId(2)));
        assert_eq!(
            registry.find_all_views(SessionId(7)).await,
            BTreeSet::from([ViewId(2)])
        );
        assert!(
            !registry
                .deliver(SessionId(7), ViewId(1), ViewSignal::PipStopped)
                .await
        );
    }

    #[tokio::test]
    async fn test_caches_survive_view_detach() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let (a, _rx) = link();
        registry.register_view(SessionId(7), ViewId(1), a).await.unwrap();

        let url = url::Url::parse("https://cdn.example.com/master.m3u8").unwrap();
        registry.set_qualities(SessionId(7), vec![Quality::auto(url)]).await;
        registry
            .set_media_info(
                SessionId(7),
                MediaInfo {
                    title: Some("Trailer".into()),
                    ..Default::default()
                },
            )
            .await;
        registry.unregister_view(SessionId(7), ViewId(1)).await;

        assert!(registry.contains(SessionId(7)).await);
        assert_eq!(registry.get_qualities(SessionId(7)).await.len(), 1);
        assert!(registry.get_media_info(SessionId(7)).await.is_some());
    }

    #[tokio::test]
    async fn test_pip_config_first_writer_wins() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let first = PipConfig {
            allows_pip: true,
            auto_start_pip: true,
            show_native_controls: false,
        };

        assert_eq!(registry.pip_config_or_insert(SessionId(7), first).await, first);
        assert_eq!(
            registry.pip_config_or_insert(SessionId(7), PipConfig::default()).await,
            first
        );
    }

    #[tokio::test]
    async fn test_new_source_drops_stale_ladder() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let url = url::Url::parse("https://cdn.example.com/a.m3u8").unwrap();
        let source = MediaSource {
            url: url.clone(),
            headers: HashMap::new(),
        };

        registry.set_source(SessionId(7), source.clone()).await;
        registry.set_qualities(SessionId(7), vec![Quality::auto(url)]).await;
        registry.set_source(SessionId(7), source).await;
        assert_eq!(registry.get_qualities(SessionId(7)).await.len(), 1);

        let other = MediaSource {
            url: url::Url::parse("https://cdn.example.com/b.m3u8").unwrap(),
            headers: HashMap::new(),
        };
        registry.set_source(SessionId(7), other).await;
        assert!(registry.get_qualities(SessionId(7)).await.is_empty());
    }

    #[tokio::test]
    async fn test_pip_stop_claimed_once() {
        let (_, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;

        assert!(registry.begin_pip(SessionId(7), ViewId(1), PipTrigger::Manual).await);
        assert!(registry.is_manual_pip_active(SessionId(7)).await);
        assert_eq!(
            registry.take_pip_stop(SessionId(7)).await,
            Some(ActivePip {
                host: ViewId(1),
                trigger: PipTrigger::Manual
            })
        );
        assert_eq!(registry.take_pip_stop(SessionId(7)).await, None);

        registry.finish_manual_pip(SessionId(7)).await;
        assert!(!registry.is_manual_pip_active(SessionId(7)).await);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent_and_releases_handle() {
        let (factory, registry) = registry();
        registry.get_or_create_session(SessionId(7)).await;
        let (a, mut rx) = link();
        registry.register_view(SessionId(7), ViewId(1), a).await.unwrap();

        assert!(registry.dispose_session(SessionId(7)).await);
        assert!(!registry.dispose_session(SessionId(7)).await);
        assert_eq!(rx.try_recv().unwrap(), ViewSignal::SessionDisposed);
        assert!(factory.player(SessionId(7)).unwrap().is_released());

        let recreated = registry.get_or_create_session(SessionId(7)).await;
        assert!(!recreated.existed);
        assert_eq!(factory.created(), 2);
    }
}
