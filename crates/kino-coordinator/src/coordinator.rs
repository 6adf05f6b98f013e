//! Process-wide coordinator
//!
//! Constructed once at process start and passed explicitly to whoever attaches
//! views. Owns the session registry (and through it the ownership token), the
//! platform capability interface, the manifest fetcher and the host lifecycle
//! broadcast. Also the entry point for OS callbacks that are not addressed to
//! a particular view: PiP stop, interface restoration, transport commands.

use crate::{
    config::CoordinatorConfig,
    error::Error,
    events::{EventEnvelope, HostEvent, TransportCommand, ViewSignal},
    facade::{SessionFacade, ViewChannels},
    native::PlayerFactory,
    ownership::OwnershipCoordinator,
    platform::{PlatformMedia, ViewSurface},
    quality::{HttpManifestFetcher, ManifestFetcher},
    registry::{ActivePip, SessionRegistry, ViewLink},
    session::SessionPump,
    types::*,
    Result,
};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

struct CoordinatorInner {
    config: CoordinatorConfig,
    registry: Arc<SessionRegistry>,
    platform: Arc<dyn PlatformMedia>,
    fetcher: Arc<dyn ManifestFetcher>,
    host: broadcast::Sender<HostEvent>,
}

/// Shared handle; cloning is cheap
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Create a coordinator fetching manifests over HTTP
    pub fn new(
        config: CoordinatorConfig,
        factory: Arc<dyn PlayerFactory>,
        platform: Arc<dyn PlatformMedia>,
    ) -> Result<Self> {
        let fetcher = Arc::new(HttpManifestFetcher::new(config.manifest_timeout())?);
        Self::with_fetcher(config, factory, platform, fetcher)
    }

    pub fn with_fetcher(
        config: CoordinatorConfig,
        factory: Arc<dyn PlayerFactory>,
        platform: Arc<dyn PlatformMedia>,
        fetcher: Arc<dyn ManifestFetcher>,
    ) -> Result<Self> {
        config.validate()?;

        let ownership = Arc::new(OwnershipCoordinator::new(platform.clone()));
        let registry = Arc::new(SessionRegistry::new(
            factory,
            ownership,
            config.event_channel_capacity,
        ));
        let (host, _) = broadcast::channel(config.event_channel_capacity);

        info!(version = crate::VERSION, "Coordinator initialized");
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                config,
                registry,
                platform,
                fetcher,
                host,
            }),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.inner.registry
    }

    pub fn ownership(&self) -> &OwnershipCoordinator {
        self.inner.registry.ownership()
    }

    pub fn platform(&self) -> &Arc<dyn PlatformMedia> {
        &self.inner.platform
    }

    pub(crate) fn fetcher(&self) -> &dyn ManifestFetcher {
        self.inner.fetcher.as_ref()
    }

    /// Attach a view to a session, creating the session on first use.
    ///
    /// `pip_config` only takes effect for the view that creates the session;
    /// later joiners inherit the existing configuration. Returns the view's
    /// facade and the receiving end of its event sink.
    #[instrument(skip(self, surface))]
    pub async fn attach(
        &self,
        session: SessionId,
        view: ViewId,
        surface: Arc<dyn ViewSurface>,
        pip_config: PipConfig,
    ) -> Result<(SessionFacade, mpsc::UnboundedReceiver<EventEnvelope>)> {
        let registry = &self.inner.registry;
        let handle = registry.get_or_create_session(session).await;

        if !handle.existed {
            if let Some(signals) = registry.signal_sender(session).await {
                let pump = SessionPump::new(
                    session,
                    handle.player.clone(),
                    signals,
                    registry.clone(),
                    self.inner.config.position_interval(),
                );
                registry.set_pump(session, tokio::spawn(pump.run())).await;
            }
        }
        registry.pip_config_or_insert(session, pip_config).await;

        let session_signals = registry
            .subscribe(session)
            .await
            .ok_or(Error::NoActiveSession(session))?;
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let attached = Arc::new(AtomicBool::new(true));
        registry
            .register_view(session, view, ViewLink::new(signal_tx, attached.clone()))
            .await?;

        let channels = ViewChannels {
            signals: signal_rx,
            session: session_signals,
            host: self.inner.host.subscribe(),
        };
        info!(session = %session, view = %view, joined = handle.existed, "View attached");
        Ok(SessionFacade::start(
            self.clone(),
            session,
            view,
            handle.player,
            surface,
            channels,
            attached,
        ))
    }

    /// Explicitly end a session. A PiP window still showing is closed and its
    /// stop delivered before the session goes away. Idempotent.
    #[instrument(skip(self))]
    pub async fn dispose_session(&self, session: SessionId) -> bool {
        let registry = &self.inner.registry;
        if let Some(active) = registry.take_pip_stop(session).await {
            if let Err(e) = self.inner.platform.exit_pip(session).await {
                warn!(session = %session, error = %e, "Platform PiP exit failed during dispose");
            }
            self.route_pip_stop(session, active.host).await;
            self.finish_pip(session, active).await;
        }
        registry.dispose_session(session).await
    }

    /// Subscribe to host lifecycle and PiP notifications
    pub fn host_events(&self) -> broadcast::Receiver<HostEvent> {
        self.inner.host.subscribe()
    }

    /// Publish a host lifecycle event to every view and listener
    pub fn notify_host(&self, event: HostEvent) {
        debug!(?event, "Host event");
        // Nobody listening is fine
        let _ = self.inner.host.send(event);
    }

    /// OS callback: the PiP window of `session` closed.
    ///
    /// Routed to the hosting view; if it is gone, the stop is claimed here and
    /// delivered through another view of the session. Returns false when no
    /// live view could take it.
    #[instrument(skip(self))]
    pub async fn on_pip_stopped(&self, session: SessionId) -> bool {
        let registry = &self.inner.registry;
        let Some(active) = registry.active_pip(session).await else {
            debug!(session = %session, "PiP stop with nothing active");
            return false;
        };
        if registry
            .deliver(session, active.host, ViewSignal::PipStopped)
            .await
        {
            return true;
        }

        let Some(active) = registry.take_pip_stop(session).await else {
            return false;
        };
        let delivered = self.route_pip_stop(session, active.host).await;
        self.finish_pip(session, active).await;
        delivered
    }

    /// OS callback: restore the app interface from PiP.
    ///
    /// Falls back to another view of the session when the host is gone. A
    /// false result lets the OS close PiP without returning to the app.
    #[instrument(skip(self))]
    pub async fn restore_interface(&self, session: SessionId) -> bool {
        let registry = &self.inner.registry;
        let Some(active) = registry.active_pip(session).await else {
            return false;
        };
        if registry
            .deliver(session, active.host, ViewSignal::RestoreInterface)
            .await
        {
            return true;
        }

        match registry.find_another_view(session, active.host).await {
            Some(other)
                if registry
                    .deliver(session, other, ViewSignal::RestoreInterface)
                    .await =>
            {
                warn!(session = %session, host = %active.host, via = %other, "Interface restored on alternate view");
                true
            }
            _ => {
                let err = Error::NoAlternateView { session };
                warn!(session = %session, error = %err, "Interface restoration failed");
                false
            }
        }
    }

    /// OS callback: a transport-control command arrived at the handlers of
    /// `view` in `session`. Only the current owner acts on it; anything else
    /// is ignored.
    pub async fn handle_transport(
        &self,
        session: SessionId,
        view: ViewId,
        command: TransportCommand,
    ) -> bool {
        match self.ownership().owner().await {
            Some(owner) if owner.session == session && owner.view == view => {
                self.inner
                    .registry
                    .deliver(session, view, ViewSignal::Transport(command))
                    .await
            }
            _ => {
                let err = Error::OwnershipConflict { view };
                debug!(session = %session, view = %view, ?command, error = %err, "Transport command ignored");
                false
            }
        }
    }

    /// Deliver an already-claimed stop to `host`, or to a sibling if `host`
    /// is gone
    async fn route_pip_stop(&self, session: SessionId, host: ViewId) -> bool {
        let registry = &self.inner.registry;
        if registry
            .deliver(session, host, ViewSignal::PipStopOnBehalfOf(host))
            .await
        {
            return true;
        }
        match registry.find_another_view(session, host).await {
            Some(other)
                if registry
                    .deliver(session, other, ViewSignal::PipStopOnBehalfOf(host))
                    .await =>
            {
                warn!(session = %session, host = %host, via = %other, "pipStop routed to alternate view");
                true
            }
            _ => {
                let err = Error::NoAlternateView { session };
                warn!(session = %session, error = %err, "pipStop has no live recipient");
                false
            }
        }
    }

    /// Session bookkeeping once a PiP stop has been delivered
    pub(crate) async fn finish_pip(&self, session: SessionId, active: ActivePip) {
        if active.trigger == PipTrigger::Manual {
            self.inner.registry.finish_manual_pip(session).await;
        }
        self.ownership().release_retained(session).await;
        self.notify_host(HostEvent::PipExited { session });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{PlayerCommand, PlayerEvent};
    use crate::native::NativePlayer;
    use crate::sim::{HeadlessPlatform, HeadlessSurface, SimulatedFactory};
    use url::Url;

    fn coordinator() -> (Coordinator, Arc<SimulatedFactory>, Arc<HeadlessPlatform>) {
        let factory = Arc::new(SimulatedFactory::new());
        let platform = Arc::new(HeadlessPlatform::new());
        let coordinator =
            Coordinator::new(CoordinatorConfig::default(), factory.clone(), platform.clone())
                .unwrap();
        (coordinator, factory, platform)
    }

    fn surface() -> Arc<HeadlessSurface> {
        Arc::new(HeadlessSurface::new())
    }

    fn load() -> PlayerCommand {
        PlayerCommand::Load {
            url: Url::parse("https://cdn.example.com/master.m3u8").unwrap(),
            headers: Default::default(),
            media_info: Some(MediaInfo {
                title: Some("Trailer".into()),
                ..Default::default()
            }),
        }
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    async fn wait_for_pip_stop(events: &mut mpsc::UnboundedReceiver<EventEnvelope>) {
        while let Some(envelope) = events.recv().await {
            if matches!(envelope.event, PlayerEvent::PipStop { .. }) {
                return;
            }
        }
        panic!("event sink closed before pipStop");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = CoordinatorConfig {
            pip_retry_attempts: 0,
            ..Default::default()
        };
        let result = Coordinator::new(
            config,
            Arc::new(SimulatedFactory::new()),
            Arc::new(HeadlessPlatform::new()),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_creates_one_session() {
        let (coordinator, factory, _) = coordinator();
        let (_a, _ea) = coordinator
            .attach(SessionId(7), ViewId(1), surface(), PipConfig::default())
            .await
            .unwrap();
        let (_b, _eb) = coordinator
            .attach(SessionId(7), ViewId(2), surface(), PipConfig::default())
            .await
            .unwrap();

        assert_eq!(factory.created(), 1);
        assert_eq!(coordinator.registry().find_all_views(SessionId(7)).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_os_pip_stop_reaches_host() {
        let (coordinator, _, platform) = coordinator();
        let (view, mut events) = coordinator
            .attach(SessionId(1), ViewId(1), surface(), PipConfig::default())
            .await
            .unwrap();
        let mut host = coordinator.host_events();
        view.execute(load()).await.unwrap();
        view.enter_pip(PipTrigger::Manual).await.unwrap();
        assert_eq!(platform.pip_shown(), Some(SessionId(1)));

        assert!(coordinator.on_pip_stopped(SessionId(1)).await);
        wait_for_pip_stop(&mut events).await;

        assert_eq!(
            host.recv().await.unwrap(),
            HostEvent::PipEntered {
                session: SessionId(1),
                automatic: false
            }
        );
        assert_eq!(
            host.recv().await.unwrap(),
            HostEvent::PipExited {
                session: SessionId(1)
            }
        );
        // Already delivered
        assert!(!coordinator.on_pip_stopped(SessionId(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_interface_falls_back_to_sibling() {
        let (coordinator, _, _) = coordinator();
        let host_surface = surface();
        let sibling_surface = surface();
        let (host, _host_events) = coordinator
            .attach(SessionId(1), ViewId(1), host_surface, PipConfig::default())
            .await
            .unwrap();
        let (_sibling, _sibling_events) = coordinator
            .attach(SessionId(1), ViewId(2), sibling_surface.clone(), PipConfig::default())
            .await
            .unwrap();
        host.execute(load()).await.unwrap();
        host.enter_pip(PipTrigger::Manual).await.unwrap();

        // Host dropped by the UI; restore lands before its teardown runs
        drop(host);

        assert!(coordinator.restore_interface(SessionId(1)).await);
        settle().await;
        assert!(sibling_surface.reconnects() >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_interface_without_views_fails() {
        let (coordinator, _, _) = coordinator();
        assert!(!coordinator.restore_interface(SessionId(9)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_routed_to_owner_only() {
        let (coordinator, factory, _) = coordinator();
        let (a, _ea) = coordinator
            .attach(SessionId(1), ViewId(1), surface(), PipConfig::default())
            .await
            .unwrap();
        let (_b, _eb) = coordinator
            .attach(SessionId(1), ViewId(2), surface(), PipConfig::default())
            .await
            .unwrap();
        a.execute(load()).await.unwrap();
        a.execute(PlayerCommand::Play).await.unwrap();

        assert!(
            !coordinator
                .handle_transport(SessionId(1), ViewId(2), TransportCommand::Pause)
                .await
        );
        assert!(factory.player(SessionId(1)).unwrap().is_playing());

        assert!(
            !coordinator
                .handle_transport(SessionId(2), ViewId(1), TransportCommand::Pause)
                .await
        );
        assert!(
            coordinator
                .handle_transport(SessionId(1), ViewId(1), TransportCommand::Pause)
                .await
        );
        settle().await;
        assert!(!factory.player(SessionId(1)).unwrap().is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_pip_delivers_stop() {
        let (coordinator, factory, platform) = coordinator();
        let (view, mut events) = coordinator
            .attach(SessionId(1), ViewId(1), surface(), PipConfig::default())
            .await
            .unwrap();
        view.execute(load()).await.unwrap();
        view.enter_pip(PipTrigger::Manual).await.unwrap();

        view.execute(PlayerCommand::Dispose).await.unwrap();
        wait_for_pip_stop(&mut events).await;

        assert_eq!(platform.pip_shown(), None);
        assert!(!coordinator.registry().contains(SessionId(1)).await);
        assert!(factory.player(SessionId(1)).unwrap().is_released());
        assert!(!coordinator.dispose_session(SessionId(1)).await);
    }
}
