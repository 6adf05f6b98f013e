//! Scenario stage: one coordinator on the headless backend plus the views
//! attached to it, recording everything they observe step by step

use anyhow::Context;
use kino_coordinator::{
    Coordinator, CoordinatorConfig, EventEnvelope, HeadlessPlatform, HeadlessSurface, HostEvent,
    PipConfig, SessionFacade, SessionId, SimulatedFactory, SimulatedPlayer, ViewId,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Time given to spawned tasks before a step is recorded
const SETTLE: Duration = Duration::from_millis(30);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReport {
    pub action: String,
    pub events: Vec<EventEnvelope>,
    pub host_events: Vec<HostEvent>,
    pub notes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioReport {
    pub scenario: String,
    pub steps: Vec<StepReport>,
}

pub struct Stage {
    coordinator: Coordinator,
    factory: Arc<SimulatedFactory>,
    platform: Arc<HeadlessPlatform>,
    views: BTreeMap<ViewId, SessionFacade>,
    sinks: BTreeMap<ViewId, mpsc::UnboundedReceiver<EventEnvelope>>,
    host: broadcast::Receiver<HostEvent>,
    steps: Vec<StepReport>,
}

impl Stage {
    pub fn new(config: CoordinatorConfig) -> anyhow::Result<Self> {
        let factory = Arc::new(SimulatedFactory::new());
        let platform = Arc::new(HeadlessPlatform::new());
        let coordinator = Coordinator::new(config, factory.clone(), platform.clone())?;
        let host = coordinator.host_events();
        Ok(Self {
            coordinator,
            factory,
            platform,
            views: BTreeMap::new(),
            sinks: BTreeMap::new(),
            host,
            steps: Vec::new(),
        })
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    pub fn platform(&self) -> &HeadlessPlatform {
        &self.platform
    }

    pub async fn attach(
        &mut self,
        session: i64,
        view: i64,
        pip_config: PipConfig,
    ) -> anyhow::Result<()> {
        let (facade, sink) = self
            .coordinator
            .attach(
                SessionId(session),
                ViewId(view),
                Arc::new(HeadlessSurface::new()),
                pip_config,
            )
            .await?;
        self.views.insert(ViewId(view), facade);
        self.sinks.insert(ViewId(view), sink);
        Ok(())
    }

    pub fn view(&self, view: i64) -> anyhow::Result<&SessionFacade> {
        self.views
            .get(&ViewId(view))
            .with_context(|| format!("view {} is not attached", view))
    }

    pub fn player(&self, session: i64) -> anyhow::Result<Arc<SimulatedPlayer>> {
        self.factory
            .player(SessionId(session))
            .with_context(|| format!("session {} has no player", session))
    }

    /// Tear a view down the way a host UI does
    pub async fn detach(&mut self, view: i64) -> anyhow::Result<()> {
        let facade = self
            .views
            .remove(&ViewId(view))
            .with_context(|| format!("view {} is not attached", view))?;
        facade.detach().await;
        Ok(())
    }

    /// Close a view's event sink, as when its UI has already been released
    pub fn drop_sink(&mut self, view: i64) {
        self.sinks.remove(&ViewId(view));
    }

    /// Let the runtime settle, then collect what every view and host listener saw
    pub async fn record(&mut self, action: impl Into<String>, notes: Vec<String>) {
        tokio::time::sleep(SETTLE).await;

        let mut events = Vec::new();
        for sink in self.sinks.values_mut() {
            while let Ok(envelope) = sink.try_recv() {
                events.push(envelope);
            }
        }
        let mut host_events = Vec::new();
        while let Ok(event) = self.host.try_recv() {
            host_events.push(event);
        }

        self.steps.push(StepReport {
            action: action.into(),
            events,
            host_events,
            notes,
        });
    }

    pub async fn owner_note(&self) -> String {
        match self.coordinator.ownership().owner().await {
            Some(owner) => format!(
                "media controls owned by view {} (session {})",
                owner.view, owner.session
            ),
            None => match self.platform.transport_view() {
                Some(view) => format!("no owner; controls still routed to view {}", view),
                None => "no owner".to_string(),
            },
        }
    }

    pub fn finish(self, scenario: &str) -> ScenarioReport {
        ScenarioReport {
            scenario: scenario.to_string(),
            steps: self.steps,
        }
    }
}
