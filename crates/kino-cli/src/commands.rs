//! CLI command implementations

use crate::output::{format_output, print_qualities, print_report};
use crate::stage::{ScenarioReport, Stage};
use crate::Scenario;
use kino_coordinator::{
    derive_qualities, CoordinatorConfig, HttpManifestFetcher, MediaInfo, PipConfig,
    PipTrigger, PlayerCommand, Quality, SessionId, TransportCommand, ViewId,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;
use url::Url;

const DEMO_URL: &str = "https://cdn.example.com/kino/demo/master.m3u8";

fn load(title: &str) -> anyhow::Result<PlayerCommand> {
    Ok(PlayerCommand::Load {
        url: Url::parse(DEMO_URL)?,
        headers: HashMap::new(),
        media_info: Some(MediaInfo {
            title: Some(title.to_string()),
            ..Default::default()
        }),
    })
}

/// Run a scripted scenario
pub async fn simulate(
    scenario: Scenario,
    config: CoordinatorConfig,
    format: &str,
) -> anyhow::Result<()> {
    info!(?scenario, "Running scenario");
    let report = match scenario {
        Scenario::MultiView => multi_view(config).await?,
        Scenario::PipHandoff => pip_handoff(config).await?,
        Scenario::Debounce => debounce(config).await?,
        Scenario::Ownership => ownership(config).await?,
    };

    if format == "json" {
        println!("{}", format_output(&report, format));
    } else {
        print_report(&report);
    }
    Ok(())
}

async fn multi_view(config: CoordinatorConfig) -> anyhow::Result<ScenarioReport> {
    let interval = Duration::from_millis(config.position_interval_ms);
    let mut stage = Stage::new(config)?;

    stage.attach(1, 1, PipConfig::default()).await?;
    stage.attach(1, 2, PipConfig::default()).await?;
    stage.record("views 1 and 2 attach to session 1", vec![]).await;

    stage.view(1)?.execute(load("Kino Demo")?).await?;
    stage.view(1)?.execute(PlayerCommand::Play).await?;
    let note = stage.owner_note().await;
    stage.record("view 1 loads and plays", vec![note]).await;

    stage.player(1)?.advance(Duration::from_secs(12));
    tokio::time::sleep(interval * 2).await;
    stage.record("playback advances 12s", vec![]).await;

    stage.detach(1).await?;
    let note = stage.owner_note().await;
    stage
        .record("view 1 detaches; session keeps playing", vec![note])
        .await;

    stage.attach(1, 3, PipConfig::default()).await?;
    let primary = stage.coordinator().registry().primary_view(SessionId(1)).await;
    stage
        .record(
            "view 3 joins late and is resynchronized",
            vec![format!("primary view: {:?}", primary.map(|v| v.0))],
        )
        .await;

    Ok(stage.finish("multi-view"))
}

async fn pip_handoff(config: CoordinatorConfig) -> anyhow::Result<ScenarioReport> {
    let mut stage = Stage::new(config)?;

    stage.attach(1, 1, PipConfig::default()).await?;
    stage.attach(1, 2, PipConfig::default()).await?;
    stage.view(1)?.execute(load("Kino Demo")?).await?;
    stage.view(1)?.execute(PlayerCommand::Play).await?;
    stage.record("views 1 and 2 attach; view 1 plays", vec![]).await;

    let entered = stage.view(1)?.enter_pip(PipTrigger::Manual).await?;
    let request = stage.platform().pip_requests().last().map(|r| {
        format!(
            "source rect {}x{} at ({}, {})",
            r.source_rect.width, r.source_rect.height, r.source_rect.x, r.source_rect.y
        )
    });
    stage
        .record(
            "view 1 enters Picture-in-Picture",
            vec![format!("entered: {}", entered)]
                .into_iter()
                .chain(request)
                .collect(),
        )
        .await;

    // Navigation away: the UI is released before the view is torn down
    stage.drop_sink(1);
    stage.detach(1).await?;
    let shown = stage.platform().pip_shown();
    stage
        .record(
            "view 1 is torn down while its PiP window is showing",
            vec![format!("PiP window showing: {}", shown.is_some())],
        )
        .await;

    let stopped = stage.coordinator().on_pip_stopped(SessionId(1)).await;
    stage
        .record(
            "late OS stop callback",
            vec![format!("delivered again: {}", stopped)],
        )
        .await;

    Ok(stage.finish("pip-handoff"))
}

async fn debounce(config: CoordinatorConfig) -> anyhow::Result<ScenarioReport> {
    let threshold = Duration::from_millis(config.buffering_debounce_ms);
    let mut stage = Stage::new(config)?;

    stage.attach(1, 1, PipConfig::default()).await?;
    stage.view(1)?.execute(load("Kino Demo")?).await?;
    stage.view(1)?.execute(PlayerCommand::Play).await?;
    stage.record("view 1 loads and plays", vec![]).await;

    let player = stage.player(1)?;
    player.set_buffering(true);
    tokio::time::sleep(threshold / 2).await;
    player.set_buffering(false);
    stage
        .record(
            format!("stall shorter than {}ms", threshold.as_millis()),
            vec![],
        )
        .await;

    player.set_buffering(true);
    tokio::time::sleep(threshold + threshold / 2).await;
    player.set_buffering(false);
    stage
        .record(
            format!("stall longer than {}ms", threshold.as_millis()),
            vec![],
        )
        .await;

    Ok(stage.finish("debounce"))
}

async fn ownership(config: CoordinatorConfig) -> anyhow::Result<ScenarioReport> {
    let mut stage = Stage::new(config)?;

    stage.attach(1, 1, PipConfig::default()).await?;
    stage.attach(2, 2, PipConfig::default()).await?;
    stage.view(1)?.execute(load("Episode 1")?).await?;
    stage.view(2)?.execute(load("Episode 2")?).await?;

    stage.view(1)?.execute(PlayerCommand::Play).await?;
    let note = stage.owner_note().await;
    stage.record("session 1 plays", vec![note]).await;

    stage.view(2)?.execute(PlayerCommand::Play).await?;
    let note = stage.owner_note().await;
    stage.record("session 2 plays", vec![note]).await;

    let accepted = stage
        .coordinator()
        .handle_transport(SessionId(1), ViewId(1), TransportCommand::Pause)
        .await;
    stage
        .record(
            "OS pause delivered to view 1",
            vec![format!("accepted: {}", accepted)],
        )
        .await;

    let accepted = stage
        .coordinator()
        .handle_transport(SessionId(2), ViewId(2), TransportCommand::TogglePlayPause)
        .await;
    stage
        .record(
            "OS play/pause toggle delivered to view 2",
            vec![format!("accepted: {}", accepted)],
        )
        .await;

    stage.detach(2).await?;
    let note = stage.owner_note().await;
    stage.record("view 2 detaches", vec![note]).await;

    Ok(stage.finish("ownership"))
}

/// Fetch a manifest and print its quality ladder
pub async fn qualities(
    manifest_url: &str,
    strict: bool,
    config: &CoordinatorConfig,
    format: &str,
) -> anyhow::Result<()> {
    let url = Url::parse(manifest_url)?;
    let fetcher = HttpManifestFetcher::new(config.manifest_timeout())?;
    let ladder = derive_qualities(&fetcher, &url, &HashMap::new()).await?;
    let warnings = ladder_warnings(&ladder);

    print_qualities(&ladder, &warnings, format);

    if strict && !warnings.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Ladder shape checks
fn ladder_warnings(ladder: &[Quality]) -> Vec<String> {
    let variants: Vec<&Quality> = ladder.iter().filter(|q| !q.is_auto).collect();
    let mut warnings = Vec::new();

    if variants.len() < 2 {
        warnings.push("Fewer than 2 variants - quality selection offers no choice".to_string());
    }

    for pair in variants.windows(2) {
        if let (Some(low), Some(high)) = (pair[0].bitrate, pair[1].bitrate) {
            let ratio = high as f64 / low as f64;
            if ratio > 3.0 {
                warnings.push(format!(
                    "Large bitrate gap between {} and {}",
                    pair[0].label, pair[1].label
                ));
            }
        }
    }

    if !variants.is_empty() && !variants.iter().any(|q| q.height.is_some_and(|h| h >= 720)) {
        warnings.push("No HD variant (720p+)".to_string());
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(label: &str, height: u32, bitrate: u64) -> Quality {
        Quality {
            label: label.to_string(),
            url: Url::parse(&format!("https://cdn.example.com/{}.m3u8", label)).unwrap(),
            width: None,
            height: Some(height),
            bitrate: Some(bitrate),
            is_auto: false,
        }
    }

    #[test]
    fn test_healthy_ladder_has_no_warnings() {
        let master = Url::parse(DEMO_URL).unwrap();
        let ladder = vec![
            Quality::auto(master),
            variant("480p", 480, 800_000),
            variant("720p", 720, 2_000_000),
            variant("1080p", 1080, 5_000_000),
        ];
        assert!(ladder_warnings(&ladder).is_empty());
    }

    #[test]
    fn test_ladder_gaps_and_missing_hd() {
        let ladder = vec![variant("240p", 240, 300_000), variant("480p", 480, 1_500_000)];
        let warnings = ladder_warnings(&ladder);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("240p and 480p"));
    }
}
