//! Command and event transport
//!
//! Commands flow attachment -> [`SessionFacade`](crate::SessionFacade); events
//! flow back out wrapped in an [`EventEnvelope`]. The JSON form of both uses the
//! names a host UI layer expects (`seekTo`, `timeUpdate`, `pipStart`, ...).

use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Session-scoped command issued by a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlayerCommand {
    Load {
        url: Url,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        media_info: Option<MediaInfo>,
    },
    Play,
    Pause,
    SeekTo {
        position_ms: u64,
    },
    SetVolume {
        volume: f64,
    },
    SetSpeed {
        speed: f64,
    },
    SetLooping {
        looping: bool,
    },
    SetQuality {
        url: Url,
    },
    GetAvailableQualities,
    EnterFullScreen,
    ExitFullScreen,
    EnterPictureInPicture,
    ExitPictureInPicture,
    Dispose,
}

impl PlayerCommand {
    /// Wire name of the command
    pub fn name(&self) -> &'static str {
        match self {
            PlayerCommand::Load { .. } => "load",
            PlayerCommand::Play => "play",
            PlayerCommand::Pause => "pause",
            PlayerCommand::SeekTo { .. } => "seekTo",
            PlayerCommand::SetVolume { .. } => "setVolume",
            PlayerCommand::SetSpeed { .. } => "setSpeed",
            PlayerCommand::SetLooping { .. } => "setLooping",
            PlayerCommand::SetQuality { .. } => "setQuality",
            PlayerCommand::GetAvailableQualities => "getAvailableQualities",
            PlayerCommand::EnterFullScreen => "enterFullScreen",
            PlayerCommand::ExitFullScreen => "exitFullScreen",
            PlayerCommand::EnterPictureInPicture => "enterPictureInPicture",
            PlayerCommand::ExitPictureInPicture => "exitPictureInPicture",
            PlayerCommand::Dispose => "dispose",
        }
    }
}

/// Successful result of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", content = "value", rename_all = "camelCase")]
pub enum CommandReply {
    Ack,
    Bool(bool),
    Qualities(Vec<Quality>),
}

/// Named event delivered to an attachment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PlayerEvent {
    Loading,
    /// Millisecond fields carry the bare wire names (`duration`,
    /// `position`, `bufferedPosition`)
    Loaded {
        #[serde(rename = "duration")]
        duration_ms: u64,
    },
    Play,
    Pause,
    Buffering,
    Completed,
    Stopped,
    Error {
        message: String,
        code: String,
    },
    TimeUpdate {
        #[serde(rename = "position")]
        position_ms: u64,
        #[serde(rename = "duration")]
        duration_ms: u64,
        #[serde(rename = "bufferedPosition")]
        buffered_position_ms: u64,
        is_buffering: bool,
    },
    QualityChange {
        url: Url,
        label: String,
        is_auto: bool,
    },
    SpeedChange {
        speed: f64,
    },
    FullscreenChange {
        is_fullscreen: bool,
    },
    PipStart {
        is_picture_in_picture: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auto: Option<bool>,
    },
    PipStop {
        is_picture_in_picture: bool,
    },
    PipAvailabilityChanged {
        is_available: bool,
    },
    ExternalRouteAvailabilityChanged {
        is_available: bool,
    },
    ExternalRouteConnectionChanged {
        is_connected: bool,
    },
}

impl PlayerEvent {
    /// Event announcing an activity state, for states that have a wire name.
    ///
    /// `Error` is excluded: error events always carry the failure message and
    /// are built where the failure is observed.
    pub fn from_activity(state: ActivityState, duration_ms: u64) -> Option<Self> {
        match state {
            ActivityState::Loading => Some(PlayerEvent::Loading),
            ActivityState::Loaded => Some(PlayerEvent::Loaded { duration_ms }),
            ActivityState::Playing => Some(PlayerEvent::Play),
            ActivityState::Paused => Some(PlayerEvent::Pause),
            ActivityState::Buffering => Some(PlayerEvent::Buffering),
            ActivityState::Completed => Some(PlayerEvent::Completed),
            ActivityState::Stopped => Some(PlayerEvent::Stopped),
            ActivityState::Idle
            | ActivityState::Initializing
            | ActivityState::Initialized
            | ActivityState::Error => None,
        }
    }

    pub fn pip_stop() -> Self {
        PlayerEvent::PipStop {
            is_picture_in_picture: false,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::Loading => "loading",
            PlayerEvent::Loaded { .. } => "loaded",
            PlayerEvent::Play => "play",
            PlayerEvent::Pause => "pause",
            PlayerEvent::Buffering => "buffering",
            PlayerEvent::Completed => "completed",
            PlayerEvent::Stopped => "stopped",
            PlayerEvent::Error { .. } => "error",
            PlayerEvent::TimeUpdate { .. } => "timeUpdate",
            PlayerEvent::QualityChange { .. } => "qualityChange",
            PlayerEvent::SpeedChange { .. } => "speedChange",
            PlayerEvent::FullscreenChange { .. } => "fullscreenChange",
            PlayerEvent::PipStart { .. } => "pipStart",
            PlayerEvent::PipStop { .. } => "pipStop",
            PlayerEvent::PipAvailabilityChanged { .. } => "pipAvailabilityChanged",
            PlayerEvent::ExternalRouteAvailabilityChanged { .. } => {
                "externalRouteAvailabilityChanged"
            }
            PlayerEvent::ExternalRouteConnectionChanged { .. } => "externalRouteConnectionChanged",
        }
    }
}

/// Event with delivery metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub session: SessionId,
    pub view: ViewId,
    /// Per-view sequence number, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PlayerEvent,
}

/// Raw signal published by a native player handle
#[derive(Debug, Clone, PartialEq)]
pub enum NativeEvent {
    StatusChanged(ItemStatus),
    BufferingChanged(bool),
    PlayingChanged(bool),
    DurationChanged(Duration),
    RateChanged(f64),
    Completed,
    Failed(String),
    PipPossibleChanged(bool),
    ExternalRouteAvailable(bool),
    ExternalRouteConnected(bool),
    /// Audio-session interruption (phone call, other app taking audio focus)
    Interruption { began: bool },
}

/// Session-wide signal fanned out to every attached view
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    Native(NativeEvent),
    /// Periodic sample from the session-scoped position ticker
    Tick {
        position: Duration,
        duration: Duration,
        buffered: Duration,
    },
}

/// Process-wide host application lifecycle notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    /// Home button / task switch: automatic PiP may start
    WillResignActive,
    /// App returned to the foreground
    DidBecomeActive,
    PipEntered { session: SessionId, automatic: bool },
    PipExited { session: SessionId },
}

/// Command arriving from the OS transport-control surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportCommand {
    Play,
    Pause,
    TogglePlayPause,
    SeekTo(u64),
    SkipForward,
    SkipBackward,
}

/// Signal addressed to a single view's queue through the registry
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ViewSignal {
    /// A sibling detached; re-attach the render surface
    Reconnect,
    /// The OS closed the PiP window this view hosts
    PipStopped,
    /// Deliver `pipStop` on behalf of a sibling that is gone
    PipStopOnBehalfOf(ViewId),
    /// The OS asked the app to restore its interface from PiP
    RestoreInterface,
    Transport(TransportCommand),
    SessionDisposed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd: PlayerCommand =
            serde_json::from_str(r#"{"command":"seekTo","positionMs":1500}"#).unwrap();
        assert_eq!(cmd, PlayerCommand::SeekTo { position_ms: 1500 });
        assert_eq!(cmd.name(), "seekTo");

        let cmd: PlayerCommand = serde_json::from_str(
            r#"{"command":"load","url":"https://cdn.example.com/master.m3u8","mediaInfo":{"title":"Trailer"}}"#,
        )
        .unwrap();
        match cmd {
            PlayerCommand::Load { headers, media_info, .. } => {
                assert!(headers.is_empty());
                assert_eq!(media_info.unwrap().title.as_deref(), Some("Trailer"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_event_wire_format() {
        let json = serde_json::to_value(PlayerEvent::TimeUpdate {
            position_ms: 1000,
            duration_ms: 60_000,
            buffered_position_ms: 5000,
            is_buffering: false,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "timeUpdate",
                "position": 1000,
                "duration": 60_000,
                "bufferedPosition": 5000,
                "isBuffering": false,
            })
        );

        let json = serde_json::to_value(PlayerEvent::Loaded { duration_ms: 42 }).unwrap();
        assert_eq!(json, serde_json::json!({ "event": "loaded", "duration": 42 }));
        let parsed: PlayerEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, PlayerEvent::Loaded { duration_ms: 42 });

        let json = serde_json::to_value(PlayerEvent::PipStart {
            is_picture_in_picture: true,
            auto: None,
        })
        .unwrap();
        assert_eq!(json["isPictureInPicture"], true);
        assert!(json.get("auto").is_none());
    }

    #[test]
    fn test_activity_mapping() {
        assert_eq!(
            PlayerEvent::from_activity(ActivityState::Playing, 0),
            Some(PlayerEvent::Play)
        );
        assert_eq!(
            PlayerEvent::from_activity(ActivityState::Loaded, 42),
            Some(PlayerEvent::Loaded { duration_ms: 42 })
        );
        assert_eq!(PlayerEvent::from_activity(ActivityState::Idle, 0), None);
        assert_eq!(PlayerEvent::from_activity(ActivityState::Error, 0), None);
    }
}
