//! Core types for Kino Coordinator

use serde::{Deserialize, Serialize};
use url::Url;

/// Caller-supplied identifier of a logical playback session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for SessionId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of one UI attachment (view) bound to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(pub i64);

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ViewId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Now-Playing metadata cached per session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub album: Option<String>,
    pub artwork_url: Option<String>,
}

/// One entry of a session's quality ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quality {
    /// Human-readable label ("720p", "Auto")
    pub label: String,
    /// Playlist URL for this quality
    pub url: Url,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Peak bandwidth in bits per second
    pub bitrate: Option<u64>,
    /// True for the adaptive entry pointing at the master playlist
    pub is_auto: bool,
}

impl Quality {
    /// Adaptive entry for a master playlist
    pub fn auto(url: Url) -> Self {
        Self {
            label: "Auto".to_string(),
            url,
            width: None,
            height: None,
            bitrate: None,
            is_auto: true,
        }
    }

    /// Label derived from resolution height, falling back to bitrate
    pub fn label_for(height: Option<u32>, bitrate: Option<u64>) -> String {
        match (height, bitrate) {
            (Some(h), _) => format!("{}p", h),
            (None, Some(b)) => format!("{}kbps", b / 1000),
            (None, None) => "Unknown".to_string(),
        }
    }
}

/// Picture-in-Picture behaviour, fixed by the view that creates the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipConfig {
    pub allows_pip: bool,
    pub auto_start_pip: bool,
    pub show_native_controls: bool,
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            allows_pip: true,
            auto_start_pip: false,
            show_native_controls: true,
        }
    }
}

/// Externally visible playback activity of a view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityState {
    Idle,
    Initializing,
    Initialized,
    Loading,
    Loaded,
    Playing,
    Paused,
    Buffering,
    Completed,
    Stopped,
    Error,
}

impl ActivityState {
    /// States that end a pending or visible buffering stall outright
    pub fn interrupts_buffering(&self) -> bool {
        matches!(
            self,
            ActivityState::Idle
                | ActivityState::Loading
                | ActivityState::Paused
                | ActivityState::Completed
                | ActivityState::Stopped
                | ActivityState::Error
        )
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActivityState::Idle => "idle",
            ActivityState::Initializing => "initializing",
            ActivityState::Initialized => "initialized",
            ActivityState::Loading => "loading",
            ActivityState::Loaded => "loaded",
            ActivityState::Playing => "playing",
            ActivityState::Paused => "paused",
            ActivityState::Buffering => "buffering",
            ActivityState::Completed => "completed",
            ActivityState::Stopped => "stopped",
            ActivityState::Error => "error",
        };
        f.write_str(name)
    }
}

/// What started a Picture-in-Picture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipTrigger {
    /// User-initiated
    Manual,
    /// Host lifecycle (backgrounding) initiated
    Automatic,
}

/// Per-view Picture-in-Picture lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PipState {
    Inactive,
    EnteringFullscreenForPip,
    Requesting,
    Active,
    Exiting,
    Restoring,
}

impl std::fmt::Display for PipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipState::Inactive => "inactive",
            PipState::EnteringFullscreenForPip => "entering_fullscreen_for_pip",
            PipState::Requesting => "requesting",
            PipState::Active => "active",
            PipState::Exiting => "exiting",
            PipState::Restoring => "restoring",
        };
        f.write_str(name)
    }
}

/// Native item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Unknown,
    ReadyToPlay,
    Failed,
}

/// Screen rectangle in points
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }
}

/// Width:height ratio hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const WIDESCREEN: AspectRatio = AspectRatio { width: 16, height: 9 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Natural size of the decoded video, or `fallback` when unknown or degenerate
    pub fn from_natural_size(size: Option<(u32, u32)>, fallback: AspectRatio) -> Self {
        match size {
            Some((w, h)) if w > 0 && h > 0 => Self::new(w, h),
            _ => fallback,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::WIDESCREEN
    }
}

/// Metadata published to the OS Now-Playing surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub media_info: MediaInfo,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub rate: f64,
}

/// Source most recently loaded into a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSource {
    pub url: Url,
    pub headers: std::collections::HashMap<String, String>,
}
