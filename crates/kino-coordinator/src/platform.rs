//! Platform capability interfaces
//!
//! [`PlatformMedia`] covers the process-wide OS surfaces (PiP window,
//! transport controls, Now-Playing). [`ViewSurface`] covers what one
//! attachment renders into. Coordination logic never branches on platform.

use crate::{types::*, Result};
use async_trait::async_trait;

/// Parameters of a Picture-in-Picture request
#[derive(Debug, Clone, PartialEq)]
pub struct PipRequest {
    pub session: SessionId,
    pub view: ViewId,
    /// Screen region the PiP animation originates from
    pub source_rect: Rect,
    pub aspect_ratio: AspectRatio,
    pub show_native_controls: bool,
}

/// Process-wide OS media surfaces
#[async_trait]
pub trait PlatformMedia: Send + Sync {
    /// Whether this device/OS supports Picture-in-Picture at all
    fn supports_pip(&self) -> bool;

    /// Whether a PiP request for `session` would be accepted right now
    fn is_pip_possible(&self, session: SessionId) -> bool;

    /// Start PiP. `Error::NotPossibleYet` means "retry later".
    async fn request_pip(&self, request: &PipRequest) -> Result<()>;

    /// Close the PiP window showing `session`
    async fn exit_pip(&self, session: SessionId) -> Result<()>;

    fn supports_external_route(&self) -> bool;

    /// Install OS transport-control handlers that route to `view`
    fn register_transport_handlers(&self, view: ViewId);

    fn clear_transport_handlers(&self);

    fn publish_now_playing(&self, now_playing: &NowPlaying);

    fn clear_now_playing(&self);
}

/// Render surface and layout of a single attachment
pub trait ViewSurface: Send + Sync {
    fn is_fullscreen(&self) -> bool;

    fn set_fullscreen(&self, fullscreen: bool);

    fn set_controls_visible(&self, visible: bool);

    /// On-screen bounds of the video layer
    fn video_bounds(&self) -> Rect;

    /// Bounds of the whole screen
    fn screen_bounds(&self) -> Rect;

    /// Detach and reattach the render target to the decoder output
    fn reconnect(&self);
}
