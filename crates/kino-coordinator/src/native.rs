//! Native player handle interface
//!
//! The decode/render engine is an external collaborator. The coordinator only
//! sees it through [`NativePlayer`]; the [`SessionRegistry`](crate::SessionRegistry)
//! owns each handle and obtains new ones from a [`PlayerFactory`].

use crate::{events::NativeEvent, types::*, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use url::Url;

/// Opaque handle to a platform media engine
#[async_trait]
pub trait NativePlayer: Send + Sync {
    /// Replace the current item. Completes once the item is ready or failed.
    ///
    /// A failed load is reported through the returned error only;
    /// [`NativeEvent::Failed`] is reserved for items that fail after loading.
    async fn load(&self, url: &Url, headers: &HashMap<String, String>) -> Result<()>;

    fn play(&self);

    fn pause(&self);

    async fn seek(&self, position: Duration) -> Result<()>;

    fn set_rate(&self, rate: f64);

    fn set_volume(&self, volume: f64);

    fn position(&self) -> Duration;

    fn duration(&self) -> Duration;

    /// End of the buffered range ahead of the playhead
    fn buffered(&self) -> Duration;

    fn rate(&self) -> f64;

    fn is_playing(&self) -> bool;

    fn item_status(&self) -> ItemStatus;

    /// Decoded video size in pixels, if known
    fn natural_size(&self) -> Option<(u32, u32)>;

    /// Halt playback and drop the current item
    fn stop(&self);

    /// Free engine resources; the handle is unusable afterwards
    fn release(&self);

    /// Subscribe to raw engine signals
    fn subscribe(&self) -> broadcast::Receiver<NativeEvent>;
}

/// Allocates native handles for new sessions. Must not block on I/O.
pub trait PlayerFactory: Send + Sync {
    fn create(&self, session: SessionId) -> Arc<dyn NativePlayer>;
}

/// Milliseconds of a duration, saturating
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
