//! Media-control ownership
//!
//! The OS transport-control surface (notification / lock-screen controls and
//! Now-Playing metadata) is a single shared resource, so at most one view in
//! the whole process owns it, regardless of session. Every mutation of the
//! owner happens inside one critical section together with the matching
//! handler (re)registration, so concurrent callers never observe a half-applied
//! transfer.

use crate::{
    platform::PlatformMedia,
    types::{MediaInfo, NowPlaying, SessionId, ViewId},
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Current holder of the ownership token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub view: ViewId,
    pub session: SessionId,
}

/// Candidate that can take over ownership on release
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackTarget {
    pub view: ViewId,
    pub media_info: Option<MediaInfo>,
}

/// Outcome of [`OwnershipCoordinator::release_if_owner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    NotOwner,
    /// Handed to another view of the same session
    Transferred(ViewId),
    /// Owner cleared; OS controls left installed for an active PiP window
    RetainedForPip,
    /// Owner cleared along with OS controls and Now-Playing
    Cleared,
}

/// Guarded state: the owner plus a session whose controls outlived their
/// owner because its PiP window was still showing
#[derive(Debug, Default)]
struct Controls {
    owner: Option<Owner>,
    retained_for: Option<SessionId>,
}

pub struct OwnershipCoordinator {
    platform: Arc<dyn PlatformMedia>,
    controls: Mutex<Controls>,
}

impl OwnershipCoordinator {
    pub fn new(platform: Arc<dyn PlatformMedia>) -> Self {
        Self {
            platform,
            controls: Mutex::new(Controls::default()),
        }
    }

    /// Unconditionally make `view` of `session` the owner. Returns the
    /// previous owner.
    pub async fn try_become_owner(
        &self,
        view: ViewId,
        session: SessionId,
        now_playing: Option<&NowPlaying>,
    ) -> Option<Owner> {
        let mut controls = self.controls.lock().await;
        let claimed = Owner { view, session };
        let previous = controls.owner.replace(claimed);
        controls.retained_for = None;

        self.platform.clear_transport_handlers();
        self.platform.register_transport_handlers(view);
        if let Some(now_playing) = now_playing {
            self.platform.publish_now_playing(now_playing);
        }

        if previous != Some(claimed) {
            info!(view = %view, session = %session, previous = ?previous, "Media-control ownership transferred");
        }
        previous
    }

    pub async fn is_owner(&self, session: SessionId, view: ViewId) -> bool {
        self.controls.lock().await.owner == Some(Owner { view, session })
    }

    pub async fn owner(&self) -> Option<Owner> {
        self.controls.lock().await.owner
    }

    /// Publish Now-Playing metadata if `view` of `session` still owns the
    /// controls
    pub async fn publish_if_owner(
        &self,
        session: SessionId,
        view: ViewId,
        now_playing: &NowPlaying,
    ) -> bool {
        let controls = self.controls.lock().await;
        if controls.owner == Some(Owner { view, session }) {
            self.platform.publish_now_playing(now_playing);
            true
        } else {
            false
        }
    }

    /// Release ownership held by `view` of `session`.
    ///
    /// `fallback` is another view of the same session (already resolved by
    /// the caller). Transfer only happens when that session has media info to
    /// show. Without a transfer target the OS controls stay installed while the
    /// session's PiP window is visible, since removing them would leave the
    /// PiP controls dead; [`release_retained`] clears them once PiP ends.
    ///
    /// [`release_retained`]: OwnershipCoordinator::release_retained
    pub async fn release_if_owner(
        &self,
        session: SessionId,
        view: ViewId,
        fallback: Option<FallbackTarget>,
        is_pip_active_for_session: bool,
    ) -> Release {
        let mut controls = self.controls.lock().await;
        if controls.owner != Some(Owner { view, session }) {
            return Release::NotOwner;
        }

        if let Some(target) = fallback.filter(|t| t.view != view && t.media_info.is_some()) {
            controls.owner = Some(Owner {
                view: target.view,
                session,
            });
            self.platform.clear_transport_handlers();
            self.platform.register_transport_handlers(target.view);
            info!(from = %view, to = %target.view, session = %session, "Media-control ownership handed over");
            return Release::Transferred(target.view);
        }

        controls.owner = None;
        if is_pip_active_for_session {
            controls.retained_for = Some(session);
            debug!(view = %view, session = %session, "Owner released; controls kept for active PiP");
            return Release::RetainedForPip;
        }

        self.clear_platform();
        info!(view = %view, session = %session, "Media-control ownership released");
        Release::Cleared
    }

    /// Remove controls kept alive for `session`'s PiP window, unless
    /// someone claimed them in the meantime
    pub async fn release_retained(&self, session: SessionId) -> bool {
        let mut controls = self.controls.lock().await;
        if controls.owner.is_some() || controls.retained_for != Some(session) {
            return false;
        }
        controls.retained_for = None;
        self.clear_platform();
        info!(session = %session, "Controls retained for PiP released");
        true
    }

    /// Drop ownership, or retained controls, held by a disposed session
    pub async fn release_session(&self, session: SessionId) -> bool {
        let mut controls = self.controls.lock().await;
        let owned = controls.owner.is_some_and(|o| o.session == session);
        let retained = controls.owner.is_none() && controls.retained_for == Some(session);
        if !owned && !retained {
            return false;
        }
        controls.owner = None;
        controls.retained_for = None;
        self.clear_platform();
        info!(session = %session, "Media-control ownership released with session");
        true
    }

    fn clear_platform(&self) {
        self.platform.clear_transport_handlers();
        self.platform.clear_now_playing();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::HeadlessPlatform;

    fn coordinator() -> (Arc<HeadlessPlatform>, OwnershipCoordinator) {
        let platform = Arc::new(HeadlessPlatform::new());
        let ownership = OwnershipCoordinator::new(platform.clone());
        (platform, ownership)
    }

    fn now_playing(title: &str) -> NowPlaying {
        NowPlaying {
            media_info: MediaInfo {
                title: Some(title.to_string()),
                ..Default::default()
            },
            position_ms: 0,
            duration_ms: 60_000,
            rate: 1.0,
        }
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let (platform, ownership) = coordinator();
        ownership.try_become_owner(ViewId(1), SessionId(7), None).await;
        let previous = ownership.try_become_owner(ViewId(2), SessionId(8), None).await;

        assert_eq!(previous.map(|o| o.view), Some(ViewId(1)));
        assert!(!ownership.is_owner(SessionId(7), ViewId(1)).await);
        assert!(ownership.is_owner(SessionId(8), ViewId(2)).await);
        assert_eq!(platform.transport_view(), Some(ViewId(2)));
    }

    #[tokio::test]
    async fn test_release_by_non_owner_is_noop() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;

        assert_eq!(
            ownership.release_if_owner(SessionId(7), ViewId(2), None, false).await,
            Release::NotOwner
        );
        assert!(ownership.is_owner(SessionId(7), ViewId(1)).await);
        assert!(platform.now_playing().is_some());
    }

    #[tokio::test]
    async fn test_release_transfers_to_sibling_with_media_info() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;

        let fallback = FallbackTarget {
            view: ViewId(3),
            media_info: Some(now_playing("A").media_info),
        };
        assert_eq!(
            ownership
                .release_if_owner(SessionId(7), ViewId(1), Some(fallback), false)
                .await,
            Release::Transferred(ViewId(3))
        );
        assert_eq!(ownership.owner().await.map(|o| o.session), Some(SessionId(7)));
        assert_eq!(platform.transport_view(), Some(ViewId(3)));
        assert_eq!(platform.now_playing(), Some(now_playing("A")));
    }

    #[tokio::test]
    async fn test_release_without_media_info_does_not_transfer() {
        let (platform, ownership) = coordinator();
        ownership.try_become_owner(ViewId(1), SessionId(7), None).await;

        let fallback = FallbackTarget {
            view: ViewId(3),
            media_info: None,
        };
        assert_eq!(
            ownership
                .release_if_owner(SessionId(7), ViewId(1), Some(fallback), false)
                .await,
            Release::Cleared
        );
        assert_eq!(platform.transport_view(), None);
    }

    #[tokio::test]
    async fn test_release_keeps_controls_during_pip() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;
        let clears_before = platform.transport_clear_count();

        assert_eq!(
            ownership.release_if_owner(SessionId(7), ViewId(1), None, true).await,
            Release::RetainedForPip
        );
        assert!(ownership.owner().await.is_none());
        assert_eq!(platform.transport_view(), Some(ViewId(1)));
        assert_eq!(platform.transport_clear_count(), clears_before);
        assert_eq!(platform.now_playing(), Some(now_playing("A")));
    }

    #[tokio::test]
    async fn test_same_view_id_in_other_session_is_not_owner() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;

        assert!(!ownership.is_owner(SessionId(8), ViewId(1)).await);
        assert!(
            !ownership
                .publish_if_owner(SessionId(8), ViewId(1), &now_playing("B"))
                .await
        );
        assert_eq!(
            ownership.release_if_owner(SessionId(8), ViewId(1), None, false).await,
            Release::NotOwner
        );
        assert_eq!(platform.transport_view(), Some(ViewId(1)));
        assert_eq!(platform.now_playing(), Some(now_playing("A")));
    }

    #[tokio::test]
    async fn test_retained_controls_cleared_when_pip_ends() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;
        ownership.release_if_owner(SessionId(7), ViewId(1), None, true).await;

        assert!(!ownership.release_retained(SessionId(8)).await);
        assert_eq!(platform.transport_view(), Some(ViewId(1)));

        assert!(ownership.release_retained(SessionId(7)).await);
        assert_eq!(platform.transport_view(), None);
        assert!(platform.now_playing().is_none());
        assert!(!ownership.release_retained(SessionId(7)).await);
    }

    #[tokio::test]
    async fn test_new_owner_supersedes_retained_controls() {
        let (platform, ownership) = coordinator();
        ownership.try_become_owner(ViewId(1), SessionId(7), None).await;
        ownership.release_if_owner(SessionId(7), ViewId(1), None, true).await;
        ownership.try_become_owner(ViewId(4), SessionId(8), None).await;

        assert!(!ownership.release_retained(SessionId(7)).await);
        assert!(!ownership.release_session(SessionId(7)).await);
        assert_eq!(platform.transport_view(), Some(ViewId(4)));
    }

    #[tokio::test]
    async fn test_release_session_clears_retained_controls() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;
        ownership.release_if_owner(SessionId(7), ViewId(1), None, true).await;

        assert!(ownership.release_session(SessionId(7)).await);
        assert_eq!(platform.transport_view(), None);
        assert!(platform.now_playing().is_none());
    }

    #[tokio::test]
    async fn test_release_session() {
        let (platform, ownership) = coordinator();
        ownership
            .try_become_owner(ViewId(1), SessionId(7), Some(&now_playing("A")))
            .await;

        assert!(!ownership.release_session(SessionId(8)).await);
        assert!(ownership.release_session(SessionId(7)).await);
        assert!(platform.now_playing().is_none());
        assert_eq!(platform.transport_view(), None);
    }

    #[tokio::test]
    async fn test_concurrent_claims_leave_single_owner() {
        let (_platform, ownership) = coordinator();
        let ownership = Arc::new(ownership);

        let mut tasks = Vec::new();
        for id in 0..16 {
            let ownership = ownership.clone();
            tasks.push(tokio::spawn(async move {
                ownership
                    .try_become_owner(ViewId(id), SessionId(id % 3), None)
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut owners = 0;
        for id in 0..16 {
            if ownership.is_owner(SessionId(id % 3), ViewId(id)).await {
                owners += 1;
            }
        }
        assert_eq!(owners, 1);
    }
}
