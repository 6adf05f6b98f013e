//! Picture-in-Picture lifecycle controller
//!
//! Per-view state machine:
//!
//! ```text
//! Inactive -> EnteringFullscreenForPip -> Requesting -> Active -> Exiting -> Restoring -> Inactive
//!                                              |
//!                                              +-- entry failed --> Inactive
//! ```
//!
//! The controller only tracks state and decides layout; the
//! [`SessionFacade`](crate::SessionFacade) performs the platform calls.

use crate::{
    error::Error,
    types::{PipState, PipTrigger},
    Result,
};

/// Layout decision for a PiP entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPlan {
    /// The view must go fullscreen (silently) before requesting PiP
    pub needs_fullscreen: bool,
}

/// Layout decision for a PiP exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePlan {
    /// Return to the inline layout the view had before PiP
    pub exit_fullscreen: bool,
    pub trigger: PipTrigger,
}

#[derive(Debug, Clone)]
pub struct PipController {
    state: PipState,
    trigger: Option<PipTrigger>,
    was_fullscreen_before_pip: bool,
}

impl Default for PipController {
    fn default() -> Self {
        Self::new()
    }
}

impl PipController {
    pub fn new() -> Self {
        Self {
            state: PipState::Inactive,
            trigger: None,
            was_fullscreen_before_pip: false,
        }
    }

    pub fn state(&self) -> PipState {
        self.state
    }

    pub fn trigger(&self) -> Option<PipTrigger> {
        self.trigger
    }

    pub fn is_active(&self) -> bool {
        self.state == PipState::Active
    }

    /// Any state other than `Inactive`
    pub fn is_engaged(&self) -> bool {
        self.state != PipState::Inactive
    }

    pub fn was_fullscreen_before_pip(&self) -> bool {
        self.was_fullscreen_before_pip
    }

    /// Start an entry, capturing the current layout
    pub fn begin_entry(&mut self, trigger: PipTrigger, currently_fullscreen: bool) -> Result<EntryPlan> {
        self.expect(PipState::Inactive, "inactive")?;
        self.state = PipState::EnteringFullscreenForPip;
        self.trigger = Some(trigger);
        self.was_fullscreen_before_pip = currently_fullscreen;
        Ok(EntryPlan {
            needs_fullscreen: !currently_fullscreen,
        })
    }

    pub fn fullscreen_established(&mut self) -> Result<()> {
        self.expect(PipState::EnteringFullscreenForPip, "entering_fullscreen_for_pip")?;
        self.state = PipState::Requesting;
        Ok(())
    }

    pub fn activated(&mut self) -> Result<PipTrigger> {
        self.expect(PipState::Requesting, "requesting")?;
        self.state = PipState::Active;
        Ok(self.trigger.unwrap_or(PipTrigger::Manual))
    }

    /// Abandon an entry that never became active
    pub fn entry_failed(&mut self) -> RestorePlan {
        let plan = self.restore_plan();
        self.reset();
        plan
    }

    /// Begin leaving an active PiP (user request or OS)
    pub fn begin_exit(&mut self) -> Result<()> {
        self.expect(PipState::Active, "active")?;
        self.state = PipState::Exiting;
        Ok(())
    }

    /// Move to UI restoration; returns the layout to restore
    pub fn restoring(&mut self) -> Result<RestorePlan> {
        self.expect(PipState::Exiting, "exiting")?;
        self.state = PipState::Restoring;
        Ok(self.restore_plan())
    }

    pub fn finish(&mut self) -> Result<()> {
        self.expect(PipState::Restoring, "restoring")?;
        self.reset();
        Ok(())
    }

    fn restore_plan(&self) -> RestorePlan {
        RestorePlan {
            exit_fullscreen: !self.was_fullscreen_before_pip,
            trigger: self.trigger.unwrap_or(PipTrigger::Manual),
        }
    }

    fn reset(&mut self) {
        self.state = PipState::Inactive;
        self.trigger = None;
        self.was_fullscreen_before_pip = false;
    }

    fn expect(&self, state: PipState, expected: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidState {
                state: self.state.to_string(),
                expected,
            })
        }
    }
}
