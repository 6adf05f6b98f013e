//! Kino Coordinator - Multi-view playback coordination for Kino
//!
//! This crate coordinates one logical playback session across any number of
//! transient UI attachments ("views"):
//! - Session registry: one native player handle per session id, with caches
//!   that outlive every view
//! - Media-control ownership: a single process-wide owner of the OS
//!   transport controls and Now-Playing metadata
//! - Picture-in-Picture lifecycle: manual and automatic entry, layout
//!   restoration, exactly-once stop delivery under view teardown
//! - Buffering debounce and change-only state projection per view
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Kino Coordinator                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐           │
//! │  │   Session    │  │  Ownership   │  │   Platform   │           │
//! │  │   Registry   │──│ Coordinator  │──│    Media     │           │
//! │  └──────┬───────┘  └──────────────┘  └──────┬───────┘           │
//! │         │                                   │                   │
//! │  ┌──────┴───────┐                    ┌──────┴───────┐           │
//! │  │   Session    │──── SessionSignal ─│   Session    │           │
//! │  │    Pump      │                    │   Facade     │ (per view)│
//! │  └──────────────┘                    └──────┬───────┘           │
//! │                                             │                   │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────┴───────┐           │
//! │  │  Buffering   │──│    State     │──│     PiP      │           │
//! │  │  Debouncer   │  │  Projection  │  │  Controller  │           │
//! │  └──────────────┘  └──────────────┘  └──────────────┘           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod error;
pub mod events;
pub mod facade;
pub mod native;
pub mod ownership;
pub mod pip;
pub mod platform;
pub mod projection;
pub mod quality;
pub mod registry;
pub mod sim;
pub mod types;

mod session;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use debounce::BufferingDebouncer;
pub use error::{Error, Result};
pub use events::{
    CommandReply, EventEnvelope, HostEvent, NativeEvent, PlayerCommand, PlayerEvent,
    SessionSignal, TransportCommand,
};
pub use facade::SessionFacade;
pub use native::{NativePlayer, PlayerFactory};
pub use ownership::{Owner, OwnershipCoordinator, Release};
pub use pip::PipController;
pub use platform::{PipRequest, PlatformMedia, ViewSurface};
pub use projection::StateProjection;
pub use quality::{derive_qualities, parse_qualities, HttpManifestFetcher, ManifestFetcher};
pub use registry::{ActivePip, SessionHandle, SessionRegistry};
pub use sim::{HeadlessPlatform, HeadlessSurface, SimulatedFactory, SimulatedPlayer};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
