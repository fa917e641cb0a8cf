//! # beacon-core
//!
//! Channel classification, presence tracking, and lifecycle coordination
//! for the Beacon realtime authorization layer.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ChannelClassifier** - Derives a channel's kind (public, private,
//!   presence) from its name
//! - **PresenceRegistry** - Tracks per-user channel occupancy and detects
//!   true join/leave transitions
//! - **ChannelCoordinator** - Orchestrates join, leave, and client-event
//!   flows against injected collaborators
//! - **Capability traits** - The transport, authenticator, and webhook
//!   seams the coordinator calls through
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │  Transport  │────▶│   Coordinator    │────▶│  Authenticator   │
//! └─────────────┘     └──────────────────┘     └──────────────────┘
//!                        │            │
//!                        ▼            ▼
//!                 ┌────────────┐  ┌────────────┐
//!                 │  Presence  │  │  Webhooks  │
//!                 └────────────┘  └────────────┘
//! ```
//!
//! Data flows one way per operation: transport event → coordinator →
//! classifier/authenticator/registry → webhook. The coordinator only calls
//! back into the transport to accept or reject a join and to relay client
//! events to peers.

pub mod classify;
pub mod coordinator;
pub mod event;
pub mod presence;
pub mod traits;

pub use classify::{ChannelClassifier, ChannelKind, ClassifierRules};
pub use coordinator::{ChannelCoordinator, JoinOutcome};
pub use event::{LifecycleEvent, LifecycleKind};
pub use presence::{JoinTransition, LeaveTransition, PresenceMember, PresenceRegistry};
pub use traits::{
    AuthResult, ChannelAuthenticator, ChannelTransport, ConnectionId, ConnectionInfo,
    LifecycleHook, NoopHook,
};
