//! Actor-based polling
//!
//! A single poller actor drives the bridge. It owns the cycle loop and is
//! controlled through a command channel; everything else observes its
//! results through the shared [`ReadingsStore`](crate::snapshot::ReadingsStore).
//!
//! ```text
//!  config (ArcSwap) ──► PollerActor ──► fan-out: SensorClient × N
//!                           │                      │ join all
//!                           │◄─────────────────────┘
//!                           ├──► ReadingsStore (atomic swap)
//!                           └──► publish task per sensor ──► Bus
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc channel (`PollNow`, `Shutdown`)
//! 2. **Request/Response**: oneshot channel answering `PollNow`

pub mod messages;
pub mod poller;
