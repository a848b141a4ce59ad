//! Actor model for class session coordination.
//!
//! ```text
//! SessionCoordinatorActor (one per runtime)
//! └── owns session lifecycle, capacity and the registry mirror
//!
//! SessionActor (one per joined session, owned by a provider adapter)
//! ├── owns the canonical participant map (reconciler)
//! └── owns pagination and video subscriptions
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer**: each piece of state has one owning task; no locks
//! - **CancellationToken propagation**: evictions run on child tokens of the coordinator
//! - **Mailbox monitoring**: depth gauges with per-actor thresholds (see [`metrics`])
//!
//! # Modules
//!
//! - [`coordinator`] - `SessionCoordinatorActor`, role-based join/create protocol
//! - [`session`] - `SessionActor`, events, reconciliation and pagination for one session
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring and actor metrics

pub mod coordinator;
pub mod messages;
pub mod metrics;
pub mod session;

pub use coordinator::{CoordinatorConfig, SessionCoordinatorActor, SessionCoordinatorHandle};
pub use messages::{CoordinatorStatus, JoinEligibility};
pub use metrics::{ActorMetrics, ActorType, MailboxLevel, MailboxMonitor, MailboxThresholds};
pub use session::{SessionActor, SessionActorConfig, SessionActorHandle, SessionActorParams};
