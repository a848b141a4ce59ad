//! Class Controller Library
//!
//! Session coordination and participant state reconciliation for
//! coach-led live classes running over a vendor video transport:
//!
//! - Role-based join/create protocol keyed by the class topic
//! - One canonical participant map per session, fed by vendor events and
//!   corrected by periodic roster reconciliation
//! - Pagination with selective video subscription for large classes
//! - Primary/fallback provider switchover
//! - Session discovery registry (in-memory or Redis)
//!
//! # Architecture
//!
//! ```text
//! ClassRuntime (composition root)
//! ├── SessionCoordinatorActor ── mirrors ──> SessionDiscoveryService ──> KeyValueStore
//! ├── registry cleanup task
//! └── ClassSession (one per joined user)
//!     └── VideoServiceProvider
//!         └── VideoProviderAdapter (primary / fallback)
//!             └── SessionActor
//!                 ├── ParticipantStateReconciler <── PayloadNormalizer
//!                 └── VideoPaginationManager
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Coordinator and per-session actors
//! - [`class_session`] - UI-facing session facade
//! - [`config`] - Service configuration from environment
//! - [`discovery`] - Session registry and its stores
//! - [`errors`] - Error types with client error codes
//! - [`events`] - Typed event bus for UI subscribers
//! - [`provider`] - Vendor SDK seam, adapters and fallback orchestration

pub mod actors;
pub mod class_session;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod events;
pub mod normalizer;
pub mod observability;
pub mod pagination;
pub mod provider;
pub mod reconciler;
pub mod runtime;
pub mod tasks;
pub mod types;

pub use class_session::{ClassSession, JoinRequest};
pub use errors::CcError;
pub use runtime::ClassRuntime;
