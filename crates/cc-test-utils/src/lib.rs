//! # CC Test Utilities
//!
//! Shared test utilities for the Class Controller.
//!
//! ## Modules
//!
//! - `fixtures` - Join requests, rosters, vendor payloads and a ready runtime
//! - `mock_store` - Registry store with failure injection
//!
//! ## Usage
//!
//! ```rust,ignore
//! use cc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let class = TestClass::new().with_max_participants(2).start();
//!     let coach = class.join(ParticipantRole::Coach, "Coach").await.unwrap();
//!     // ...
//! }
//! ```

pub mod fixtures;
pub mod mock_store;

pub use fixtures::*;
pub use mock_store::*;
