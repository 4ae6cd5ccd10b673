//! Lifecycle wiring for the blackboard service.
//!
//! [`Runtime`] opens the store and the content cache from one
//! [`AppConfig`](blackboard_shared::AppConfig),
//! starts housekeeping, and tears everything down in order.

mod runtime;

pub use runtime::Runtime;
