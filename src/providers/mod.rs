//! Dependency injection providers for service management.
//!
//! This module contains all providers for creating and managing system components
//! using the Dependency Injection pattern for loose coupling and testability.

pub mod app_state;
pub mod control;
pub mod status;
pub mod traits;

pub use app_state::AppStateProvider;
pub use control::ControlServiceProvider;
pub use status::StatusServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
