//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Cold → Building → Ready → Serving
//!                └→ Aborted (build failed, never binds)
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Each startup phase is its own type, so binding before a successful
//!   build does not type-check
//! - Shutdown has a grace period: connections still open afterwards are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{Phase, Ready, Serving, Startup, StartupError};
