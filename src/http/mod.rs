//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → head.rs (pre-read first request head)
//!     → dispatch.rs (classify)
//!         upgrade + tunnel prefix → upgrade.rs (raw socket to tunnel engine)
//!         upgrade elsewhere       → socket closed
//!         anything else           → server.rs (Axum pipeline)
//!             → middleware (encoding negotiation, compression, access gate)
//!             → static asset or render.rs
//!             → framing.rs (every later head on the connection is
//!               checked again; a late upgrade goes back to dispatch.rs)
//! ```

pub mod dispatch;
pub mod framing;
pub mod head;
pub mod middleware;
pub mod render;
pub mod server;
pub mod upgrade;

pub use dispatch::{DispatchTarget, Dispatcher};
pub use framing::HandoffStream;
pub use head::{CapturedHead, HeadError, RequestHead};
pub use render::{NotFoundRenderer, PageRenderer, UpstreamRenderer};
pub use server::{AppState, EdgeServer};
pub use upgrade::{DropEngine, RelayEngine, TunnelEngine};
