// Orchestration layer: the shared coordination state, the command dispatcher,
// connection lifecycle, and the background tickers. No axum, no raw sockets —
// interface_adapters owns the wire; this module owns what happens to state
// because of it.

pub mod dispatcher;
pub mod keepalive;
pub mod lifecycle;
pub mod state;

pub use state::{Settings, Shared, SharedCore};
