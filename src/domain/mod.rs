// Domain layer: pure types and identifier minting. No I/O, no channels, no locks.

pub mod errors;
pub mod ids;
pub mod lobby;

pub use errors::CloseReason;
pub use lobby::{LobbyKind, LobbySummary};
