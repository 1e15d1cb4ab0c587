// Pure lobby data: the kind enum and the listing DTO handed back by VIEW.
// The live, mutable lobby (peers, timers, channels) lives in use_cases::state;
// this module only carries values with no attached behavior or I/O.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LobbyKind {
    Private,
    Public,
    Queue,
}

/// One row of a `VIEW` reply's `lobbyList`.
#[derive(Debug, Clone, Serialize)]
pub struct LobbySummary {
    #[serde(rename = "lobbyCode")]
    pub lobby_code: String,
    #[serde(rename = "peerCount")]
    pub peer_count: usize,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "lobbyType")]
    pub lobby_type: LobbyKind,
    #[serde(rename = "maxPeers")]
    pub max_peers: u32,
    pub tags: Option<String>,
    #[serde(rename = "isMesh")]
    pub is_mesh: bool,
}
