// The live, mutable coordination state: every connected peer and every active
// lobby, guarded by one lock. Spec's concurrency model calls this out directly:
// a single dispatcher task, or equivalently here, a single lock guarding the
// directory plus each lobby, since command handling never awaits while holding
// it (every outbound send is a non-blocking push onto a peer's own channel).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domain::LobbyKind;
use crate::interface_adapters::protocol::{KickOut, ServerFrame};

/// Outbound traffic for one peer's transport. A single channel per peer carries
/// every kind of outbound event (dispatch replies, broadcasts from other peers'
/// commands, timer-driven closes) so that messages queued for one peer are
/// always delivered in submission order, per spec.md §5.
#[derive(Debug)]
pub enum OutMsg {
    Frame(ServerFrame),
    Close(crate::domain::CloseReason),
    Ping,
}

pub type OutTx = mpsc::UnboundedSender<OutMsg>;

#[derive(Debug)]
pub struct PeerEntry {
    pub id: u32,
    pub game: Option<String>,
    pub lobby_code: Option<String>,
    /// The peer's identifier within its lobby: 1 for the host, `id` otherwise.
    pub lobby_id: u32,
    pub is_host: bool,
    pub outbound: OutTx,
    pub early_timer: Option<JoinHandle<()>>,
    pub lifetime_timer: Option<JoinHandle<()>>,
}

impl PeerEntry {
    pub fn send(&self, msg: OutMsg) {
        // The receiving connection task may already be gone; dropping a queued
        // send for a closed socket is expected, not an error worth logging.
        let _ = self.outbound.send(msg);
    }

    pub fn send_frame(&self, frame: ServerFrame) {
        self.send(OutMsg::Frame(frame));
    }

    /// Reports a malformed frame, precondition violation, or not-found
    /// lookup: an in-band `ERR` frame naming the code and reason. The
    /// connection is retained — spec.md §7 error kinds 1, 2, and 4 all call
    /// for exactly this and nothing more.
    pub fn report_err(&self, reason: crate::domain::CloseReason) {
        self.send_frame(ServerFrame::err(reason));
    }

    /// Reports an error that also ends the connection: an in-band `ERR`
    /// frame immediately followed by closing the transport with that same
    /// code. Reserved for the close-triggering cases spec.md actually calls
    /// for (`UNKNOWN_PEER`, `TOO_MANY_PEERS`); every other `ERR` code
    /// retains the connection via [`PeerEntry::report_err`] instead.
    pub fn fail(&self, reason: crate::domain::CloseReason) {
        self.send_frame(ServerFrame::err(reason));
        self.send(OutMsg::Close(reason));
    }
}

#[derive(Debug)]
pub struct LobbyEntry {
    pub code: String,
    pub kind: LobbyKind,
    pub max_peers: u32,
    pub is_mesh: bool,
    pub tags: Option<String>,
    pub game: String,
    /// Ordered members; index 0 is always the host (invariant #2).
    pub peers: Vec<u32>,
    pub is_active: bool,
    pub queue_timer: Option<JoinHandle<()>>,
    pub reap_timer: Option<JoinHandle<()>>,
}

impl LobbyEntry {
    pub fn host_id(&self) -> Option<u32> {
        self.peers.first().copied()
    }

    pub fn is_full(&self) -> bool {
        self.peers.len() >= self.max_peers as usize
    }

    pub fn abort_timers(&mut self) {
        if let Some(h) = self.queue_timer.take() {
            h.abort();
        }
        if let Some(h) = self.reap_timer.take() {
            h.abort();
        }
    }
}

#[derive(Debug, Default)]
pub struct Core {
    pub peers: HashMap<u32, PeerEntry>,
    pub lobbies: HashMap<String, LobbyEntry>,
}

/// A member's identifier as seen inside its own lobby: the host is always `1`,
/// everyone else is addressed by their own peer id.
pub fn lobby_scoped_id(lobby: &LobbyEntry, peer_id: u32) -> u32 {
    if lobby.peers.first() == Some(&peer_id) {
        1
    } else {
        peer_id
    }
}

/// The inverse of [`lobby_scoped_id`]: resolves a `KICK`/`OFFER`/`ANSWER`/
/// `CANDIDATE` target id back to the peer id it names, or `None` if no current
/// member answers to it.
pub fn resolve_member(lobby: &LobbyEntry, scoped_id: u32) -> Option<u32> {
    if scoped_id == 1 {
        lobby.peers.first().copied()
    } else if lobby.peers.contains(&scoped_id) {
        Some(scoped_id)
    } else {
        None
    }
}

impl Core {
    /// Tears a lobby down the way a host departure does: detach every member's
    /// `lobby_code` first, then (optionally) notify them it's gone. `notify` is
    /// false for the "inactive lobby, peers are already being closed by START"
    /// case; true everywhere else (host self-kick, reap, active host departure).
    pub fn dissolve_lobby(&mut self, code: &str, notify: bool) {
        let Some(mut lobby) = self.lobbies.remove(code) else {
            return;
        };
        lobby.abort_timers();
        for &member in &lobby.peers {
            if let Some(p) = self.peers.get_mut(&member) {
                p.lobby_code = None;
            }
        }
        if notify {
            for &member in &lobby.peers {
                if let Some(p) = self.peers.get(&member) {
                    p.send_frame(ServerFrame::Kick(KickOut {
                        id: 1,
                        lobby_alive: false,
                    }));
                }
            }
        }
    }

    /// Removes one non-host-departure member (a kicked peer, or a peer kicking
    /// itself) from its lobby and notifies whoever is left. Never removes the
    /// host this way; host departures always go through [`Core::dissolve_lobby`].
    pub fn remove_member_and_notify(&mut self, code: &str, member: u32) {
        let Some(lobby) = self.lobbies.get_mut(code) else {
            return;
        };
        let scoped = lobby_scoped_id(lobby, member);
        lobby.peers.retain(|&id| id != member);
        if let Some(p) = self.peers.get_mut(&member) {
            p.lobby_code = None;
        }
        let remaining = lobby.peers.clone();
        if lobby.peers.is_empty() {
            self.lobbies.remove(code);
        }
        for id in remaining {
            if let Some(p) = self.peers.get(&id) {
                p.send_frame(ServerFrame::Kick(KickOut {
                    id: scoped,
                    lobby_alive: true,
                }));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub max_conns: usize,
    pub early_idle: Duration,
    pub lifetime_idle: Duration,
    pub lobby_reap_after: Duration,
    pub queue_probe_interval: Duration,
    pub ready_settle: Duration,
    pub start_stagger: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_conns: 4096,
            early_idle: Duration::from_secs(20),
            lifetime_idle: Duration::from_secs(45 * 60),
            lobby_reap_after: Duration::from_secs(600),
            queue_probe_interval: Duration::from_secs(10),
            ready_settle: Duration::from_secs(1),
            start_stagger: Duration::from_millis(250),
        }
    }
}

/// Process-wide shared state. Cheap to clone (it's an `Arc`); every connection
/// task and every timer task holds one.
#[derive(Debug)]
pub struct Shared {
    pub core: Mutex<Core>,
    pub settings: Settings,
}

pub type SharedCore = Arc<Shared>;

impl Shared {
    pub fn new(settings: Settings) -> SharedCore {
        Arc::new(Shared {
            core: Mutex::new(Core::default()),
            settings,
        })
    }

    pub fn peer_count(&self) -> usize {
        self.core.lock().unwrap().peers.len()
    }
}
