// Connection lifecycle: minting a peer on connect, tearing one down on
// disconnect, and every timer-driven deferral the dispatcher hands off to us
// (the join-announce yield, the READY settle delay, the START stagger, the
// per-lobby reap and queue-probe tickers, and the per-peer idle timers).
//
// Every spawned task re-acquires the lock and re-checks that its subject is
// still present before acting: the subject may have disconnected, been
// kicked, or had its lobby dissolved while the task was sleeping.

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::domain::CloseReason;
use crate::interface_adapters::protocol::{AddOut, ReadyOut, ServerFrame};
use crate::use_cases::state::{OutMsg, OutTx, PeerEntry, SharedCore};

/// Registers a freshly-accepted connection: mints a peer id, stores its
/// outbound channel, sends the `ID` handshake, and starts its two idle timers.
/// Returns `None` if the process-wide connection cap is already full.
pub fn on_connect(shared: &SharedCore, outbound: OutTx) -> Option<u32> {
    let mut core = shared.core.lock().unwrap();
    if core.peers.len() >= shared.settings.max_conns {
        let _ = outbound.send(OutMsg::Frame(ServerFrame::err(CloseReason::TooManyPeers)));
        let _ = outbound.send(OutMsg::Close(CloseReason::TooManyPeers));
        return None;
    }
    let id = crate::domain::ids::mint_peer_id(|id| core.peers.contains_key(&id));

    core.peers.insert(
        id,
        PeerEntry {
            id,
            game: None,
            lobby_code: None,
            lobby_id: 0,
            is_host: false,
            outbound: outbound.clone(),
            early_timer: None,
            lifetime_timer: None,
        },
    );
    let _ = outbound.send(OutMsg::Frame(ServerFrame::Id));

    let early = spawn_early_timer(shared, id);
    let lifetime = spawn_lifetime_timer(shared, id);
    if let Some(peer) = core.peers.get_mut(&id) {
        peer.early_timer = Some(early);
        peer.lifetime_timer = Some(lifetime);
    }
    Some(id)
}

/// Tears down everything associated with a peer whose transport just closed,
/// for whatever reason (client close, idle timeout, or a server-initiated
/// close instruction). Safe to call at most once per peer; the connection
/// task is responsible for that invariant.
pub fn on_disconnect(shared: &SharedCore, peer_id: u32) {
    let mut core = shared.core.lock().unwrap();
    let Some(peer) = core.peers.remove(&peer_id) else {
        return;
    };
    if let Some(h) = peer.early_timer {
        h.abort();
    }
    if let Some(h) = peer.lifetime_timer {
        h.abort();
    }
    let Some(code) = peer.lobby_code else {
        return;
    };
    let Some(lobby) = core.lobbies.get(&code) else {
        return;
    };
    if peer.is_host {
        let was_active = lobby.is_active;
        core.dissolve_lobby(&code, was_active);
    } else {
        core.remove_member_and_notify(&code, peer_id);
    }
}

fn spawn_early_timer(shared: &SharedCore, peer_id: u32) -> JoinHandle<()> {
    let shared = shared.clone();
    let delay = shared.settings.early_idle;
    tokio::spawn(async move {
        sleep(delay).await;
        let core = shared.core.lock().unwrap();
        if let Some(peer) = core.peers.get(&peer_id) {
            if peer.game.is_none() {
                peer.send(OutMsg::Close(CloseReason::IdleSocketConn));
            }
        }
    })
}

fn spawn_lifetime_timer(shared: &SharedCore, peer_id: u32) -> JoinHandle<()> {
    let shared = shared.clone();
    let delay = shared.settings.lifetime_idle;
    tokio::spawn(async move {
        sleep(delay).await;
        let core = shared.core.lock().unwrap();
        if let Some(peer) = core.peers.get(&peer_id) {
            peer.send(OutMsg::Close(CloseReason::IdleSocketConn));
        }
    })
}

pub fn spawn_reap_timer(shared: &SharedCore, code: String) -> JoinHandle<()> {
    let shared = shared.clone();
    let delay = shared.settings.lobby_reap_after;
    tokio::spawn(async move {
        sleep(delay).await;
        let mut core = shared.core.lock().unwrap();
        if core.lobbies.contains_key(&code) {
            core.dissolve_lobby(&code, true);
        }
    })
}

pub fn spawn_queue_probe(shared: &SharedCore, code: String) -> JoinHandle<()> {
    let shared = shared.clone();
    let interval = shared.settings.queue_probe_interval;
    tokio::spawn(async move {
        loop {
            sleep(interval).await;
            let core = shared.core.lock().unwrap();
            let Some(lobby) = core.lobbies.get(&code) else {
                return;
            };
            if lobby.is_active && lobby.is_full() {
                if let Some(host_id) = lobby.host_id() {
                    if let Some(host) = core.peers.get(&host_id) {
                        host.send_frame(ServerFrame::ReadyProbe);
                    }
                }
            }
        }
    })
}

/// The tiny yield between a JOIN reply and the mutual `ADD` notifications it
/// triggers, so the joining peer always observes its own join reply first.
pub fn spawn_join_announce(shared: &SharedCore, code: String, joined: u32) {
    let shared = shared.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        let core = shared.core.lock().unwrap();
        let Some(lobby) = core.lobbies.get(&code) else {
            return;
        };
        let Some(new_peer) = core.peers.get(&joined) else {
            return;
        };
        for &other in &lobby.peers {
            if other == joined {
                continue;
            }
            let other_scoped = crate::use_cases::state::lobby_scoped_id(lobby, other);
            let joined_scoped = crate::use_cases::state::lobby_scoped_id(lobby, joined);
            if let Some(other_peer) = core.peers.get(&other) {
                other_peer.send_frame(ServerFrame::Add(AddOut {
                    peer_id: joined_scoped,
                }));
            }
            new_peer.send_frame(ServerFrame::Add(AddOut {
                peer_id: other_scoped,
            }));
        }
    });
}

/// READY's settle delay: the host's fan-out (or single-target probe) is
/// deferred so every peer's acknowledgement has time to land first.
pub fn spawn_ready_settle(shared: &SharedCore, code: String, target: Option<u32>) {
    let shared = shared.clone();
    tokio::spawn(async move {
        sleep(shared.settings.ready_settle).await;
        let mut core = shared.core.lock().unwrap();
        let Some(lobby) = core.lobbies.get_mut(&code) else {
            return;
        };
        lobby.is_active = false;
        let peer_count = lobby.peers.len().saturating_sub(1);
        let non_host: Vec<u32> = lobby.peers.iter().skip(1).copied().collect();

        let recipients: Vec<u32> = match target.and_then(|t| crate::use_cases::state::resolve_member(lobby, t)) {
            Some(single) if non_host.contains(&single) => vec![single],
            Some(_) => return,
            None if target.is_some() => return,
            None => non_host,
        };
        for id in recipients {
            let scoped = crate::use_cases::state::lobby_scoped_id(lobby, id);
            if let Some(peer) = core.peers.get(&id) {
                peer.send_frame(ServerFrame::Ready(ReadyOut {
                    id: Some(scoped),
                    status: serde_json::Value::Null,
                    peer_count: Some(peer_count),
                }));
            }
        }
    });
}

/// START's staggered shutdown: non-host peers are closed first, the host
/// follows once the stagger elapses.
pub fn spawn_start_stagger(shared: &SharedCore, non_host: Vec<u32>, host_id: u32) {
    let shared = shared.clone();
    tokio::spawn(async move {
        sleep(shared.settings.start_stagger).await;
        let core = shared.core.lock().unwrap();
        for id in non_host {
            if let Some(peer) = core.peers.get(&id) {
                peer.send(OutMsg::Close(CloseReason::StartGame));
            }
        }
        if let Some(host) = core.peers.get(&host_id) {
            host.send_frame(ServerFrame::Start);
            host.send(OutMsg::Close(CloseReason::StartGame));
        }
    });
}
