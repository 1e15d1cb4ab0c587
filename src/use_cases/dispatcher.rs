// The command dispatcher: one function per opcode, each implementing the
// contract from the external-interfaces table exactly. Every branch runs under
// a single lock acquisition; anything that must happen after a delay is handed
// off to a spawned task that re-acquires the lock once the delay has elapsed,
// re-checking that its subject still exists before acting.

use serde_json::Value;

use crate::domain::{CloseReason, LobbyKind};
use crate::interface_adapters::protocol::{
    AnswerOut, CandidateOut, ClientCommand, HostReply, JoinReply, OfferOut, QueueReply,
    ServerFrame, ViewReply, trunc_u32,
};
use crate::use_cases::state::{LobbyEntry, SharedCore, resolve_member};

pub fn dispatch(shared: &SharedCore, peer_id: u32, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Id(data) => handle_id(shared, peer_id, data.game),
        ClientCommand::Host(data) => handle_host(shared, peer_id, data),
        ClientCommand::Join(data) => handle_join(shared, peer_id, data),
        ClientCommand::Queue(data) => handle_queue(shared, peer_id, data),
        ClientCommand::View(data) => handle_view(shared, peer_id, data),
        ClientCommand::Kick(data) => handle_kick(shared, peer_id, data.id),
        ClientCommand::Offer(data) => {
            handle_relay(shared, peer_id, data.to_id, |from_id| {
                ServerFrame::Offer(OfferOut {
                    from_id,
                    offer: data.offer,
                })
            });
        }
        ClientCommand::Answer(data) => {
            handle_relay(shared, peer_id, data.to_id, |from_id| {
                ServerFrame::Answer(AnswerOut {
                    from_id,
                    answer: data.answer,
                })
            });
        }
        ClientCommand::Candidate(data) => {
            handle_relay(shared, peer_id, data.to_id, |from_id| {
                ServerFrame::Candidate(CandidateOut {
                    from_id,
                    media: data.media,
                    index: data.index.map(Value::from).unwrap_or(Value::Null),
                    sdp: data.sdp,
                })
            });
        }
        ClientCommand::Ready(data) => handle_ready(shared, peer_id, data),
        ClientCommand::Start => handle_start(shared, peer_id),
        ClientCommand::Unknown => {
            let core = shared.core.lock().unwrap();
            if let Some(p) = core.peers.get(&peer_id) {
                p.report_err(CloseReason::BadProto);
            }
        }
    }
}

fn handle_id(shared: &SharedCore, peer_id: u32, game: Option<String>) {
    let mut core = shared.core.lock().unwrap();
    let Some(peer) = core.peers.get_mut(&peer_id) else {
        return;
    };
    match game.filter(|g| !g.trim().is_empty()) {
        Some(game) => {
            peer.game = Some(game);
            if let Some(h) = peer.early_timer.take() {
                h.abort();
            }
        }
        None => peer.fail(CloseReason::UnknownPeer),
    }
}

fn handle_host(
    shared: &SharedCore,
    peer_id: u32,
    data: crate::interface_adapters::protocol::HostData,
) {
    let mut core = shared.core.lock().unwrap();
    let Some(game) = data.game.filter(|g| !g.trim().is_empty()) else {
        reply_err(&core, peer_id, CloseReason::BadHost);
        return;
    };
    let Some(max_peers) = data.max_peers.and_then(trunc_u32).filter(|&m| m >= 2) else {
        reply_err(&core, peer_id, CloseReason::BadHost);
        return;
    };

    let kind = if data.is_public.unwrap_or(false) {
        LobbyKind::Public
    } else {
        LobbyKind::Private
    };
    let is_mesh = data.is_mesh.unwrap_or(true);
    let code = crate::domain::ids::generate_lobby_code(|c| core.lobbies.contains_key(c));

    let reap = crate::use_cases::lifecycle::spawn_reap_timer(shared, code.clone());
    core.lobbies.insert(
        code.clone(),
        LobbyEntry {
            code: code.clone(),
            kind,
            max_peers,
            is_mesh,
            tags: data.tags,
            game,
            peers: vec![peer_id],
            is_active: true,
            queue_timer: None,
            reap_timer: Some(reap),
        },
    );

    if let Some(peer) = core.peers.get_mut(&peer_id) {
        peer.is_host = true;
        peer.lobby_id = 1;
        peer.lobby_code = Some(code.clone());
        peer.send_frame(ServerFrame::Host(HostReply {
            id: 1,
            lobby_code: code,
            is_mesh,
        }));
    }
}

fn handle_join(
    shared: &SharedCore,
    peer_id: u32,
    data: crate::interface_adapters::protocol::JoinData,
) {
    let mut core = shared.core.lock().unwrap();
    let Some(code) = data.lobby_code.filter(|c| !c.is_empty()) else {
        reply_err(&core, peer_id, CloseReason::BadJoin);
        return;
    };
    let Some(lobby) = core.lobbies.get_mut(&code) else {
        reply_err(&core, peer_id, CloseReason::LobbyNotFound);
        return;
    };
    if !lobby.is_active || lobby.is_full() {
        reply_err(&core, peer_id, CloseReason::LobbyNotFound);
        return;
    }
    lobby.peers.push(peer_id);
    let is_mesh = lobby.is_mesh;

    if let Some(peer) = core.peers.get_mut(&peer_id) {
        peer.is_host = false;
        peer.lobby_id = peer_id;
        peer.lobby_code = Some(code.clone());
        peer.send_frame(ServerFrame::Join(JoinReply {
            id: peer_id,
            is_mesh,
            lobby_code: code.clone(),
        }));
    }
    drop(core);
    crate::use_cases::lifecycle::spawn_join_announce(shared, code, peer_id);
}

fn handle_queue(
    shared: &SharedCore,
    peer_id: u32,
    data: crate::interface_adapters::protocol::QueueData,
) {
    let mut core = shared.core.lock().unwrap();
    let Some(game) = data.game.filter(|g| !g.trim().is_empty()) else {
        reply_err(&core, peer_id, CloseReason::BadQueue);
        return;
    };
    let Some(max_peers) = data.max_peers.and_then(trunc_u32) else {
        reply_err(&core, peer_id, CloseReason::BadQueue);
        return;
    };
    let is_mesh = data.is_mesh.unwrap_or(true);
    let tags = data.tags;

    let candidates: Vec<String> = core
        .lobbies
        .values()
        .filter(|l| {
            l.kind == LobbyKind::Queue
                && l.is_active
                && l.game == game
                && l.max_peers == max_peers
                && l.tags == tags
                && !l.is_full()
        })
        .map(|l| l.code.clone())
        .collect();

    if candidates.len() > 1 {
        let code = candidates[0].clone();
        let lobby = core.lobbies.get_mut(&code).expect("just matched");
        lobby.peers.push(peer_id);
        let lobby_is_mesh = lobby.is_mesh;

        if let Some(peer) = core.peers.get_mut(&peer_id) {
            peer.is_host = false;
            peer.lobby_id = peer_id;
            peer.lobby_code = Some(code.clone());
            peer.send_frame(ServerFrame::Queue(QueueReply {
                id: peer_id,
                lobby_code: code.clone(),
                is_mesh: lobby_is_mesh,
                is_host: false,
            }));
        }
        drop(core);
        crate::use_cases::lifecycle::spawn_join_announce(shared, code, peer_id);
    } else {
        let code = crate::domain::ids::generate_lobby_code(|c| core.lobbies.contains_key(c));
        let reap = crate::use_cases::lifecycle::spawn_reap_timer(shared, code.clone());
        let probe = crate::use_cases::lifecycle::spawn_queue_probe(shared, code.clone());
        core.lobbies.insert(
            code.clone(),
            LobbyEntry {
                code: code.clone(),
                kind: LobbyKind::Queue,
                max_peers,
                is_mesh,
                tags,
                game,
                peers: vec![peer_id],
                is_active: true,
                queue_timer: Some(probe),
                reap_timer: Some(reap),
            },
        );
        if let Some(peer) = core.peers.get_mut(&peer_id) {
            peer.is_host = true;
            peer.lobby_id = 1;
            peer.lobby_code = Some(code.clone());
            peer.send_frame(ServerFrame::Queue(QueueReply {
                id: 1,
                lobby_code: code,
                is_mesh,
                is_host: true,
            }));
        }
    }
}

fn handle_view(
    shared: &SharedCore,
    peer_id: u32,
    data: crate::interface_adapters::protocol::ViewData,
) {
    let core = shared.core.lock().unwrap();
    let Some(game) = data.game.filter(|g| !g.trim().is_empty()) else {
        reply_err(&core, peer_id, CloseReason::BadView);
        return;
    };

    let mut list: Vec<_> = if let Some(code) = data.lobby_code.filter(|c| !c.is_empty()) {
        core.lobbies
            .get(&code)
            .map(|l| summarize(l))
            .into_iter()
            .collect()
    } else {
        core.lobbies
            .values()
            .filter(|l| {
                l.game == game && l.kind == LobbyKind::Public && l.is_active && !l.is_full()
            })
            .map(summarize)
            .collect()
    };
    list.sort_by(|a, b| a.lobby_code.cmp(&b.lobby_code));

    if let Some(peer) = core.peers.get(&peer_id) {
        peer.send_frame(ServerFrame::View(ViewReply { lobby_list: list }));
    }
}

fn summarize(l: &LobbyEntry) -> crate::domain::LobbySummary {
    crate::domain::LobbySummary {
        lobby_code: l.code.clone(),
        peer_count: l.peers.len(),
        is_active: l.is_active,
        lobby_type: l.kind,
        max_peers: l.max_peers,
        tags: l.tags.clone(),
        is_mesh: l.is_mesh,
    }
}

fn handle_kick(shared: &SharedCore, peer_id: u32, target: Option<f64>) {
    let mut core = shared.core.lock().unwrap();
    let Some(code) = core.peers.get(&peer_id).and_then(|p| p.lobby_code.clone()) else {
        reply_err(&core, peer_id, CloseReason::BadMessage);
        return;
    };
    let Some(scoped_target) = target.and_then(trunc_u32) else {
        reply_err(&core, peer_id, CloseReason::BadMessage);
        return;
    };
    let Some(lobby) = core.lobbies.get(&code) else {
        return;
    };
    let Some(target_peer) = resolve_member(lobby, scoped_target) else {
        // No such member: a no-op, not an error.
        return;
    };
    let is_host = core.peers.get(&peer_id).map(|p| p.is_host).unwrap_or(false);

    if target_peer == peer_id {
        if is_host {
            core.dissolve_lobby(&code, true);
        } else {
            core.remove_member_and_notify(&code, peer_id);
        }
    } else if is_host {
        core.remove_member_and_notify(&code, target_peer);
    }
    // A non-host naming someone else has no authority; silently ignored.
}

fn handle_relay(
    shared: &SharedCore,
    peer_id: u32,
    to_id: Option<f64>,
    build: impl FnOnce(u32) -> ServerFrame,
) {
    let core = shared.core.lock().unwrap();
    let Some(peer) = core.peers.get(&peer_id) else {
        return;
    };
    let Some(code) = peer.lobby_code.clone() else {
        peer.report_err(CloseReason::BadMessage);
        return;
    };
    let from_id = peer.lobby_id;
    let Some(lobby) = core.lobbies.get(&code) else {
        peer.report_err(CloseReason::BadMessage);
        return;
    };
    let Some(scoped) = to_id.and_then(trunc_u32) else {
        peer.report_err(CloseReason::BadMessage);
        return;
    };
    let Some(dest) = resolve_member(lobby, scoped) else {
        peer.report_err(CloseReason::BadMessage);
        return;
    };
    if let Some(dest_peer) = core.peers.get(&dest) {
        dest_peer.send_frame(build(from_id));
    }
}

fn handle_ready(
    shared: &SharedCore,
    peer_id: u32,
    data: crate::interface_adapters::protocol::ReadyData,
) {
    let core = shared.core.lock().unwrap();
    let Some(peer) = core.peers.get(&peer_id) else {
        return;
    };
    let Some(code) = peer.lobby_code.clone() else {
        peer.report_err(CloseReason::BadMessage);
        return;
    };

    if peer.is_host {
        let target = data.id.and_then(trunc_u32);
        drop(core);
        crate::use_cases::lifecycle::spawn_ready_settle(shared, code, target);
    } else {
        let Some(lobby) = core.lobbies.get(&code) else {
            return;
        };
        let Some(host_id) = lobby.host_id() else {
            return;
        };
        if let Some(host) = core.peers.get(&host_id) {
            let raw = serde_json::json!({
                "id": data.id,
                "status": data.status,
                "peerCount": data.peer_count,
            });
            host.send_frame(ServerFrame::ReadyRaw(raw));
        }
    }
}

fn handle_start(shared: &SharedCore, peer_id: u32) {
    let mut core = shared.core.lock().unwrap();
    let Some(peer) = core.peers.get(&peer_id) else {
        return;
    };
    if !peer.is_host {
        return;
    }
    let Some(code) = peer.lobby_code.clone() else {
        return;
    };
    let Some(lobby) = core.lobbies.get_mut(&code) else {
        return;
    };
    lobby.is_active = false;
    let non_host: Vec<u32> = lobby.peers.iter().skip(1).copied().collect();
    let host_id = lobby.peers[0];

    for &id in &non_host {
        if let Some(p) = core.peers.get(&id) {
            p.send_frame(ServerFrame::Start);
        }
    }
    drop(core);
    crate::use_cases::lifecycle::spawn_start_stagger(shared, non_host, host_id);
}

fn reply_err(core: &crate::use_cases::state::Core, peer_id: u32, reason: CloseReason) {
    if let Some(peer) = core.peers.get(&peer_id) {
        peer.report_err(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface_adapters::protocol::QueueData;
    use crate::use_cases::lifecycle::on_connect;
    use crate::use_cases::state::{OutMsg, Settings, Shared};
    use tokio::sync::mpsc;

    fn new_peer(shared: &SharedCore) -> (u32, mpsc::UnboundedReceiver<OutMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = on_connect(shared, tx).unwrap();
        (id, rx)
    }

    fn queue_cmd(game: &str, max_peers: f64) -> QueueData {
        QueueData {
            game: Some(game.to_string()),
            max_peers: Some(max_peers),
            tags: None,
            is_mesh: None,
        }
    }

    #[tokio::test]
    async fn single_queue_match_still_allocates_a_new_lobby() {
        let shared = Shared::new(Settings::default());
        let (first, mut first_rx) = new_peer(&shared);
        handle_queue(&shared, first, queue_cmd("chess", 2.0));
        match first_rx.recv().await {
            Some(OutMsg::Frame(ServerFrame::Queue(q))) => assert!(q.is_host),
            other => panic!("expected QUEUE host reply, got {other:?}"),
        }

        let (second, mut second_rx) = new_peer(&shared);
        handle_queue(&shared, second, queue_cmd("chess", 2.0));
        match second_rx.recv().await {
            Some(OutMsg::Frame(ServerFrame::Queue(q))) => {
                assert!(q.is_host, "exactly one prior match must not be joined");
            }
            other => panic!("expected QUEUE host reply, got {other:?}"),
        }
        assert_eq!(shared.core.lock().unwrap().lobbies.len(), 2);
    }

    #[tokio::test]
    async fn two_queue_matches_join_the_first_as_non_host() {
        let shared = Shared::new(Settings::default());
        let (a, mut a_rx) = new_peer(&shared);
        let (b, mut b_rx) = new_peer(&shared);
        let (c, mut c_rx) = new_peer(&shared);
        handle_queue(&shared, a, queue_cmd("chess", 2.0));
        handle_queue(&shared, b, queue_cmd("chess", 2.0));
        let _ = a_rx.recv().await;
        let _ = b_rx.recv().await;

        handle_queue(&shared, c, queue_cmd("chess", 2.0));
        let _ = c_rx.recv().await;
        assert_eq!(shared.core.lock().unwrap().lobbies.len(), 2);
    }

    #[tokio::test]
    async fn view_results_are_sorted_by_lobby_code() {
        let shared = Shared::new(Settings::default());
        let (host_a, _rx_a) = new_peer(&shared);
        let (host_b, _rx_b) = new_peer(&shared);
        {
            let mut core = shared.core.lock().unwrap();
            for (code, host) in [("BBBBBB", host_a), ("AAAAAA", host_b)] {
                core.lobbies.insert(
                    code.to_string(),
                    LobbyEntry {
                        code: code.to_string(),
                        kind: LobbyKind::Public,
                        max_peers: 4,
                        is_mesh: true,
                        tags: None,
                        game: "chess".to_string(),
                        peers: vec![host],
                        is_active: true,
                        queue_timer: None,
                        reap_timer: None,
                    },
                );
            }
        }
        let (viewer, mut viewer_rx) = new_peer(&shared);
        handle_view(
            &shared,
            viewer,
            crate::interface_adapters::protocol::ViewData {
                game: Some("chess".to_string()),
                lobby_code: None,
            },
        );
        match viewer_rx.recv().await {
            Some(OutMsg::Frame(ServerFrame::View(v))) => {
                let codes: Vec<_> = v.lobby_list.iter().map(|l| l.lobby_code.as_str()).collect();
                assert_eq!(codes, vec!["AAAAAA", "BBBBBB"]);
            }
            other => panic!("expected VIEW reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn kicking_a_nonexistent_id_is_a_no_op() {
        let shared = Shared::new(Settings::default());
        let (host, mut host_rx) = new_peer(&shared);
        handle_host(
            &shared,
            host,
            crate::interface_adapters::protocol::HostData {
                game: Some("chess".to_string()),
                is_public: None,
                is_mesh: None,
                max_peers: Some(4.0),
                tags: None,
            },
        );
        let _ = host_rx.recv().await;

        handle_kick(&shared, host, Some(999.0));
        assert!(host_rx.try_recv().is_err());
        assert_eq!(shared.core.lock().unwrap().lobbies.len(), 1);
    }
}
