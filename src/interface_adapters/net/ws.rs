// The one HTTP surface this service exposes: `GET /ws`, upgraded to a
// websocket and handed off to a read/write loop that bridges the socket to
// the peer's outbound channel and the command dispatcher.

use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{Instrument, info_span, warn};

use crate::domain::CloseReason;
use crate::interface_adapters::protocol::{self, DecodeError};
use crate::use_cases::dispatcher;
use crate::use_cases::lifecycle;
use crate::use_cases::state::{OutMsg, SharedCore};

pub async fn ws_handler(
    State(shared): State<SharedCore>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, shared))
}

async fn handle_socket(socket: WebSocket, shared: SharedCore) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutMsg>();

    let Some(peer_id) = lifecycle::on_connect(&shared, tx) else {
        // `on_connect` already queued the `ERR{TOO_MANY_PEERS}` frame and the
        // matching close onto `rx`; drain and forward both in order since the
        // read/write loop below never starts for a rejected connection.
        while let Some(outbound) = rx.recv().await {
            match outbound {
                OutMsg::Frame(frame) => {
                    let _ = sink.send(Message::Text(frame.to_text().into())).await;
                }
                OutMsg::Close(reason) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: reason.code(),
                            reason: reason.text().into(),
                        })))
                        .await;
                    break;
                }
                OutMsg::Ping => {}
            }
        }
        return;
    };

    async {
        loop {
            tokio::select! {
                outbound = rx.recv() => {
                    match outbound {
                        Some(OutMsg::Frame(frame)) => {
                            if sink.send(Message::Text(frame.to_text().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(OutMsg::Ping) => {
                            if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                                break;
                            }
                        }
                        Some(OutMsg::Close(reason)) => {
                            let _ = sink
                                .send(Message::Close(Some(CloseFrame {
                                    code: reason.code(),
                                    reason: reason.text().into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => match protocol::decode(&text) {
                            Ok(cmd) => dispatcher::dispatch(&shared, peer_id, cmd),
                            Err(DecodeError::Malformed) => {
                                warn!(peer_id, "malformed frame");
                                let core = shared.core.lock().unwrap();
                                if let Some(peer) = core.peers.get(&peer_id) {
                                    peer.report_err(CloseReason::BadProto);
                                }
                                // `report_err` queues only the ERR frame onto this
                                // peer's own channel; the connection is retained.
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(peer_id, %err, "socket read error");
                            break;
                        }
                    }
                }
            }
        }
    }
    .instrument(info_span!("conn", peer_id))
    .await;

    lifecycle::on_disconnect(&shared, peer_id);
}
