// Two background tickers that run for the life of the process: a 10s
// websocket ping to every live peer, and a 2min memory-usage log line.

use std::time::Duration;

use tracing::info;

use crate::use_cases::state::{OutMsg, SharedCore};

const PING_INTERVAL: Duration = Duration::from_secs(10);
const MEMORY_LOG_INTERVAL: Duration = Duration::from_secs(120);

pub fn spawn(shared: SharedCore) {
    spawn_ping_ticker(shared.clone());
    spawn_memory_ticker(shared);
}

fn spawn_ping_ticker(shared: SharedCore) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PING_INTERVAL);
        loop {
            tick.tick().await;
            let core = shared.core.lock().unwrap();
            for peer in core.peers.values() {
                peer.send(OutMsg::Ping);
            }
        }
    });
}

fn spawn_memory_ticker(shared: SharedCore) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(MEMORY_LOG_INTERVAL);
        loop {
            tick.tick().await;
            let peer_count = shared.peer_count();
            match process_rss_kb() {
                Some(rss_kb) => info!(rss_kb, peer_count, "memory usage"),
                None => info!(peer_count, "memory usage (rss unavailable)"),
            }
        }
    });
}

/// Resident set size of this process in kilobytes, read from `/proc/self/statm`.
/// Linux-only; returns `None` on any other platform or if the read fails.
fn process_rss_kb() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let rss_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size_kb = 4;
    Some(rss_pages * page_size_kb)
}
