use std::{env, time::Duration};

// Runtime/server constants, read once at startup.

pub fn http_port() -> u16 {
    env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
}

pub fn is_production() -> bool {
    matches!(env::var("NODE_ENV").as_deref(), Ok("production"))
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    let secs = env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default_secs);
    Duration::from_secs(secs)
}

pub fn max_conns() -> usize {
    env::var("MAX_CONNS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4096)
}

pub fn lobby_reap_after() -> Duration {
    env_duration_secs("LOBBY_REAP_SECS", 600)
}

pub fn queue_probe_interval() -> Duration {
    env_duration_secs("QUEUE_PROBE_SECS", 10)
}

pub const EARLY_IDLE: Duration = Duration::from_secs(20);
pub const LIFETIME_IDLE: Duration = Duration::from_secs(45 * 60);
pub const READY_SETTLE: Duration = Duration::from_secs(1);
pub const START_STAGGER: Duration = Duration::from_millis(250);
