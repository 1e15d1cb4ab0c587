// Framework bootstrap: tracing, configuration, listener, router.

use std::io::Result;
use std::net::SocketAddr;

use axum::{Router, routing::get};

use crate::frameworks::config;
use crate::interface_adapters::net::ws_handler;
use crate::use_cases::{Settings, Shared, SharedCore, keepalive};

fn init_runtime() {
    let _ = dotenvy::dotenv();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config::is_production() {
            tracing_subscriber::EnvFilter::new("warn")
        } else {
            tracing_subscriber::EnvFilter::new("info")
        }
    });

    let json = matches!(std::env::var("LOG_FORMAT").as_deref(), Ok("json"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .json()
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        let backtrace = std::backtrace::Backtrace::capture();
        tracing::error!(%info, ?backtrace, "panic");
    }));
}

fn settings_from_env() -> Settings {
    Settings {
        max_conns: config::max_conns(),
        early_idle: config::EARLY_IDLE,
        lifetime_idle: config::LIFETIME_IDLE,
        lobby_reap_after: config::lobby_reap_after(),
        queue_probe_interval: config::queue_probe_interval(),
        ready_settle: config::READY_SETTLE,
        start_stagger: config::START_STAGGER,
    }
}

pub fn build_state() -> SharedCore {
    Shared::new(settings_from_env())
}

pub async fn run(listener: tokio::net::TcpListener) -> Result<()> {
    let address = listener.local_addr()?;
    let state = build_state();
    keepalive::spawn(state.clone());

    let app = Router::new().route("/ws", get(ws_handler)).with_state(state);

    tracing::info!(%address, "listening");

    axum::serve(listener, app).await.inspect_err(|e| {
        tracing::error!(error = %e, "server error");
    })
}

pub async fn run_with_config() -> Result<()> {
    init_runtime();

    let address = SocketAddr::from(([0, 0, 0, 0], config::http_port()));

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .inspect_err(|e| {
            tracing::error!(%address, error = %e, "failed to bind");
        })?;

    run(listener).await
}
