#[tokio::main]
async fn main() {
    if let Err(e) = lobby_server::run_with_config().await {
        tracing::error!(error = %e, "fatal startup error");
        std::process::exit(1);
    }
}
