use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled on the first interrupt (ctrl-c).
/// Long-running surfaces (the API server) watch it and drain gracefully.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let handler = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("interrupt received, shutting down");
                handler.cancel();
            }
            Err(error) => {
                tracing::error!(%error, "could not install interrupt handler");
            }
        }
    });
    token
}
