use crate::{
    config::ServerConfig, init_ai_handlers, routes::get_routes, session::SessionStore, AppState,
};
use dotenvy::dotenv;
use std::time::Duration;

pub async fn start_server() -> anyhow::Result<()> {
    // before tracing is set up, so RUST_LOG in .env is honoured
    match dotenv() {
        Ok(path) => eprintln!(".env read successfully from {}", path.display()),
        Err(e) => eprintln!("Could not load .env file: {e}"),
    };

    let config = ServerConfig::from_env()?;

    match &config.log_dir {
        Some(log_dir) => analytics_tracing::init_tracing_to_file(log_dir),
        None => analytics_tracing::init_tracing_to_stdout(),
    }
    tracing::debug!("config: {:?}", config);

    let state = AppState::new(init_ai_handlers(&config)?);
    spawn_session_sweeper(state.sessions.clone(), config.session_idle);

    let app = get_routes(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn spawn_session_sweeper(sessions: SessionStore, idle: Duration) {
    let period = (idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = sessions.evict_idle(idle);
            if evicted > 0 {
                tracing::debug!("evicted {} idle sessions, {} left", evicted, sessions.len());
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl-C received, shut down...");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, shut down...");
        },
    }
}
